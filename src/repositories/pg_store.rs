use super::OrchestratorStore;
use crate::{
    error::{AppError, AppResult},
    models::{
        BackupRecord, BackupSchedule, BackupStatus, Domain, DomainStatus, GitRepo, Host,
        HostProbe, HostStatus, Instance, InstanceNames, InstanceStatus, JobRecord, JobStatus,
        NewInstance, SslStatus, StorageType,
    },
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::str::FromStr;
use uuid::Uuid;

/// PostgreSQL 实现（原生 sqlx 查询，避免编译期宏依赖数据库）
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn text_column<T>(row: &PgRow, column: &str) -> AppResult<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(column);
    raw.parse::<T>()
        .map_err(|e| AppError::service_unavailable(format!("{} 列数据无效: {}", column, e)))
}

fn optional_text_column<T>(row: &PgRow, column: &str) -> AppResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.get(column);
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| AppError::service_unavailable(format!("{} 列数据无效: {}", column, e)))
    })
    .transpose()
}

fn port_column(row: &PgRow, column: &str) -> AppResult<u16> {
    let raw: i32 = row.get(column);
    u16::try_from(raw)
        .map_err(|_| AppError::service_unavailable(format!("{} 端口超出范围: {}", column, raw)))
}

fn host_from_row(row: &PgRow) -> AppResult<Host> {
    Ok(Host {
        id: row.get("id"),
        name: row.get("name"),
        address: row.get("address"),
        port: port_column(row, "port")?,
        ssh_user: row.get("ssh_user"),
        ssh_private_key: row.get("ssh_private_key"),
        host_key_sha256: row.get("host_key_sha256"),
        status: text_column(row, "status")?,
        last_connected_at: row.get("last_connected_at"),
        os_version: row.get("os_version"),
        cpu_cores: row.get("cpu_cores"),
        ram_total_bytes: row.get("ram_total_bytes"),
        disk_total_bytes: row.get("disk_total_bytes"),
        docker_version: row.get("docker_version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn instance_from_row(row: &PgRow) -> AppResult<Instance> {
    Ok(Instance {
        id: row.get("id"),
        host_id: row.get("host_id"),
        name: row.get("name"),
        odoo_version: row.get("odoo_version"),
        edition: row.get("edition"),
        container_name: row.get("container_name"),
        pg_container_name: row.get("pg_container_name"),
        network_name: row.get("network_name"),
        host_port: port_column(row, "host_port")?,
        status: text_column(row, "status")?,
        container_id: row.get("container_id"),
        odoo_config: row.get("odoo_config"),
        addons_path: row.get("addons_path"),
        pg_password: row.get("pg_password"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn domain_from_row(row: &PgRow) -> AppResult<Domain> {
    Ok(Domain {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        domain_name: row.get("domain_name"),
        status: text_column(row, "status")?,
        ssl_status: text_column(row, "ssl_status")?,
        ssl_expires_at: row.get("ssl_expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn schedule_from_row(row: &PgRow) -> AppResult<BackupSchedule> {
    Ok(BackupSchedule {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        frequency: text_column(row, "frequency")?,
        retention_days: row.get("retention_days"),
        storage_type: text_column(row, "storage_type")?,
        s3_bucket: row.get("s3_bucket"),
        s3_prefix: row.get("s3_prefix"),
        is_active: row.get("is_active"),
        next_run_at: row.get("next_run_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn backup_from_row(row: &PgRow) -> AppResult<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        schedule_id: row.get("schedule_id"),
        file_path: row.get("file_path"),
        file_size_bytes: row.get("file_size_bytes"),
        storage_type: text_column(row, "storage_type")?,
        status: text_column(row, "status")?,
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn git_repo_from_row(row: &PgRow) -> AppResult<GitRepo> {
    Ok(GitRepo {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        repo_url: row.get("repo_url"),
        branch: row.get("branch"),
        deploy_key: row.get("deploy_key"),
        last_deployed_at: row.get("last_deployed_at"),
        last_commit_sha: row.get("last_commit_sha"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn job_from_row(row: &PgRow) -> AppResult<JobRecord> {
    Ok(JobRecord {
        id: row.get("id"),
        kind: row.get("kind"),
        target_id: row.get("target_id"),
        target_type: optional_text_column(row, "target_type")?,
        status: text_column(row, "status")?,
        attempts: row.get("attempts"),
        params: row.get("params"),
        result: row.get("result"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait::async_trait]
impl OrchestratorStore for PgStore {
    async fn get_host(&self, id: Uuid) -> AppResult<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(host_from_row).transpose()
    }

    async fn update_host_status(
        &self,
        id: Uuid,
        status: HostStatus,
        connected_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE hosts
            SET status = $2,
                last_connected_at = COALESCE($3, last_connected_at),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(connected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_host_probe(
        &self,
        id: Uuid,
        probe: &HostProbe,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE hosts
            SET os_version = $2,
                cpu_cores = $3,
                ram_total_bytes = $4,
                disk_total_bytes = $5,
                docker_version = $6,
                status = 'connected',
                last_connected_at = $7,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&probe.os_version)
        .bind(probe.cpu_cores)
        .bind(probe.ram_total_bytes)
        .bind(probe.disk_total_bytes)
        .bind(&probe.docker_version)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_host_docker_version(&self, id: Uuid, version: &str) -> AppResult<()> {
        sqlx::query("UPDATE hosts SET docker_version = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_instance(
        &self,
        new: &NewInstance,
        names: &InstanceNames,
        addons_path: &str,
    ) -> AppResult<Instance> {
        let row = sqlx::query(
            r#"
            INSERT INTO instances
            (id, host_id, name, odoo_version, edition, container_name, pg_container_name,
             network_name, host_port, status, odoo_config, addons_path, pg_password,
             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.host_id)
        .bind(&new.name)
        .bind(&new.odoo_version)
        .bind(&new.edition)
        .bind(&names.container_name)
        .bind(&names.pg_container_name)
        .bind(&names.network_name)
        .bind(new.host_port as i32)
        .bind(&new.odoo_config)
        .bind(addons_path)
        .bind(&new.pg_password)
        .fetch_one(&self.pool)
        .await?;
        instance_from_row(&row)
    }

    async fn get_instance(&self, id: Uuid) -> AppResult<Option<Instance>> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn set_instance_status(&self, id: Uuid, status: InstanceStatus) -> AppResult<()> {
        sqlx::query("UPDATE instances SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_instance_running(&self, id: Uuid, container_id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE instances SET status = 'running', container_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(container_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_instance_config(&self, id: Uuid, overrides_json: &str) -> AppResult<()> {
        sqlx::query("UPDATE instances SET odoo_config = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(overrides_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_instance(&self, id: Uuid) -> AppResult<bool> {
        // 依赖表通过 ON DELETE CASCADE 清理
        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_domain(&self, id: Uuid) -> AppResult<Option<Domain>> {
        let row = sqlx::query("SELECT * FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(domain_from_row).transpose()
    }

    async fn set_domain_status(&self, id: Uuid, status: DomainStatus) -> AppResult<()> {
        sqlx::query("UPDATE domains SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_domain_ssl(
        &self,
        id: Uuid,
        status: SslStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE domains
            SET ssl_status = $2,
                ssl_expires_at = COALESCE($3, ssl_expires_at),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> AppResult<Option<BackupSchedule>> {
        let row = sqlx::query("SELECT * FROM backup_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BackupSchedule>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM backup_schedules
            WHERE is_active = TRUE AND next_run_at IS NOT NULL AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn list_retention_schedules(&self) -> AppResult<Vec<BackupSchedule>> {
        let rows = sqlx::query("SELECT * FROM backup_schedules WHERE retention_days > 0")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn set_schedule_next_run(&self, id: Uuid, next_run_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE backup_schedules SET next_run_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_backup_record(
        &self,
        instance_id: Uuid,
        schedule_id: Option<Uuid>,
        storage_type: StorageType,
        started_at: DateTime<Utc>,
    ) -> AppResult<BackupRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO backup_records
            (id, instance_id, schedule_id, storage_type, status, started_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'running', $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(instance_id)
        .bind(schedule_id)
        .bind(storage_type.as_str())
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;
        backup_from_row(&row)
    }

    async fn get_backup_record(&self, id: Uuid) -> AppResult<Option<BackupRecord>> {
        let row = sqlx::query("SELECT * FROM backup_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(backup_from_row).transpose()
    }

    async fn complete_backup(
        &self,
        id: Uuid,
        file_path: &str,
        file_size_bytes: Option<i64>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE backup_records
            SET status = 'success', file_path = $2, file_size_bytes = $3,
                completed_at = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(file_path)
        .bind(file_size_bytes)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_backup(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE backup_records
            SET status = 'failed', error_message = $2, completed_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_expired_backups(
        &self,
        schedule_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM backup_records
            WHERE schedule_id = $1
              AND status = 'success'
              AND created_at < $2
              AND file_path IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(schedule_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn clear_backup_location(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE backup_records SET file_path = NULL, file_size_bytes = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_backups_in_status(
        &self,
        status: BackupStatus,
        started_before: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM backup_records WHERE status = $1 AND COALESCE(started_at, created_at) < $2",
        )
        .bind(status.as_str())
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn get_git_repo(&self, id: Uuid) -> AppResult<Option<GitRepo>> {
        let row = sqlx::query("SELECT * FROM git_repos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(git_repo_from_row).transpose()
    }

    async fn record_git_deploy(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE git_repos
            SET last_commit_sha = $2, last_deployed_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(commit)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_job(&self, record: &JobRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_records
            (id, kind, target_id, target_type, status, attempts, params, result,
             created_at, started_at, completed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.kind)
        .bind(record.target_id)
        .bind(record.target_type.map(|t| t.as_str()))
        .bind(record.status.as_str())
        .bind(record.attempts)
        .bind(&record.params)
        .bind(&record.result)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM job_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn mark_job_running(
        &self,
        id: Uuid,
        attempt: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE job_records
            SET status = 'running', attempts = $2, started_at = $3, updated_at = $3
            WHERE id = $1 AND status NOT IN ('success', 'failed')
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn mark_job_retrying(
        &self,
        id: Uuid,
        result: &JsonValue,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE job_records
            SET status = 'pending', result = $2, updated_at = $3
            WHERE id = $1 AND status NOT IN ('success', 'failed')
            "#,
        )
        .bind(id)
        .bind(result)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        result: &JsonValue,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE job_records
            SET status = $2, result = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND status NOT IN ('success', 'failed')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn list_jobs(
        &self,
        target_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<JobRecord>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_records WHERE ($1::uuid IS NULL OR target_id = $1)",
        )
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM job_records
            WHERE ($1::uuid IS NULL OR target_id = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(target_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(job_from_row).collect::<AppResult<Vec<_>>>()?;
        Ok((jobs, total))
    }

    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM job_records WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC",
        )
        .bind(status.as_str())
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }
}
