use super::{ServiceContext, steps};
use crate::{
    error::{AppError, AppResult},
    jobs::{JobDispatcher, JobKind},
    models::{
        BackupRecord, BackupSchedule, Host, Instance, InstanceStatus, ObjectTarget, StorageType,
    },
    remote::{RemoteCommand, RemoteSession, timeouts},
    storage::{ObjectStorage, ObjectUri, parse_object_uri},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// 一次清理中被清除的备份
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CleanedBackup {
    pub record_id: Uuid,
    pub schedule_id: Uuid,
    pub storage: StorageType,
}

/// 扫描过程中单项失败，不中断整个扫描
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SweepError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<Uuid>,
    pub error: String,
}

impl SweepError {
    fn for_record(record_id: Uuid, error: impl ToString) -> Self {
        Self {
            schedule_id: None,
            record_id: Some(record_id),
            host_id: None,
            error: error.to_string(),
        }
    }

    fn for_schedule(schedule_id: Uuid, error: impl ToString) -> Self {
        Self {
            schedule_id: Some(schedule_id),
            record_id: None,
            host_id: None,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RetentionReport {
    pub cleaned_at: DateTime<Utc>,
    pub cleaned_count: usize,
    pub cleaned: Vec<CleanedBackup>,
    pub errors: Vec<SweepError>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TriggeredBackup {
    pub schedule_id: Uuid,
    pub instance_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DueReport {
    pub checked_at: DateTime<Utc>,
    pub due_count: usize,
    pub triggered: Vec<TriggeredBackup>,
    pub errors: Vec<SweepError>,
}

/// 备份创建、恢复与周期扫描
#[derive(Clone)]
pub struct BackupEngine {
    ctx: ServiceContext,
    objects: Option<Arc<dyn ObjectStorage>>,
    /// 恢复步骤的总时限，须为补偿启动留出余量
    restore_budget: Duration,
}

/// 任务时限中预留给恢复失败后重新启动容器的时间
const RESTORE_COMPENSATION_MARGIN: Duration = Duration::from_secs(120);

impl BackupEngine {
    pub fn new(ctx: ServiceContext, objects: Option<Arc<dyn ObjectStorage>>) -> Self {
        let restore_budget = JobKind::RestoreBackup {
            record_id: Uuid::nil(),
        }
        .timeout()
        .saturating_sub(RESTORE_COMPENSATION_MARGIN);
        Self {
            ctx,
            objects,
            restore_budget,
        }
    }

    #[cfg(test)]
    fn with_restore_budget(mut self, budget: Duration) -> Self {
        self.restore_budget = budget;
        self
    }

    fn objects(&self) -> AppResult<&Arc<dyn ObjectStorage>> {
        self.objects
            .as_ref()
            .ok_or_else(|| AppError::config("未配置S3对象存储"))
    }

    pub async fn create(
        &self,
        instance_id: Uuid,
        schedule_id: Option<Uuid>,
    ) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let schedule = match schedule_id {
            Some(id) => self.ctx.store.get_schedule(id).await?,
            None => None,
        };
        let storage_type = schedule
            .as_ref()
            .map(|s| s.storage_type)
            .unwrap_or(StorageType::Local);
        let target = schedule.as_ref().and_then(BackupSchedule::object_target);

        let started_at = Utc::now();
        let record = self
            .ctx
            .store
            .create_backup_record(instance.id, schedule_id, storage_type, started_at)
            .await?;
        info!("开始备份实例 {} (记录 {})", instance.container_name, record.id);

        match self
            .create_steps(&host, &instance, target.as_ref(), started_at)
            .await
        {
            Ok((file_path, file_size_bytes)) => {
                self.ctx
                    .store
                    .complete_backup(record.id, &file_path, file_size_bytes, Utc::now())
                    .await?;
                info!("备份完成: {} ({:?} 字节)", file_path, file_size_bytes);
                Ok(json!({
                    "status": "success",
                    "storage_type": storage_type,
                    "file_path": file_path,
                    "file_size_bytes": file_size_bytes,
                }))
            }
            Err(e) => {
                error!("实例 {} 备份失败: {}", instance.container_name, e);
                if let Err(write_err) = self
                    .ctx
                    .store
                    .fail_backup(record.id, &e.to_string(), Utc::now())
                    .await
                {
                    error!("写入备份记录 {} 失败状态出错: {}", record.id, write_err);
                }
                Err(e)
            }
        }
    }

    /// 返回最终位置与大小
    async fn create_steps(
        &self,
        host: &Host,
        instance: &Instance,
        target: Option<&ObjectTarget>,
        started_at: DateTime<Utc>,
    ) -> AppResult<(String, Option<i64>)> {
        if target.is_some() {
            self.objects()?;
        }

        let session = self.ctx.open(host).await?;
        let session = session.as_ref();
        let name = &instance.container_name;
        let paths = self.ctx.layout.instance(name);

        steps::run_checked(
            session,
            "创建备份目录",
            &RemoteCommand::new("mkdir").args(["-p".to_string(), paths.backups()]),
            timeouts::QUICK,
        )
        .await?;

        let filename = bundle_filename(name, started_at);
        let bundle = format!("{}/{}", paths.backups(), filename);
        let dump_name = format!("{}_dump.sql", name);
        let dump = format!("/tmp/{}", dump_name);

        info!("导出数据库: {}", instance.pg_container_name);
        steps::run_checked(
            session,
            "pg_dump",
            &RemoteCommand::docker("exec")
                .args([instance.pg_container_name.as_str(), "pg_dumpall", "-U", "odoo"])
                .stdout_to(dump.as_str()),
            timeouts::DUMP,
        )
        .await?;

        steps::run_checked(
            session,
            "打包备份",
            &RemoteCommand::new("tar")
                .args(["-czf", bundle.as_str(), "-C", "/tmp", dump_name.as_str()])
                .args(["-C".to_string(), paths.data(), ".".to_string()]),
            timeouts::ARCHIVE,
        )
        .await?;
        steps::run_best_effort(
            session,
            &RemoteCommand::new("rm").args(["-f", dump.as_str()]),
            timeouts::QUICK,
        )
        .await;

        let stat = steps::run(
            session,
            &RemoteCommand::new("stat").args(["-c%s", bundle.as_str()]),
            timeouts::QUICK,
        )
        .await?;
        let size = parse_size(&stat.stdout);

        let Some(target) = target else {
            return Ok((bundle, size));
        };

        let uri = ObjectUri {
            bucket: target.bucket.clone(),
            key: target.object_key(&filename),
        };
        let size = self.ship_to_object_storage(session, &bundle, &uri).await?;
        steps::run_best_effort(
            session,
            &RemoteCommand::new("rm").args(["-f", bundle.as_str()]),
            timeouts::QUICK,
        )
        .await;
        info!("备份已上传至 {}，已删除主机副本", uri);
        Ok((uri.to_string(), Some(size)))
    }

    /// 经本地临时文件把主机上的备份包转存到对象存储，返回字节数
    async fn ship_to_object_storage(
        &self,
        session: &dyn RemoteSession,
        bundle: &str,
        uri: &ObjectUri,
    ) -> AppResult<i64> {
        let objects = self.objects()?;
        let staged = tempfile::NamedTempFile::new()?;
        session.download(bundle, staged.path()).await?;
        let size = tokio::fs::metadata(staged.path()).await?.len() as i64;
        objects.upload_file(&uri.bucket, &uri.key, staged.path()).await?;
        Ok(size)
    }

    pub async fn restore(&self, record_id: Uuid) -> AppResult<JsonValue> {
        let record = self
            .ctx
            .store
            .get_backup_record(record_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("备份记录 {}", record_id)))?;
        let location = record
            .restorable_path()
            .ok_or_else(|| AppError::invalid_state("备份记录当前不可恢复"))?
            .to_string();
        let instance = self.ctx.instance(record.instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;

        info!("从 {} 恢复实例 {}", location, instance.container_name);
        let steps = self.restore_steps(&host, &instance, &record, &location);
        let outcome = match tokio::time::timeout(self.restore_budget, steps).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Internal(anyhow::anyhow!(
                "恢复超过 {} 秒未完成",
                self.restore_budget.as_secs()
            ))),
        };
        match outcome {
            Ok(()) => Ok(json!({
                "status": "success",
                "message": format!("已从 {} 恢复", location),
                "record_id": record.id,
                "storage_type": record.storage_type,
            })),
            Err(e) => {
                error!("实例 {} 恢复失败: {}", instance.container_name, e);
                self.compensate_start(&host, &instance).await;
                Err(e)
            }
        }
    }

    async fn restore_steps(
        &self,
        host: &Host,
        instance: &Instance,
        record: &BackupRecord,
        location: &str,
    ) -> AppResult<()> {
        let session = self.ctx.open(host).await?;
        let session = session.as_ref();
        let name = &instance.container_name;
        let paths = self.ctx.layout.instance(name);

        let staged_from_objects = record.is_object_stored();
        let bundle = if staged_from_objects {
            let uri = parse_object_uri(location)?;
            let remote_path = format!("/tmp/{}_s3_restore.tar.gz", name);
            let staged = tempfile::NamedTempFile::new()?;
            self.objects()?
                .download_to_file(&uri.bucket, &uri.key, staged.path())
                .await?;
            session.upload(staged.path(), &remote_path).await?;
            remote_path
        } else {
            let exists = steps::run(
                session,
                &RemoteCommand::new("test").args(["-f", location]),
                timeouts::QUICK,
            )
            .await?;
            if !exists.success() {
                return Err(AppError::invalid_state(format!(
                    "备份文件在主机上不存在: {}",
                    location
                )));
            }
            location.to_string()
        };

        steps::run(
            session,
            &RemoteCommand::docker("stop").arg(name),
            timeouts::CONTROL,
        )
        .await?;

        let restore_dir = format!("/tmp/{}_restore", name);
        steps::run(
            session,
            &RemoteCommand::new("rm")
                .args(["-rf", restore_dir.as_str()])
                .and(RemoteCommand::new("mkdir").args(["-p", restore_dir.as_str()])),
            timeouts::QUICK,
        )
        .await?;
        steps::run_checked(
            session,
            "解压备份",
            &RemoteCommand::new("tar").args(["-xzf", bundle.as_str(), "-C", restore_dir.as_str()]),
            timeouts::ARCHIVE,
        )
        .await?;

        self.replay_database(session, instance, &restore_dir).await?;

        steps::run(
            session,
            &RemoteCommand::new("rm").args(["-rf".to_string(), paths.filestore()]),
            timeouts::QUICK,
        )
        .await?;
        let restored_filestore = format!("{}/filestore", restore_dir);
        let has_filestore = steps::run(
            session,
            &RemoteCommand::new("test").args(["-d", restored_filestore.as_str()]),
            timeouts::QUICK,
        )
        .await?;
        if has_filestore.success() {
            steps::run_checked(
                session,
                "恢复文件存储",
                &RemoteCommand::new("cp").args(["-a".to_string(), restored_filestore, paths.filestore()]),
                timeouts::ARCHIVE,
            )
            .await?;
        }

        steps::run_best_effort(
            session,
            &RemoteCommand::new("rm").args(["-rf", restore_dir.as_str()]),
            timeouts::QUICK,
        )
        .await;
        if staged_from_objects {
            steps::run_best_effort(
                session,
                &RemoteCommand::new("rm").args(["-f", bundle.as_str()]),
                timeouts::QUICK,
            )
            .await;
        }

        steps::run_checked(
            session,
            "启动Odoo容器",
            &RemoteCommand::docker("start").arg(name),
            timeouts::CONTROL,
        )
        .await?;
        info!("实例 {} 恢复完成", name);
        Ok(())
    }

    /// 断开其他连接、重建数据库并回放导出文件
    async fn replay_database(
        &self,
        session: &dyn RemoteSession,
        instance: &Instance,
        restore_dir: &str,
    ) -> AppResult<()> {
        let pg = instance.pg_container_name.as_str();
        for sql in [
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = 'odoo' AND pid <> pg_backend_pid();",
            "DROP DATABASE IF EXISTS odoo;",
            "CREATE DATABASE odoo OWNER odoo;",
        ] {
            steps::run_best_effort(session, &psql(pg, "postgres").args(["-c", sql]), timeouts::CONTROL)
                .await;
        }

        let dump = format!("{}/{}_dump.sql", restore_dir, instance.container_name);
        steps::run_checked(
            session,
            "复制导出文件",
            &RemoteCommand::docker("cp").args([dump, format!("{}:/tmp/restore.sql", pg)]),
            timeouts::ARCHIVE,
        )
        .await?;

        let replay = steps::run(
            session,
            &psql(pg, "odoo").args(["-f", "/tmp/restore.sql"]),
            timeouts::ARCHIVE,
        )
        .await?;
        if !replay.success() {
            warn!("回放导出文件返回非零 ({}): {}", replay.exit_code, replay.detail());
        }

        steps::run_best_effort(
            session,
            &RemoteCommand::docker("exec").args([pg, "rm", "-f", "/tmp/restore.sql"]),
            timeouts::QUICK,
        )
        .await;
        Ok(())
    }

    /// 用新会话尝试启动应用容器
    async fn compensate_start(&self, host: &Host, instance: &Instance) {
        match self.ctx.open(host).await {
            Ok(session) => {
                warn!("恢复失败，尝试重新启动 {}", instance.container_name);
                steps::run_best_effort(
                    session.as_ref(),
                    &RemoteCommand::docker("start").arg(&instance.container_name),
                    timeouts::CONTROL,
                )
                .await;
            }
            Err(e) => error!("恢复失败后无法连接主机 {} 启动容器: {}", host.name, e),
        }
    }

    /// 清理超过保留期的备份
    pub async fn retention_sweep(&self) -> AppResult<RetentionReport> {
        let now = Utc::now();
        let mut cleaned = Vec::new();
        let mut errors = Vec::new();

        for schedule in self.ctx.store.list_retention_schedules().await? {
            let Some(cutoff) = schedule.retention_cutoff(now) else {
                continue;
            };
            let expired = match self.ctx.store.list_expired_backups(schedule.id, cutoff).await {
                Ok(records) => records,
                Err(e) => {
                    errors.push(SweepError::for_schedule(schedule.id, e));
                    continue;
                }
            };
            if expired.is_empty() {
                continue;
            }

            let (object_stored, on_host): (Vec<_>, Vec<_>) =
                expired.into_iter().partition(BackupRecord::is_object_stored);

            for record in object_stored {
                match self.delete_object(&record).await {
                    Ok(()) => cleaned.push(CleanedBackup {
                        record_id: record.id,
                        schedule_id: schedule.id,
                        storage: StorageType::S3,
                    }),
                    Err(e) => {
                        error!("清理对象存储备份 {} 失败: {}", record.id, e);
                        errors.push(SweepError::for_record(record.id, e));
                    }
                }
            }

            if !on_host.is_empty() {
                self.clean_host_records(&schedule, on_host, &mut cleaned, &mut errors)
                    .await;
            }
        }

        info!("过期备份清理完成: 清理 {} 个，失败 {} 个", cleaned.len(), errors.len());
        Ok(RetentionReport {
            cleaned_at: now,
            cleaned_count: cleaned.len(),
            cleaned,
            errors,
        })
    }

    async fn delete_object(&self, record: &BackupRecord) -> AppResult<()> {
        let location = record.file_path.as_deref().unwrap_or_default();
        let uri = parse_object_uri(location)?;
        self.objects()?.delete(&uri.bucket, &uri.key).await?;
        self.ctx.store.clear_backup_location(record.id).await?;
        info!("已清理过期备份 {} ({})", record.id, uri);
        Ok(())
    }

    /// 同一策略的主机文件共用一个会话
    async fn clean_host_records(
        &self,
        schedule: &BackupSchedule,
        records: Vec<BackupRecord>,
        cleaned: &mut Vec<CleanedBackup>,
        errors: &mut Vec<SweepError>,
    ) {
        let host = match self.host_of_schedule(schedule).await {
            Ok(Some(host)) => host,
            Ok(None) => return,
            Err(e) => {
                errors.push(SweepError::for_schedule(schedule.id, e));
                return;
            }
        };
        let session = match self.ctx.open(&host).await {
            Ok(session) => session,
            Err(e) => {
                error!("清理备份时连接主机 {} 失败: {}", host.name, e);
                errors.push(SweepError {
                    schedule_id: Some(schedule.id),
                    record_id: None,
                    host_id: Some(host.id),
                    error: e.to_string(),
                });
                return;
            }
        };

        for record in records {
            let Some(path) = record.file_path.as_deref() else {
                continue;
            };
            let removed = async {
                steps::run_checked(
                    session.as_ref(),
                    "删除备份文件",
                    &RemoteCommand::new("rm").args(["-f", path]),
                    timeouts::QUICK,
                )
                .await?;
                self.ctx.store.clear_backup_location(record.id).await
            }
            .await;
            match removed {
                Ok(()) => {
                    info!("已清理过期备份 {} ({})", record.id, path);
                    cleaned.push(CleanedBackup {
                        record_id: record.id,
                        schedule_id: schedule.id,
                        storage: StorageType::Local,
                    });
                }
                Err(e) => {
                    error!("清理备份 {} 失败: {}", record.id, e);
                    errors.push(SweepError::for_record(record.id, e));
                }
            }
        }
    }

    async fn host_of_schedule(&self, schedule: &BackupSchedule) -> AppResult<Option<Host>> {
        let Some(instance) = self.ctx.store.get_instance(schedule.instance_id).await? else {
            return Ok(None);
        };
        self.ctx.store.get_host(instance.host_id).await
    }

    /// 投递到期的周期备份；投递后立即推进 next_run_at
    pub async fn due_sweep(&self, dispatcher: &dyn JobDispatcher) -> AppResult<DueReport> {
        let now = Utc::now();
        let due = self.ctx.store.list_due_schedules(now).await?;
        let mut triggered = Vec::new();
        let mut errors = Vec::new();

        for schedule in &due {
            match self.trigger(schedule, dispatcher, now).await {
                Ok(Some(job)) => triggered.push(job),
                Ok(None) => {}
                Err(e) => {
                    error!("触发策略 {} 的备份失败: {}", schedule.id, e);
                    errors.push(SweepError::for_schedule(schedule.id, e));
                }
            }
        }

        Ok(DueReport {
            checked_at: now,
            due_count: due.len(),
            triggered,
            errors,
        })
    }

    async fn trigger(
        &self,
        schedule: &BackupSchedule,
        dispatcher: &dyn JobDispatcher,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TriggeredBackup>> {
        let Some(instance) = self.ctx.store.get_instance(schedule.instance_id).await? else {
            warn!("策略 {} 关联的实例 {} 不存在，跳过", schedule.id, schedule.instance_id);
            return Ok(None);
        };
        if instance.status != InstanceStatus::Running {
            info!("实例 {} 未运行，跳过周期备份", instance.name);
            return Ok(None);
        }

        let job_id = dispatcher
            .dispatch(JobKind::CreateBackup {
                instance_id: instance.id,
                schedule_id: Some(schedule.id),
            })
            .await?;
        self.ctx
            .store
            .set_schedule_next_run(schedule.id, schedule.frequency.next_run_after(now))
            .await?;
        info!("已触发实例 {} 的周期备份 (策略 {}, 任务 {})", instance.name, schedule.id, job_id);

        Ok(Some(TriggeredBackup {
            schedule_id: schedule.id,
            instance_id: instance.id,
            job_id,
        }))
    }
}

pub fn bundle_filename(container_name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.tar.gz", container_name, at.format("%Y%m%d_%H%M%S"))
}

fn parse_size(stdout: &str) -> Option<i64> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

fn psql(pg_container: &str, database: &str) -> RemoteCommand {
    RemoteCommand::docker("exec").args([pg_container, "psql", "-U", "odoo", "-d", database])
}
