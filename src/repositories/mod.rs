//! 记录存储接口
//!
//! 每个方法都是一次独立提交的写入；任务中途失败时，之前步骤的写入保持有效。

pub mod pg_store;

#[cfg(test)]
#[cfg(test)]
pub mod memory;

pub use pg_store::PgStore;

use crate::{
    error::AppResult,
    models::{
        BackupRecord, BackupSchedule, BackupStatus, Domain, DomainStatus, GitRepo, Host,
        HostProbe, HostStatus, Instance, InstanceNames, InstanceStatus, JobRecord, JobStatus,
        NewInstance, SslStatus, StorageType,
    },
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait OrchestratorStore: Send + Sync {
    // ---- 主机 ----
    async fn get_host(&self, id: Uuid) -> AppResult<Option<Host>>;

    async fn update_host_status(
        &self,
        id: Uuid,
        status: HostStatus,
        connected_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    /// 缓存探测结果，同时标记主机为已连接
    async fn save_host_probe(&self, id: Uuid, probe: &HostProbe, at: DateTime<Utc>)
    -> AppResult<()>;

    async fn set_host_docker_version(&self, id: Uuid, version: &str) -> AppResult<()>;

    // ---- 实例 ----
    async fn create_instance(
        &self,
        new: &NewInstance,
        names: &InstanceNames,
        addons_path: &str,
    ) -> AppResult<Instance>;

    async fn get_instance(&self, id: Uuid) -> AppResult<Option<Instance>>;

    async fn set_instance_status(&self, id: Uuid, status: InstanceStatus) -> AppResult<()>;

    /// 部署完成：状态 running 并记录容器ID
    async fn mark_instance_running(&self, id: Uuid, container_id: &str) -> AppResult<()>;

    async fn set_instance_config(&self, id: Uuid, overrides_json: &str) -> AppResult<()>;

    /// 删除实例，级联删除域名、备份策略、备份记录与仓库
    async fn delete_instance(&self, id: Uuid) -> AppResult<bool>;

    // ---- 域名 ----
    async fn get_domain(&self, id: Uuid) -> AppResult<Option<Domain>>;

    async fn set_domain_status(&self, id: Uuid, status: DomainStatus) -> AppResult<()>;

    async fn set_domain_ssl(
        &self,
        id: Uuid,
        status: SslStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    // ---- 备份策略 ----
    async fn get_schedule(&self, id: Uuid) -> AppResult<Option<BackupSchedule>>;

    /// 启用且 next_run_at <= now 的策略
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BackupSchedule>>;

    /// retention_days > 0 的策略
    async fn list_retention_schedules(&self) -> AppResult<Vec<BackupSchedule>>;

    async fn set_schedule_next_run(&self, id: Uuid, next_run_at: DateTime<Utc>) -> AppResult<()>;

    // ---- 备份记录 ----
    async fn create_backup_record(
        &self,
        instance_id: Uuid,
        schedule_id: Option<Uuid>,
        storage_type: StorageType,
        started_at: DateTime<Utc>,
    ) -> AppResult<BackupRecord>;

    async fn get_backup_record(&self, id: Uuid) -> AppResult<Option<BackupRecord>>;

    async fn complete_backup(
        &self,
        id: Uuid,
        file_path: &str,
        file_size_bytes: Option<i64>,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn fail_backup(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> AppResult<()>;

    /// 某策略下成功、早于 cutoff 且仍有存放位置的备份
    async fn list_expired_backups(
        &self,
        schedule_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>>;

    async fn clear_backup_location(&self, id: Uuid) -> AppResult<()>;

    async fn list_backups_in_status(
        &self,
        status: BackupStatus,
        started_before: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>>;

    // ---- Git仓库 ----
    async fn get_git_repo(&self, id: Uuid) -> AppResult<Option<GitRepo>>;

    async fn record_git_deploy(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> AppResult<()>;

    // ---- 任务记录 ----
    async fn insert_job(&self, record: &JobRecord) -> AppResult<()>;

    async fn get_job(&self, id: Uuid) -> AppResult<Option<JobRecord>>;

    /// 认领任务；已是终态时不修改并返回 false
    async fn mark_job_running(&self, id: Uuid, attempt: i32, at: DateTime<Utc>)
    -> AppResult<bool>;

    /// 等待重试：状态回到 pending
    async fn mark_job_retrying(&self, id: Uuid, result: &JsonValue, at: DateTime<Utc>)
    -> AppResult<()>;

    /// 写入终态；已是终态时不覆盖并返回 false
    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        result: &JsonValue,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    async fn list_jobs(
        &self,
        target_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<JobRecord>, i64)>;

    /// 指定状态且 updated_at 早于 `before` 的任务
    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<JobRecord>>;
}
