use crate::{
    config::RecoveryConfig,
    error::AppResult,
    jobs::JobTracker,
    models::{BackupStatus, JobStatus},
    repositories::OrchestratorStore,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

/// 状态对账服务
/// 负责将进程重启或 worker 丢失后卡住的记录置为失败
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn OrchestratorStore>,
    tracker: JobTracker,
    config: RecoveryConfig,
}

/// 对账统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileStats {
    pub stale_running_jobs: u32,
    pub stale_pending_jobs: u32,
    pub stale_backups: u32,
    pub failed_updates: u32,
}

impl ReconcileStats {
    fn found(&self) -> u32 {
        self.stale_running_jobs + self.stale_pending_jobs + self.stale_backups
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrchestratorStore>, config: RecoveryConfig) -> Self {
        Self {
            tracker: JobTracker::new(store.clone()),
            store,
            config,
        }
    }

    /// 启动一次性对账扫描
    pub async fn start_initial_scan(&self) {
        if !self.config.enabled {
            info!("状态对账已禁用，跳过一次性扫描");
            return;
        }

        info!(
            "状态对账服务：将在 {} 秒后执行一次性扫描",
            self.config.initial_delay_secs
        );

        tokio::spawn({
            let self_clone = self.clone();
            async move {
                tokio::time::sleep(tokio::time::Duration::from_secs(
                    self_clone.config.initial_delay_secs,
                ))
                .await;

                info!("开始执行一次性状态对账");
                match self_clone.reconcile().await {
                    Ok(stats) => info!(
                        "一次性对账完成：running任务/pending任务/备份={}/{}/{}，写入失败 {}",
                        stats.stale_running_jobs,
                        stats.stale_pending_jobs,
                        stats.stale_backups,
                        stats.failed_updates
                    ),
                    Err(e) => error!("一次性状态对账失败: {}", e),
                }
            }
        });
    }

    /// 启动周期性对账扫描
    pub async fn start_periodic_scan(&self) {
        if !self.config.enabled {
            info!("状态对账已禁用，跳过周期性扫描");
            return;
        }

        info!(
            "状态对账服务：周期性扫描间隔 {} 秒",
            self.config.scan_interval_secs
        );

        tokio::spawn({
            let self_clone = self.clone();
            async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                    self_clone.config.scan_interval_secs,
                ));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    interval.tick().await;

                    debug!("开始执行周期性状态对账");
                    match self_clone.reconcile().await {
                        Ok(stats) if stats.found() > 0 => info!(
                            "周期性对账完成：running任务/pending任务/备份={}/{}/{}",
                            stats.stale_running_jobs, stats.stale_pending_jobs, stats.stale_backups
                        ),
                        Ok(_) => debug!("周期性对账完成：没有卡住的记录"),
                        Err(e) => warn!("周期性状态对账失败: {}", e),
                    }
                }
            }
        });
    }

    /// 扫描一次并返回统计
    pub async fn reconcile(&self) -> AppResult<ReconcileStats> {
        let now = Utc::now();
        let running_cutoff = now - seconds(self.config.stale_running_threshold_secs);
        let pending_cutoff = now - seconds(self.config.stale_pending_threshold_secs);
        let mut stats = ReconcileStats::default();

        let running = self
            .store
            .list_stale_jobs(JobStatus::Running, running_cutoff)
            .await?;
        for job in running {
            warn!("任务 {} ({}) 长时间处于running，标记为失败", job.id, job.kind);
            match self.tracker.fail(job.id, "任务执行中断：worker 已丢失或进程已重启").await {
                Ok(true) => stats.stale_running_jobs += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("标记任务 {} 失败出错: {}", job.id, e);
                    stats.failed_updates += 1;
                }
            }
        }

        let pending = self
            .store
            .list_stale_jobs(JobStatus::Pending, pending_cutoff)
            .await?;
        for job in pending {
            warn!("任务 {} ({}) 长时间未被执行，标记为失败", job.id, job.kind);
            match self.tracker.fail(job.id, "任务等待超时：未被任何 worker 领取").await {
                Ok(true) => stats.stale_pending_jobs += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("标记任务 {} 失败出错: {}", job.id, e);
                    stats.failed_updates += 1;
                }
            }
        }

        let backups = self
            .store
            .list_backups_in_status(BackupStatus::Running, running_cutoff)
            .await?;
        for record in backups {
            warn!("备份 {} 长时间处于running，标记为失败", record.id);
            match self
                .store
                .fail_backup(record.id, "备份执行中断", now)
                .await
            {
                Ok(()) => stats.stale_backups += 1,
                Err(e) => {
                    error!("标记备份 {} 失败出错: {}", record.id, e);
                    stats.failed_updates += 1;
                }
            }
        }

        Ok(stats)
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobKind;
    use crate::models::{BackupRecord, StorageType};
    use crate::repositories::memory::MemoryStore;
    use uuid::Uuid;

    fn running_backup(instance_id: Uuid, started_ago: Duration) -> BackupRecord {
        let started = Utc::now() - started_ago;
        BackupRecord {
            id: Uuid::new_v4(),
            instance_id,
            schedule_id: None,
            file_path: None,
            file_size_bytes: None,
            storage_type: StorageType::Local,
            status: BackupStatus::Running,
            error_message: None,
            started_at: Some(started),
            completed_at: None,
            created_at: started,
            updated_at: started,
        }
    }

    #[tokio::test]
    async fn test_stale_records_are_failed() {
        let store = Arc::new(MemoryStore::new());
        let tracker = JobTracker::new(store.clone());
        let instance_id = Uuid::new_v4();
        let long_ago = Utc::now() - Duration::hours(5);

        let stuck = tracker.create(&JobKind::Deploy { instance_id }).await.unwrap();
        tracker.mark_running(stuck.id, 1).await.unwrap();
        store.set_job_updated_at(stuck.id, long_ago);

        let lost = tracker.create(&JobKind::Start { instance_id }).await.unwrap();
        store.set_job_updated_at(lost.id, long_ago);

        let fresh = tracker.create(&JobKind::Stop { instance_id }).await.unwrap();
        tracker.mark_running(fresh.id, 1).await.unwrap();

        let old_backup = running_backup(instance_id, Duration::hours(3));
        let new_backup = running_backup(instance_id, Duration::minutes(5));
        store.insert_backup(old_backup.clone());
        store.insert_backup(new_backup.clone());

        let reconciler = Reconciler::new(store.clone(), RecoveryConfig::default());
        let stats = reconciler.reconcile().await.unwrap();
        assert_eq!(
            stats,
            ReconcileStats {
                stale_running_jobs: 1,
                stale_pending_jobs: 1,
                stale_backups: 1,
                failed_updates: 0,
            }
        );

        let stuck = store.job(stuck.id).unwrap();
        assert_eq!(stuck.status, JobStatus::Failed);
        assert!(stuck.result.unwrap()["error"].as_str().unwrap().contains("中断"));
        assert_eq!(store.job(lost.id).unwrap().status, JobStatus::Failed);
        assert_eq!(store.job(fresh.id).unwrap().status, JobStatus::Running);
        assert_eq!(store.backup(old_backup.id).unwrap().status, BackupStatus::Failed);
        assert_eq!(store.backup(new_backup.id).unwrap().status, BackupStatus::Running);
    }

    #[tokio::test]
    async fn test_second_pass_finds_nothing() {
        let store = Arc::new(MemoryStore::new());
        let tracker = JobTracker::new(store.clone());
        let job = tracker
            .create(&JobKind::Restart {
                instance_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        tracker.mark_running(job.id, 1).await.unwrap();
        store.set_job_updated_at(job.id, Utc::now() - Duration::hours(2));

        let reconciler = Reconciler::new(store.clone(), RecoveryConfig::default());
        assert_eq!(reconciler.reconcile().await.unwrap().stale_running_jobs, 1);
        assert_eq!(reconciler.reconcile().await.unwrap(), ReconcileStats::default());
    }
}
