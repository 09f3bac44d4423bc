pub mod health;
pub mod jobs;
pub mod sweeps;

pub use health::{db_health_check, health_check, storage_health_check};
pub use jobs::{enqueue_job, get_job_status, list_jobs};
pub use sweeps::{trigger_due_sweep, trigger_reconcile, trigger_retention_sweep};

use crate::{
    config::Config,
    database::Database,
    error::{AppError, AppResult},
    jobs::{InstanceLocks, JobExecutor, JobQueue, JobTracker},
    remote::{RemoteConnector, RemoteLayout},
    repositories::OrchestratorStore,
    services::{BackupEngine, JobServices, Reconciler, ServiceContext},
    storage::ObjectStorage,
};
use std::sync::Arc;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub database: Option<Database>,
    pub objects: Option<Arc<dyn ObjectStorage>>,
    pub orchestrator: Option<Orchestrator>,
    pub config: Config,
}

impl AppState {
    pub fn orchestrator(&self) -> AppResult<&Orchestrator> {
        self.orchestrator
            .as_ref()
            .ok_or_else(|| AppError::service_unavailable("数据库连接不可用，任务系统未启动"))
    }
}

/// 任务系统：队列、worker 池与周期扫描共用的组件
#[derive(Clone)]
pub struct Orchestrator {
    pub queue: JobQueue,
    pub tracker: JobTracker,
    pub backups: BackupEngine,
    pub reconciler: Reconciler,
}

impl Orchestrator {
    /// 组装任务系统并启动 worker
    pub fn start(
        store: Arc<dyn OrchestratorStore>,
        connector: Arc<dyn RemoteConnector>,
        objects: Option<Arc<dyn ObjectStorage>>,
        config: &Config,
    ) -> Self {
        let ctx = ServiceContext::new(
            store.clone(),
            connector,
            RemoteLayout::new(config.remote.instance_root.clone()),
        );
        let services = JobServices::new(ctx, objects);
        let backups = services.backups().clone();

        let tracker = JobTracker::new(store.clone());
        let (queue, receiver) = JobQueue::new(tracker.clone(), config.worker.queue_capacity);
        let executor = Arc::new(JobExecutor::new(
            Arc::new(services),
            store.clone(),
            queue.clone(),
            InstanceLocks::new(),
            config.retry.clone(),
        ));
        executor.spawn_workers(receiver, config.worker.concurrency);

        Self {
            queue,
            tracker,
            backups,
            reconciler: Reconciler::new(store, config.recovery.clone()),
        }
    }
}
