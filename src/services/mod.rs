// 服务层模块
pub mod backup_engine;
pub mod config_apply;
pub mod domain_provisioner;
pub mod host_probe;
pub mod instance_lifecycle;
pub mod module_deployer;
pub mod reconciler;
pub mod scheduler;
pub mod steps;

pub use backup_engine::{BackupEngine, DueReport, RetentionReport};
pub use config_apply::ConfigApplier;
pub use domain_provisioner::DomainProvisioner;
pub use host_probe::HostInspector;
pub use instance_lifecycle::InstanceLifecycle;
pub use module_deployer::ModuleDeployer;
pub use reconciler::{ReconcileStats, Reconciler};
pub use scheduler::SweepScheduler;

use crate::{
    error::{AppError, AppResult},
    jobs::{JobKind, JobOutcome, JobRunner},
    models::{Host, Instance},
    remote::{RemoteConnector, RemoteLayout, RemoteSession},
    repositories::OrchestratorStore,
    storage::ObjectStorage,
};
use std::sync::Arc;
use uuid::Uuid;

/// 各引擎共用的依赖
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn OrchestratorStore>,
    pub connector: Arc<dyn RemoteConnector>,
    pub layout: RemoteLayout,
}

impl ServiceContext {
    pub fn new(
        store: Arc<dyn OrchestratorStore>,
        connector: Arc<dyn RemoteConnector>,
        layout: RemoteLayout,
    ) -> Self {
        Self {
            store,
            connector,
            layout,
        }
    }

    pub async fn instance(&self, id: Uuid) -> AppResult<Instance> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("实例 {}", id)))
    }

    pub async fn host(&self, id: Uuid) -> AppResult<Host> {
        self.store
            .get_host(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("主机 {}", id)))
    }

    /// 会话在离开作用域时关闭
    pub async fn open(&self, host: &Host) -> AppResult<Box<dyn RemoteSession>> {
        Ok(self.connector.connect(host).await?)
    }
}

/// 任务分发：每种任务对应一个引擎方法
pub struct JobServices {
    hosts: HostInspector,
    lifecycle: InstanceLifecycle,
    config: ConfigApplier,
    backups: BackupEngine,
    domains: DomainProvisioner,
    modules: ModuleDeployer,
}

impl JobServices {
    pub fn new(ctx: ServiceContext, objects: Option<Arc<dyn ObjectStorage>>) -> Self {
        Self {
            hosts: HostInspector::new(ctx.clone()),
            lifecycle: InstanceLifecycle::new(ctx.clone()),
            config: ConfigApplier::new(ctx.clone()),
            backups: BackupEngine::new(ctx.clone(), objects),
            domains: DomainProvisioner::new(ctx.clone()),
            modules: ModuleDeployer::new(ctx),
        }
    }

    pub fn backups(&self) -> &BackupEngine {
        &self.backups
    }
}

#[async_trait::async_trait]
impl JobRunner for JobServices {
    async fn run(&self, kind: &JobKind) -> AppResult<JobOutcome> {
        let result = match kind {
            JobKind::TestConnection { host_id } => return self.hosts.test_connection(*host_id).await,
            JobKind::SystemInfo { host_id } => self.hosts.system_info(*host_id).await?,
            JobKind::InstallDeps { host_id } => self.hosts.install_deps(*host_id).await?,
            JobKind::Deploy { instance_id } => self.lifecycle.deploy(*instance_id).await?,
            JobKind::Start { instance_id } => self.lifecycle.start(*instance_id).await?,
            JobKind::Stop { instance_id } => self.lifecycle.stop(*instance_id).await?,
            JobKind::Restart { instance_id } => self.lifecycle.restart(*instance_id).await?,
            JobKind::Destroy { instance_id } => self.lifecycle.destroy(*instance_id).await?,
            JobKind::ReadConfig { instance_id } => self.config.read(*instance_id).await?,
            JobKind::ApplyConfig {
                instance_id,
                updates,
            } => self.config.apply(*instance_id, updates).await?,
            JobKind::GetLogs { instance_id, lines } => {
                self.lifecycle.logs(*instance_id, *lines).await?
            }
            JobKind::CreateBackup {
                instance_id,
                schedule_id,
            } => self.backups.create(*instance_id, *schedule_id).await?,
            JobKind::RestoreBackup { record_id } => self.backups.restore(*record_id).await?,
            JobKind::SetupNginx { domain_id } => self.domains.bind(*domain_id).await?,
            JobKind::IssueSsl { domain_id } => {
                return self.domains.issue_certificate(*domain_id).await;
            }
            JobKind::GitDeploy { repo_id } => self.modules.deploy(*repo_id).await?,
        };
        Ok(JobOutcome::Success(result))
    }
}
