use crate::{
    handlers::jobs::EnqueueResponse,
    jobs::JobKind,
    models::{JobRecord, JobStatus, JobStatusView, PagedResult, StorageType, TargetType},
    response::ApiResponse,
    services::{
        DueReport, ReconcileStats, RetentionReport,
        backup_engine::{CleanedBackup, SweepError, TriggeredBackup},
    },
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        // 任务API
        crate::handlers::jobs::enqueue_job,
        crate::handlers::jobs::get_job_status,
        crate::handlers::jobs::list_jobs,
        // 周期扫描API
        crate::handlers::sweeps::trigger_due_sweep,
        crate::handlers::sweeps::trigger_retention_sweep,
        crate::handlers::sweeps::trigger_reconcile,
    ),
    components(schemas(
        ApiResponse<EnqueueResponse>,
        ApiResponse<JobStatusView>,
        ApiResponse<PagedResult<JobRecord>>,
        ApiResponse<DueReport>,
        ApiResponse<RetentionReport>,
        ApiResponse<ReconcileStats>,
        PagedResult<JobRecord>,
        EnqueueResponse,
        JobKind,
        JobRecord,
        JobStatus,
        JobStatusView,
        TargetType,
        StorageType,
        DueReport,
        RetentionReport,
        ReconcileStats,
        CleanedBackup,
        SweepError,
        TriggeredBackup,
    )),
    tags(
        (name = "任务", description = "远程任务的提交与查询"),
        (name = "周期扫描", description = "到期备份、过期清理与状态对账的手动触发"),
    ),
    info(
        title = "CloudTab 编排服务 API",
        version = "0.1.0",
        description = "通过 SSH 管理 Odoo 主机的远程任务编排服务"
    )
)]
pub struct ApiDoc;
