use crate::handlers::{
    AppState, db_health_check, enqueue_job, get_job_status, list_jobs, storage_health_check,
    trigger_due_sweep, trigger_reconcile, trigger_retention_sweep,
};
use axum::{
    Router,
    routing::{get, post},
};

/// 创建API路由
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        // 任务
        .route("/api/jobs", post(enqueue_job).get(list_jobs))
        .route("/api/jobs/{id}", get(get_job_status))
        // 手动触发周期扫描
        .route("/api/sweeps/backups-due", post(trigger_due_sweep))
        .route("/api/sweeps/backups-retention", post(trigger_retention_sweep))
        .route("/api/sweeps/reconcile", post(trigger_reconcile))
        // 组件健康检查
        .route("/api/health/db", get(db_health_check))
        .route("/api/health/storage", get(storage_health_check))
}
