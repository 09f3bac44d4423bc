use super::AppState;
use crate::{
    error::AppError,
    response::ApiResponse,
    services::{DueReport, ReconcileStats, RetentionReport},
};
use axum::{extract::State, response::Json};

/// 立即执行一次到期备份扫描
#[utoipa::path(
    post,
    path = "/api/sweeps/backups-due",
    responses((status = 200, description = "扫描结果", body = ApiResponse<DueReport>)),
    tag = "周期扫描"
)]
pub async fn trigger_due_sweep(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<DueReport>>, AppError> {
    let orchestrator = app_state.orchestrator()?;
    let report = orchestrator.backups.due_sweep(&orchestrator.queue).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// 立即执行一次过期备份清理
#[utoipa::path(
    post,
    path = "/api/sweeps/backups-retention",
    responses((status = 200, description = "清理结果", body = ApiResponse<RetentionReport>)),
    tag = "周期扫描"
)]
pub async fn trigger_retention_sweep(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<RetentionReport>>, AppError> {
    let report = app_state.orchestrator()?.backups.retention_sweep().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// 立即执行一次状态对账
#[utoipa::path(
    post,
    path = "/api/sweeps/reconcile",
    responses((status = 200, description = "对账统计", body = ApiResponse<ReconcileStats>)),
    tag = "周期扫描"
)]
pub async fn trigger_reconcile(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<ReconcileStats>>, AppError> {
    let stats = app_state.orchestrator()?.reconciler.reconcile().await?;
    Ok(Json(ApiResponse::success(stats)))
}
