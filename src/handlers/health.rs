use super::AppState;
use crate::response::{ApiResponse, ResponseCode};
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

#[derive(Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    detail: bool,
}

/// 健康检查处理器
pub async fn health_check(Query(params): Query<HealthQuery>) -> Json<ApiResponse<JsonValue>> {
    if params.detail {
        Json(ApiResponse::success(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })))
    } else {
        Json(ApiResponse::success(json!({"status": "ok"})))
    }
}

/// 数据库健康检查处理器
pub async fn db_health_check(State(app_state): State<AppState>) -> Json<ApiResponse<JsonValue>> {
    match &app_state.database {
        Some(db) => match db.health_check().await {
            Ok(true) => Json(ApiResponse::success(json!({
                "database": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }))),
            Ok(false) => unhealthy("数据库连接异常".to_string(), "unhealthy"),
            Err(e) => {
                tracing::error!("数据库健康检查失败: {}", e);
                unhealthy(format!("数据库健康检查失败: {}", e), "error")
            }
        },
        None => unhealthy("数据库未配置或连接失败".to_string(), "unavailable"),
    }
}

/// 对象存储健康检查处理器
pub async fn storage_health_check(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<JsonValue>> {
    match &app_state.objects {
        Some(objects) => match objects.health_check().await {
            Ok(true) => Json(ApiResponse::success(json!({
                "storage": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }))),
            Ok(false) => unhealthy("对象存储连接异常".to_string(), "unhealthy"),
            Err(e) => {
                tracing::error!("对象存储健康检查失败: {}", e);
                unhealthy(format!("对象存储健康检查失败: {}", e), "error")
            }
        },
        None => unhealthy("未配置S3对象存储".to_string(), "unavailable"),
    }
}

fn unhealthy(msg: String, status: &str) -> Json<ApiResponse<JsonValue>> {
    Json(ApiResponse::error_with_data(
        ResponseCode::UNAVAILABLE,
        msg,
        json!({ "status": status }),
    ))
}
