use super::AppState;
use crate::{
    error::AppError,
    jobs::JobKind,
    models::{JobRecord, JobStatusView, PagedResult, Pagination},
    response::ApiResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 入队结果
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub kind: String,
}

/// 任务历史查询参数
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct JobQueryParams {
    /// 按作用对象过滤（主机、实例、域名等的ID）
    pub target_id: Option<Uuid>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// 提交任务
///
/// 记录一条 pending 任务并交给 worker 池执行
#[utoipa::path(
    post,
    path = "/api/jobs",
    request_body = JobKind,
    responses(
        (status = 200, description = "任务已入队", body = ApiResponse<EnqueueResponse>),
        (status = 400, description = "请求参数错误"),
        (status = 500, description = "任务系统不可用")
    ),
    tag = "任务"
)]
pub async fn enqueue_job(
    State(app_state): State<AppState>,
    Json(kind): Json<JobKind>,
) -> Result<Json<ApiResponse<EnqueueResponse>>, AppError> {
    let orchestrator = app_state.orchestrator()?;
    if let JobKind::GetLogs { lines, .. } = &kind {
        if *lines == 0 || *lines > 10_000 {
            return Err(AppError::bad_request("日志行数应在1-10000之间"));
        }
    }

    let name = kind.name().to_string();
    let job_id = orchestrator.queue.enqueue(kind).await?;
    Ok(Json(ApiResponse::success(EnqueueResponse {
        job_id,
        kind: name,
    })))
}

/// 查询任务状态
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = Uuid, Path, description = "任务ID")),
    responses(
        (status = 200, description = "任务状态", body = ApiResponse<JobStatusView>),
        (status = 404, description = "任务不存在")
    ),
    tag = "任务"
)]
pub async fn get_job_status(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<JobStatusView>>, AppError> {
    let view = app_state.orchestrator()?.tracker.get_status(id).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// 任务历史
#[utoipa::path(
    get,
    path = "/api/jobs",
    params(JobQueryParams),
    responses(
        (status = 200, description = "任务列表", body = ApiResponse<PagedResult<JobRecord>>)
    ),
    tag = "任务"
)]
pub async fn list_jobs(
    State(app_state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> Result<Json<ApiResponse<PagedResult<JobRecord>>>, AppError> {
    let defaults = Pagination::default();
    let pagination = Pagination {
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
    };
    let page = app_state
        .orchestrator()?
        .tracker
        .list(params.target_id, &pagination)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config, handlers::Orchestrator, models::JobStatus, remote::testing::FakeRemote,
        repositories::memory::MemoryStore, routes::create_api_routes,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_state() -> AppState {
        let config = Config::default();
        let orchestrator = Orchestrator::start(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeRemote::new()),
            None,
            &config,
        );
        AppState {
            database: None,
            objects: None,
            orchestrator: Some(orchestrator),
            config,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_then_poll_status() {
        let app = create_api_routes().with_state(app_state());
        let request = Request::post("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"kind": "restart", "instance_id": Uuid::new_v4()}).to_string(),
            ))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["kind"], "restart");
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();

        // 实例不存在，worker 会把任务标记为失败
        let mut status = Value::Null;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(Request::get(format!("/api/jobs/{}", job_id)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            status = body_json(response).await;
            if status["data"]["status"] == JobStatus::Failed.as_str() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status["data"]["status"], "failed");
        assert!(status["data"]["result"]["error"].as_str().unwrap().contains("实例"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = create_api_routes().with_state(app_state());
        let response = app
            .oneshot(
                Request::get(format!("/api/jobs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_without_database_jobs_are_unavailable() {
        let state = AppState {
            database: None,
            objects: None,
            orchestrator: None,
            config: Config::default(),
        };
        let app = create_api_routes().with_state(state);
        let response = app
            .oneshot(Request::get("/api/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
