use super::JobKind;
use crate::{
    error::{AppError, AppResult},
    models::{JobRecord, JobStatus, JobStatusView, PagedResult, Pagination},
    repositories::OrchestratorStore,
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use uuid::Uuid;

/// 任务状态记录：pending → running → success | failed
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn OrchestratorStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn OrchestratorStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, kind: &JobKind) -> AppResult<JobRecord> {
        let (target_type, target_id) = kind.target();
        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            kind: kind.name().to_string(),
            target_id: Some(target_id),
            target_type: Some(target_type),
            status: JobStatus::Pending,
            attempts: 0,
            params: serde_json::to_value(kind)?,
            result: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.store.insert_job(&record).await?;
        Ok(record)
    }

    /// 返回 false 表示任务已是终态（例如被对账标记失败），不应再执行
    pub async fn mark_running(&self, id: Uuid, attempt: u32) -> AppResult<bool> {
        self.store
            .mark_job_running(id, attempt as i32, Utc::now())
            .await
    }

    pub async fn mark_retrying(&self, id: Uuid, message: &str, delay_secs: u64) -> AppResult<()> {
        let result = json!({ "error": message, "retry_in_secs": delay_secs });
        self.store.mark_job_retrying(id, &result, Utc::now()).await
    }

    pub async fn succeed(&self, id: Uuid, result: &JsonValue) -> AppResult<bool> {
        self.store
            .finish_job(id, JobStatus::Success, result, Utc::now())
            .await
    }

    /// 以 `{"error": message}` 记录失败
    pub async fn fail(&self, id: Uuid, message: &str) -> AppResult<bool> {
        self.fail_with(id, &json!({ "error": message })).await
    }

    pub async fn fail_with(&self, id: Uuid, result: &JsonValue) -> AppResult<bool> {
        let written = self
            .store
            .finish_job(id, JobStatus::Failed, result, Utc::now())
            .await?;
        if !written {
            tracing::debug!("任务 {} 已是终态，忽略失败写入", id);
        }
        Ok(written)
    }

    pub async fn get_status(&self, id: Uuid) -> AppResult<JobStatusView> {
        self.store
            .get_job(id)
            .await?
            .map(JobStatusView::from)
            .ok_or_else(|| AppError::not_found(format!("任务 {}", id)))
    }

    pub async fn list(
        &self,
        target_id: Option<Uuid>,
        pagination: &Pagination,
    ) -> AppResult<PagedResult<JobRecord>> {
        let (limit, offset) = pagination.limit_offset();
        let (items, total) = self.store.list_jobs(target_id, limit, offset).await?;
        Ok(PagedResult::new(
            items,
            total,
            pagination.page.max(1),
            limit as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    #[tokio::test]
    async fn test_lifecycle_and_single_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let tracker = JobTracker::new(store.clone());
        let kind = JobKind::Restart {
            instance_id: Uuid::new_v4(),
        };

        let record = tracker.create(&kind).await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.params["kind"], "restart");

        assert!(tracker.mark_running(record.id, 1).await.unwrap());
        let view = tracker.get_status(record.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert!(view.started_at.is_some());

        assert!(
            tracker
                .succeed(record.id, &json!({"status": "running"}))
                .await
                .unwrap()
        );
        // 终态不会被覆盖
        assert!(!tracker.fail(record.id, "late failure").await.unwrap());
        assert!(!tracker.mark_running(record.id, 2).await.unwrap());

        let view = tracker.get_status(record.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Success);
        assert_eq!(view.result, Some(json!({"status": "running"})));
        assert!(view.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let tracker = JobTracker::new(Arc::new(MemoryStore::new()));
        let err = tracker.get_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_by_target() {
        let store = Arc::new(MemoryStore::new());
        let tracker = JobTracker::new(store);
        let instance_id = Uuid::new_v4();
        for _ in 0..3 {
            tracker
                .create(&JobKind::Stop { instance_id })
                .await
                .unwrap();
        }
        tracker
            .create(&JobKind::Stop {
                instance_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let page = tracker
            .list(Some(instance_id), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 3);
    }
}
