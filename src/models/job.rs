use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

text_enum!(
    /// 任务状态
    JobStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
    }
);

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

text_enum!(
    /// 任务作用对象类型
    TargetType {
        Host => "host",
        Instance => "instance",
        Domain => "domain",
        Backup => "backup",
        Repository => "repository",
    }
);

/// 任务执行记录
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobRecord {
    /// 关联ID
    pub id: Uuid,
    /// 任务类型
    pub kind: String,
    pub target_id: Option<Uuid>,
    pub target_type: Option<TargetType>,
    pub status: JobStatus,
    /// 已执行次数
    pub attempts: i32,
    /// 序列化后的任务参数
    #[schema(value_type = Object)]
    pub params: JsonValue,
    /// 结果：成功字段或 `{"error": ...}`
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 对外暴露的任务状态
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobStatusView {
    pub id: Uuid,
    pub kind: String,
    pub status: JobStatus,
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobStatusView {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            status: record.status,
            result: record.result,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}
