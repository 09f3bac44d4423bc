//! 任务模型、状态记录与执行

pub mod executor;
pub mod fault;
pub mod kind;
pub mod locks;
pub mod queue;
pub mod tracker;

pub use executor::{JobExecutor, JobRunner};
pub use fault::{FaultClass, classify, operator_message};
pub use kind::{JobKind, LockScope};
pub use locks::InstanceLocks;
pub use queue::{JobDispatcher, JobQueue, QueuedJob};
pub use tracker::JobTracker;

use serde_json::Value as JsonValue;

/// 一次执行的业务结果
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(JsonValue),
    /// 业务上失败但无需抛错（如证书签发失败），结果中带 `error` 字段
    Failed(JsonValue),
}
