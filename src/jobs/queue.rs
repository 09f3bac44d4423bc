use super::{JobKind, JobTracker};
use crate::error::{AppError, AppResult};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 队列中的一次执行
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub kind: JobKind,
    /// 第几次执行，从1开始
    pub attempt: u32,
}

/// 任务投递接口
#[async_trait::async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, kind: JobKind) -> AppResult<Uuid>;
}

/// 进程内任务队列；worker 从接收端取任务
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    tracker: JobTracker,
}

impl JobQueue {
    pub fn new(tracker: JobTracker, capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, tracker }, receiver)
    }

    /// 记录 pending 任务并入队
    pub async fn enqueue(&self, kind: JobKind) -> AppResult<Uuid> {
        let record = self.tracker.create(&kind).await?;
        tracing::info!("任务已入队: {} ({})", record.id, record.kind);

        let job = QueuedJob {
            id: record.id,
            kind,
            attempt: 1,
        };
        if let Err(e) = self.sender.send(job).await {
            let message = format!("任务队列已关闭: {}", e);
            self.tracker.fail(record.id, &message).await?;
            return Err(AppError::service_unavailable(message));
        }
        Ok(record.id)
    }

    /// 延迟后重新入队
    pub fn requeue_after(&self, job: QueuedJob, delay: Duration) {
        let sender = self.sender.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = job.id;
            if let Err(e) = sender.send(job).await {
                tracing::error!("任务 {} 重新入队失败: {}", id, e);
                if let Err(e) = tracker.fail(id, &format!("任务队列已关闭: {}", e)).await {
                    tracing::error!("写入任务 {} 失败状态出错: {}", id, e);
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, kind: JobKind) -> AppResult<Uuid> {
        self.enqueue(kind).await
    }
}
