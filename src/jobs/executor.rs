use super::{
    InstanceLocks, JobKind, JobOutcome, JobQueue, JobTracker, LockScope, QueuedJob, classify,
    operator_message,
};
use crate::{
    config::RetryPolicies,
    error::{AppError, AppResult},
    repositories::OrchestratorStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

/// 按任务类型执行业务逻辑
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, kind: &JobKind) -> AppResult<JobOutcome>;

    fn timeout(&self, kind: &JobKind) -> Duration {
        kind.timeout()
    }
}

/// worker 池：加锁、限时执行、分类失败并决定重试
pub struct JobExecutor {
    runner: Arc<dyn JobRunner>,
    store: Arc<dyn OrchestratorStore>,
    tracker: JobTracker,
    queue: JobQueue,
    locks: InstanceLocks,
    policies: RetryPolicies,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        store: Arc<dyn OrchestratorStore>,
        queue: JobQueue,
        locks: InstanceLocks,
        policies: RetryPolicies,
    ) -> Self {
        Self {
            runner,
            tracker: JobTracker::new(store.clone()),
            store,
            queue,
            locks,
            policies,
        }
    }

    /// 启动 `concurrency` 个 worker 共享同一个接收端
    pub fn spawn_workers(
        self: &Arc<Self>,
        receiver: mpsc::Receiver<QueuedJob>,
        concurrency: usize,
    ) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));
        info!("启动 {} 个任务worker", concurrency);

        (0..concurrency)
            .map(|worker| {
                let executor = self.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(job) => executor.execute(job).await,
                            None => {
                                info!("任务队列已关闭，worker {} 退出", worker);
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, job: QueuedJob) {
        let span = tracing::info_span!(
            "job",
            id = %job.id,
            kind = job.kind.name(),
            attempt = job.attempt
        );
        self.execute_in_span(job).instrument(span).await
    }

    async fn execute_in_span(&self, job: QueuedJob) {
        let _permit = match self.acquire_lock(&job.kind).await {
            Ok(permit) => permit,
            Err(e) => {
                self.handle_error(job, e).await;
                return;
            }
        };

        match self.tracker.mark_running(job.id, job.attempt).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("任务已是终态，跳过执行");
                return;
            }
            Err(e) => error!("更新任务为running失败: {}", e),
        }
        info!("开始执行任务");

        let limit = self.runner.timeout(&job.kind);
        let runner = self.runner.clone();
        let kind = job.kind.clone();
        let mut handle =
            tokio::spawn(async move { runner.run(&kind).await }.in_current_span());

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(Ok(JobOutcome::Success(result)))) => {
                info!("任务执行成功");
                self.record(self.tracker.succeed(job.id, &result).await);
                if let JobKind::Destroy { instance_id } = job.kind {
                    self.locks.forget(instance_id).await;
                }
            }
            Ok(Ok(Ok(JobOutcome::Failed(result)))) => {
                warn!("任务执行失败: {}", result);
                self.record(self.tracker.fail_with(job.id, &result).await);
            }
            Ok(Ok(Err(e))) => self.handle_error(job, e).await,
            Ok(Err(join_error)) => {
                error!("任务执行异常退出: {}", join_error);
                self.record(
                    self.tracker
                        .fail(job.id, &format!("任务执行异常: {}", join_error))
                        .await,
                );
            }
            Err(_) => {
                handle.abort();
                error!("任务执行超时 ({}秒)", limit.as_secs());
                self.record(
                    self.tracker
                        .fail(job.id, &format!("任务执行超时 ({}秒)", limit.as_secs()))
                        .await,
                );
            }
        }
    }

    async fn acquire_lock(&self, kind: &JobKind) -> AppResult<Option<OwnedSemaphorePermit>> {
        let instance_id = match kind.lock_scope() {
            LockScope::None => return Ok(None),
            LockScope::Instance(id) => Some(id),
            LockScope::BackupRecord(id) => self
                .store
                .get_backup_record(id)
                .await?
                .map(|r| r.instance_id),
            LockScope::Repository(id) => self.store.get_git_repo(id).await?.map(|r| r.instance_id),
        };
        // 记录不存在时不加锁，由业务逻辑报告
        match instance_id {
            Some(id) => Ok(Some(self.locks.acquire(id).await?)),
            None => Ok(None),
        }
    }

    async fn handle_error(&self, job: QueuedJob, error: AppError) {
        let class = classify(&error);
        let policy = self.policies.for_class(job.kind.retry_class());
        let message = operator_message(&error);

        if class.is_retryable() && policy.allows_retry(job.attempt) {
            let delay = policy.backoff(job.attempt);
            warn!(
                "任务遇到瞬时故障，{}秒后进行第{}次执行: {}",
                delay.as_secs(),
                job.attempt + 1,
                message
            );
            if let Err(e) = self
                .tracker
                .mark_retrying(job.id, &message, delay.as_secs())
                .await
            {
                error!("更新任务重试状态失败: {}", e);
            }
            self.queue.requeue_after(
                QueuedJob {
                    attempt: job.attempt + 1,
                    ..job
                },
                delay,
            );
        } else {
            error!("任务失败 ({:?}): {}", class, message);
            self.record(self.tracker.fail(job.id, &message).await);
        }
    }

    fn record(&self, written: AppResult<bool>) {
        match written {
            Ok(true) => {}
            Ok(false) => warn!("任务已是终态，结果未写入"),
            Err(e) => error!("写入任务结果失败: {}", e),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    #[cfg(test)]
    fn locks(&self) -> &InstanceLocks {
        &self.locks
    }
}
