use crate::error::{AppError, AppResult};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use uuid::Uuid;

/// 按实例串行化会改动实例的任务
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    semaphores: Arc<RwLock<HashMap<Uuid, Arc<Semaphore>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn semaphore(&self, instance_id: Uuid) -> Arc<Semaphore> {
        if let Some(existing) = self.semaphores.read().await.get(&instance_id) {
            return existing.clone();
        }
        self.semaphores
            .write()
            .await
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// 等待并持有实例锁，permit 释放时解锁
    pub async fn acquire(&self, instance_id: Uuid) -> AppResult<OwnedSemaphorePermit> {
        self.semaphore(instance_id)
            .await
            .acquire_owned()
            .await
            .map_err(|e| AppError::service_unavailable(format!("获取实例锁失败: {}", e)))
    }

    /// 实例删除后清理
    pub async fn forget(&self, instance_id: Uuid) {
        self.semaphores.write().await.remove(&instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_instance_is_serialized() {
        let locks = InstanceLocks::new();
        let id = Uuid::new_v4();

        let first = locks.acquire(id).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(id)).await;
        assert!(waiting.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(id)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_different_instances_do_not_block() {
        let locks = InstanceLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }
}
