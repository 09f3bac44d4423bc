//! 测试用的内存对象存储

use super::ObjectStorage;
use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryObjects {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjects {
    async fn upload_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()> {
        let data = tokio::fs::read(local).await?;
        self.put(bucket, key, &data);
        Ok(())
    }

    async fn download_to_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("对象不存在: s3://{}/{}", bucket, key)))?;
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        self.deleted
            .lock()
            .unwrap()
            .push(format!("s3://{}/{}", bucket, key));
        Ok(())
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
