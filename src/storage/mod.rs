pub mod s3;
pub mod uri;

#[cfg(test)]
#[cfg(test)]
pub mod memory;

pub use s3::S3Storage;
pub use uri::{ObjectUri, parse_object_uri};

use crate::error::AppResult;
use std::path::Path;

/// 对象存储抽象接口（备份包在本地临时文件与对象存储之间传输）
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// 上传本地文件
    async fn upload_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()>;

    /// 下载对象到本地文件
    async fn download_to_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()>;

    /// 删除对象
    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()>;

    /// 健康检查
    async fn health_check(&self) -> AppResult<bool>;
}
