use super::ObjectStorage;
use crate::{
    config::S3Config,
    error::{AppError, AppResult},
};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials, primitives::ByteStream};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// S3 兼容对象存储实现
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Arc<Client>,
}

impl S3Storage {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "cloudtab-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style)
            .behavior_version(BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Arc::new(Client::from_conf(builder.build())),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    async fn upload_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| AppError::Storage(format!("读取待上传文件失败: {}", e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/gzip")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("上传对象失败: {}", e)))?;

        tracing::info!("成功上传对象: s3://{}/{}", bucket, key);
        Ok(())
    }

    async fn download_to_file(&self, bucket: &str, key: &str, local: &Path) -> AppResult<()> {
        let mut result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("下载对象失败: {}", e)))?;

        let mut file = tokio::fs::File::create(local).await?;
        while let Some(chunk) = result
            .body
            .try_next()
            .await
            .map_err(|e| AppError::Storage(format!("读取对象数据失败: {}", e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::info!("成功下载对象: s3://{}/{} -> {}", bucket, key, local.display());
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("删除对象失败: {}", e)))?;

        tracing::info!("成功删除对象: s3://{}/{}", bucket, key);
        Ok(())
    }

    async fn health_check(&self) -> AppResult<bool> {
        match self.client.list_buckets().send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::error!("对象存储健康检查失败: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_without_endpoint() {
        let config = S3Config {
            endpoint: None,
            region: "eu-central-1".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "secret".to_string(),
            force_path_style: false,
        };
        let storage = S3Storage::new(&config);
        assert_eq!(
            storage.client.config().region().map(|r| r.as_ref()),
            Some("eu-central-1")
        );
    }
}
