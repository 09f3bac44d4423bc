use crate::error::{AppError, AppResult};
use std::fmt;

/// `s3://bucket/key` 形式的对象位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

pub fn parse_object_uri(uri: &str) -> AppResult<ObjectUri> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| AppError::validation(format!("Not a valid S3 URI: {}", uri)))?;

    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() || key.is_empty() {
        return Err(AppError::validation(format!(
            "S3 URI missing bucket or key: {}",
            uri
        )));
    }

    Ok(ObjectUri {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}
