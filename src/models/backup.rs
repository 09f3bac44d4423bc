use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum!(
    /// 备份频率
    BackupFrequency {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
);

impl BackupFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            BackupFrequency::Daily => Duration::days(1),
            BackupFrequency::Weekly => Duration::days(7),
            BackupFrequency::Monthly => Duration::days(30),
        }
    }

    /// 以 `now` 为基准的下一次执行时间
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.interval()
    }
}

text_enum!(
    /// 备份存放位置
    StorageType {
        Local => "local",
        S3 => "s3",
    }
);

text_enum!(
    /// 备份记录状态
    BackupStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
    }
);

/// 周期备份策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub frequency: BackupFrequency,
    pub retention_days: i32,
    pub storage_type: StorageType,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 对象存储目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub prefix: Option<String>,
}

impl ObjectTarget {
    /// 对象键：去掉首尾 `/` 的前缀 + 文件名，空段跳过
    pub fn object_key(&self, filename: &str) -> String {
        let prefix = self.prefix.as_deref().unwrap_or("").trim_matches('/');
        [prefix, filename]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl BackupSchedule {
    /// 仅当存储类型为 s3 且配置了 bucket 时上传对象存储
    pub fn object_target(&self) -> Option<ObjectTarget> {
        if self.storage_type != StorageType::S3 {
            return None;
        }
        let bucket = self.s3_bucket.as_deref().filter(|b| !b.trim().is_empty())?;
        Some(ObjectTarget {
            bucket: bucket.to_string(),
            prefix: self.s3_prefix.clone(),
        })
    }

    /// 保留期截止时间；保留天数不为正时不清理
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.retention_days > 0).then(|| now - Duration::days(self.retention_days as i64))
    }
}

/// 单次备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub storage_type: StorageType,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupRecord {
    /// 只有成功且有存放位置的备份可以恢复
    pub fn restorable_path(&self) -> Option<&str> {
        match self.status {
            BackupStatus::Success => self.file_path.as_deref().filter(|p| !p.is_empty()),
            _ => None,
        }
    }

    pub fn is_object_stored(&self) -> bool {
        self.storage_type == StorageType::S3
            && self
                .file_path
                .as_deref()
                .is_some_and(|p| p.starts_with("s3://"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(storage_type: StorageType, bucket: Option<&str>) -> BackupSchedule {
        let now = Utc::now();
        BackupSchedule {
            id: Uuid::new_v4(),
            instance_id: Uuid::new_v4(),
            frequency: BackupFrequency::Daily,
            retention_days: 7,
            storage_type,
            s3_bucket: bucket.map(str::to_string),
            s3_prefix: Some("/nightly/".to_string()),
            is_active: true,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_next_run_after() {
        let now = Utc::now();
        assert_eq!(BackupFrequency::Daily.next_run_after(now), now + Duration::days(1));
        assert_eq!(BackupFrequency::Weekly.next_run_after(now), now + Duration::days(7));
        assert_eq!(BackupFrequency::Monthly.next_run_after(now), now + Duration::days(30));
    }

    #[test]
    fn test_object_target() {
        assert!(schedule(StorageType::Local, Some("bucket")).object_target().is_none());
        assert!(schedule(StorageType::S3, None).object_target().is_none());
        assert!(schedule(StorageType::S3, Some("  ")).object_target().is_none());

        let target = schedule(StorageType::S3, Some("backups")).object_target().unwrap();
        assert_eq!(target.object_key("shop_20250101_000000.tar.gz"), "nightly/shop_20250101_000000.tar.gz");

        let bare = ObjectTarget {
            bucket: "backups".to_string(),
            prefix: None,
        };
        assert_eq!(bare.object_key("a.tar.gz"), "a.tar.gz");
    }

    #[test]
    fn test_retention_cutoff() {
        let now = Utc::now();
        let mut s = schedule(StorageType::Local, None);
        assert_eq!(s.retention_cutoff(now), Some(now - Duration::days(7)));
        s.retention_days = 0;
        assert_eq!(s.retention_cutoff(now), None);
    }
}
