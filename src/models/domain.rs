use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum!(
    /// 域名绑定状态
    DomainStatus {
        Pending => "pending",
        Active => "active",
        Failed => "failed",
    }
);

text_enum!(
    /// 证书状态
    SslStatus {
        None => "none",
        Pending => "pending",
        Active => "active",
        Failed => "failed",
    }
);

/// 绑定到实例的公网域名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub domain_name: String,
    pub status: DomainStatus,
    pub ssl_status: SslStatus,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
