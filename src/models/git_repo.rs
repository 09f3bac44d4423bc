use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 实例的模块源码仓库（与实例一一对应）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepo {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub repo_url: String,
    pub branch: String,
    /// 部署私钥（已由外部解密）
    #[serde(skip_serializing)]
    pub deploy_key: Option<String>,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub last_commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitRepo {
    pub fn has_deploy_key(&self) -> bool {
        self.deploy_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}
