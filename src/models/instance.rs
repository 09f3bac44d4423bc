use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

text_enum!(
    /// 实例生命周期状态
    InstanceStatus {
        Pending => "pending",
        Deploying => "deploying",
        Running => "running",
        Stopped => "stopped",
        Failed => "failed",
        Destroyed => "destroyed",
    }
);

/// 未设置时使用的数据库密码
pub const DEFAULT_PG_PASSWORD: &str = "odoo";

/// 一套 Odoo + PostgreSQL 部署
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    pub odoo_version: String,
    pub edition: String,
    /// 应用容器名，创建时生成后不再变化
    pub container_name: String,
    pub pg_container_name: String,
    pub network_name: String,
    pub host_port: u16,
    pub status: InstanceStatus,
    pub container_id: Option<String>,
    /// 用户配置覆盖（JSON对象）
    pub odoo_config: Option<String>,
    pub addons_path: Option<String>,
    #[serde(skip_serializing)]
    pub pg_password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn init_container_name(&self) -> String {
        format!("{}-init", self.container_name)
    }

    pub fn pg_password(&self) -> &str {
        self.pg_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PG_PASSWORD)
    }

    pub fn image(&self) -> String {
        format!("odoo:{}", self.odoo_version)
    }

    /// 解析用户配置覆盖，保持键的顺序；格式错误时返回空
    pub fn config_overrides(&self) -> Vec<(String, String)> {
        let Some(raw) = self.odoo_config.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Vec::new();
        };
        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
            Ok(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, value)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("实例 {} 的配置覆盖不是合法JSON，已忽略: {}", self.id, e);
                Vec::new()
            }
        }
    }
}

/// 由实例名派生的资源名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNames {
    pub container_name: String,
    pub pg_container_name: String,
    pub network_name: String,
}

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]").expect("常量正则表达式"));
static REPEATED_DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("常量正则表达式"));

impl InstanceNames {
    pub fn derive(name: &str, host_short_id: &str) -> Self {
        let container_name = format!("odoo-{}-s{}", sanitize_name(name), host_short_id);
        Self {
            pg_container_name: format!("{}-db", container_name),
            network_name: format!("net-{}", container_name),
            container_name,
        }
    }
}

/// 小写化，非 `[a-z0-9_-]` 字符替换为 `-`，合并连续的 `-` 并去掉首尾 `-`
pub fn sanitize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "-");
    let collapsed = REPEATED_DASHES.replace_all(&replaced, "-");
    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "instance".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 创建实例所需字段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub host_id: Uuid,
    pub name: String,
    pub odoo_version: String,
    pub edition: String,
    pub host_port: u16,
    pub odoo_config: Option<String>,
    pub pg_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Shop"), "my-shop");
        assert_eq!(sanitize_name("  Acme!!  Corp__2 "), "acme-corp__2");
        assert_eq!(sanitize_name("--x--"), "x");
        assert_eq!(sanitize_name("日本"), "instance");
    }

    #[test]
    fn test_derive_names() {
        let names = InstanceNames::derive("Demo Shop", "1a2b3c4d");
        assert_eq!(names.container_name, "odoo-demo-shop-s1a2b3c4d");
        assert_eq!(names.pg_container_name, "odoo-demo-shop-s1a2b3c4d-db");
        assert_eq!(names.network_name, "net-odoo-demo-shop-s1a2b3c4d");
    }

    #[test]
    fn test_config_overrides_parse() {
        let mut instance = Instance::for_tests(Uuid::new_v4());
        instance.odoo_config = Some(r#"{"workers": 4, "proxy_mode": "True"}"#.to_string());
        let overrides = instance.config_overrides();
        assert_eq!(
            overrides,
            vec![
                ("workers".to_string(), "4".to_string()),
                ("proxy_mode".to_string(), "True".to_string()),
            ]
        );

        instance.odoo_config = Some("not json".to_string());
        assert!(instance.config_overrides().is_empty());
    }

    #[test]
    fn test_pg_password_default() {
        let mut instance = Instance::for_tests(Uuid::new_v4());
        instance.pg_password = None;
        assert_eq!(instance.pg_password(), "odoo");
        instance.pg_password = Some("s3cret".to_string());
        assert_eq!(instance.pg_password(), "s3cret");
    }
}

#[cfg(test)]
impl Instance {
    pub fn for_tests(host_id: Uuid) -> Self {
        let names = InstanceNames::derive("demo", &host_id.simple().to_string()[..8]);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            host_id,
            name: "demo".to_string(),
            odoo_version: "17.0".to_string(),
            edition: "community".to_string(),
            addons_path: Some(format!("/opt/cloudtab/{}/addons", names.container_name)),
            container_name: names.container_name,
            pg_container_name: names.pg_container_name,
            network_name: names.network_name,
            host_port: 8069,
            status: InstanceStatus::Running,
            container_id: None,
            odoo_config: None,
            pg_password: None,
            created_at: now,
            updated_at: now,
        }
    }
}
