use crate::config::RetryClass;
use crate::models::TargetType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

fn default_log_lines() -> u32 {
    200
}

/// 以 JSON 对象收发、保留键顺序的键值对；重复键取最后一次的值
mod ordered_pairs {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        pairs: &[(String, String)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (key, value) in pairs {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("值为字符串的对象")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs: Vec<(String, String)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    match pairs.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => pairs.push((key, value)),
                    }
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

/// 所有可入队的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    TestConnection {
        host_id: Uuid,
    },
    SystemInfo {
        host_id: Uuid,
    },
    InstallDeps {
        host_id: Uuid,
    },
    Deploy {
        instance_id: Uuid,
    },
    Start {
        instance_id: Uuid,
    },
    Stop {
        instance_id: Uuid,
    },
    Restart {
        instance_id: Uuid,
    },
    Destroy {
        instance_id: Uuid,
    },
    ReadConfig {
        instance_id: Uuid,
    },
    ApplyConfig {
        instance_id: Uuid,
        /// 按提交顺序追加到 odoo.conf
        #[serde(with = "ordered_pairs")]
        #[schema(value_type = Object)]
        updates: Vec<(String, String)>,
    },
    GetLogs {
        instance_id: Uuid,
        #[serde(default = "default_log_lines")]
        lines: u32,
    },
    CreateBackup {
        instance_id: Uuid,
        #[serde(default)]
        schedule_id: Option<Uuid>,
    },
    RestoreBackup {
        record_id: Uuid,
    },
    SetupNginx {
        domain_id: Uuid,
    },
    IssueSsl {
        domain_id: Uuid,
    },
    GitDeploy {
        repo_id: Uuid,
    },
}

/// 执行前需要持有的实例锁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    None,
    Instance(Uuid),
    /// 先通过备份记录找到实例
    BackupRecord(Uuid),
    /// 先通过仓库找到实例
    Repository(Uuid),
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::TestConnection { .. } => "test_connection",
            JobKind::SystemInfo { .. } => "system_info",
            JobKind::InstallDeps { .. } => "install_deps",
            JobKind::Deploy { .. } => "deploy",
            JobKind::Start { .. } => "start",
            JobKind::Stop { .. } => "stop",
            JobKind::Restart { .. } => "restart",
            JobKind::Destroy { .. } => "destroy",
            JobKind::ReadConfig { .. } => "read_config",
            JobKind::ApplyConfig { .. } => "apply_config",
            JobKind::GetLogs { .. } => "get_logs",
            JobKind::CreateBackup { .. } => "create_backup",
            JobKind::RestoreBackup { .. } => "restore_backup",
            JobKind::SetupNginx { .. } => "setup_nginx",
            JobKind::IssueSsl { .. } => "issue_ssl",
            JobKind::GitDeploy { .. } => "git_deploy",
        }
    }

    pub fn target(&self) -> (TargetType, Uuid) {
        match self {
            JobKind::TestConnection { host_id }
            | JobKind::SystemInfo { host_id }
            | JobKind::InstallDeps { host_id } => (TargetType::Host, *host_id),
            JobKind::Deploy { instance_id }
            | JobKind::Start { instance_id }
            | JobKind::Stop { instance_id }
            | JobKind::Restart { instance_id }
            | JobKind::Destroy { instance_id }
            | JobKind::ReadConfig { instance_id }
            | JobKind::ApplyConfig { instance_id, .. }
            | JobKind::GetLogs { instance_id, .. }
            | JobKind::CreateBackup { instance_id, .. } => (TargetType::Instance, *instance_id),
            JobKind::RestoreBackup { record_id } => (TargetType::Backup, *record_id),
            JobKind::SetupNginx { domain_id } | JobKind::IssueSsl { domain_id } => {
                (TargetType::Domain, *domain_id)
            }
            JobKind::GitDeploy { repo_id } => (TargetType::Repository, *repo_id),
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            JobKind::TestConnection { .. } => RetryClass::HostCheck,
            JobKind::SystemInfo { .. } => RetryClass::HostInfo,
            JobKind::InstallDeps { .. } => RetryClass::Install,
            JobKind::Deploy { .. } => RetryClass::Deploy,
            JobKind::Start { .. } | JobKind::Stop { .. } | JobKind::Restart { .. } => {
                RetryClass::Control
            }
            JobKind::Destroy { .. } => RetryClass::Destroy,
            JobKind::ReadConfig { .. }
            | JobKind::ApplyConfig { .. }
            | JobKind::GetLogs { .. } => RetryClass::Quick,
            JobKind::CreateBackup { .. } | JobKind::RestoreBackup { .. } => RetryClass::Backup,
            JobKind::SetupNginx { .. } => RetryClass::Nginx,
            JobKind::IssueSsl { .. } => RetryClass::Certificate,
            JobKind::GitDeploy { .. } => RetryClass::Git,
        }
    }

    /// 单次执行的时间上限
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            JobKind::Deploy { .. } => 900,
            JobKind::Destroy { .. } => 120,
            JobKind::Start { .. } | JobKind::Stop { .. } | JobKind::Restart { .. } => 60,
            JobKind::CreateBackup { .. } | JobKind::RestoreBackup { .. } => 1200,
            JobKind::SetupNginx { .. } => 120,
            JobKind::IssueSsl { .. } => 300,
            JobKind::GitDeploy { .. } => 600,
            JobKind::InstallDeps { .. } => 900,
            JobKind::TestConnection { .. }
            | JobKind::SystemInfo { .. }
            | JobKind::ReadConfig { .. }
            | JobKind::ApplyConfig { .. }
            | JobKind::GetLogs { .. } => 60,
        };
        Duration::from_secs(secs)
    }

    /// 会改动实例容器或数据的任务按实例串行
    pub fn lock_scope(&self) -> LockScope {
        match self {
            JobKind::Deploy { instance_id }
            | JobKind::Start { instance_id }
            | JobKind::Stop { instance_id }
            | JobKind::Restart { instance_id }
            | JobKind::Destroy { instance_id }
            | JobKind::ApplyConfig { instance_id, .. }
            | JobKind::CreateBackup { instance_id, .. } => LockScope::Instance(*instance_id),
            JobKind::RestoreBackup { record_id } => LockScope::BackupRecord(*record_id),
            JobKind::GitDeploy { repo_id } => LockScope::Repository(*repo_id),
            JobKind::TestConnection { .. }
            | JobKind::SystemInfo { .. }
            | JobKind::InstallDeps { .. }
            | JobKind::ReadConfig { .. }
            | JobKind::GetLogs { .. }
            | JobKind::SetupNginx { .. }
            | JobKind::IssueSsl { .. } => LockScope::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_tagged_job() {
        let id = Uuid::new_v4();
        let kind: JobKind =
            serde_json::from_value(json!({"kind": "get_logs", "instance_id": id})).unwrap();
        assert_eq!(
            kind,
            JobKind::GetLogs {
                instance_id: id,
                lines: 200
            }
        );

        let kind: JobKind = serde_json::from_value(json!({
            "kind": "apply_config",
            "instance_id": id,
            "updates": {"workers": "4"}
        }))
        .unwrap();
        assert_eq!(kind.name(), "apply_config");
        assert_eq!(kind.target(), (TargetType::Instance, id));

        let kind: JobKind = serde_json::from_str(&format!(
            r#"{{"kind":"apply_config","instance_id":"{}","updates":{{"workers":"4","limit_time_real":"600","admin_passwd":"x"}}}}"#,
            id
        ))
        .unwrap();
        let JobKind::ApplyConfig { updates, .. } = &kind else {
            panic!("expected apply_config");
        };
        let keys: Vec<&str> = updates.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["workers", "limit_time_real", "admin_passwd"]);
        let round_trip = serde_json::to_string(&kind).unwrap();
        assert!(round_trip.contains(r#""updates":{"workers":"4","limit_time_real":"600","admin_passwd":"x"}"#));

        assert!(serde_json::from_value::<JobKind>(json!({"kind": "reboot_host"})).is_err());
    }

    #[test]
    fn test_serialized_name_matches_tag() {
        let kind = JobKind::IssueSsl {
            domain_id: Uuid::new_v4(),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["kind"], kind.name());
    }

    #[test]
    fn test_lock_scope() {
        let id = Uuid::new_v4();
        assert_eq!(
            JobKind::Deploy { instance_id: id }.lock_scope(),
            LockScope::Instance(id)
        );
        assert_eq!(
            JobKind::RestoreBackup { record_id: id }.lock_scope(),
            LockScope::BackupRecord(id)
        );
        assert_eq!(
            JobKind::GetLogs {
                instance_id: id,
                lines: 10
            }
            .lock_scope(),
            LockScope::None
        );
    }

    #[test]
    fn test_backups_never_retry() {
        let kind = JobKind::CreateBackup {
            instance_id: Uuid::new_v4(),
            schedule_id: None,
        };
        assert_eq!(kind.retry_class(), RetryClass::Backup);
        assert_eq!(kind.timeout(), Duration::from_secs(1200));
    }
}
