use super::{ServiceContext, steps};
use crate::{
    error::AppResult,
    models::Instance,
    remote::{RemoteCommand, RemoteSession, timeouts},
};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// 由平台管理、用户不能覆盖的键
pub const LOCKED_KEYS: [&str; 7] = [
    "db_host",
    "db_port",
    "db_user",
    "db_password",
    "db_name",
    "addons_path",
    "data_dir",
];

pub fn is_locked(key: &str) -> bool {
    LOCKED_KEYS.contains(&key)
}

/// odoo.conf 的 `[options]` 段，保持键的插入顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OdooConfig {
    entries: Vec<(String, String)>,
}

impl OdooConfig {
    /// 部署时写入的初始配置：平台键 + 用户覆盖
    pub fn for_instance(instance: &Instance) -> Self {
        let mut config = Self::default();
        config.set("db_host", &instance.pg_container_name);
        config.set("db_port", "5432");
        config.set("db_user", "odoo");
        config.set("db_password", instance.pg_password());
        config.set("db_name", "odoo");
        config.set("addons_path", "/mnt/extra-addons");
        config.set("data_dir", "/var/lib/odoo");
        config.merge(instance.config_overrides());
        config
    }

    /// 解析 `key = value` 行；空行、段头和注释跳过
    pub fn parse(raw: &str) -> Self {
        let mut config = Self::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') || line.starts_with(';') || line.starts_with('#')
            {
                continue;
            }
            if let Some((key, value)) = line.split_once(" = ") {
                config.set(key.trim(), value.trim());
            }
        }
        config
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 已有键原位更新，新键追加到末尾
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// 合并非锁定键，返回实际接受的更新
    pub fn merge<I>(&mut self, updates: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut accepted = Vec::new();
        for (key, value) in updates {
            if is_locked(&key) {
                tracing::warn!("忽略锁定配置项: {}", key);
                continue;
            }
            self.set(&key, &value);
            accepted.push((key, value));
        }
        accepted
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        lines.push("[options]".to_string());
        lines.extend(self.entries.iter().map(|(k, v)| format!("{} = {}", k, v)));
        lines.join("\n")
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 读取与修改实例的 odoo.conf
#[derive(Clone)]
pub struct ConfigApplier {
    ctx: ServiceContext,
}

impl ConfigApplier {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn read(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;

        let config = self.read_live(session.as_ref(), &instance).await?;
        Ok(json!({ "config": config.to_json() }))
    }

    /// 合并更新并重启；数据库中的覆盖替换为本次接受的更新
    pub async fn apply(
        &self,
        instance_id: Uuid,
        updates: &[(String, String)],
    ) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;
        let paths = self.ctx.layout.instance(&instance.container_name);

        let mut config = self.read_live(session.as_ref(), &instance).await?;
        let accepted = config.merge(updates.iter().cloned());

        session.write_file(&paths.config_file(), &config.render()).await?;
        tracing::info!(
            "已写入 {} 的配置，{} 项更新，正在重启容器",
            instance.container_name,
            accepted.len()
        );

        steps::run_checked(
            session.as_ref(),
            "重启Odoo容器",
            &RemoteCommand::docker("restart").arg(&instance.container_name),
            timeouts::CONTROL,
        )
        .await?;

        let overrides: serde_json::Map<String, JsonValue> = accepted
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();
        self.ctx
            .store
            .set_instance_config(instance.id, &serde_json::to_string(&overrides)?)
            .await?;

        Ok(json!({ "status": "applied", "keys_updated": accepted.len() }))
    }

    async fn read_live(
        &self,
        session: &dyn RemoteSession,
        instance: &Instance,
    ) -> AppResult<OdooConfig> {
        let paths = self.ctx.layout.instance(&instance.container_name);
        let output = steps::run_checked(
            session,
            "读取配置文件",
            &RemoteCommand::new("cat").arg(paths.config_file()),
            timeouts::QUICK,
        )
        .await?;
        Ok(OdooConfig::parse(&output.stdout))
    }
}
