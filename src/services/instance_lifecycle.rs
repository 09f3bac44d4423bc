use super::{ServiceContext, config_apply::OdooConfig, steps};
use crate::{
    error::{AppError, AppResult},
    models::{Host, Instance, InstanceNames, InstanceStatus, NewInstance},
    remote::{InstancePaths, RemoteCommand, RemoteSession, timeouts},
};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const POSTGRES_IMAGE: &str = "postgres:16-alpine";
/// Odoo 官方镜像中的 odoo 用户
const ODOO_UID: &str = "101:101";
const DEPLOY_READY_ATTEMPTS: u32 = 60;
const START_READY_ATTEMPTS: u32 = 15;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 实例容器的部署与启停
#[derive(Clone)]
pub struct InstanceLifecycle {
    ctx: ServiceContext,
}

impl InstanceLifecycle {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// 登记新实例，资源名在此一次性生成
    pub async fn register(&self, new: &NewInstance) -> AppResult<Instance> {
        let host = self.ctx.host(new.host_id).await?;
        let names = InstanceNames::derive(&new.name, &host.short_id());
        let paths = self.ctx.layout.instance(&names.container_name);
        let instance = self
            .ctx
            .store
            .create_instance(new, &names, &paths.addons())
            .await?;
        info!("已登记实例 {} ({})", instance.name, instance.container_name);
        Ok(instance)
    }

    pub async fn deploy(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        self.ctx
            .store
            .set_instance_status(instance.id, InstanceStatus::Deploying)
            .await?;

        match self.deploy_steps(&host, &instance).await {
            Ok(container_id) => {
                self.ctx
                    .store
                    .mark_instance_running(instance.id, &container_id)
                    .await?;
                info!("实例 {} 部署完成，容器 {}", instance.container_name, container_id);
                Ok(json!({
                    "status": "running",
                    "container_name": instance.container_name,
                    "container_id": container_id,
                    "url": format!("http://{}:{}", host.address, instance.host_port),
                }))
            }
            Err(e) => {
                error!("实例 {} 部署失败: {}", instance.container_name, e);
                self.mark_failed(instance.id).await;
                Err(e)
            }
        }
    }

    async fn deploy_steps(&self, host: &Host, instance: &Instance) -> AppResult<String> {
        let session = self.ctx.open(host).await?;
        let session = session.as_ref();
        let paths = self.ctx.layout.instance(&instance.container_name);

        info!("创建实例目录: {}", paths.root());
        steps::run_checked(
            session,
            "创建实例目录",
            &RemoteCommand::new("mkdir").arg("-p").args([
                paths.data(),
                paths.addons(),
                paths.config_dir(),
                paths.pgdata(),
            ]),
            timeouts::QUICK,
        )
        .await?;
        self.grant_data_ownership(session, &paths).await?;

        let ss = steps::run(session, &RemoteCommand::new("ss").arg("-tln"), timeouts::QUICK).await?;
        if port_in_use(&ss.stdout, instance.host_port) {
            return Err(AppError::invalid_state(format!(
                "端口 {} 已被占用，请为实例选择其他端口",
                instance.host_port
            )));
        }

        steps::run(
            session,
            &RemoteCommand::docker("network")
                .args(["create", instance.network_name.as_str()])
                .discard_stderr()
                .or_true(),
            timeouts::QUICK,
        )
        .await?;
        for name in [&instance.container_name, &instance.pg_container_name] {
            steps::run(session, &remove_container(name), timeouts::CONTROL).await?;
        }

        info!("启动PostgreSQL容器: {}", instance.pg_container_name);
        steps::run_checked(
            session,
            "启动PostgreSQL",
            &docker_run_postgres(instance, &paths),
            timeouts::DB_CONTAINER,
        )
        .await?;
        if !self
            .wait_for_postgres(session, instance, &database_probe(instance), DEPLOY_READY_ATTEMPTS)
            .await?
        {
            warn!("PostgreSQL {} 在等待期内未就绪，继续部署", instance.pg_container_name);
        }

        session
            .write_file(&paths.config_file(), &OdooConfig::for_instance(instance).render())
            .await?;

        info!("拉取镜像 {}", instance.image());
        let pull = steps::run(
            session,
            &RemoteCommand::docker("pull").arg(instance.image()),
            timeouts::IMAGE_PULL,
        )
        .await?;
        if !pull.success() {
            warn!("拉取镜像 {} 失败，尝试使用本地镜像: {}", instance.image(), pull.detail());
        }

        self.initialize_database(session, instance, &paths).await?;

        info!("启动Odoo容器: {}", instance.container_name);
        steps::run_checked(
            session,
            "启动Odoo容器",
            &docker_run_odoo(instance, &paths),
            timeouts::DB_CONTAINER,
        )
        .await?;

        let inspect = steps::run_checked(
            session,
            "读取容器ID",
            &RemoteCommand::docker("inspect").args([
                "--format",
                "{{.Id}}",
                instance.container_name.as_str(),
            ]),
            timeouts::QUICK,
        )
        .await?;
        Ok(inspect.stdout.chars().take(12).collect())
    }

    /// 数据目录交给容器内的 odoo 用户，chown 失败时放宽权限
    async fn grant_data_ownership(
        &self,
        session: &dyn RemoteSession,
        paths: &InstancePaths,
    ) -> AppResult<()> {
        let chown = steps::run(
            session,
            &RemoteCommand::new("chown")
                .args(["-R", ODOO_UID])
                .args([paths.data(), paths.addons()]),
            timeouts::QUICK,
        )
        .await?;
        if !chown.success() {
            warn!("chown 失败，改用 chmod 777: {}", chown.detail());
            steps::run_checked(
                session,
                "设置目录权限",
                &RemoteCommand::new("chmod")
                    .args(["-R", "777"])
                    .args([paths.data(), paths.addons()]),
                timeouts::QUICK,
            )
            .await?;
        }
        Ok(())
    }

    /// 在一次性容器中初始化数据库，等待其退出
    async fn initialize_database(
        &self,
        session: &dyn RemoteSession,
        instance: &Instance,
        paths: &InstancePaths,
    ) -> AppResult<()> {
        let init_name = instance.init_container_name();
        steps::run(session, &force_remove(&init_name), timeouts::QUICK).await?;

        info!("初始化Odoo数据库: {}", init_name);
        steps::run_checked(
            session,
            "启动数据库初始化容器",
            &docker_run_odoo_init(instance, paths),
            timeouts::DB_CONTAINER,
        )
        .await?;

        let waited = steps::run(
            session,
            &RemoteCommand::docker("wait").arg(&init_name),
            timeouts::SCHEMA_INIT,
        )
        .await?;
        let exit_code = waited.stdout.trim().parse::<i32>().unwrap_or(-1);
        if exit_code != 0 {
            let logs = steps::run(
                session,
                &RemoteCommand::docker("logs")
                    .args(["--tail", "50", init_name.as_str()])
                    .merge_stderr(),
                timeouts::QUICK,
            )
            .await?;
            steps::run(session, &force_remove(&init_name), timeouts::QUICK).await?;
            return Err(AppError::command_failed(
                "Odoo数据库初始化",
                exit_code,
                format!("最近日志:\n{}", logs.stdout),
            ));
        }

        steps::run(
            session,
            &RemoteCommand::docker("rm").arg(&init_name),
            timeouts::QUICK,
        )
        .await?;
        Ok(())
    }

    /// 轮询数据库就绪，返回是否在尝试次数内就绪
    async fn wait_for_postgres(
        &self,
        session: &dyn RemoteSession,
        instance: &Instance,
        probe: &RemoteCommand,
        attempts: u32,
    ) -> AppResult<bool> {
        for attempt in 1..=attempts {
            if steps::run(session, probe, timeouts::QUICK).await?.success() {
                return Ok(true);
            }
            if attempt < attempts {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
        warn!("等待 {} 就绪超过 {} 次", instance.pg_container_name, attempts);
        Ok(false)
    }

    pub async fn start(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;
        let session = session.as_ref();

        steps::run_checked(
            session,
            "启动PostgreSQL容器",
            &RemoteCommand::docker("start").arg(&instance.pg_container_name),
            timeouts::CONTROL,
        )
        .await?;
        let probe = RemoteCommand::docker("exec")
            .args([instance.pg_container_name.as_str(), "pg_isready", "-U", "odoo"])
            .quiet();
        self.wait_for_postgres(session, &instance, &probe, START_READY_ATTEMPTS)
            .await?;
        steps::run_checked(
            session,
            "启动Odoo容器",
            &RemoteCommand::docker("start").arg(&instance.container_name),
            timeouts::CONTROL,
        )
        .await?;

        self.ctx
            .store
            .set_instance_status(instance.id, InstanceStatus::Running)
            .await?;
        info!("实例 {} 已启动", instance.container_name);
        Ok(json!({ "status": "running" }))
    }

    pub async fn stop(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;

        for (step, name) in [
            ("停止Odoo容器", &instance.container_name),
            ("停止PostgreSQL容器", &instance.pg_container_name),
        ] {
            steps::run_checked(
                session.as_ref(),
                step,
                &RemoteCommand::docker("stop").arg(name),
                timeouts::QUICK,
            )
            .await?;
        }

        self.ctx
            .store
            .set_instance_status(instance.id, InstanceStatus::Stopped)
            .await?;
        info!("实例 {} 已停止", instance.container_name);
        Ok(json!({ "status": "stopped" }))
    }

    pub async fn restart(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;

        steps::run_checked(
            session.as_ref(),
            "重启Odoo容器",
            &RemoteCommand::docker("restart").arg(&instance.container_name),
            timeouts::CONTROL,
        )
        .await?;

        self.ctx
            .store
            .set_instance_status(instance.id, InstanceStatus::Running)
            .await?;
        Ok(json!({ "status": "running" }))
    }

    /// 删除容器、网络和数据目录（保留备份目录），最后删除记录
    pub async fn destroy(&self, instance_id: Uuid) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let paths = self.ctx.layout.instance(&instance.container_name);

        {
            let session = self.ctx.open(&host).await?;
            let session = session.as_ref();

            info!("销毁实例 {}", instance.container_name);
            for name in [
                instance.container_name.as_str(),
                instance.init_container_name().as_str(),
                instance.pg_container_name.as_str(),
            ] {
                steps::run(session, &remove_container(name), timeouts::CONTROL).await?;
            }
            steps::run(
                session,
                &RemoteCommand::docker("network")
                    .args(["rm", instance.network_name.as_str()])
                    .discard_stderr()
                    .or_true(),
                timeouts::QUICK,
            )
            .await?;
            steps::run_checked(
                session,
                "删除实例目录",
                &RemoteCommand::new("rm").arg("-rf").args(paths.disposable()),
                timeouts::CONTROL,
            )
            .await?;
        }

        self.ctx.store.delete_instance(instance.id).await?;
        info!("实例 {} 已从主机 {} 移除", instance.container_name, host.name);
        Ok(json!({
            "status": "destroyed",
            "container_name": instance.container_name,
            "message": format!("实例 {} 已从主机上完全移除", instance.container_name),
        }))
    }

    pub async fn logs(&self, instance_id: Uuid, lines: u32) -> AppResult<JsonValue> {
        let instance = self.ctx.instance(instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        let session = self.ctx.open(&host).await?;
        let session = session.as_ref();

        let exists = steps::run(
            session,
            &RemoteCommand::docker("inspect")
                .arg(&instance.container_name)
                .quiet(),
            timeouts::QUICK,
        )
        .await?;
        if !exists.success() {
            return Err(AppError::invalid_state(format!(
                "容器 '{}' 在主机上不存在，可能部署未完成或已被删除，请尝试重新部署",
                instance.container_name
            )));
        }

        let output = steps::run(
            session,
            &RemoteCommand::docker("logs")
                .args(["--tail".to_string(), lines.to_string(), instance.container_name.clone()])
                .merge_stderr(),
            timeouts::QUICK,
        )
        .await?;
        Ok(json!({ "logs": output.stdout }))
    }

    async fn mark_failed(&self, instance_id: Uuid) {
        if let Err(e) = self
            .ctx
            .store
            .set_instance_status(instance_id, InstanceStatus::Failed)
            .await
        {
            error!("更新实例 {} 失败状态出错: {}", instance_id, e);
        }
    }
}

/// `ss -tln` 输出中本地地址是否以 `:{port}` 结尾
pub fn port_in_use(ss_output: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    ss_output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|local| local.ends_with(&suffix))
}

fn remove_container(name: &str) -> RemoteCommand {
    RemoteCommand::docker("stop")
        .arg(name)
        .discard_stderr()
        .or_true()
        .and(RemoteCommand::docker("rm").arg(name).discard_stderr().or_true())
}

fn force_remove(name: &str) -> RemoteCommand {
    RemoteCommand::docker("rm")
        .args(["-f", name])
        .discard_stderr()
        .or_true()
}

fn database_probe(instance: &Instance) -> RemoteCommand {
    RemoteCommand::docker("exec")
        .args([
            instance.pg_container_name.as_str(),
            "psql",
            "-U",
            "odoo",
            "-d",
            "odoo",
            "-c",
            "SELECT 1",
        ])
        .quiet()
}

fn volume(host_path: String, container_path: &str) -> [String; 2] {
    ["-v".to_string(), format!("{}:{}", host_path, container_path)]
}

fn odoo_volumes(paths: &InstancePaths) -> Vec<String> {
    [
        volume(paths.data(), "/var/lib/odoo"),
        volume(paths.addons(), "/mnt/extra-addons"),
        volume(paths.config_file(), "/etc/odoo/odoo.conf"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn docker_run_postgres(instance: &Instance, paths: &InstancePaths) -> RemoteCommand {
    RemoteCommand::docker("run")
        .args(["-d", "--name", instance.pg_container_name.as_str()])
        .args(["--network", instance.network_name.as_str()])
        .args(["--restart", "unless-stopped"])
        .args(["-e", "POSTGRES_USER=odoo"])
        .arg("-e")
        .arg(format!("POSTGRES_PASSWORD={}", instance.pg_password()))
        .args(["-e", "POSTGRES_DB=odoo"])
        .args(volume(paths.pgdata(), "/var/lib/postgresql/data"))
        .arg(POSTGRES_IMAGE)
}

pub fn docker_run_odoo_init(instance: &Instance, paths: &InstancePaths) -> RemoteCommand {
    RemoteCommand::docker("run")
        .args(["-d", "--name"])
        .arg(instance.init_container_name())
        .args(["--network", instance.network_name.as_str()])
        .args(odoo_volumes(paths))
        .arg(instance.image())
        .args([
            "odoo",
            "--database=odoo",
            "--init=base",
            "--without-demo=all",
            "--stop-after-init",
        ])
}

pub fn docker_run_odoo(instance: &Instance, paths: &InstancePaths) -> RemoteCommand {
    RemoteCommand::docker("run")
        .args(["-d", "--name", instance.container_name.as_str()])
        .args(["--network", instance.network_name.as_str()])
        .args(["--restart", "unless-stopped"])
        .arg("-p")
        .arg(format!("{}:8069", instance.host_port))
        .args(odoo_volumes(paths))
        .arg(instance.image())
}
