use super::{ServiceContext, steps};
use crate::{
    error::AppResult,
    jobs::JobOutcome,
    models::{HostProbe, HostStatus},
    remote::{RemoteCommand, RemoteSession, timeouts},
};
use chrono::Utc;
use regex::Regex;
use serde_json::{Value as JsonValue, json};
use std::sync::LazyLock;
use tracing::{error, info, warn};
use uuid::Uuid;

static PRETTY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^PRETTY_NAME="?([^"\n]*)"?\s*$"#).expect("常量正则表达式")
});
static CPU_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Model name:\s*(.+?)\s*$").expect("常量正则表达式"));
static DOCKER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Docker version ([^,\s]+)").expect("常量正则表达式"));

/// 主机连通性检查、信息采集与依赖安装
#[derive(Clone)]
pub struct HostInspector {
    ctx: ServiceContext,
}

impl HostInspector {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn test_connection(&self, host_id: Uuid) -> AppResult<JobOutcome> {
        let host = self.ctx.host(host_id).await?;
        info!("测试SSH连接: {}:{}", host.address, host.port);

        let echoed = match self.ctx.open(&host).await {
            Ok(session) => {
                steps::run(session.as_ref(), &RemoteCommand::new("echo").arg("ok"), timeouts::QUICK)
                    .await
            }
            Err(e) => Err(e),
        };
        let output = match echoed {
            Ok(output) => output,
            Err(e) => {
                error!("主机 {} SSH连接失败: {}", host.name, e);
                self.ctx
                    .store
                    .update_host_status(host.id, HostStatus::Failed, None)
                    .await?;
                return Err(e);
            }
        };

        if output.success() && output.stdout.contains("ok") {
            self.ctx
                .store
                .update_host_status(host.id, HostStatus::Connected, Some(Utc::now()))
                .await?;
            info!("主机 {} 连接正常", host.name);
            Ok(JobOutcome::Success(json!({ "status": "connected" })))
        } else {
            warn!("主机 {} 返回异常响应: {}", host.name, output.stdout);
            self.ctx
                .store
                .update_host_status(host.id, HostStatus::Failed, None)
                .await?;
            Ok(JobOutcome::Failed(json!({
                "status": "failed",
                "error": format!("异常响应: {}", output.stdout),
            })))
        }
    }

    /// 采集系统信息并缓存到主机记录
    pub async fn system_info(&self, host_id: Uuid) -> AppResult<JsonValue> {
        let host = self.ctx.host(host_id).await?;
        info!("采集主机 {} 的系统信息", host.address);
        let session = self.ctx.open(&host).await?;
        let session = session.as_ref();

        let os_release = read(session, RemoteCommand::new("cat").arg("/etc/os-release")).await?;
        let lscpu = read(session, RemoteCommand::new("lscpu")).await?;
        let free = read(session, RemoteCommand::new("free").arg("-b")).await?;
        let df = read(session, RemoteCommand::new("df").args(["-B1", "/"])).await?;
        let docker = read(session, RemoteCommand::new("docker").arg("--version").discard_stderr()).await?;
        let nproc = read(session, RemoteCommand::new("nproc")).await?;
        let uptime = read(session, RemoteCommand::new("uptime").arg("-s")).await?;

        let (ram_total, ram_used) = parse_free(&free);
        let (disk_total, disk_used) = parse_df(&df);
        let probe = HostProbe {
            os_version: Some(parse_os_release(&os_release).unwrap_or_else(|| "Unknown".to_string())),
            cpu_cores: nproc.trim().parse().ok(),
            cpu_model: parse_cpu_model(&lscpu),
            ram_total_bytes: ram_total,
            ram_used_bytes: ram_used,
            disk_total_bytes: disk_total,
            disk_used_bytes: disk_used,
            docker_version: parse_docker_version(&docker),
            uptime_since: Some(uptime.trim().to_string()).filter(|s| !s.is_empty()),
        };

        self.ctx
            .store
            .save_host_probe(host.id, &probe, Utc::now())
            .await?;
        info!("主机 {} 系统信息采集完成", host.name);
        Ok(serde_json::to_value(&probe)?)
    }

    /// 安装 Docker、Nginx 与 Certbot
    pub async fn install_deps(&self, host_id: Uuid) -> AppResult<JsonValue> {
        let host = self.ctx.host(host_id).await?;
        info!("在 {} 上安装依赖", host.address);
        let session = self.ctx.open(&host).await?;
        let session = session.as_ref();

        info!("安装Docker");
        steps::run_checked(
            session,
            "安装Docker",
            &RemoteCommand::new("which").arg("docker").quiet().or(RemoteCommand::new("curl")
                .args(["-fsSL", "https://get.docker.com"])
                .pipe(RemoteCommand::new("sh"))),
            timeouts::INSTALL,
        )
        .await?;
        steps::run_checked(
            session,
            "启用Docker服务",
            &RemoteCommand::new("systemctl").args(["enable", "--now", "docker"]),
            timeouts::QUICK,
        )
        .await?;

        info!("安装Nginx");
        steps::run_checked(
            session,
            "安装Nginx",
            &steps::ensure_installed("nginx", &["nginx"]),
            timeouts::PACKAGE,
        )
        .await?;

        info!("安装Certbot");
        steps::run_checked(
            session,
            "安装Certbot",
            &steps::ensure_installed("certbot", &["certbot", "python3-certbot-nginx"]),
            timeouts::PACKAGE,
        )
        .await?;

        let docker = read(session, RemoteCommand::new("docker").arg("--version").discard_stderr()).await?;
        if let Some(version) = parse_docker_version(&docker) {
            self.ctx
                .store
                .set_host_docker_version(host.id, &version)
                .await?;
        }

        info!("主机 {} 依赖安装完成", host.name);
        Ok(json!({
            "docker_installed": true,
            "nginx_installed": true,
            "certbot_installed": true,
            "status": "completed",
        }))
    }
}

/// 只关心输出的采集命令，失败时返回空串
async fn read(session: &dyn RemoteSession, command: RemoteCommand) -> AppResult<String> {
    let output = steps::run(session, &command, timeouts::QUICK).await?;
    Ok(if output.success() { output.stdout } else { String::new() })
}

fn parse_os_release(raw: &str) -> Option<String> {
    PRETTY_NAME
        .captures(raw)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_cpu_model(raw: &str) -> Option<String> {
    CPU_MODEL.captures(raw).map(|c| c[1].to_string())
}

/// `Docker version 24.0.7, build afdd53b` -> `24.0.7`
pub fn parse_docker_version(raw: &str) -> Option<String> {
    DOCKER_VERSION.captures(raw).map(|c| c[1].to_string())
}

/// `free -b` 的 Mem 行：(总量, 已用)
fn parse_free(raw: &str) -> (Option<i64>, Option<i64>) {
    raw.lines()
        .find(|line| line.starts_with("Mem:"))
        .map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            (number(cols.get(1)), number(cols.get(2)))
        })
        .unwrap_or((None, None))
}

/// `df -B1 /` 第二行：(总量, 已用)
fn parse_df(raw: &str) -> (Option<i64>, Option<i64>) {
    raw.lines()
        .nth(1)
        .map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            (number(cols.get(1)), number(cols.get(2)))
        })
        .unwrap_or((None, None))
}

fn number(col: Option<&&str>) -> Option<i64> {
    col.and_then(|c| c.parse().ok())
}
