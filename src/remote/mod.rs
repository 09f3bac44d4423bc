//! 远程主机会话抽象

pub mod command;
pub mod error;
pub mod layout;
pub mod ssh;

#[cfg(test)]
pub mod testing;

pub use command::RemoteCommand;
pub use error::RemoteError;
pub use layout::{InstancePaths, RemoteLayout};
pub use ssh::SshConnector;

use crate::models::Host;
use std::path::Path;
use std::time::Duration;

/// 远程命令执行结果（stdout/stderr 已去除首尾空白）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 失败诊断信息：优先 stderr，为空时退回 stdout
    pub fn detail(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// 已认证的远程会话，drop 时释放连接
#[async_trait::async_trait]
pub trait RemoteSession: Send + Sync {
    /// 执行命令，超过 `timeout` 返回 [`RemoteError::Timeout`]
    async fn exec(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;

    /// 上传本地文件
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// 下载远程文件到本地
    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    /// 直接写入远程文件（覆盖）
    async fn write_file(&self, remote: &str, content: &str) -> Result<(), RemoteError>;
}

/// 会话工厂
#[async_trait::async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// 常用命令超时
pub mod timeouts {
    use std::time::Duration;

    pub const QUICK: Duration = Duration::from_secs(30);
    pub const CONTROL: Duration = Duration::from_secs(60);
    pub const PACKAGE: Duration = Duration::from_secs(120);
    pub const INSTALL: Duration = Duration::from_secs(300);
    pub const DB_CONTAINER: Duration = Duration::from_secs(120);
    pub const IMAGE_PULL: Duration = Duration::from_secs(600);
    pub const SCHEMA_INIT: Duration = Duration::from_secs(900);
    pub const DUMP: Duration = Duration::from_secs(300);
    pub const ARCHIVE: Duration = Duration::from_secs(600);
    pub const GIT_PULL: Duration = Duration::from_secs(120);
    pub const GIT_CLONE: Duration = Duration::from_secs(180);
}
