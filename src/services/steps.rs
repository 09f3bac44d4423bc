//! 远程命令执行的公共步骤

use crate::{
    error::{AppError, AppResult},
    remote::{CommandOutput, RemoteCommand, RemoteSession},
};
use std::time::Duration;

/// 执行命令，只把传输层故障当作错误
pub async fn run(
    session: &dyn RemoteSession,
    command: &RemoteCommand,
    timeout: Duration,
) -> AppResult<CommandOutput> {
    Ok(session.exec(command, timeout).await?)
}

/// 执行命令，非零退出码转换为 [`AppError::CommandFailed`]
pub async fn run_checked(
    session: &dyn RemoteSession,
    step: &str,
    command: &RemoteCommand,
    timeout: Duration,
) -> AppResult<CommandOutput> {
    let output = run(session, command, timeout).await?;
    if !output.success() {
        return Err(AppError::command_failed(step, output.exit_code, output.detail()));
    }
    Ok(output)
}

/// 执行并忽略结果，失败只记警告
pub async fn run_best_effort(session: &dyn RemoteSession, command: &RemoteCommand, timeout: Duration) {
    match session.exec(command, timeout).await {
        Ok(output) if !output.success() => {
            tracing::warn!("命令返回非零 ({}): {} {}", output.exit_code, command, output.detail());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("命令执行失败: {} {}", command, e),
    }
}

/// `which <tool> || apt-get install -y <packages>`
pub fn ensure_installed(tool: &str, packages: &[&str]) -> RemoteCommand {
    RemoteCommand::new("which")
        .arg(tool)
        .quiet()
        .or(RemoteCommand::new("apt-get")
            .args(["install", "-y"])
            .args(packages.iter().copied()))
}
