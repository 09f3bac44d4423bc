//! 测试用的脚本化远程会话

use super::{CommandOutput, RemoteCommand, RemoteConnector, RemoteError, RemoteSession};
use crate::models::Host;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    Output(CommandOutput),
    Error(RemoteError),
    Hang,
}

struct Rule {
    pattern: String,
    reply: Reply,
}

#[derive(Default)]
struct FakeState {
    rules: Vec<Rule>,
    commands: Vec<String>,
    files: HashMap<String, String>,
    uploads: Vec<(PathBuf, String)>,
    downloads: Vec<String>,
    connect_failures: Vec<RemoteError>,
    opened: usize,
    closed: usize,
}

/// 按子串匹配返回预设输出的假远程主机，后注册的规则优先
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, pattern: &str, stdout: &str) -> &Self {
        self.on_output(
            pattern,
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            },
        )
    }

    pub fn fail(&self, pattern: &str, exit_code: i32, stderr: &str) -> &Self {
        self.on_output(
            pattern,
            CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code,
            },
        )
    }

    pub fn on_output(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Output(output),
        });
        self
    }

    pub fn error_on(&self, pattern: &str, error: RemoteError) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Error(error),
        });
        self
    }

    /// 匹配的命令永不返回，用于触发上层超时
    pub fn hang_on(&self, pattern: &str) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Hang,
        });
        self
    }

    /// 接下来的连接依次返回这些错误
    pub fn fail_connect(&self, error: RemoteError) -> &Self {
        self.state.lock().unwrap().connect_failures.push(error);
        self
    }

    pub fn put_file(&self, path: &str, content: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// 第一条匹配命令的下标
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

#[async_trait::async_trait]
impl RemoteConnector for FakeRemote {
    async fn connect(&self, _host: &Host) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if !state.connect_failures.is_empty() {
            return Err(state.connect_failures.remove(0));
        }
        state.opened += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait::async_trait]
impl RemoteSession for FakeSession {
    async fn exec(
        &self,
        command: &RemoteCommand,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let rendered = command.render();
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(rendered.clone());

            match state
                .rules
                .iter()
                .rev()
                .find(|r| rendered.contains(&r.pattern))
            {
                Some(Rule {
                    reply: Reply::Output(output),
                    ..
                }) => return Ok(output.clone()),
                Some(Rule {
                    reply: Reply::Error(error),
                    ..
                }) => return Err(error.clone()),
                Some(Rule {
                    reply: Reply::Hang, ..
                }) => None,
                None => Some(
                    rendered
                        .strip_prefix("cat ")
                        .and_then(|path| state.files.get(path))
                        .map(|content| CommandOutput {
                            stdout: content.trim().to_string(),
                            ..Default::default()
                        })
                        .unwrap_or_default(),
                ),
            }
        };

        match reply {
            Some(output) => Ok(output),
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RemoteError::Timeout(rendered))
            }
        }
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let content = std::fs::read_to_string(local).unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.uploads.push((local.to_path_buf(), remote.to_string()));
        state.files.insert(remote.to_string(), content);
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let content = {
            let mut state = self.state.lock().unwrap();
            state.downloads.push(remote.to_string());
            state.files.get(remote).cloned().unwrap_or_else(|| "bundle".to_string())
        };
        std::fs::write(local, content)?;
        Ok(())
    }

    async fn write_file(&self, remote: &str, content: &str) -> Result<(), RemoteError> {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), content.to_string());
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed += 1;
        }
    }
}
