use super::{CommandOutput, RemoteCommand, RemoteConnector, RemoteError, RemoteSession};
use crate::{config::RemoteConfig, models::Host};
use ssh2::{HashType, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

/// 文件传输的阻塞超时
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// 两路输出都暂无数据时的等待间隔
const DRAIN_IDLE: Duration = Duration::from_millis(10);

/// 基于 libssh2 的连接器
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    verify_host_key: bool,
}

impl SshConnector {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            verify_host_key: config.verify_host_key,
        }
    }
}

struct SshTarget {
    address: String,
    port: u16,
    user: String,
    private_key: String,
    expected_fingerprint: Option<String>,
    timeout: Duration,
}

#[async_trait::async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn RemoteSession>, RemoteError> {
        validate_private_key(&host.ssh_private_key)?;

        let target = SshTarget {
            address: host.address.clone(),
            port: host.port,
            user: host.ssh_user.clone(),
            private_key: host.ssh_private_key.clone(),
            expected_fingerprint: if self.verify_host_key {
                host.host_key_sha256.clone()
            } else {
                None
            },
            timeout: self.connect_timeout,
        };
        let label = format!("{}@{}:{}", target.user, target.address, target.port);

        tracing::debug!("正在建立SSH连接: {}", label);
        let session = tokio::task::spawn_blocking(move || open_session(&target))
            .await
            .map_err(|e| RemoteError::Protocol(format!("SSH连接任务异常: {}", e)))??;
        tracing::debug!("SSH连接已建立: {}", label);

        Ok(Box::new(SshSession {
            inner: Arc::new(Mutex::new(session)),
            label,
        }))
    }
}

/// 私钥文本的基本格式检查（RSA / Ed25519 / ECDSA，PEM 或 OpenSSH 格式）
fn validate_private_key(pem: &str) -> Result<(), RemoteError> {
    let trimmed = pem.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::KeyFormat("私钥为空".to_string()));
    }
    if !trimmed.starts_with("-----BEGIN ") || !trimmed.contains("PRIVATE KEY-----") {
        return Err(RemoteError::KeyFormat(
            "无法识别的私钥格式，需要 PEM 或 OpenSSH 私钥".to_string(),
        ));
    }
    Ok(())
}

fn open_session(target: &SshTarget) -> Result<Session, RemoteError> {
    let addr = (target.address.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::Connect(format!("{}: {}", target.address, e)))?
        .next()
        .ok_or_else(|| RemoteError::Connect(format!("无法解析主机地址 {}", target.address)))?;

    let tcp = TcpStream::connect_timeout(&addr, target.timeout).map_err(|e| {
        match RemoteError::from(e) {
            RemoteError::Io(msg) => RemoteError::Connect(format!("{}: {}", addr, msg)),
            other => other,
        }
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(target.timeout.as_millis() as u32);
    session.handshake()?;

    if let Some(expected) = &target.expected_fingerprint {
        let actual = session
            .host_key_hash(HashType::Sha256)
            .map(hex::encode)
            .ok_or_else(|| RemoteError::Protocol("无法读取主机公钥指纹".to_string()))?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(RemoteError::HostKeyMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }

    session.userauth_pubkey_memory(&target.user, None, &target.private_key, None)?;
    if !session.authenticated() {
        return Err(RemoteError::Authentication(format!(
            "用户 {} 的公钥认证未通过",
            target.user
        )));
    }

    Ok(session)
}

/// 单个 SSH 会话；命令串行执行
pub struct SshSession {
    inner: Arc<Mutex<Session>>,
    label: String,
}

impl SshSession {
    async fn with_session<T, F>(&self, timeout: Duration, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, RemoteError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let session = inner
                .lock()
                .map_err(|_| RemoteError::Protocol("SSH会话锁已损坏".to_string()))?;
            session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
            op(&session)
        })
        .await
        .map_err(|e| RemoteError::Protocol(format!("SSH阻塞任务异常: {}", e)))?
    }
}

#[async_trait::async_trait]
impl RemoteSession for SshSession {
    async fn exec(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let rendered = command.render();
        tracing::debug!("[{}] 执行: {}", self.label, rendered);

        let result = self
            .with_session(timeout, move |session| {
                let mut channel = session.channel_session()?;
                channel.exec(&rendered)?;

                // stdout 与 stderr 共享通道窗口，必须交替读取
                session.set_blocking(false);
                let drained = drain_streams(
                    channel.stream(0),
                    channel.stderr(),
                    || channel.eof(),
                    timeout,
                );
                session.set_blocking(true);
                let (stdout, stderr) = drained?;

                channel.wait_close()?;
                let exit_code = channel.exit_status()?;

                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    exit_code,
                })
            })
            .await;

        match result {
            Err(RemoteError::Timeout(msg)) => Err(RemoteError::Timeout(format!(
                "{} ({}秒): {}",
                command.render(),
                timeout.as_secs(),
                msg
            ))),
            other => other,
        }
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        tracing::info!("[{}] SFTP上传: {} -> {}", self.label, local.display(), remote);
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.with_session(TRANSFER_TIMEOUT, move |session| {
            let sftp = session.sftp()?;
            let mut source = std::fs::File::open(&local)?;
            let mut target = sftp.create(&remote)?;
            std::io::copy(&mut source, &mut target)?;
            Ok(())
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        tracing::info!("[{}] SFTP下载: {} -> {}", self.label, remote, local.display());
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.with_session(TRANSFER_TIMEOUT, move |session| {
            let sftp = session.sftp()?;
            let mut source = sftp.open(&remote)?;
            let mut target = std::fs::File::create(&local)?;
            std::io::copy(&mut source, &mut target)?;
            Ok(())
        })
        .await
    }

    async fn write_file(&self, remote: &str, content: &str) -> Result<(), RemoteError> {
        tracing::info!("[{}] SFTP写入: {} ({} 字节)", self.label, remote, content.len());
        let remote = PathBuf::from(remote);
        let content = content.to_string();
        self.with_session(TRANSFER_TIMEOUT, move |session| {
            let sftp = session.sftp()?;
            let mut target = sftp.create(&remote)?;
            target.write_all(content.as_bytes())?;
            Ok(())
        })
        .await
    }
}

/// 交替读取两路输出直到通道 EOF；读取方须处于非阻塞模式
fn drain_streams<O: Read, E: Read>(
    mut stdout: O,
    mut stderr: E,
    finished: impl Fn() -> bool,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), RemoteError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 16 * 1024];

    loop {
        let read = read_available(&mut stdout, &mut buf, &mut out)?
            + read_available(&mut stderr, &mut buf, &mut err)?;
        if read > 0 {
            continue;
        }
        if finished() {
            return Ok((out, err));
        }
        if Instant::now() >= deadline {
            return Err(RemoteError::Timeout("等待命令输出超时".to_string()));
        }
        std::thread::sleep(DRAIN_IDLE);
    }
}

/// 读到暂无数据或 EOF 为止，返回本次读取的字节数
fn read_available<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
) -> Result<usize, RemoteError> {
    let mut total = 0;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        // 阻塞任务仍持有会话时不等待，由它结束后随最后一个引用释放
        match self.inner.try_lock() {
            Ok(session) => {
                if let Err(e) = session.disconnect(None, "session closed", None) {
                    tracing::debug!("[{}] 关闭SSH会话失败: {}", self.label, e);
                }
            }
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("[{}] 会话仍在执行命令，稍后释放", self.label);
            }
            Err(TryLockError::Poisoned(_)) => {}
        }
        tracing::debug!("[{}] SSH会话已释放", self.label);
    }
}
