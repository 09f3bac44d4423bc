use thiserror::Error;

/// 远程传输层错误
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("无法连接到 {0}")]
    Connect(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("传输中断: {0}")]
    Io(String),

    #[error("SSH协议错误: {0}")]
    Protocol(String),

    #[error("SSH认证失败: {0}")]
    Authentication(String),

    #[error("私钥格式无效: {0}")]
    KeyFormat(String),

    #[error("主机指纹不匹配: 期望 {expected}, 实际 {actual}")]
    HostKeyMismatch { expected: String, actual: String },

    /// 文件不存在、无权限、磁盘满等，重试无效
    #[error("远程文件操作失败: {0}")]
    File(String),
}

impl RemoteError {
    /// 网络层瞬时故障，可整体重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Connect(_)
                | RemoteError::Timeout(_)
                | RemoteError::Io(_)
                | RemoteError::Protocol(_)
        )
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => RemoteError::Timeout(e.to_string()),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable => RemoteError::Connect(e.to_string()),
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::AlreadyExists => {
                RemoteError::File(e.to_string())
            }
            _ => RemoteError::Io(e.to_string()),
        }
    }
}

impl From<ssh2::Error> for RemoteError {
    fn from(e: ssh2::Error) -> Self {
        // libssh2 错误码，见 libssh2.h
        const SOCKET_SEND: i32 = -7;
        const TIMEOUT: i32 = -9;
        const SOCKET_DISCONNECT: i32 = -13;
        const FILE: i32 = -16;
        const AUTHENTICATION_FAILED: i32 = -18;
        const PUBLICKEY_UNVERIFIED: i32 = -19;
        const SOCKET_TIMEOUT: i32 = -30;
        const SOCKET_RECV: i32 = -43;

        let message = e.message().to_string();
        match e.code() {
            ssh2::ErrorCode::Session(code) => match code {
                AUTHENTICATION_FAILED | PUBLICKEY_UNVERIFIED => {
                    RemoteError::Authentication(message)
                }
                FILE => RemoteError::KeyFormat(message),
                TIMEOUT | SOCKET_TIMEOUT => RemoteError::Timeout(message),
                SOCKET_SEND | SOCKET_RECV | SOCKET_DISCONNECT => RemoteError::Io(message),
                _ => RemoteError::Protocol(message),
            },
            ssh2::ErrorCode::SFTP(code) => {
                // SFTP 状态码，见 draft-ietf-secsh-filexfer
                const SFTP_NO_CONNECTION: i32 = 6;
                const SFTP_CONNECTION_LOST: i32 = 7;
                let detail = format!("SFTP错误 {}: {}", code, message);
                match code {
                    SFTP_NO_CONNECTION | SFTP_CONNECTION_LOST => RemoteError::Io(detail),
                    _ => RemoteError::File(detail),
                }
            }
        }
    }
}
