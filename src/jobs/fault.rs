//! 任务失败分类

use crate::error::AppError;
use crate::remote::RemoteError;

/// 失败类别，决定是否整体重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// 连接被拒/重置、超时、传输中断
    Transient,
    /// 认证被拒、私钥格式、主机指纹不符
    Permanent,
    /// 记录不存在或状态不允许
    TargetState,
    /// 远程命令非零退出
    CommandFailed,
    Internal,
}

impl FaultClass {
    pub fn is_retryable(self) -> bool {
        self == FaultClass::Transient
    }
}

pub fn classify(error: &AppError) -> FaultClass {
    match error {
        AppError::Remote(e) if e.is_transient() => FaultClass::Transient,
        AppError::Remote(_) => FaultClass::Permanent,
        AppError::CommandFailed { .. } => FaultClass::CommandFailed,
        AppError::NotFound { .. }
        | AppError::InvalidState(_)
        | AppError::Validation(_)
        | AppError::BadRequest(_) => FaultClass::TargetState,
        AppError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => {
            FaultClass::Transient
        }
        AppError::Config(_) => FaultClass::Permanent,
        AppError::Database(_)
        | AppError::Serialization(_)
        | AppError::Io(_)
        | AppError::Storage(_)
        | AppError::Internal(_) => FaultClass::Internal,
    }
}

/// 写入任务结果的错误信息；凭证类错误改写为可操作的提示
pub fn operator_message(error: &AppError) -> String {
    match error {
        AppError::Remote(RemoteError::Authentication(detail)) => format!(
            "SSH认证失败，请将平台公钥添加到目标主机的 ~/.ssh/authorized_keys ({})",
            detail
        ),
        AppError::Remote(RemoteError::KeyFormat(detail)) => format!(
            "SSH私钥格式无效，请提供 PEM 或 OpenSSH 格式的私钥 ({})",
            detail
        ),
        AppError::Remote(RemoteError::HostKeyMismatch { expected, actual }) => format!(
            "主机公钥指纹与登记值不一致 (期望 {}, 实际 {})，请确认主机身份后更新指纹",
            expected, actual
        ),
        other => other.to_string(),
    }
}
