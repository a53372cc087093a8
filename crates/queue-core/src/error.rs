//! 错误定义模块

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 队列系统统一错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("冲突: 科室 {department} 中的活跃记录 {active} 阻止了该操作")]
    Conflict { department: String, active: String },

    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidTransition { from: String, to: String },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 错误类别，用于比较两次失败是否属于同一种错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    InvalidTransition,
    NotFound,
    StoreUnavailable,
    Config,
    Validation,
    Serialization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::NotFound => "not_found",
            Self::StoreUnavailable => "store_unavailable",
            Self::Config => "config",
            Self::Validation => "validation",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        }
    }
}

impl QueueError {
    /// 获取错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Config(_) => ErrorKind::Config,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 校验类错误由调用方重新判断，不会自动重试
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::InvalidTransition | ErrorKind::NotFound
        )
    }
}

/// 队列系统统一结果类型
pub type Result<T> = std::result::Result<T, QueueError>;
