//! 错误定义模块

use thiserror::Error;

/// 急诊追踪系统统一错误类型
#[derive(Error, Debug)]
pub enum ErError {
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据不可用: {0}")]
    DataUnavailable(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ErError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn data_unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, ErError>;
