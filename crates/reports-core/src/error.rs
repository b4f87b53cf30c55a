//! 错误定义模块

use thiserror::Error;

/// 报告系统统一错误类型
#[derive(Error, Debug)]
pub enum ReportsError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Nothing to export for {0}")]
    NothingToExport(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReportsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(msg.to_string())
    }
}

/// 报告系统统一结果类型
pub type Result<T> = std::result::Result<T, ReportsError>;
