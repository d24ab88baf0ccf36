//! 统一错误类型定义
//!
//! Every collaborator failure is converted into one of four categories before it crosses
//! a component boundary: transient remote failures, user-action failures, backend process
//! failures and persistence failures.

use std::io;
use thiserror::Error;

/// autopilot 错误类型
#[derive(Debug, Error)]
pub enum SyncError {
    /// Status / detail / diff fetch failed. Retried on the next tick, never shown in the UI.
    #[error("Remote fetch failed: {0}")]
    TransientRemote(String),

    /// Create/delete workspace, create terminal, create PR. Surfaced to the caller, nothing
    /// applied.
    #[error("{0}")]
    UserAction(String),

    /// spawn / write / resize / close on a terminal process
    #[error("Terminal process error: {0}")]
    BackendProcess(String),

    /// Settings load/save
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Raw collaborator failure, not yet classified
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O 错误（文件读写、目录操作等）
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML 解析错误
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML 序列化错误
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON 解析错误
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// 资源不存在
    #[error("Not found: {0}")]
    NotFound(String),
}

/// autopilot Result 类型别名
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientRemote(msg.into())
    }

    pub fn user_action(msg: impl Into<String>) -> Self {
        Self::UserAction(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::BackendProcess(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Reclassify as a user-action failure, prefixed with what the user was doing.
    pub fn into_user_action(self, action: &str) -> Self {
        match self {
            Self::UserAction(msg) => Self::UserAction(msg),
            other => Self::UserAction(format!("{}: {}", action, other.detail())),
        }
    }

    /// Reclassify as a transient remote failure.
    pub fn into_transient(self) -> Self {
        match self {
            Self::TransientRemote(msg) => Self::TransientRemote(msg),
            other => Self::TransientRemote(other.detail()),
        }
    }

    /// Whether the UI should show this error to the user.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::UserAction(_) | Self::NotFound(_))
    }

    /// Message without the category prefix.
    fn detail(&self) -> String {
        match self {
            Self::TransientRemote(m)
            | Self::UserAction(m)
            | Self::BackendProcess(m)
            | Self::Persistence(m)
            | Self::Backend(m)
            | Self::NotFound(m) => m.clone(),
            other => other.to_string(),
        }
    }
}
