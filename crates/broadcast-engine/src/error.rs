//! 广播引擎错误类型定义

use thiserror::Error;
use uuid::Uuid;

use crate::models::{BroadcastStatus, Channel};

/// 广播引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    // ==================== 存储错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 校验错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 业务错误 ====================
    #[error("{entity}不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("没有找到符合条件的用户")]
    NoRecipients,

    #[error("广播 {id} 当前状态为 {status}，不允许该操作")]
    InvalidState { id: Uuid, status: BroadcastStatus },

    #[error("禁止访问: {0}")]
    Forbidden(String),

    // ==================== 外部依赖错误 ====================
    #[error("{channel} 渠道发送失败: {message}")]
    Transport { channel: Channel, message: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transport(channel: Channel, message: impl Into<String>) -> Self {
        Self::Transport {
            channel,
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoRecipients => "NO_RECIPIENTS",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Transport { .. })
    }

    /// 提交在写库之前即被拒绝（校验失败、引用不存在、受众为空）
    ///
    /// 其余错误可能发生在广播记录写入之后
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::NoRecipients
        )
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
