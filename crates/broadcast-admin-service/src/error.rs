//! 管理服务错误类型定义
//!
//! 引擎与基础设施错误在这里统一映射为 HTTP 状态码与响应信封

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use broadcast_engine::EngineError;
use broadcast_shared::error::InfraError;
use serde_json::json;

/// 管理服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    // 认证错误
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),

    // 验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    // 资源不存在
    #[error("{0}")]
    NotFound(String),

    // 业务错误
    #[error("{0}")]
    InvalidState(String),
    #[error("重复提交: {0}")]
    Conflict(String),

    // 系统错误
    #[error("缓存错误: {0}")]
    Cache(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AdminError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) | Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Cache(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Conflict(_) => "DUPLICATE_REQUEST",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Cache(e) => {
                tracing::error!(error = %e, "缓存操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从广播引擎错误转换
impl From<EngineError> for AdminError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => Self::Validation(msg),
            e @ (EngineError::NotFound { .. } | EngineError::NoRecipients) => {
                Self::NotFound(e.to_string())
            }
            e @ EngineError::InvalidState { .. } => Self::InvalidState(e.to_string()),
            EngineError::Forbidden(msg) => Self::Forbidden(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<InfraError> for AdminError {
    fn from(err: InfraError) -> Self {
        Self::Cache(err.to_string())
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, AdminError>;
