//! 投递渠道传输层
//!
//! 定义推送与邮件两种外部传输的 trait，并提供具体实现。
//!
//! ## 支持的传输
//!
//! - **FCM**: Firebase Cloud Messaging HTTP v1 推送
//! - **SMTP**: 基于 lettre 的异步邮件发送
//! - **Disabled**: 渠道未配置时使用，推送全部判定失败，邮件直接报错
//!
//! 站内信直接写入收件箱表，不经过传输层。

mod fcm;
mod smtp;

pub use fcm::FcmPushTransport;
pub use smtp::SmtpEmailTransport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use broadcast_shared::config::{EmailConfig, PushConfig};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::models::Channel;

/// 推送消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// 附加数据，客户端据此跳转
    pub data: HashMap<String, String>,
}

/// 单个 token 的推送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Delivered,
    Failed(String),
    /// 推送服务判定 token 已失效，应从注册表删除
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub outcome: TokenOutcome,
}

impl TokenResult {
    pub fn delivered(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            outcome: TokenOutcome::Delivered,
        }
    }

    pub fn failed(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            outcome: TokenOutcome::Failed(reason.into()),
        }
    }

    pub fn unregistered(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            outcome: TokenOutcome::Unregistered,
        }
    }
}

/// 推送传输
///
/// 一次调用发送一批 token，返回每个 token 的结果。
/// 单个 token 失败体现在结果中；返回 Err 表示整批调用失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// 传输名称（用于日志）
    fn name(&self) -> &'static str;

    async fn send_batch(&self, tokens: &[String], message: &PushMessage) -> Result<Vec<TokenResult>>;
}

/// 单封邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// 邮件传输
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// 未启用的推送渠道
pub struct DisabledPushTransport;

#[async_trait]
impl PushTransport for DisabledPushTransport {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send_batch(&self, tokens: &[String], _message: &PushMessage) -> Result<Vec<TokenResult>> {
        Ok(tokens
            .iter()
            .map(|t| TokenResult::failed(t.clone(), "推送渠道未启用"))
            .collect())
    }
}

/// 未启用的邮件渠道
pub struct DisabledEmailTransport;

#[async_trait]
impl EmailTransport for DisabledEmailTransport {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send(&self, _message: &EmailMessage) -> Result<()> {
        Err(EngineError::transport(Channel::Email, "邮件渠道未启用"))
    }
}

/// 渠道配置
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// 是否启用
    pub enabled: bool,
    /// 请求超时（毫秒）
    pub timeout_ms: u64,
    /// API 端点（如有）
    pub endpoint: Option<String>,
    /// API 密钥或访问令牌（如有）
    pub api_key: Option<String>,
}

impl ChannelConfig {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timeout_ms: 5000,
            endpoint: None,
            api_key: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl From<&PushConfig> for ChannelConfig {
    fn from(config: &PushConfig) -> Self {
        let mut channel = Self::new(config.enabled)
            .with_endpoint(config.endpoint.clone())
            .with_timeout(config.timeout_ms);
        if let Some(token) = &config.access_token {
            channel = channel.with_api_key(token.clone());
        }
        channel
    }
}

/// 根据配置构建推送传输
pub fn build_push_transport(config: &PushConfig) -> Result<Arc<dyn PushTransport>> {
    if !config.enabled {
        info!("推送渠道未启用");
        return Ok(Arc::new(DisabledPushTransport));
    }

    let project_id = config
        .project_id
        .clone()
        .ok_or_else(|| EngineError::Config("push.project_id 未配置".to_string()))?;

    Ok(Arc::new(FcmPushTransport::new(
        ChannelConfig::from(config),
        project_id,
    )?))
}

/// 根据配置构建邮件传输
pub fn build_email_transport(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>> {
    if !config.enabled {
        info!("邮件渠道未启用");
        return Ok(Arc::new(DisabledEmailTransport));
    }

    Ok(Arc::new(SmtpEmailTransport::new(config)?))
}
