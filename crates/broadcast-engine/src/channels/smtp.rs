//! SMTP 邮件传输
//!
//! 使用 lettre 的 tokio 异步传输，`use_tls` 为 false 时走明文连接（本地 MailHog 等）

use std::time::Duration;

use async_trait::async_trait;
use broadcast_shared::config::EmailConfig;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{EmailMessage, EmailTransport};
use crate::error::{EngineError, Result};
use crate::models::Channel;

pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from = from_mailbox(config)?;

        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| EngineError::Config(format!("SMTP relay 配置错误: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_millis(config.timeout_ms)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message> {
        let to: Mailbox = message.to.parse().map_err(|e| {
            EngineError::transport(Channel::Email, format!("收件地址无效 {}: {}", message.to, e))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone())
            .map_err(|e| EngineError::transport(Channel::Email, format!("邮件构建失败: {}", e)))
    }
}

fn from_mailbox(config: &EmailConfig) -> Result<Mailbox> {
    let raw = match &config.from_name {
        Some(name) => format!("{} <{}>", name, config.from_address),
        None => config.from_address.clone(),
    };
    raw.parse()
        .map_err(|e| EngineError::Config(format!("发件地址无效: {}", e)))
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let email = self.build_message(message)?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| EngineError::transport(Channel::Email, e.to_string()))?;

        debug!(to = %message.to, subject = %message.subject, "邮件已发送");
        Ok(())
    }
}
