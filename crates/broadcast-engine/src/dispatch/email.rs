//! 邮件投递
//!
//! 收件人按批发送，批内并发，批次之间固定等待以遵守 SMTP 服务的速率限制，
//! 最后一批之后不再等待。单个收件人失败只影响其追踪行；
//! 追踪存储不可用时返回错误，由调用方将广播标记为 FAILED。

use std::sync::Arc;
use std::time::{Duration, Instant};

use broadcast_shared::observability::metrics;
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::channels::{EmailMessage, EmailTransport};
use crate::error::{EngineError, Result};
use crate::models::{Channel, Notification, Recipient};
use crate::template::EmailRenderer;
use crate::tracker::DeliveryTracker;

/// 一次邮件投递任务
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub notification: Notification,
    /// 已解析的 HTML 模板，为空时使用纯文本正文
    pub template_html: Option<String>,
    pub recipients: Vec<Recipient>,
}

/// 邮件投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmailOutcome {
    pub success: u64,
    pub failure: u64,
}

pub struct EmailDispatcher {
    transport: Arc<dyn EmailTransport>,
    tracker: Arc<DeliveryTracker>,
    renderer: EmailRenderer,
    batch_size: usize,
    batch_delay: Duration,
}

impl EmailDispatcher {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        tracker: Arc<DeliveryTracker>,
        renderer: EmailRenderer,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            transport,
            tracker,
            renderer,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    /// 执行邮件任务
    ///
    /// 只向订阅且邮箱有效的收件人发送，其余收件人没有邮件追踪行，直接跳过。
    #[instrument(skip(self, job), fields(notification_id = %job.notification.id))]
    pub async fn run(&self, job: &EmailJob) -> Result<EmailOutcome> {
        let notification_id = job.notification.id;
        let eligible: Vec<&Recipient> = job
            .recipients
            .iter()
            .filter(|r| r.email_eligible())
            .collect();

        let total_batches = eligible.len().div_ceil(self.batch_size);
        info!(
            recipients = eligible.len(),
            total_batches,
            transport = self.transport.name(),
            "开始发送邮件"
        );

        let mut outcome = EmailOutcome::default();

        for (index, batch) in eligible.chunks(self.batch_size).enumerate() {
            let started = Instant::now();

            let results = join_all(batch.iter().map(|r| self.send_one(job, r))).await;

            let mut sent = Vec::new();
            let mut failed = Vec::new();
            for (recipient, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => sent.push(recipient.id.clone()),
                    Err(e) => {
                        warn!(user_id = %recipient.id, error = %e, "邮件发送失败");
                        failed.push((recipient.id.clone(), e.to_string()));
                    }
                }
            }

            self.tracker
                .mark_sent(notification_id, &sent, Channel::Email)
                .await?;
            for (user_id, reason) in &failed {
                self.tracker
                    .mark_failed(notification_id, std::slice::from_ref(user_id), Channel::Email, reason)
                    .await?;
            }

            outcome.success += sent.len() as u64;
            outcome.failure += failed.len() as u64;
            metrics::record_email_batch(started.elapsed().as_secs_f64());

            info!(
                batch = index + 1,
                total_batches,
                sent = sent.len(),
                failed = failed.len(),
                "邮件批次完成"
            );

            if index + 1 < total_batches && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        metrics::record_channel_delivery(Channel::Email.as_str(), "sent", outcome.success);
        metrics::record_channel_delivery(Channel::Email.as_str(), "failed", outcome.failure);

        Ok(outcome)
    }

    async fn send_one(&self, job: &EmailJob, recipient: &Recipient) -> Result<()> {
        let to = recipient
            .verified_email()
            .ok_or_else(|| EngineError::transport(Channel::Email, "收件人邮箱无效"))?;

        let message = EmailMessage {
            to: to.to_string(),
            subject: job.notification.subject().to_string(),
            html: self.renderer.render_body(
                &job.notification,
                job.template_html.as_deref(),
                recipient,
            ),
        };

        self.transport.send(&message).await
    }
}
