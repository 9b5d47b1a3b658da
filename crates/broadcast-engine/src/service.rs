//! 广播服务
//!
//! 管理员提交入口与排期触发的公共投递流水线：
//!
//! 1. 校验请求并解析受众（空受众在写库前拒绝）
//! 2. 同一事务写入广播记录与 queued 追踪行
//! 3. 立即模式同步投递站内信与推送，邮件放入后台队列后返回
//! 4. 排期模式由调度器认领后走同一条流水线，邮件在调度任务内执行

use std::sync::Arc;

use broadcast_shared::config::DispatchConfig;
use broadcast_shared::observability::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audience::{AudienceResolver, AudienceTarget};
use crate::channels::{EmailTransport, PushTransport};
use crate::dispatch::{EmailDispatcher, EmailJob, InAppDispatcher, PushDispatcher};
use crate::error::{EngineError, Result};
use crate::jobs::DispatchQueue;
use crate::models::{
    BroadcastStatus, ChannelCounters, Notification, Recipient, SendMode, TargetMode,
};
use crate::repository::BroadcastStores;
use crate::template::EmailRenderer;
use crate::tracker::{DeliveryTracker, plan_seeds};
use crate::validation::BroadcastRequest;

/// 排期触发时仍为 queued 的行的失败原因
pub const RECIPIENT_INACTIVE_ERROR: &str = "recipient no longer active";

/// 外部传输
#[derive(Clone)]
pub struct Transports {
    pub push: Arc<dyn PushTransport>,
    pub email: Arc<dyn EmailTransport>,
}

/// 立即发送的提交结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub notification_id: Uuid,
    pub target: TargetMode,
    pub total_users: usize,
    pub in_app_created: u64,
    pub push_sent: u64,
    pub email_queued: usize,
    pub status: BroadcastStatus,
    /// 后台邮件任务结束时收到最终状态
    #[serde(skip)]
    pub completion: Option<oneshot::Receiver<BroadcastStatus>>,
}

/// 排期提交结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReceipt {
    pub notification_id: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_users: usize,
    pub status: BroadcastStatus,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Dispatched(DispatchReceipt),
    Scheduled(ScheduledReceipt),
}

impl SubmitOutcome {
    pub fn notification_id(&self) -> Uuid {
        match self {
            Self::Dispatched(r) => r.notification_id,
            Self::Scheduled(r) => r.notification_id,
        }
    }

    pub fn status(&self) -> BroadcastStatus {
        match self {
            Self::Dispatched(r) => r.status,
            Self::Scheduled(r) => r.status,
        }
    }
}

/// 广播服务
pub struct BroadcastService {
    stores: BroadcastStores,
    resolver: AudienceResolver,
    tracker: Arc<DeliveryTracker>,
    in_app: InAppDispatcher,
    push: PushDispatcher,
    email: Arc<EmailDispatcher>,
    queue: DispatchQueue,
}

impl BroadcastService {
    /// 创建服务并启动后台邮件队列，需要在 tokio 运行时内调用
    pub fn new(stores: BroadcastStores, transports: Transports, config: &DispatchConfig) -> Self {
        let tracker = Arc::new(DeliveryTracker::new(stores.tracking.clone()));

        let email = Arc::new(EmailDispatcher::new(
            transports.email,
            tracker.clone(),
            EmailRenderer::new(config.app_url.clone(), config.app_name.clone()),
            config.email_batch_size,
            config.email_batch_delay(),
        ));
        let queue = DispatchQueue::start(
            email.clone(),
            stores.broadcasts.clone(),
            tracker.clone(),
            config.max_concurrent_jobs,
        );

        Self {
            resolver: AudienceResolver::new(stores.users.clone()),
            in_app: InAppDispatcher::new(stores.inbox.clone(), tracker.clone()),
            push: PushDispatcher::new(
                stores.push_tokens.clone(),
                tracker.clone(),
                transports.push,
                config.push_batch_size,
            ),
            email,
            queue,
            tracker,
            stores,
        }
    }

    pub async fn submit(&self, admin_id: &str, request: BroadcastRequest) -> Result<SubmitOutcome> {
        self.submit_at(admin_id, request, Utc::now()).await
    }

    /// 以指定时间为“当前时间”提交广播
    #[instrument(skip(self, request, now), fields(admin_id = %admin_id))]
    pub async fn submit_at(
        &self,
        admin_id: &str,
        request: BroadcastRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let validated = request.validate(now)?;

        if let Some(template_id) = validated.email_template_id {
            match self.stores.templates.get(template_id).await? {
                Some(t) if t.is_active => {}
                _ => return Err(EngineError::not_found("邮件模板", template_id)),
            }
        }

        let recipients = self.resolver.resolve(&validated.audience).await?;
        let seeds = plan_seeds(&recipients, validated.channels);
        let single_user = match &validated.audience {
            AudienceTarget::Single(_) => recipients.first().map(|r| r.id.clone()),
            _ => None,
        };
        let mode = validated.mode;
        let total_targets = i32::try_from(recipients.len())
            .map_err(|_| EngineError::Validation("受众规模超出上限".to_string()))?;

        let notification = validated.into_notification(
            Uuid::new_v4(),
            admin_id,
            total_targets,
            single_user,
            now,
        );

        self.stores
            .broadcasts
            .create_with_tracking(&notification, &seeds)
            .await?;
        metrics::record_broadcast_submitted(mode, notification.send_mode.as_str());

        info!(
            notification_id = %notification.id,
            target = %notification.target.as_str(),
            send_mode = %notification.send_mode.as_str(),
            recipients = recipients.len(),
            tracking_rows = seeds.len(),
            "广播已创建"
        );

        match notification.send_mode {
            SendMode::Later => Ok(SubmitOutcome::Scheduled(ScheduledReceipt {
                notification_id: notification.id,
                scheduled_at: notification.scheduled_at,
                total_users: recipients.len(),
                status: notification.status,
            })),
            SendMode::Now => {
                let id = notification.id;
                match self.dispatch_now(notification, recipients).await {
                    Ok(receipt) => Ok(SubmitOutcome::Dispatched(receipt)),
                    Err(e) => {
                        self.fail_broadcast(id, &e.to_string()).await;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn dispatch_now(
        &self,
        mut notification: Notification,
        recipients: Vec<Recipient>,
    ) -> Result<DispatchReceipt> {
        let id = notification.id;
        let counters = self.run_fast_channels(&notification, &recipients).await;
        self.stores.broadcasts.add_counters(id, counters).await?;

        let mut receipt = DispatchReceipt {
            notification_id: id,
            target: notification.target,
            total_users: recipients.len(),
            in_app_created: counters.in_app_created as u64,
            push_sent: counters.push_sent as u64,
            email_queued: 0,
            status: BroadcastStatus::Completed,
            completion: None,
        };

        let eligible: Vec<Recipient> = if notification.send_email {
            recipients
                .into_iter()
                .filter(Recipient::email_eligible)
                .collect()
        } else {
            Vec::new()
        };

        if eligible.is_empty() {
            self.finalize(id, BroadcastStatus::Completed, 0).await?;
            return Ok(receipt);
        }

        if !self
            .stores
            .broadcasts
            .transition(id, &[BroadcastStatus::Processing], BroadcastStatus::Sending)
            .await?
        {
            return Err(EngineError::InvalidState {
                id,
                status: BroadcastStatus::Processing,
            });
        }
        notification.status = BroadcastStatus::Sending;

        let template_html = self.template_html(&notification).await?;
        receipt.email_queued = eligible.len();
        receipt.status = BroadcastStatus::Sending;

        let completion = self
            .queue
            .submit(EmailJob {
                notification,
                template_html,
                recipients: eligible,
            })
            .await?;
        receipt.completion = Some(completion);

        info!(notification_id = %id, email_queued = receipt.email_queued, "邮件任务已入队");
        Ok(receipt)
    }

    /// 执行已被调度器认领（PROCESSING）的排期广播，返回最终状态
    #[instrument(skip(self, notification), fields(notification_id = %notification.id))]
    pub async fn dispatch_claimed(&self, mut notification: Notification) -> Result<BroadcastStatus> {
        let id = notification.id;
        let target = AudienceTarget::from_notification(&notification);

        let recipients = match self.resolver.resolve(&target).await {
            Ok(recipients) => recipients,
            Err(EngineError::NoRecipients) => {
                warn!("触发时受众为空，广播标记为失败");
                self.fail_broadcast(id, RECIPIENT_INACTIVE_ERROR).await;
                return Ok(BroadcastStatus::Failed);
            }
            Err(e) => return Err(e),
        };

        let channels = notification.channels();
        let seeded = self.tracker.seed(id, &recipients, channels).await?;
        let total = i32::try_from(recipients.len()).unwrap_or(i32::MAX);
        self.stores.broadcasts.set_total_targets(id, total).await?;

        let counters = self.run_fast_channels(&notification, &recipients).await;
        self.stores.broadcasts.add_counters(id, counters).await?;

        let (status, email_sent) = if notification.send_email {
            self.stores
                .broadcasts
                .transition(id, &[BroadcastStatus::Processing], BroadcastStatus::Sending)
                .await?;
            notification.status = BroadcastStatus::Sending;

            let template_html = self.template_html(&notification).await?;
            let eligible: Vec<Recipient> = recipients
                .iter()
                .filter(|r| r.email_eligible())
                .cloned()
                .collect();
            let outcome = self
                .email
                .run(&EmailJob {
                    notification,
                    template_html,
                    recipients: eligible,
                })
                .await?;
            (
                BroadcastStatus::from_email_outcome(outcome.success, outcome.failure),
                outcome.success,
            )
        } else {
            (BroadcastStatus::Completed, 0)
        };

        let stale = self.tracker.fail_queued(id, RECIPIENT_INACTIVE_ERROR).await?;
        self.finalize(id, status, email_sent).await?;

        info!(
            recipients = recipients.len(),
            seeded,
            stale,
            status = %status,
            "排期广播已投递"
        );
        Ok(status)
    }

    /// 取消排期广播
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<Notification> {
        let mut notification = self
            .stores
            .broadcasts
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("广播", id))?;

        if notification.send_mode != SendMode::Later
            || notification.status != BroadcastStatus::Scheduled
        {
            return Err(EngineError::InvalidState {
                id,
                status: notification.status,
            });
        }

        if !self
            .stores
            .broadcasts
            .transition(id, &[BroadcastStatus::Scheduled], BroadcastStatus::Cancelled)
            .await?
        {
            // 调度器已抢先认领
            let current = self
                .stores
                .broadcasts
                .get(id)
                .await?
                .map(|n| n.status)
                .unwrap_or(notification.status);
            return Err(EngineError::InvalidState {
                id,
                status: current,
            });
        }

        metrics::record_broadcast_finalized(BroadcastStatus::Cancelled.as_str());
        info!(notification_id = %id, "排期广播已取消");

        notification.status = BroadcastStatus::Cancelled;
        notification.updated_at = Utc::now();
        Ok(notification)
    }

    pub async fn list_scheduled(&self) -> Result<Vec<Notification>> {
        self.stores.broadcasts.list_scheduled().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Notification> {
        self.stores
            .broadcasts
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("广播", id))
    }

    /// 将广播强制结束为 FAILED，剩余 queued 行标记失败
    pub async fn fail_broadcast(&self, id: Uuid, reason: &str) {
        if let Err(e) = self.tracker.fail_queued(id, reason).await {
            warn!(notification_id = %id, error = %e, "标记剩余投递失败时出错");
        }
        if let Err(e) = self.finalize(id, BroadcastStatus::Failed, 0).await {
            error!(notification_id = %id, error = %e, "写入失败状态出错");
        }
    }

    async fn run_fast_channels(
        &self,
        notification: &Notification,
        recipients: &[Recipient],
    ) -> ChannelCounters {
        let mut counters = ChannelCounters::default();

        if notification.send_in_app {
            let outcome = self.in_app.dispatch(notification.id, recipients).await;
            counters.in_app_created = i32::try_from(outcome.delivered).unwrap_or(i32::MAX);
        }
        if notification.send_push {
            let outcome = self.push.dispatch(notification, recipients).await;
            counters.push_sent = i32::try_from(outcome.delivered).unwrap_or(i32::MAX);
        }

        counters
    }

    async fn finalize(&self, id: Uuid, status: BroadcastStatus, email_sent: u64) -> Result<()> {
        let email_sent = i32::try_from(email_sent).unwrap_or(i32::MAX);
        if self
            .stores
            .broadcasts
            .finalize(id, status, email_sent, Utc::now())
            .await?
        {
            metrics::record_broadcast_finalized(status.as_str());
            info!(notification_id = %id, status = %status, "广播已结束");
        }
        Ok(())
    }

    /// 邮件模板：内联 HTML 优先，其次是引用的模板
    async fn template_html(&self, notification: &Notification) -> Result<Option<String>> {
        if let Some(html) = notification
            .email_template
            .as_ref()
            .filter(|h| !h.trim().is_empty())
        {
            return Ok(Some(html.clone()));
        }

        let Some(template_id) = notification.email_template_id else {
            return Ok(None);
        };

        match self.stores.templates.get(template_id).await? {
            Some(template) if template.is_active => Ok(Some(template.html_content)),
            _ => {
                warn!(notification_id = %notification.id, template_id = %template_id, "邮件模板已停用，使用纯文本正文");
                Ok(None)
            }
        }
    }
}
