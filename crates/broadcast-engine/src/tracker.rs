//! 投递追踪
//!
//! 为每个 (广播, 用户, 渠道) 维护一行投递记录，所有状态更新都是单调的：
//! queued 只能变为 sent 或 failed，sent 之后只能继续到 opened / clicked。
//! 重复或乱序的更新在仓储层被条件 SQL 忽略。

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Channel, ChannelSelection, DeliveryStatus, Recipient, StatusUpdate, TrackingSeed,
};
use crate::repository::DeliveryTrackingRepositoryTrait;

/// 失败原因最大保留字符数
pub const MAX_ERROR_LEN: usize = 200;

/// 按字符截断失败原因，避免切断多字节字符
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// 根据受众与渠道生成预置行
///
/// 站内信与推送为每个用户各一行；邮件只为订阅且邮箱有效的用户生成，并保存地址快照。
pub fn plan_seeds(recipients: &[Recipient], channels: ChannelSelection) -> Vec<TrackingSeed> {
    let mut seeds = Vec::with_capacity(recipients.len() * channels.selected().len());

    for recipient in recipients {
        if channels.in_app {
            seeds.push(TrackingSeed {
                user_id: recipient.id.clone(),
                channel: Channel::InApp,
                email: None,
            });
        }
        if channels.push {
            seeds.push(TrackingSeed {
                user_id: recipient.id.clone(),
                channel: Channel::Push,
                email: None,
            });
        }
        if channels.email && recipient.email_eligible() {
            seeds.push(TrackingSeed {
                user_id: recipient.id.clone(),
                channel: Channel::Email,
                email: recipient.verified_email().map(String::from),
            });
        }
    }

    seeds
}

/// 投递追踪器
pub struct DeliveryTracker {
    repo: Arc<dyn DeliveryTrackingRepositoryTrait>,
}

impl DeliveryTracker {
    pub fn new(repo: Arc<dyn DeliveryTrackingRepositoryTrait>) -> Self {
        Self { repo }
    }

    /// 幂等预置 queued 行，返回新增行数
    pub async fn seed(
        &self,
        notification_id: Uuid,
        recipients: &[Recipient],
        channels: ChannelSelection,
    ) -> Result<u64> {
        let seeds = plan_seeds(recipients, channels);
        self.repo.seed(notification_id, &seeds).await
    }

    pub async fn mark_sent(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
    ) -> Result<u64> {
        self.apply(
            notification_id,
            user_ids,
            channel,
            StatusUpdate::new(DeliveryStatus::Sent, Utc::now()),
        )
        .await
    }

    pub async fn mark_failed(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
        error: &str,
    ) -> Result<u64> {
        self.apply(
            notification_id,
            user_ids,
            channel,
            StatusUpdate::failed(truncate_error(error), Utc::now()),
        )
        .await
    }

    pub async fn mark_opened(
        &self,
        notification_id: Uuid,
        user_id: &str,
        channel: Channel,
    ) -> Result<bool> {
        let updated = self
            .apply(
                notification_id,
                &[user_id.to_string()],
                channel,
                StatusUpdate::new(DeliveryStatus::Opened, Utc::now()),
            )
            .await?;
        Ok(updated > 0)
    }

    pub async fn mark_clicked(
        &self,
        notification_id: Uuid,
        user_id: &str,
        channel: Channel,
    ) -> Result<bool> {
        let updated = self
            .apply(
                notification_id,
                &[user_id.to_string()],
                channel,
                StatusUpdate::new(DeliveryStatus::Clicked, Utc::now()),
            )
            .await?;
        Ok(updated > 0)
    }

    /// 记录推送成功时使用的设备 token
    pub async fn attach_device_tokens(
        &self,
        notification_id: Uuid,
        tokens: &[(String, String)],
    ) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        self.repo.attach_device_tokens(notification_id, tokens).await
    }

    /// 广播结束时仍为 queued 的行全部标记失败
    pub async fn fail_queued(&self, notification_id: Uuid, error: &str) -> Result<u64> {
        self.repo
            .fail_queued(notification_id, &truncate_error(error), Utc::now())
            .await
    }

    async fn apply(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
        update: StatusUpdate,
    ) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let updated = self
            .repo
            .update_status(notification_id, user_ids, channel, &update)
            .await?;

        debug!(
            notification_id = %notification_id,
            channel = %channel,
            status = %update.status,
            requested = user_ids.len(),
            updated,
            "投递状态已更新"
        );

        Ok(updated)
    }
}
