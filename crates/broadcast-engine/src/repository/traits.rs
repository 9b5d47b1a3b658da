//! 仓储 Trait 定义
//!
//! 服务层只依赖这些抽象，Postgres 与内存实现可互换，也便于 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AnalyticsRange, BroadcastStatus, Channel, ChannelCounters, ChannelStatusCount,
    DeliveryTracking, EmailTemplate, FeedItem, FeedQuery, HourlyEngagement, NewPushToken,
    Notification, NotificationStatusCount, PushToken, ReadStats, Recipient, StatusUpdate,
    TrackingSeed, UserNotification,
};

/// 广播记录仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BroadcastRepositoryTrait: Send + Sync {
    /// 在同一事务内写入广播记录与 queued 追踪行
    async fn create_with_tracking(
        &self,
        notification: &Notification,
        seeds: &[TrackingSeed],
    ) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;
    /// 所有 SCHEDULED 广播，按触发时间升序
    async fn list_scheduled(&self) -> Result<Vec<Notification>>;
    /// 已到期的 SCHEDULED 广播候选，认领需另行调用 `transition`
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;
    /// 条件状态迁移，当前状态不在 `from` 中时返回 false
    async fn transition(
        &self,
        id: Uuid,
        from: &[BroadcastStatus],
        to: BroadcastStatus,
    ) -> Result<bool>;
    /// 以增量方式累加渠道计数
    async fn add_counters(&self, id: Uuid, counters: ChannelCounters) -> Result<()>;
    async fn set_total_targets(&self, id: Uuid, total: i32) -> Result<()>;
    /// 写入终态与邮件计数，只作用于 PROCESSING / SENDING 的记录
    async fn finalize(
        &self,
        id: Uuid,
        status: BroadcastStatus,
        email_sent: i32,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    /// 删除已过期的终态广播，追踪与收件箱行级联删除
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// 投递追踪仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryTrackingRepositoryTrait: Send + Sync {
    /// 幂等预置 queued 行，返回新增行数
    async fn seed(&self, notification_id: Uuid, seeds: &[TrackingSeed]) -> Result<u64>;
    /// 单调状态更新，仅作用于当前状态属于前驱集合的行
    async fn update_status(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
        update: &StatusUpdate,
    ) -> Result<u64>;
    /// 记录推送成功的设备 token 快照，参数为 (user_id, token)
    async fn attach_device_tokens(
        &self,
        notification_id: Uuid,
        tokens: &[(String, String)],
    ) -> Result<()>;
    /// 将仍为 queued 的行全部标记失败
    async fn fail_queued(
        &self,
        notification_id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u64>;
    async fn list(&self, notification_id: Uuid) -> Result<Vec<DeliveryTracking>>;
    async fn count_by_channel_status(&self, notification_id: Uuid)
    -> Result<Vec<ChannelStatusCount>>;
    async fn count_in_range(&self, range: &AnalyticsRange) -> Result<Vec<NotificationStatusCount>>;
    async fn hourly_engagement(&self, notification_id: Uuid) -> Result<Vec<HourlyEngagement>>;
    /// 删除早于 cutoff 的 sent / failed 行
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// 站内信收件箱仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InboxRepositoryTrait: Send + Sync {
    /// 批量写入未读条目，已存在的 (用户, 广播) 跳过，返回新增行数
    async fn insert_missing(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64>;
    /// 用户收件箱，排除已过期广播，返回 (条目, 总数)
    async fn list_feed(
        &self,
        user_id: &str,
        query: &FeedQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<FeedItem>, i64)>;
    async fn unread_count(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64>;
    async fn find(&self, user_id: &str, id: Uuid) -> Result<Option<UserNotification>>;
    async fn find_by_notification(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<UserNotification>>;
    /// 标记已读，已读条目保持原 read_at
    async fn mark_read(&self, user_id: &str, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    /// 全部标记已读，返回受影响的广播 id
    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<Vec<Uuid>>;
    async fn read_stats(&self, notification_id: Uuid) -> Result<ReadStats>;
}

/// 用户目录（外部协作方）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectoryTrait: Send + Sync {
    /// 活跃用户；`ids` 为 None 时返回全部活跃用户
    async fn list_active(&self, ids: Option<Vec<String>>) -> Result<Vec<Recipient>>;
}

/// 推送设备注册表（外部协作方）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTokenRepositoryTrait: Send + Sync {
    /// 按 token upsert，token 已存在时转移给当前用户
    async fn register(
        &self,
        user_id: &str,
        token: &NewPushToken,
        at: DateTime<Utc>,
    ) -> Result<PushToken>;
    /// 删除用户的指定 token，`token` 为 None 时删除该用户全部 token
    async fn remove(&self, user_id: &str, token: Option<String>) -> Result<u64>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushToken>>;
    async fn list_for_users(&self, user_ids: &[String]) -> Result<Vec<PushToken>>;
    /// 删除推送服务判定已失效的 token
    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64>;
}

/// 邮件模板仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTemplateRepositoryTrait: Send + Sync {
    async fn create(&self, template: &EmailTemplate) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<EmailTemplate>>;
    async fn list_active(&self) -> Result<Vec<EmailTemplate>>;
    async fn update(&self, template: &EmailTemplate) -> Result<()>;
}
