//! 内存存储
//!
//! 在单把锁下实现全部仓储接口，语义与 Postgres 实现一致（唯一约束、级联删除、
//! 条件状态迁移），适用于测试和本地开发环境。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    BroadcastRepositoryTrait, DeliveryTrackingRepositoryTrait, EmailTemplateRepositoryTrait,
    InboxRepositoryTrait, PushTokenRepositoryTrait, UserDirectoryTrait,
};
use crate::error::{EngineError, Result};
use crate::models::{
    AnalyticsRange, BroadcastStatus, Channel, ChannelCounters, ChannelStatusCount,
    DeliveryStatus, DeliveryTracking, EmailTemplate, FeedItem, FeedQuery, HourlyEngagement,
    NewPushToken, Notification, NotificationStatusCount, PushToken, ReadStats, Recipient,
    StatusUpdate, TrackingSeed, UserNotification,
};

#[derive(Debug, Clone)]
struct UserRow {
    recipient: Recipient,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<UserRow>,
    notifications: HashMap<Uuid, Notification>,
    tracking: Vec<DeliveryTracking>,
    inbox: Vec<UserNotification>,
    push_tokens: Vec<PushToken>,
    templates: HashMap<Uuid, EmailTemplate>,
}

impl State {
    fn seed(&mut self, notification_id: Uuid, seeds: &[TrackingSeed], at: DateTime<Utc>) -> u64 {
        let mut inserted = 0;
        for seed in seeds {
            let exists = self.tracking.iter().any(|row| {
                row.notification_id == notification_id
                    && row.user_id == seed.user_id
                    && row.channel == seed.channel
            });
            if exists {
                continue;
            }
            self.tracking.push(DeliveryTracking {
                id: Uuid::new_v4(),
                notification_id,
                user_id: seed.user_id.clone(),
                channel: seed.channel,
                status: DeliveryStatus::Queued,
                email: seed.email.clone(),
                device_token: None,
                error_message: None,
                sent_at: None,
                opened_at: None,
                clicked_at: None,
                failed_at: None,
                created_at: at,
            });
            inserted += 1;
        }
        inserted
    }

    fn visible_in_feed(&self, item: &UserNotification, now: DateTime<Utc>) -> Option<&Notification> {
        self.notifications
            .get(&item.notification_id)
            .filter(|n| n.send_in_app && !n.is_expired(now))
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    inbox_unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加活跃用户
    pub fn add_user(&self, recipient: Recipient) {
        let mut state = self.state.lock();
        state.users.retain(|row| row.recipient.id != recipient.id);
        state.users.push(UserRow {
            recipient,
            active: true,
        });
    }

    pub fn deactivate_user(&self, user_id: &str) {
        let mut state = self.state.lock();
        if let Some(row) = state.users.iter_mut().find(|row| row.recipient.id == user_id) {
            row.active = false;
        }
    }

    /// 模拟收件箱存储不可用
    pub fn set_inbox_unavailable(&self, unavailable: bool) {
        self.inbox_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn notification(&self, id: Uuid) -> Option<Notification> {
        self.state.lock().notifications.get(&id).cloned()
    }

    pub fn notification_count(&self) -> usize {
        self.state.lock().notifications.len()
    }

    pub fn tracking_rows(&self, notification_id: Uuid) -> Vec<DeliveryTracking> {
        self.state
            .lock()
            .tracking
            .iter()
            .filter(|row| row.notification_id == notification_id)
            .cloned()
            .collect()
    }

    pub fn inbox_rows(&self, notification_id: Uuid) -> Vec<UserNotification> {
        self.state
            .lock()
            .inbox
            .iter()
            .filter(|row| row.notification_id == notification_id)
            .cloned()
            .collect()
    }

    pub fn push_tokens(&self) -> Vec<PushToken> {
        self.state.lock().push_tokens.clone()
    }
}

#[async_trait]
impl BroadcastRepositoryTrait for InMemoryStore {
    async fn create_with_tracking(
        &self,
        notification: &Notification,
        seeds: &[TrackingSeed],
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.notifications.contains_key(&notification.id) {
            return Err(EngineError::Internal(format!(
                "广播 {} 已存在",
                notification.id
            )));
        }
        state
            .notifications
            .insert(notification.id, notification.clone());
        state.seed(notification.id, seeds, notification.created_at);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notification(id))
    }

    async fn list_scheduled(&self) -> Result<Vec<Notification>> {
        let state = self.state.lock();
        let mut scheduled: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.status == BroadcastStatus::Scheduled)
            .cloned()
            .collect();
        scheduled.sort_by_key(|n| n.scheduled_at);
        Ok(scheduled)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut due = self.list_scheduled().await?;
        due.retain(|n| n.scheduled_at.is_some_and(|at| at <= now));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[BroadcastStatus],
        to: BroadcastStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if from.contains(&n.status) => {
                n.status = to;
                n.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_counters(&self, id: Uuid, counters: ChannelCounters) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(n) = state.notifications.get_mut(&id) {
            n.in_app_created += counters.in_app_created;
            n.push_sent += counters.push_sent;
            n.email_sent += counters.email_sent;
            n.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_total_targets(&self, id: Uuid, total: i32) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(n) = state.notifications.get_mut(&id) {
            n.total_targets = total;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: BroadcastStatus,
        email_sent: i32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n)
                if matches!(
                    n.status,
                    BroadcastStatus::Processing | BroadcastStatus::Sending
                ) =>
            {
                n.status = status;
                n.email_sent += email_sent;
                n.completed_at = Some(at);
                n.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let expired: HashSet<Uuid> = state
            .notifications
            .values()
            .filter(|n| n.status.is_terminal() && n.is_expired(now))
            .map(|n| n.id)
            .collect();

        state.notifications.retain(|id, _| !expired.contains(id));
        state
            .tracking
            .retain(|row| !expired.contains(&row.notification_id));
        state
            .inbox
            .retain(|row| !expired.contains(&row.notification_id));
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl DeliveryTrackingRepositoryTrait for InMemoryStore {
    async fn seed(&self, notification_id: Uuid, seeds: &[TrackingSeed]) -> Result<u64> {
        Ok(self.state.lock().seed(notification_id, seeds, Utc::now()))
    }

    async fn update_status(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
        update: &StatusUpdate,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let mut updated = 0;
        for row in state.tracking.iter_mut().filter(|row| {
            row.notification_id == notification_id
                && row.channel == channel
                && user_ids.contains(&row.user_id)
        }) {
            if !row.status.can_transition_to(update.status) {
                continue;
            }
            row.status = update.status;
            if update.error.is_some() {
                row.error_message = update.error.clone();
            }
            match update.status {
                DeliveryStatus::Sent => row.sent_at = Some(update.at),
                DeliveryStatus::Opened => row.opened_at = Some(update.at),
                DeliveryStatus::Clicked => row.clicked_at = Some(update.at),
                DeliveryStatus::Failed => row.failed_at = Some(update.at),
                DeliveryStatus::Queued => {}
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn attach_device_tokens(
        &self,
        notification_id: Uuid,
        tokens: &[(String, String)],
    ) -> Result<()> {
        let mut state = self.state.lock();
        for (user_id, token) in tokens {
            if let Some(row) = state.tracking.iter_mut().find(|row| {
                row.notification_id == notification_id
                    && row.channel == Channel::Push
                    && &row.user_id == user_id
            }) {
                row.device_token = Some(token.clone());
            }
        }
        Ok(())
    }

    async fn fail_queued(
        &self,
        notification_id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let mut failed = 0;
        for row in state.tracking.iter_mut().filter(|row| {
            row.notification_id == notification_id && row.status == DeliveryStatus::Queued
        }) {
            row.status = DeliveryStatus::Failed;
            row.error_message = Some(error.to_string());
            row.failed_at = Some(at);
            failed += 1;
        }
        Ok(failed)
    }

    async fn list(&self, notification_id: Uuid) -> Result<Vec<DeliveryTracking>> {
        Ok(self.tracking_rows(notification_id))
    }

    async fn count_by_channel_status(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<ChannelStatusCount>> {
        let mut counts: HashMap<(Channel, DeliveryStatus), i64> = HashMap::new();
        for row in self.tracking_rows(notification_id) {
            *counts.entry((row.channel, row.status)).or_default() += 1;
        }
        let mut result: Vec<ChannelStatusCount> = counts
            .into_iter()
            .map(|((channel, status), count)| ChannelStatusCount {
                channel,
                status,
                count,
            })
            .collect();
        result.sort_by_key(|c| (c.channel, c.status));
        Ok(result)
    }

    async fn count_in_range(&self, range: &AnalyticsRange) -> Result<Vec<NotificationStatusCount>> {
        let state = self.state.lock();
        let mut counts: HashMap<(Uuid, Channel, DeliveryStatus), i64> = HashMap::new();
        for row in state.tracking.iter().filter(|row| range.contains(row)) {
            *counts
                .entry((row.notification_id, row.channel, row.status))
                .or_default() += 1;
        }
        let mut result: Vec<NotificationStatusCount> = counts
            .into_iter()
            .map(
                |((notification_id, channel, status), count)| NotificationStatusCount {
                    notification_id,
                    channel,
                    status,
                    count,
                },
            )
            .collect();
        result.sort_by_key(|c| (c.notification_id, c.channel, c.status));
        Ok(result)
    }

    async fn hourly_engagement(&self, notification_id: Uuid) -> Result<Vec<HourlyEngagement>> {
        let mut buckets: HashMap<DateTime<Utc>, (i64, i64)> = HashMap::new();
        for row in self.tracking_rows(notification_id) {
            let Some(at) = row.clicked_at.or(row.opened_at) else {
                continue;
            };
            let hour = at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at);
            let bucket = buckets.entry(hour).or_default();
            match row.status {
                DeliveryStatus::Opened => bucket.0 += 1,
                DeliveryStatus::Clicked => bucket.1 += 1,
                _ => {}
            }
        }
        let mut result: Vec<HourlyEngagement> = buckets
            .into_iter()
            .map(|(hour, (opened, clicked))| HourlyEngagement {
                hour,
                opened,
                clicked,
            })
            .collect();
        result.sort_by_key(|b| b.hour);
        Ok(result)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.tracking.len();
        state.tracking.retain(|row| {
            !(row.created_at < cutoff
                && matches!(row.status, DeliveryStatus::Sent | DeliveryStatus::Failed))
        });
        Ok((before - state.tracking.len()) as u64)
    }
}

#[async_trait]
impl InboxRepositoryTrait for InMemoryStore {
    async fn insert_missing(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if self.inbox_unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("收件箱存储不可用".to_string()));
        }

        let mut state = self.state.lock();
        let mut inserted = 0;
        for user_id in user_ids {
            let exists = state
                .inbox
                .iter()
                .any(|row| row.notification_id == notification_id && &row.user_id == user_id);
            if exists {
                continue;
            }
            state.inbox.push(UserNotification {
                id: Uuid::new_v4(),
                user_id: user_id.clone(),
                notification_id,
                is_read: false,
                read_at: None,
                created_at: at,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_feed(
        &self,
        user_id: &str,
        query: &FeedQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<FeedItem>, i64)> {
        let state = self.state.lock();
        let mut items: Vec<FeedItem> = state
            .inbox
            .iter()
            .filter(|row| row.user_id == user_id)
            .filter(|row| !query.unread_only || !row.is_read)
            .filter_map(|row| {
                let n = state.visible_in_feed(row, now)?;
                if query.kind.is_some_and(|k| k != n.kind)
                    || query.priority.is_some_and(|p| p != n.priority)
                {
                    return None;
                }
                Some(FeedItem {
                    id: row.id,
                    notification_id: n.id,
                    title: n.title.clone(),
                    message: n.message.clone(),
                    kind: n.kind,
                    priority: n.priority,
                    banner_url: n.banner_url.clone(),
                    cta_label: n.cta_label.clone(),
                    cta_url: n.cta_url.clone(),
                    is_read: row.is_read,
                    read_at: row.read_at,
                    expires_at: n.expires_at,
                    created_at: row.created_at,
                })
            })
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as i64;
        let page = items
            .into_iter()
            .skip(query.offset().max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn unread_count(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let state = self.state.lock();
        let count = state
            .inbox
            .iter()
            .filter(|row| row.user_id == user_id && !row.is_read)
            .filter(|row| state.visible_in_feed(row, now).is_some())
            .count();
        Ok(count as i64)
    }

    async fn find(&self, user_id: &str, id: Uuid) -> Result<Option<UserNotification>> {
        let state = self.state.lock();
        Ok(state
            .inbox
            .iter()
            .find(|row| row.id == id && row.user_id == user_id)
            .cloned())
    }

    async fn find_by_notification(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<UserNotification>> {
        let state = self.state.lock();
        Ok(state
            .inbox
            .iter()
            .find(|row| row.notification_id == notification_id && row.user_id == user_id)
            .cloned())
    }

    async fn mark_read(&self, user_id: &str, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .inbox
            .iter_mut()
            .find(|row| row.id == id && row.user_id == user_id)
        {
            Some(row) => {
                row.is_read = true;
                row.read_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock();
        let mut ids = Vec::new();
        for row in state
            .inbox
            .iter_mut()
            .filter(|row| row.user_id == user_id && !row.is_read)
        {
            row.is_read = true;
            row.read_at = Some(at);
            ids.push(row.notification_id);
        }
        Ok(ids)
    }

    async fn read_stats(&self, notification_id: Uuid) -> Result<ReadStats> {
        let rows = self.inbox_rows(notification_id);
        let read = rows.iter().filter(|row| row.is_read).count() as i64;
        Ok(ReadStats {
            read,
            unread: rows.len() as i64 - read,
        })
    }
}

#[async_trait]
impl UserDirectoryTrait for InMemoryStore {
    async fn list_active(&self, ids: Option<Vec<String>>) -> Result<Vec<Recipient>> {
        let state = self.state.lock();
        let wanted: Option<HashSet<String>> = ids.map(|ids| ids.into_iter().collect());
        Ok(state
            .users
            .iter()
            .filter(|row| row.active)
            .filter(|row| {
                wanted
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&row.recipient.id))
            })
            .map(|row| row.recipient.clone())
            .collect())
    }
}

#[async_trait]
impl PushTokenRepositoryTrait for InMemoryStore {
    async fn register(
        &self,
        user_id: &str,
        token: &NewPushToken,
        at: DateTime<Utc>,
    ) -> Result<PushToken> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .push_tokens
            .iter_mut()
            .find(|t| t.token == token.token)
        {
            existing.user_id = user_id.to_string();
            existing.platform = token.platform;
            existing.device_id = token.device_id.clone();
            existing.user_agent = token.user_agent.clone();
            existing.last_used = at;
            return Ok(existing.clone());
        }

        let saved = PushToken {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            token: token.token.clone(),
            platform: token.platform,
            device_id: token.device_id.clone(),
            user_agent: token.user_agent.clone(),
            last_used: at,
            created_at: at,
        };
        state.push_tokens.push(saved.clone());
        Ok(saved)
    }

    async fn remove(&self, user_id: &str, token: Option<String>) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.push_tokens.len();
        state.push_tokens.retain(|t| {
            !(t.user_id == user_id && token.as_ref().is_none_or(|wanted| &t.token == wanted))
        });
        Ok((before - state.push_tokens.len()) as u64)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushToken>> {
        let state = self.state.lock();
        let mut tokens: Vec<PushToken> = state
            .push_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(tokens)
    }

    async fn list_for_users(&self, user_ids: &[String]) -> Result<Vec<PushToken>> {
        let state = self.state.lock();
        Ok(state
            .push_tokens
            .iter()
            .filter(|t| user_ids.contains(&t.user_id))
            .cloned()
            .collect())
    }

    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.push_tokens.len();
        state.push_tokens.retain(|t| !tokens.contains(&t.token));
        Ok((before - state.push_tokens.len()) as u64)
    }
}

#[async_trait]
impl EmailTemplateRepositoryTrait for InMemoryStore {
    async fn create(&self, template: &EmailTemplate) -> Result<()> {
        self.state
            .lock()
            .templates
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmailTemplate>> {
        Ok(self.state.lock().templates.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<EmailTemplate>> {
        let state = self.state.lock();
        let mut templates: Vec<EmailTemplate> = state
            .templates
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(templates)
    }

    async fn update(&self, template: &EmailTemplate) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state.templates.get_mut(&template.id) {
            *existing = template.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(id: &str) -> Recipient {
        Recipient {
            id: id.to_string(),
            email: None,
            email_subscribed: false,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_tracking_status_never_regresses() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let seeds = vec![TrackingSeed {
            user_id: "u1".into(),
            channel: Channel::InApp,
            email: None,
        }];
        assert_eq!(store.seed(id, &seeds).await.unwrap(), 1);
        // 重复预置不产生新行
        assert_eq!(store.seed(id, &seeds).await.unwrap(), 0);

        let users = vec!["u1".to_string()];
        let now = Utc::now();
        let opened = StatusUpdate::new(DeliveryStatus::Opened, now);
        assert_eq!(
            store
                .update_status(id, &users, Channel::InApp, &opened)
                .await
                .unwrap(),
            0
        );

        let sent = StatusUpdate::new(DeliveryStatus::Sent, now);
        store
            .update_status(id, &users, Channel::InApp, &sent)
            .await
            .unwrap();
        store
            .update_status(id, &users, Channel::InApp, &opened)
            .await
            .unwrap();
        let failed = StatusUpdate::failed("late error", now);
        store
            .update_status(id, &users, Channel::InApp, &failed)
            .await
            .unwrap();

        let rows = store.tracking_rows(id);
        assert_eq!(rows[0].status, DeliveryStatus::Opened);
        assert!(rows[0].error_message.is_none());
    }

    #[tokio::test]
    async fn test_inbox_insert_is_idempotent() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let users = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.insert_missing(id, &users, Utc::now()).await.unwrap(), 2);
        assert_eq!(store.insert_missing(id, &users, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.inbox_rows(id).len(), 2);
    }

    #[tokio::test]
    async fn test_list_active_skips_inactive() {
        let store = InMemoryStore::new();
        store.add_user(recipient("a"));
        store.add_user(recipient("b"));
        store.deactivate_user("b");

        let all = UserDirectoryTrait::list_active(&store, None).await.unwrap();
        assert_eq!(all.len(), 1);
        let selected = UserDirectoryTrait::list_active(&store, Some(vec!["b".into(), "c".into()]))
            .await
            .unwrap();
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_push_token_upsert_reassigns_owner() {
        let store = InMemoryStore::new();
        let token = NewPushToken {
            token: "tok-1".into(),
            platform: Default::default(),
            device_id: None,
            user_agent: None,
        };
        store.register("a", &token, Utc::now()).await.unwrap();
        store.register("b", &token, Utc::now()).await.unwrap();

        assert!(store.list_for_user("a").await.unwrap().is_empty());
        assert_eq!(store.list_for_user("b").await.unwrap().len(), 1);
        assert_eq!(store.remove("b", None).await.unwrap(), 1);
    }
}
