//! 推送投递
//!
//! 设备 token 在投递时读取，按批调用推送传输。一个用户有多个设备时，
//! 任一设备送达即视为该用户送达；全部失败时记录第一个失败原因。
//! 推送服务判定失效的 token 从注册表删除。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use broadcast_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use super::ChannelOutcome;
use crate::channels::{PushMessage, PushTransport, TokenOutcome, TokenResult};
use crate::models::{Channel, Notification, Recipient};
use crate::repository::PushTokenRepositoryTrait;
use crate::tracker::DeliveryTracker;

/// 用户没有注册任何设备时的失败原因
pub const NO_DEVICE_ERROR: &str = "no registered device";

pub struct PushDispatcher {
    tokens: Arc<dyn PushTokenRepositoryTrait>,
    tracker: Arc<DeliveryTracker>,
    transport: Arc<dyn PushTransport>,
    batch_size: usize,
}

/// 单个用户的推送汇总
#[derive(Default)]
struct UserPushState {
    delivered_token: Option<String>,
    first_error: Option<String>,
}

impl PushDispatcher {
    pub fn new(
        tokens: Arc<dyn PushTokenRepositoryTrait>,
        tracker: Arc<DeliveryTracker>,
        transport: Arc<dyn PushTransport>,
        batch_size: usize,
    ) -> Self {
        Self {
            tokens,
            tracker,
            transport,
            batch_size: batch_size.max(1),
        }
    }

    pub fn message_for(notification: &Notification) -> PushMessage {
        let data = HashMap::from([
            ("type".to_string(), notification.kind.as_str().to_string()),
            ("notificationId".to_string(), notification.id.to_string()),
            (
                "ctaUrl".to_string(),
                notification.cta_url.clone().unwrap_or_default(),
            ),
            (
                "priority".to_string(),
                notification.priority.as_str().to_string(),
            ),
        ]);

        PushMessage {
            title: notification.title.clone(),
            body: notification.message.clone(),
            data,
        }
    }

    #[instrument(skip(self, notification, recipients), fields(notification_id = %notification.id, recipients = recipients.len()))]
    pub async fn dispatch(&self, notification: &Notification, recipients: &[Recipient]) -> ChannelOutcome {
        if recipients.is_empty() {
            return ChannelOutcome::default();
        }

        let notification_id = notification.id;
        let user_ids: Vec<String> = recipients.iter().map(|r| r.id.clone()).collect();

        let registered = match self.tokens.list_for_users(&user_ids).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "读取设备 token 失败");
                self.record_failures(notification_id, group_single(&user_ids, &e.to_string()))
                    .await;
                return ChannelOutcome {
                    delivered: 0,
                    failed: user_ids.len() as u64,
                };
            }
        };

        // BTreeMap 保证按用户顺序写入追踪行
        let mut states: BTreeMap<String, UserPushState> = user_ids
            .iter()
            .map(|id| (id.clone(), UserPushState::default()))
            .collect();
        let owner: HashMap<String, String> = registered
            .iter()
            .map(|t| (t.token.clone(), t.user_id.clone()))
            .collect();
        let tokens: Vec<String> = registered.into_iter().map(|t| t.token).collect();

        let message = Self::message_for(notification);
        let mut delivered_tokens = 0u64;
        let mut unregistered = Vec::new();

        for batch in tokens.chunks(self.batch_size) {
            let results = match self.transport.send_batch(batch, &message).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(transport = self.transport.name(), batch = batch.len(), error = %e, "推送批次调用失败");
                    batch
                        .iter()
                        .map(|t| TokenResult::failed(t.clone(), e.to_string()))
                        .collect()
                }
            };

            for result in results {
                let Some(state) = owner.get(&result.token).and_then(|u| states.get_mut(u)) else {
                    continue;
                };
                match result.outcome {
                    TokenOutcome::Delivered => {
                        delivered_tokens += 1;
                        state.delivered_token.get_or_insert(result.token);
                    }
                    TokenOutcome::Failed(reason) => {
                        state.first_error.get_or_insert(reason);
                    }
                    TokenOutcome::Unregistered => {
                        state
                            .first_error
                            .get_or_insert_with(|| "device token unregistered".to_string());
                        unregistered.push(result.token);
                    }
                }
            }
        }

        let mut sent_users = Vec::new();
        let mut snapshots = Vec::new();
        let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (user_id, state) in states {
            match (state.delivered_token, state.first_error) {
                (Some(token), _) => {
                    snapshots.push((user_id.clone(), token));
                    sent_users.push(user_id);
                }
                (None, Some(reason)) => failures.entry(reason).or_default().push(user_id),
                (None, None) => failures
                    .entry(NO_DEVICE_ERROR.to_string())
                    .or_default()
                    .push(user_id),
            }
        }

        if let Err(e) = self
            .tracker
            .mark_sent(notification_id, &sent_users, Channel::Push)
            .await
        {
            warn!(error = %e, "推送成功状态记录失败");
        }
        if let Err(e) = self
            .tracker
            .attach_device_tokens(notification_id, &snapshots)
            .await
        {
            warn!(error = %e, "推送设备快照记录失败");
        }

        let failed_users: u64 = failures.values().map(|v| v.len() as u64).sum();
        self.record_failures(notification_id, failures).await;

        if !unregistered.is_empty() {
            match self.tokens.remove_tokens(&unregistered).await {
                Ok(removed) => info!(removed, "已清理失效的设备 token"),
                Err(e) => warn!(error = %e, "清理失效 token 失败"),
            }
        }

        metrics::record_channel_delivery(Channel::Push.as_str(), "sent", delivered_tokens);
        metrics::record_channel_delivery(Channel::Push.as_str(), "failed", failed_users);

        info!(
            tokens = tokens.len(),
            delivered_tokens,
            sent_users = sent_users.len(),
            failed_users,
            "推送投递完成"
        );

        ChannelOutcome {
            delivered: delivered_tokens,
            failed: failed_users,
        }
    }

    async fn record_failures(
        &self,
        notification_id: uuid::Uuid,
        failures: BTreeMap<String, Vec<String>>,
    ) {
        for (reason, users) in failures {
            if let Err(e) = self
                .tracker
                .mark_failed(notification_id, &users, Channel::Push, &reason)
                .await
            {
                warn!(error = %e, "推送失败状态记录失败");
            }
        }
    }
}

fn group_single(user_ids: &[String], reason: &str) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(reason.to_string(), user_ids.to_vec())])
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    use super::*;
    use crate::channels::MockPushTransport;
    use crate::error::EngineError;
    use crate::models::{
        BroadcastStatus, DeliveryStatus, DevicePlatform, NotificationKind, Priority, PushToken,
        SendMode, TargetMode,
    };
    use crate::repository::{MockDeliveryTrackingRepositoryTrait, MockPushTokenRepositoryTrait};

    fn notification() -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            title: "新功能上线".into(),
            message: "快来体验".into(),
            kind: NotificationKind::Announcement,
            priority: Priority::High,
            banner_url: None,
            cta_label: Some("查看".into()),
            cta_url: Some("/features".into()),
            target: TargetMode::AllUsers,
            target_user_ids: Json(vec![]),
            user_id: None,
            send_in_app: false,
            send_email: false,
            send_push: true,
            send_mode: SendMode::Now,
            scheduled_at: None,
            expiry_days: 7,
            expires_at: None,
            email_subject: None,
            email_template: None,
            email_template_id: None,
            total_targets: 2,
            in_app_created: 0,
            push_sent: 0,
            email_sent: 0,
            status: BroadcastStatus::Processing,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn recipient(id: &str) -> Recipient {
        Recipient {
            id: id.into(),
            email: None,
            email_subscribed: false,
            name: None,
        }
    }

    fn token(user_id: &str, token: &str) -> PushToken {
        PushToken {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            token: token.into(),
            platform: DevicePlatform::Android,
            device_id: None,
            user_agent: None,
            last_used: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_message_data_payload() {
        let n = notification();
        let message = PushDispatcher::message_for(&n);

        assert_eq!(message.title, "新功能上线");
        assert_eq!(message.data["type"], "ANNOUNCEMENT");
        assert_eq!(message.data["notificationId"], n.id.to_string());
        assert_eq!(message.data["ctaUrl"], "/features");
        assert_eq!(message.data["priority"], "HIGH");
    }

    #[tokio::test]
    async fn test_any_delivered_token_counts_user_as_sent() {
        let mut tokens = MockPushTokenRepositoryTrait::new();
        tokens.expect_list_for_users().returning(|_| {
            Ok(vec![
                token("u1", "t1-a"),
                token("u1", "t1-b"),
                token("u2", "t2-a"),
            ])
        });
        tokens
            .expect_remove_tokens()
            .withf(|t| t.to_vec() == vec!["t1-a".to_string()])
            .times(1)
            .returning(|t| Ok(t.len() as u64));

        let mut transport = MockPushTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_send_batch().returning(|batch, _| {
            Ok(batch
                .iter()
                .map(|t| match t.as_str() {
                    "t1-a" => TokenResult::unregistered(t.clone()),
                    "t1-b" => TokenResult::delivered(t.clone()),
                    _ => TokenResult::failed(t.clone(), "quota exceeded"),
                })
                .collect())
        });

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking
            .expect_update_status()
            .withf(|_, ids, _, update| {
                update.status == DeliveryStatus::Sent && ids.to_vec() == vec!["u1".to_string()]
            })
            .times(1)
            .returning(|_, ids, _, _| Ok(ids.len() as u64));
        tracking
            .expect_update_status()
            .withf(|_, ids, _, update| {
                update.status == DeliveryStatus::Failed
                    && ids.to_vec() == vec!["u2".to_string()]
                    && update.error.as_deref() == Some("quota exceeded")
            })
            .times(1)
            .returning(|_, ids, _, _| Ok(ids.len() as u64));
        tracking
            .expect_attach_device_tokens()
            .withf(|_, snapshots| snapshots.to_vec() == vec![("u1".to_string(), "t1-b".to_string())])
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = PushDispatcher::new(
            Arc::new(tokens),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
            Arc::new(transport),
            2,
        );

        let outcome = dispatcher
            .dispatch(&notification(), &[recipient("u1"), recipient("u2")])
            .await;
        assert_eq!(outcome, ChannelOutcome { delivered: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_users_without_devices_fail() {
        let mut tokens = MockPushTokenRepositoryTrait::new();
        tokens.expect_list_for_users().returning(|_| Ok(vec![]));

        let mut transport = MockPushTransport::new();
        transport.expect_send_batch().never();

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking
            .expect_update_status()
            .withf(|_, ids, _, update| {
                update.status == DeliveryStatus::Failed
                    && ids.len() == 2
                    && update.error.as_deref() == Some(NO_DEVICE_ERROR)
            })
            .times(1)
            .returning(|_, ids, _, _| Ok(ids.len() as u64));

        let dispatcher = PushDispatcher::new(
            Arc::new(tokens),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
            Arc::new(transport),
            500,
        );

        let outcome = dispatcher
            .dispatch(&notification(), &[recipient("u1"), recipient("u2")])
            .await;
        assert_eq!(outcome, ChannelOutcome { delivered: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_batch_error_fails_only_that_batch() {
        let mut tokens = MockPushTokenRepositoryTrait::new();
        tokens
            .expect_list_for_users()
            .returning(|_| Ok(vec![token("u1", "t1"), token("u2", "t2")]));

        let mut transport = MockPushTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_send_batch().returning(|batch, _| {
            if batch[0] == "t1" {
                Err(EngineError::transport(Channel::Push, "gateway timeout"))
            } else {
                Ok(batch.iter().map(|t| TokenResult::delivered(t.clone())).collect())
            }
        });

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking
            .expect_update_status()
            .returning(|_, ids, _, _| Ok(ids.len() as u64));
        tracking.expect_attach_device_tokens().returning(|_, _| Ok(()));

        let dispatcher = PushDispatcher::new(
            Arc::new(tokens),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
            Arc::new(transport),
            1,
        );

        let outcome = dispatcher
            .dispatch(&notification(), &[recipient("u1"), recipient("u2")])
            .await;
        assert_eq!(outcome, ChannelOutcome { delivered: 1, failed: 1 });
    }
}
