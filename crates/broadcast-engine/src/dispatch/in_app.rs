//! 站内信投递

use std::sync::Arc;

use broadcast_shared::observability::metrics;
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ChannelOutcome;
use crate::models::{Channel, Recipient};
use crate::repository::InboxRepositoryTrait;
use crate::tracker::DeliveryTracker;

pub struct InAppDispatcher {
    inbox: Arc<dyn InboxRepositoryTrait>,
    tracker: Arc<DeliveryTracker>,
}

impl InAppDispatcher {
    pub fn new(inbox: Arc<dyn InboxRepositoryTrait>, tracker: Arc<DeliveryTracker>) -> Self {
        Self { inbox, tracker }
    }

    /// 为所有收件人写入未读条目
    ///
    /// 已存在的条目跳过，重复执行不会产生重复行。
    /// 写入失败时所有用户的站内信追踪行标记为 failed。
    #[instrument(skip(self, recipients), fields(recipients = recipients.len()))]
    pub async fn dispatch(&self, notification_id: Uuid, recipients: &[Recipient]) -> ChannelOutcome {
        if recipients.is_empty() {
            return ChannelOutcome::default();
        }

        let user_ids: Vec<String> = recipients.iter().map(|r| r.id.clone()).collect();

        match self
            .inbox
            .insert_missing(notification_id, &user_ids, Utc::now())
            .await
        {
            Ok(created) => {
                if let Err(e) = self
                    .tracker
                    .mark_sent(notification_id, &user_ids, Channel::InApp)
                    .await
                {
                    warn!(notification_id = %notification_id, error = %e, "站内信追踪状态更新失败");
                }

                metrics::record_channel_delivery(Channel::InApp.as_str(), "sent", created);
                info!(notification_id = %notification_id, created, "站内信已写入");

                ChannelOutcome {
                    delivered: created,
                    failed: 0,
                }
            }
            Err(e) => {
                error!(notification_id = %notification_id, error = %e, "站内信写入失败");

                if let Err(track_err) = self
                    .tracker
                    .mark_failed(notification_id, &user_ids, Channel::InApp, &e.to_string())
                    .await
                {
                    warn!(notification_id = %notification_id, error = %track_err, "站内信失败状态记录失败");
                }

                let failed = user_ids.len() as u64;
                metrics::record_channel_delivery(Channel::InApp.as_str(), "failed", failed);

                ChannelOutcome {
                    delivered: 0,
                    failed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::DeliveryStatus;
    use crate::repository::{MockDeliveryTrackingRepositoryTrait, MockInboxRepositoryTrait};

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                id: format!("user-{}", i),
                email: None,
                email_subscribed: false,
                name: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_marks_sent() {
        let mut inbox = MockInboxRepositoryTrait::new();
        inbox
            .expect_insert_missing()
            .times(1)
            .returning(|_, ids, _| Ok(ids.len() as u64));

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking
            .expect_update_status()
            .withf(|_, ids, channel, update| {
                ids.len() == 3 && *channel == Channel::InApp && update.status == DeliveryStatus::Sent
            })
            .times(1)
            .returning(|_, ids, _, _| Ok(ids.len() as u64));

        let dispatcher = InAppDispatcher::new(
            Arc::new(inbox),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
        );

        let outcome = dispatcher.dispatch(Uuid::new_v4(), &recipients(3)).await;
        assert_eq!(outcome, ChannelOutcome { delivered: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_storage_failure_marks_all_failed() {
        let mut inbox = MockInboxRepositoryTrait::new();
        inbox
            .expect_insert_missing()
            .returning(|_, _, _| Err(EngineError::Internal("connection reset".into())));

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking
            .expect_update_status()
            .withf(|_, _, channel, update| {
                *channel == Channel::InApp
                    && update.status == DeliveryStatus::Failed
                    && update
                        .error
                        .as_deref()
                        .is_some_and(|e| e.contains("connection reset"))
            })
            .times(1)
            .returning(|_, ids, _, _| Ok(ids.len() as u64));

        let dispatcher = InAppDispatcher::new(
            Arc::new(inbox),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
        );

        let outcome = dispatcher.dispatch(Uuid::new_v4(), &recipients(2)).await;
        assert_eq!(outcome, ChannelOutcome { delivered: 0, failed: 2 });
    }
}
