//! 用户收件箱
//!
//! 列表、未读数、已读标记与点击追踪。已读会把对应的站内信投递行推进到 opened，
//! 点击推进到 clicked。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{Channel, FeedItem, FeedQuery};
use crate::repository::{BroadcastRepositoryTrait, InboxRepositoryTrait};
use crate::tracker::DeliveryTracker;

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub notifications: Vec<FeedItem>,
}

/// 点击追踪结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickResult {
    pub notification_id: Uuid,
    pub cta_url: Option<String>,
}

pub struct UserFeedService {
    inbox: Arc<dyn InboxRepositoryTrait>,
    broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    tracker: Arc<DeliveryTracker>,
}

impl UserFeedService {
    pub fn new(
        inbox: Arc<dyn InboxRepositoryTrait>,
        broadcasts: Arc<dyn BroadcastRepositoryTrait>,
        tracker: Arc<DeliveryTracker>,
    ) -> Self {
        Self {
            inbox,
            broadcasts,
            tracker,
        }
    }

    #[instrument(skip(self, query))]
    pub async fn list(&self, user_id: &str, query: FeedQuery) -> Result<FeedPage> {
        let query = query.normalized();
        let (notifications, total) = self.inbox.list_feed(user_id, &query, Utc::now()).await?;

        Ok(FeedPage {
            page: query.page,
            limit: query.limit,
            total,
            total_pages: (total + query.limit - 1) / query.limit,
            notifications,
        })
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.inbox.unread_count(user_id, Utc::now()).await
    }

    /// 标记单条已读，重复调用保持首次的已读时间
    #[instrument(skip(self))]
    pub async fn mark_read(&self, user_id: &str, id: Uuid) -> Result<()> {
        let entry = self
            .inbox
            .find(user_id, id)
            .await?
            .ok_or_else(|| EngineError::not_found("通知", id))?;

        self.inbox.mark_read(user_id, id, Utc::now()).await?;
        self.tracker
            .mark_opened(entry.notification_id, user_id, Channel::InApp)
            .await?;
        Ok(())
    }

    /// 全部标记已读，返回本次标记的条数
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let notification_ids = self.inbox.mark_all_read(user_id, Utc::now()).await?;

        for notification_id in &notification_ids {
            if let Err(e) = self
                .tracker
                .mark_opened(*notification_id, user_id, Channel::InApp)
                .await
            {
                warn!(notification_id = %notification_id, error = %e, "打开状态记录失败");
            }
        }

        Ok(notification_ids.len() as u64)
    }

    /// 记录点击并返回跳转地址
    ///
    /// 广播不存在返回 NotFound，用户不是收件人返回 Forbidden
    #[instrument(skip(self))]
    pub async fn track_click(&self, user_id: &str, notification_id: Uuid) -> Result<ClickResult> {
        let notification = self
            .broadcasts
            .get(notification_id)
            .await?
            .ok_or_else(|| EngineError::not_found("通知", notification_id))?;

        if self
            .inbox
            .find_by_notification(user_id, notification_id)
            .await?
            .is_none()
        {
            return Err(EngineError::Forbidden("不是该通知的收件人".to_string()));
        }

        self.tracker
            .mark_clicked(notification_id, user_id, Channel::InApp)
            .await?;

        Ok(ClickResult {
            notification_id,
            cta_url: notification.cta_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        MockBroadcastRepositoryTrait, MockDeliveryTrackingRepositoryTrait,
        MockInboxRepositoryTrait,
    };

    fn service(
        inbox: MockInboxRepositoryTrait,
        broadcasts: MockBroadcastRepositoryTrait,
    ) -> UserFeedService {
        let tracking = MockDeliveryTrackingRepositoryTrait::new();
        UserFeedService::new(
            Arc::new(inbox),
            Arc::new(broadcasts),
            Arc::new(DeliveryTracker::new(Arc::new(tracking))),
        )
    }

    #[tokio::test]
    async fn test_list_computes_total_pages() {
        let mut inbox = MockInboxRepositoryTrait::new();
        inbox
            .expect_list_feed()
            .withf(|_, q, _| q.limit == 100 && q.page == 1)
            .returning(|_, _, _| Ok((vec![], 201)));

        let page = service(inbox, MockBroadcastRepositoryTrait::new())
            .list(
                "u1",
                FeedQuery {
                    page: 0,
                    limit: 500,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(page.total, 201);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.limit, 100);
    }

    #[tokio::test]
    async fn test_mark_read_not_owned() {
        let mut inbox = MockInboxRepositoryTrait::new();
        inbox.expect_find().returning(|_, _| Ok(None));
        inbox.expect_mark_read().never();

        let result = service(inbox, MockBroadcastRepositoryTrait::new())
            .mark_read("u1", Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_click_missing_notification() {
        let mut broadcasts = MockBroadcastRepositoryTrait::new();
        broadcasts.expect_get().returning(|_| Ok(None));

        let result = service(MockInboxRepositoryTrait::new(), broadcasts)
            .track_click("u1", Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }
}
