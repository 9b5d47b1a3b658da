//! 投递统计
//!
//! 从投递追踪行与收件箱已读状态汇总单个广播与全局的送达率、打开率、点击率。
//! 所有比率为百分比，保留两位小数，分母为 0 时为 0。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    AnalyticsRange, BroadcastStatus, Channel, ChannelStatusCount, DeliveryStatus,
    HourlyEngagement, Notification, ReadStats, TargetMode,
};
use crate::repository::{
    BroadcastRepositoryTrait, DeliveryTrackingRepositoryTrait, InboxRepositoryTrait,
};

/// 百分比，保留两位小数
pub fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    let value = numerator as f64 * 100.0 / denominator as f64;
    (value * 100.0).round() / 100.0
}

/// 广播摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub id: Uuid,
    pub title: String,
    pub status: BroadcastStatus,
    pub target: TargetMode,
    pub total_targets: i32,
    pub in_app_created: i32,
    pub push_sent: i32,
    pub email_sent: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Notification> for NotificationSummary {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            title: n.title.clone(),
            status: n.status,
            target: n.target,
            total_targets: n.total_targets,
            in_app_created: n.in_app_created,
            push_sent: n.push_sent,
            email_sent: n.email_sent,
            created_at: n.created_at,
            completed_at: n.completed_at,
        }
    }
}

/// 单个广播的统计
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub notification: NotificationSummary,
    pub delivery_stats: Vec<ChannelStatusCount>,
    pub read_stats: ReadStats,
    pub total_sent: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub hourly_engagement: Vec<HourlyEngagement>,
}

/// 全局统计中单个广播的分组计数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTotals {
    pub notification_id: Uuid,
    pub total: i64,
    pub by_channel: BTreeMap<Channel, i64>,
    pub by_status: BTreeMap<DeliveryStatus, i64>,
}

/// 全局统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub notifications: Vec<NotificationTotals>,
    pub total: i64,
    pub delivered: i64,
    pub failed: i64,
    pub opened: i64,
    pub clicked: i64,
    /// 送达（sent / opened / clicked）占全部投递行的比例
    pub delivery_rate: f64,
    /// 打开或点击占送达的比例
    pub open_rate: f64,
    pub click_rate: f64,
}

pub struct AnalyticsAggregator {
    broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    tracking: Arc<dyn DeliveryTrackingRepositoryTrait>,
    inbox: Arc<dyn InboxRepositoryTrait>,
}

impl AnalyticsAggregator {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepositoryTrait>,
        tracking: Arc<dyn DeliveryTrackingRepositoryTrait>,
        inbox: Arc<dyn InboxRepositoryTrait>,
    ) -> Self {
        Self {
            broadcasts,
            tracking,
            inbox,
        }
    }

    #[instrument(skip(self))]
    pub async fn stats_for(&self, notification_id: Uuid) -> Result<NotificationStats> {
        let notification = self
            .broadcasts
            .get(notification_id)
            .await?
            .ok_or_else(|| EngineError::not_found("广播", notification_id))?;

        let delivery_stats = self.tracking.count_by_channel_status(notification_id).await?;
        let read_stats = self.inbox.read_stats(notification_id).await?;
        let hourly_engagement = self.tracking.hourly_engagement(notification_id).await?;

        let total_sent = notification.total_sent();
        let clicked: i64 = delivery_stats
            .iter()
            .filter(|c| c.status == DeliveryStatus::Clicked)
            .map(|c| c.count)
            .sum();

        Ok(NotificationStats {
            delivery_rate: rate(total_sent, i64::from(notification.total_targets)),
            open_rate: rate(read_stats.read, i64::from(notification.in_app_created)),
            click_rate: rate(clicked, total_sent),
            notification: NotificationSummary::from(&notification),
            delivery_stats,
            read_stats,
            total_sent,
            hourly_engagement,
        })
    }

    #[instrument(skip(self))]
    pub async fn fleet(&self, range: &AnalyticsRange) -> Result<FleetStats> {
        let counts = self.tracking.count_in_range(range).await?;

        let mut per_notification: BTreeMap<Uuid, NotificationTotals> = BTreeMap::new();
        let mut stats = FleetStats::default();

        for row in counts {
            let totals = per_notification
                .entry(row.notification_id)
                .or_insert_with(|| NotificationTotals {
                    notification_id: row.notification_id,
                    ..Default::default()
                });
            totals.total += row.count;
            *totals.by_channel.entry(row.channel).or_default() += row.count;
            *totals.by_status.entry(row.status).or_default() += row.count;

            stats.total += row.count;
            match row.status {
                DeliveryStatus::Failed => stats.failed += row.count,
                DeliveryStatus::Queued => {}
                DeliveryStatus::Sent => stats.delivered += row.count,
                DeliveryStatus::Opened => {
                    stats.delivered += row.count;
                    stats.opened += row.count;
                }
                DeliveryStatus::Clicked => {
                    stats.delivered += row.count;
                    stats.clicked += row.count;
                }
            }
        }

        stats.delivery_rate = rate(stats.delivered, stats.total);
        stats.open_rate = rate(stats.opened + stats.clicked, stats.delivered);
        stats.click_rate = rate(stats.clicked, stats.delivered);
        stats.notifications = per_notification.into_values().collect();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationStatusCount;
    use crate::repository::{
        MockBroadcastRepositoryTrait, MockDeliveryTrackingRepositoryTrait,
        MockInboxRepositoryTrait,
    };

    #[test]
    fn test_rate_rounding_and_zero_denominator() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(5, 0), 0.0);
        assert_eq!(rate(10, 10), 100.0);
    }

    #[tokio::test]
    async fn test_stats_for_missing_notification() {
        let mut broadcasts = MockBroadcastRepositoryTrait::new();
        broadcasts.expect_get().returning(|_| Ok(None));

        let aggregator = AnalyticsAggregator::new(
            Arc::new(broadcasts),
            Arc::new(MockDeliveryTrackingRepositoryTrait::new()),
            Arc::new(MockInboxRepositoryTrait::new()),
        );

        let result = aggregator.stats_for(Uuid::new_v4()).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_fleet_groups_by_notification() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut tracking = MockDeliveryTrackingRepositoryTrait::new();
        tracking.expect_count_in_range().returning(move |_| {
            Ok(vec![
                NotificationStatusCount {
                    notification_id: a,
                    channel: Channel::InApp,
                    status: DeliveryStatus::Sent,
                    count: 6,
                },
                NotificationStatusCount {
                    notification_id: a,
                    channel: Channel::InApp,
                    status: DeliveryStatus::Clicked,
                    count: 2,
                },
                NotificationStatusCount {
                    notification_id: b,
                    channel: Channel::Email,
                    status: DeliveryStatus::Failed,
                    count: 2,
                },
            ])
        });

        let aggregator = AnalyticsAggregator::new(
            Arc::new(MockBroadcastRepositoryTrait::new()),
            Arc::new(tracking),
            Arc::new(MockInboxRepositoryTrait::new()),
        );

        let stats = aggregator.fleet(&AnalyticsRange::default()).await.unwrap();

        assert_eq!(stats.total, 10);
        assert_eq!(stats.delivered, 8);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivery_rate, 80.0);
        assert_eq!(stats.click_rate, 25.0);
        assert_eq!(stats.notifications.len(), 2);

        let totals_a = stats
            .notifications
            .iter()
            .find(|t| t.notification_id == a)
            .unwrap();
        assert_eq!(totals_a.total, 8);
        assert_eq!(totals_a.by_channel[&Channel::InApp], 8);
        assert_eq!(totals_a.by_status[&DeliveryStatus::Clicked], 2);
    }
}
