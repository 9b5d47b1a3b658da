//! 投递追踪记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::{Channel, DeliveryStatus};

/// 投递追踪行，每个 (广播, 用户, 渠道) 唯一一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTracking {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub user_id: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    /// 邮件渠道的收件地址快照
    pub email: Option<String>,
    /// 推送渠道成功送达的设备 token 快照
    pub device_token: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 预置投递行（queued）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSeed {
    pub user_id: String,
    pub channel: Channel,
    pub email: Option<String>,
}

/// 状态更新指令
///
/// 仓储只在当前状态属于 `status.predecessors()` 时才应用更新
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(status: DeliveryStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            error: None,
            at,
        }
    }

    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
            at,
        }
    }
}

/// 渠道 × 状态 计数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusCount {
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub count: i64,
}

/// 全局统计的分组行
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NotificationStatusCount {
    pub notification_id: Uuid,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub count: i64,
}

/// 按小时聚合的互动数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HourlyEngagement {
    pub hour: DateTime<Utc>,
    pub opened: i64,
    pub clicked: i64,
}

/// 全局统计查询范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRange {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub channel: Option<Channel>,
}

impl AnalyticsRange {
    pub fn contains(&self, row: &DeliveryTracking) -> bool {
        self.start_date.is_none_or(|start| row.created_at >= start)
            && self.end_date.is_none_or(|end| row.created_at <= end)
            && self.channel.is_none_or(|channel| row.channel == channel)
    }
}
