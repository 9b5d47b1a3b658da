//! 用户站内信收件箱

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::{NotificationKind, Priority};

/// 收件箱条目，每个 (用户, 广播) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    pub id: Uuid,
    pub user_id: String,
    pub notification_id: Uuid,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 收件箱条目与广播内容的联合视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub banner_url: Option<String>,
    pub cta_label: Option<String>,
    pub cta_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 收件箱查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub kind: Option<NotificationKind>,
    pub priority: Option<Priority>,
    pub unread_only: bool,
    pub page: i64,
    pub limit: i64,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            kind: None,
            priority: None,
            unread_only: false,
            page: 1,
            limit: 20,
        }
    }
}

impl FeedQuery {
    /// 页码从 1 开始，每页最多 100 条
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, 100);
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit
    }
}

/// 单个广播的已读统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadStats {
    pub read: i64,
    pub unread: i64,
}
