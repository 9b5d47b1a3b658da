//! 广播聚合

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::{BroadcastStatus, Channel, NotificationKind, Priority, SendMode, TargetMode};

/// 广播记录
///
/// 一次管理员提交对应一条记录，保存内容、渠道开关、排期、有效期、
/// 生命周期状态以及各渠道的聚合计数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub banner_url: Option<String>,
    pub cta_label: Option<String>,
    pub cta_url: Option<String>,
    pub target: TargetMode,
    /// SELECTED / SINGLE 模式下的显式用户列表，排期触发时据此重新解析受众
    pub target_user_ids: Json<Vec<String>>,
    /// SINGLE 模式下的目标用户
    pub user_id: Option<String>,
    pub send_in_app: bool,
    pub send_email: bool,
    pub send_push: bool,
    pub send_mode: SendMode,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expiry_days: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub email_subject: Option<String>,
    /// 邮件 HTML 模板正文
    pub email_template: Option<String>,
    pub email_template_id: Option<Uuid>,
    pub total_targets: i32,
    pub in_app_created: i32,
    pub push_sent: i32,
    pub email_sent: i32,
    pub status: BroadcastStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// 已选择的渠道
    pub fn channels(&self) -> ChannelSelection {
        ChannelSelection {
            in_app: self.send_in_app,
            email: self.send_email,
            push: self.send_push,
        }
    }

    /// 邮件主题，未设置时使用标题
    pub fn subject(&self) -> &str {
        self.email_subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.title)
    }

    /// 三个渠道的计数之和
    pub fn total_sent(&self) -> i64 {
        i64::from(self.in_app_created) + i64::from(self.push_sent) + i64::from(self.email_sent)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 渠道开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSelection {
    #[serde(default)]
    pub in_app: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub push: bool,
}

impl Default for ChannelSelection {
    /// 未提供渠道时只投递站内信
    fn default() -> Self {
        Self {
            in_app: true,
            email: false,
            push: false,
        }
    }
}

impl ChannelSelection {
    pub fn any(&self) -> bool {
        self.in_app || self.email || self.push
    }

    pub fn contains(&self, channel: Channel) -> bool {
        match channel {
            Channel::InApp => self.in_app,
            Channel::Push => self.push,
            Channel::Email => self.email,
        }
    }

    pub fn selected(&self) -> Vec<Channel> {
        [Channel::InApp, Channel::Push, Channel::Email]
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect()
    }
}

/// 渠道计数增量
///
/// 以增量方式写入，避免并发的读-改-写覆盖
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub in_app_created: i32,
    pub push_sent: i32,
    pub email_sent: i32,
}

impl ChannelCounters {
    pub fn is_empty(&self) -> bool {
        self.in_app_created == 0 && self.push_sent == 0 && self.email_sent == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_selection() {
        let channels = ChannelSelection {
            in_app: true,
            email: false,
            push: true,
        };
        assert!(channels.any());
        assert_eq!(channels.selected(), vec![Channel::InApp, Channel::Push]);

        let none = ChannelSelection {
            in_app: false,
            email: false,
            push: false,
        };
        assert!(!none.any());
    }

    #[test]
    fn test_channel_selection_default_is_in_app_only() {
        let channels = ChannelSelection::default();
        assert_eq!(channels.selected(), vec![Channel::InApp]);

        // 提供了对象但缺少字段时按 false 处理
        let parsed: ChannelSelection = serde_json::from_str(r#"{"email":true}"#).unwrap();
        assert_eq!(parsed.selected(), vec![Channel::Email]);
    }
}
