//! 外部协作方提供的用户与设备记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::DevicePlatform;

/// 受众解析结果中的单个用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub email: Option<String>,
    pub email_subscribed: bool,
    pub name: Option<String>,
}

impl Recipient {
    /// 邮箱有效且订阅了邮件
    pub fn email_eligible(&self) -> bool {
        self.email_subscribed && self.verified_email().is_some()
    }

    /// 非空且包含 `@` 的邮箱
    pub fn verified_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty() && e.contains('@'))
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("User")
    }
}

/// 已注册的推送设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub id: Uuid,
    pub user_id: String,
    pub token: String,
    pub platform: DevicePlatform,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 设备注册请求
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPushToken {
    pub token: String,
    #[serde(default)]
    pub platform: DevicePlatform,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(email: Option<&str>, subscribed: bool) -> Recipient {
        Recipient {
            id: "u1".into(),
            email: email.map(String::from),
            email_subscribed: subscribed,
            name: None,
        }
    }

    #[test]
    fn test_email_eligibility() {
        assert!(recipient(Some("a@b.com"), true).email_eligible());
        assert!(!recipient(Some("a@b.com"), false).email_eligible());
        assert!(!recipient(Some("not-an-address"), true).email_eligible());
        assert!(!recipient(Some("  "), true).email_eligible());
        assert!(!recipient(None, true).email_eligible());
    }

    #[test]
    fn test_display_name_defaults_to_user() {
        assert_eq!(recipient(None, true).display_name(), "User");
        let named = Recipient {
            name: Some("Alice".into()),
            ..recipient(None, true)
        };
        assert_eq!(named.display_name(), "Alice");
    }
}
