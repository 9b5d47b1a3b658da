//! 广播引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 广播生命周期状态
///
/// ```text
/// DRAFT → (SCHEDULED | PROCESSING) → SENDING → {COMPLETED | PARTIAL | FAILED}
/// SCHEDULED → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    /// 草稿
    #[default]
    Draft,
    /// 已排期，等待调度器认领
    Scheduled,
    /// 受众已解析，快速渠道即将投递
    Processing,
    /// 邮件渠道在后台发送中
    Sending,
    Completed,
    /// 邮件部分成功部分失败
    Partial,
    Failed,
    /// 排期期间被管理员取消
    Cancelled,
}

impl BroadcastStatus {
    /// 终态集合，清理任务按此删除过期广播
    pub const TERMINAL: [BroadcastStatus; 4] = [
        BroadcastStatus::Completed,
        BroadcastStatus::Partial,
        BroadcastStatus::Failed,
        BroadcastStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// 根据邮件投递结果计算最终状态
    ///
    /// 失败数为 0 时为 COMPLETED（包括没有可投递邮箱的情况），
    /// 成功与失败都大于 0 时为 PARTIAL，成功数为 0 且有失败时为 FAILED。
    pub fn from_email_outcome(success: u64, failure: u64) -> Self {
        match (success, failure) {
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Processing => "PROCESSING",
            Self::Sending => "SENDING",
            Self::Completed => "COMPLETED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条投递记录状态
///
/// 只能前进：queued → sent → {opened | clicked}，或 queued → failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Queued,
    Sent,
    Failed,
    Opened,
    Clicked,
}

impl DeliveryStatus {
    /// 允许迁移到当前状态的前驱状态
    pub fn predecessors(&self) -> &'static [DeliveryStatus] {
        match self {
            Self::Queued => &[],
            Self::Sent | Self::Failed => &[Self::Queued],
            Self::Opened => &[Self::Sent],
            Self::Clicked => &[Self::Sent, Self::Opened],
        }
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        next.predecessors().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
        }
    }

    /// 是否已送达（包括后续的打开、点击）
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Sent | Self::Opened | Self::Clicked)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Push,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Push => "push",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    #[default]
    System,
    Security,
    Announcement,
    Marketing,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Security => "SECURITY",
            Self::Announcement => "ANNOUNCEMENT",
            Self::Marketing => "MARKETING",
        }
    }
}

/// 通知优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

/// 受众模式
///
/// 请求中也接受简写 ALL / SELECTED / SINGLE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetMode {
    #[serde(alias = "ALL")]
    AllUsers,
    #[serde(alias = "SELECTED")]
    SelectedUsers,
    #[serde(alias = "SINGLE")]
    SingleUser,
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllUsers => "ALL_USERS",
            Self::SelectedUsers => "SELECTED_USERS",
            Self::SingleUser => "SINGLE_USER",
        }
    }
}

/// 发送模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendMode {
    #[default]
    Now,
    Later,
}

impl SendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Now => "NOW",
            Self::Later => "LATER",
        }
    }
}

/// 设备平台
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevicePlatform {
    #[default]
    Web,
    Android,
    Ios,
}

/// 邮件模板类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateKind {
    #[default]
    Generic,
    System,
    Security,
    Announcement,
    Marketing,
}
