//! 响应 DTO 定义

use broadcast_engine::models::{BroadcastStatus, Notification, SendMode, TargetMode};
use broadcast_engine::{DispatchReceipt, ScheduledReceipt, SubmitOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }
}

/// 广播提交响应
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    Dispatched(DispatchReceipt),
    Scheduled(ScheduledReceipt),
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Dispatched(receipt) => Self::Dispatched(receipt),
            SubmitOutcome::Scheduled(receipt) => Self::Scheduled(receipt),
        }
    }
}

/// 排期广播列表项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBroadcastDto {
    pub id: Uuid,
    pub title: String,
    pub target: TargetMode,
    pub send_mode: SendMode,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: BroadcastStatus,
    pub total_targets: i32,
    pub send_in_app: bool,
    pub send_email: bool,
    pub send_push: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for ScheduledBroadcastDto {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            title: n.title,
            target: n.target,
            send_mode: n.send_mode,
            scheduled_at: n.scheduled_at,
            status: n.status,
            total_targets: n.total_targets,
            send_in_app: n.send_in_app,
            send_email: n.send_email,
            send_push: n.send_push,
            created_by: n.created_by,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountDto {
    pub unread_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadDto {
    pub updated: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedDto {
    pub removed: u64,
}
