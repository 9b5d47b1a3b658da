//! 广播管理 API
//!
//! 提交、排期列表、详情与取消

use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
};
use broadcast_engine::BroadcastRequest;
use broadcast_engine::models::Notification;
use broadcast_shared::cache::CacheKey;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::dto::{ApiResponse, ScheduledBroadcastDto, SubmitResponse};
use crate::error::{AdminError, Result};
use crate::state::AppState;

/// 幂等键请求头
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// 幂等键保留时间
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 提交广播
///
/// POST /api/admin/broadcasts
///
/// 携带 `Idempotency-Key` 时，同一管理员 24 小时内重复使用同一个 key 返回 409；
/// 写库前被拒绝的提交会释放 key 以便修正后重试。
pub async fn submit_broadcast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<ApiResponse<SubmitResponse>>> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| CacheKey::broadcast_idempotency(&claims.sub, v));

    if let Some(key) = &idempotency_key
        && !state
            .idempotency
            .set_nx(key, "pending", IDEMPOTENCY_TTL)
            .await?
    {
        return Err(AdminError::Conflict(
            "该 Idempotency-Key 已被使用".to_string(),
        ));
    }

    let outcome = match state.broadcasts.submit(&claims.sub, request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // 广播已写库后的失败保留幂等键，避免重试产生重复广播
            if e.is_rejection()
                && let Some(key) = &idempotency_key
                && let Err(release) = state.idempotency.delete(key).await
            {
                warn!(error = %release, "释放幂等键失败");
            }
            return Err(e.into());
        }
    };

    if let Some(key) = &idempotency_key {
        state
            .idempotency
            .set(key, &outcome.notification_id().to_string(), IDEMPOTENCY_TTL)
            .await?;
    }

    info!(
        admin_id = %claims.sub,
        notification_id = %outcome.notification_id(),
        status = %outcome.status(),
        "广播已提交"
    );

    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 排期广播列表
///
/// GET /api/admin/broadcasts/scheduled
pub async fn list_scheduled(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ScheduledBroadcastDto>>>> {
    let scheduled = state.broadcasts.list_scheduled().await?;
    Ok(Json(ApiResponse::success(
        scheduled.into_iter().map(Into::into).collect(),
    )))
}

/// 广播详情
///
/// GET /api/admin/broadcasts/{id}
pub async fn get_broadcast(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Notification>>> {
    let notification = state.broadcasts.get(id).await?;
    Ok(Json(ApiResponse::success(notification)))
}

/// 取消排期广播
///
/// POST /api/admin/broadcasts/{id}/cancel
pub async fn cancel_broadcast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScheduledBroadcastDto>>> {
    let cancelled = state.broadcasts.cancel(id).await?;
    info!(admin_id = %claims.sub, notification_id = %id, "排期广播已取消");
    Ok(Json(ApiResponse::success_with_message(
        cancelled.into(),
        "排期广播已取消",
    )))
}
