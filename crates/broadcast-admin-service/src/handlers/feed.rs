//! 用户收件箱 API
//!
//! 所有操作都以 Token 中的 `sub` 作为当前用户

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use broadcast_engine::{ClickResult, FeedPage};
use uuid::Uuid;

use crate::auth::Claims;
use crate::dto::{ApiResponse, ClickParams, FeedParams, MarkAllReadDto, UnreadCountDto};
use crate::error::Result;
use crate::state::AppState;

/// 收件箱列表
///
/// GET /api/user/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<FeedParams>,
) -> Result<Json<ApiResponse<FeedPage>>> {
    let page = state.feed.list(&claims.sub, params.into()).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 未读数
///
/// GET /api/user/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<UnreadCountDto>>> {
    let unread_count = state.feed.unread_count(&claims.sub).await?;
    Ok(Json(ApiResponse::success(UnreadCountDto { unread_count })))
}

/// 标记单条已读
///
/// PATCH /api/user/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.feed.mark_read(&claims.sub, id).await?;
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 全部标记已读
///
/// PATCH /api/user/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<MarkAllReadDto>>> {
    let updated = state.feed.mark_all_read(&claims.sub).await?;
    Ok(Json(ApiResponse::success(MarkAllReadDto { updated })))
}

/// 点击追踪
///
/// GET /api/user/notifications/{notificationId}/click?redirect=true
///
/// `redirect=true` 且有 CTA 地址时返回 303，否则返回 JSON
pub async fn track_click(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
    Query(params): Query<ClickParams>,
) -> Result<Response> {
    let result: ClickResult = state.feed.track_click(&claims.sub, notification_id).await?;

    if params.redirect
        && let Some(url) = result.cta_url.as_deref()
    {
        return Ok(Redirect::to(url).into_response());
    }
    Ok(Json(ApiResponse::success(result)).into_response())
}
