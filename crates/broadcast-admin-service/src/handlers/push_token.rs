//! 推送设备 API

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use broadcast_engine::models::{NewPushToken, PushToken};

use crate::auth::Claims;
use crate::dto::{ApiResponse, RemoveTokenParams, RemovedDto};
use crate::error::Result;
use crate::state::AppState;

/// 注册设备
///
/// POST /api/user/push-tokens
pub async fn register_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<NewPushToken>,
) -> Result<Json<ApiResponse<PushToken>>> {
    let token = state.devices.register(&claims.sub, request).await?;
    Ok(Json(ApiResponse::success(token)))
}

/// 注销设备
///
/// DELETE /api/user/push-tokens?token=
pub async fn remove_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<RemoveTokenParams>,
) -> Result<Json<ApiResponse<RemovedDto>>> {
    let removed = state.devices.remove(&claims.sub, params.token).await?;
    Ok(Json(ApiResponse::success(RemovedDto { removed })))
}

/// 当前用户的设备列表
///
/// GET /api/user/push-tokens
pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Vec<PushToken>>>> {
    let tokens = state.devices.list(&claims.sub).await?;
    Ok(Json(ApiResponse::success(tokens)))
}
