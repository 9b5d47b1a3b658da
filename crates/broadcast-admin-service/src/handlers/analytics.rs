//! 投递统计 API

use axum::{
    Json,
    extract::{Path, Query, State},
};
use broadcast_engine::models::AnalyticsRange;
use broadcast_engine::{FleetStats, NotificationStats};
use uuid::Uuid;

use crate::dto::ApiResponse;
use crate::error::Result;
use crate::state::AppState;

/// 单个广播的投递统计
///
/// GET /api/admin/broadcasts/{id}/analytics
pub async fn notification_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<NotificationStats>>> {
    let stats = state.analytics.stats_for(id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// 全局投递统计
///
/// GET /api/admin/broadcasts/analytics?startDate=&endDate=&channel=
pub async fn fleet_stats(
    State(state): State<AppState>,
    Query(range): Query<AnalyticsRange>,
) -> Result<Json<ApiResponse<FleetStats>>> {
    let stats = state.analytics.fleet(&range).await?;
    Ok(Json(ApiResponse::success(stats)))
}
