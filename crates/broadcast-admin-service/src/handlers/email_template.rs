//! 邮件模板管理 API

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use broadcast_engine::models::{EmailTemplate, EmailTemplatePatch, NewEmailTemplate};
use tracing::info;
use uuid::Uuid;

use crate::auth::Claims;
use crate::dto::ApiResponse;
use crate::error::Result;
use crate::state::AppState;

/// 活跃模板列表
///
/// GET /api/admin/email-templates
pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<EmailTemplate>>>> {
    let templates = state.templates.list_active().await?;
    Ok(Json(ApiResponse::success(templates)))
}

/// 创建模板
///
/// POST /api/admin/email-templates
pub async fn create_template(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<NewEmailTemplate>,
) -> Result<Json<ApiResponse<EmailTemplate>>> {
    let template = state.templates.create(&claims.sub, request).await?;
    info!(admin_id = %claims.sub, template_id = %template.id, "邮件模板已创建");
    Ok(Json(ApiResponse::success(template)))
}

/// 模板详情
///
/// GET /api/admin/email-templates/{id}
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<EmailTemplate>>> {
    let template = state.templates.get(id).await?;
    Ok(Json(ApiResponse::success(template)))
}

/// 更新模板
///
/// PUT /api/admin/email-templates/{id}
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<EmailTemplatePatch>,
) -> Result<Json<ApiResponse<EmailTemplate>>> {
    let template = state.templates.update(id, patch).await?;
    Ok(Json(ApiResponse::success(template)))
}

/// 删除模板（软删除）
///
/// DELETE /api/admin/email-templates/{id}
pub async fn delete_template(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.templates.delete(id).await?;
    info!(admin_id = %claims.sub, template_id = %id, "邮件模板已删除");
    Ok(Json(ApiResponse::<()>::success_empty()))
}
