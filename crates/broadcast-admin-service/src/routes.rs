//! 路由配置模块
//!
//! 管理端挂载在 /api/admin（需要 admin 角色），用户端挂载在 /api/user

use axum::{
    Json, Router, middleware,
    routing::{get, patch, post, put},
};
use serde_json::{Value, json};

use crate::middleware::{auth_middleware, require_admin};
use crate::{handlers, state::AppState};

/// 管理端路由
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/broadcasts",
            post(handlers::broadcast::submit_broadcast),
        )
        .route(
            "/broadcasts/scheduled",
            get(handlers::broadcast::list_scheduled),
        )
        .route(
            "/broadcasts/analytics",
            get(handlers::analytics::fleet_stats),
        )
        .route("/broadcasts/{id}", get(handlers::broadcast::get_broadcast))
        .route(
            "/broadcasts/{id}/cancel",
            post(handlers::broadcast::cancel_broadcast),
        )
        .route(
            "/broadcasts/{id}/analytics",
            get(handlers::analytics::notification_stats),
        )
        .route(
            "/email-templates",
            get(handlers::email_template::list_templates)
                .post(handlers::email_template::create_template),
        )
        .route(
            "/email-templates/{id}",
            put(handlers::email_template::update_template)
                .get(handlers::email_template::get_template)
                .delete(handlers::email_template::delete_template),
        )
        .layer(middleware::from_fn(require_admin))
}

/// 用户端路由
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications",
            get(handlers::feed::list_notifications),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::feed::unread_count),
        )
        .route(
            "/notifications/read-all",
            patch(handlers::feed::mark_all_read),
        )
        .route(
            "/notifications/{id}/read",
            patch(handlers::feed::mark_read),
        )
        .route(
            "/notifications/{id}/click",
            get(handlers::feed::track_click),
        )
        .route(
            "/push-tokens",
            get(handlers::push_token::list_tokens)
                .post(handlers::push_token::register_token)
                .delete(handlers::push_token::remove_token),
        )
}

/// 完整的 API 路由（不含就绪探针），认证中间件作用于全部路由
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/admin", admin_routes())
        .nest("/api/user", user_routes())
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

/// 存活探针
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "broadcast-admin-service"
    }))
}
