//! JWT 认证中间件
//!
//! 验证请求中的 Bearer Token 并将 Claims 注入请求扩展

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::Claims;
use crate::state::AppState;

/// 公开路由（探针）
const PUBLIC_PATHS: [&str; 2] = ["/health", "/ready"];

/// 认证中间件
///
/// 从 Authorization header 中提取 Bearer Token，验证后将 Claims 注入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.iter().any(|p| path == *p) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return reject(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "缺少认证 Token");
    };

    match state.jwt_manager.verify_token(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => reject(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", &e.to_string()),
    }
}

/// 管理员角色检查，需位于 `auth_middleware` 之后
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<Claims>() {
        Some(claims) if claims.is_admin() => next.run(request).await,
        Some(_) => reject(StatusCode::FORBIDDEN, "FORBIDDEN", "需要管理员权限"),
        None => reject(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "未认证"),
    }
}

fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "success": false,
        "code": code,
        "message": message,
        "data": null
    });

    (status, axum::Json(body)).into_response()
}
