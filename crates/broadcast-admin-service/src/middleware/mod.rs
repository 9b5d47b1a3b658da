//! 中间件模块
//!
//! 提供 JWT 认证与管理员角色检查

mod auth;

pub use auth::{auth_middleware, require_admin};
