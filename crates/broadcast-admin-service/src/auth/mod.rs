//! 认证模块
//!
//! 提供 JWT Token 的生成与验证，Token 由统一认证中心签发

mod jwt;

pub use jwt::{ADMIN_ROLE, Claims, JwtConfig, JwtManager};
