//! 广播管理服务
//!
//! 提供广播提交、排期管理、投递统计、邮件模板以及用户收件箱与推送设备的 REST API。
//!
//! ## 模块结构
//!
//! - `auth`: JWT Token 生成与验证
//! - `middleware`: 认证与管理员角色检查
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: 错误类型与响应映射
//! - `handlers`: HTTP 请求处理器
//! - `routes`: 路由配置
//! - `state`: 应用状态
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 认证：jsonwebtoken
//! - 序列化：serde (camelCase)

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use dto::{ApiResponse, SubmitResponse};
pub use error::{AdminError, Result};
pub use state::AppState;
