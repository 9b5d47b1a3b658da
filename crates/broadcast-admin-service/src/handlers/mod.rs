//! HTTP 请求处理器
//!
//! 处理器只负责参数提取与响应组装，业务逻辑在广播引擎中

pub mod analytics;
pub mod broadcast;
pub mod email_template;
pub mod feed;
pub mod push_token;
