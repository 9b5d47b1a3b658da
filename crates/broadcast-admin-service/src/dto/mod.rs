//! 数据传输对象
//!
//! 请求体与查询参数在 `request`，统一响应信封与响应体在 `response`

mod request;
mod response;

pub use request::*;
pub use response::*;
