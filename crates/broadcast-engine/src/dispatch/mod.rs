//! 渠道投递
//!
//! - **InApp**: 批量写入收件箱，同步完成
//! - **Push**: 投递时读取设备 token，按批调用推送传输，同步完成
//! - **Email**: 分批发送并在批次之间等待，由后台任务执行
//!
//! 单个渠道的失败只会体现在该渠道的追踪行与计数上，不会中断其他渠道。

mod email;
mod in_app;
mod push;

pub use email::{EmailDispatcher, EmailJob, EmailOutcome};
pub use in_app::InAppDispatcher;
pub use push::PushDispatcher;

/// 同步渠道的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOutcome {
    /// 成功数：站内信为新增条目数，推送为成功的 token 数
    pub delivered: u64,
    /// 判定失败的用户数
    pub failed: u64,
}
