//! 广播引擎数据模型

mod enums;
mod inbox;
mod notification;
mod recipient;
mod template;
mod tracking;

pub use enums::*;
pub use inbox::*;
pub use notification::*;
pub use recipient::*;
pub use template::*;
pub use tracking::*;
