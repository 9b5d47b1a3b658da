//! 广播投递引擎
//!
//! 管理员向全部用户、指定用户或单个用户发送通知，按站内信、推送、邮件三个渠道投递，
//! 记录每个 (用户, 渠道) 的投递状态，并支持排期发送与取消。
//!
//! ## 核心功能
//!
//! - **广播提交**：校验请求、解析受众、预置投递追踪行后立即投递或进入排期
//! - **渠道投递**：站内信与推送同步完成，邮件由后台任务分批发送
//! - **投递追踪**：queued → sent / failed → opened → clicked 单调推进
//! - **排期调度**：轮询到期广播，以条件更新认领，保证只触发一次
//! - **用户收件箱**：分页列表、未读数、已读与点击追踪
//! - **统计分析**：单个广播与全局的送达率、打开率、点击率
//! - **数据保留**：定期清理过期广播与历史追踪记录
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `validation`: 广播请求校验
//! - `audience`: 受众解析
//! - `repository`: 仓储层（Postgres 与内存实现）
//! - `tracker`: 投递追踪
//! - `template`: 邮件模板渲染
//! - `channels`: 推送与邮件传输
//! - `dispatch`: 各渠道投递器
//! - `jobs`: 邮件后台任务队列
//! - `service`: 广播编排服务
//! - `scheduler`: 排期广播调度
//! - `cleanup`: 数据保留清理
//! - `feed`: 用户收件箱
//! - `devices`: 推送设备注册
//! - `email_templates`: 邮件模板管理
//! - `analytics`: 投递统计

pub mod analytics;
pub mod audience;
pub mod channels;
pub mod cleanup;
pub mod devices;
pub mod dispatch;
pub mod email_templates;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod template;
pub mod tracker;
pub mod validation;

pub use analytics::{AnalyticsAggregator, FleetStats, NotificationStats, NotificationTotals};
pub use audience::{AudienceResolver, AudienceTarget};
pub use channels::{
    EmailMessage, EmailTransport, PushMessage, PushTransport, TokenOutcome, TokenResult,
    build_email_transport, build_push_transport,
};
pub use cleanup::{CleanupReport, RetentionCleaner};
pub use devices::DeviceRegistry;
pub use dispatch::{ChannelOutcome, EmailDispatcher, EmailJob, EmailOutcome};
pub use email_templates::EmailTemplateService;
pub use error::{EngineError, Result};
pub use feed::{ClickResult, FeedPage, UserFeedService};
pub use jobs::DispatchQueue;
pub use models::*;
pub use repository::{BroadcastStores, InMemoryStore};
pub use scheduler::{BroadcastScheduler, TickReport};
pub use service::{
    BroadcastService, DispatchReceipt, ScheduledReceipt, SubmitOutcome, Transports,
};
pub use template::{EmailRenderer, TemplateContext, TemplateEngine};
pub use tracker::DeliveryTracker;
pub use validation::{BroadcastContent, BroadcastRequest, CallToAction, ValidatedBroadcast};
