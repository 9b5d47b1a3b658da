//! 数据库仓储层
//!
//! 提供广播、投递追踪、收件箱、用户目录、推送设备与邮件模板的数据访问接口。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行数据库操作，内存实现用于测试与本地开发
//! - 状态迁移与计数更新以单条条件 SQL 完成
//! - 定义 trait 接口以支持 mock 测试

mod broadcast_repo;
mod directory_repo;
mod inbox_repo;
mod memory;
mod template_repo;
mod tracking_repo;
mod traits;

use std::sync::Arc;

use sqlx::PgPool;

pub use broadcast_repo::BroadcastRepository;
pub use directory_repo::{PushTokenRepository, UserDirectory};
pub use inbox_repo::InboxRepository;
pub use memory::InMemoryStore;
pub use template_repo::EmailTemplateRepository;
pub use tracking_repo::DeliveryTrackingRepository;
pub use traits::*;

/// 引擎使用的全部仓储
#[derive(Clone)]
pub struct BroadcastStores {
    pub broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    pub tracking: Arc<dyn DeliveryTrackingRepositoryTrait>,
    pub inbox: Arc<dyn InboxRepositoryTrait>,
    pub users: Arc<dyn UserDirectoryTrait>,
    pub push_tokens: Arc<dyn PushTokenRepositoryTrait>,
    pub templates: Arc<dyn EmailTemplateRepositoryTrait>,
}

impl BroadcastStores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            broadcasts: Arc::new(BroadcastRepository::new(pool.clone())),
            tracking: Arc::new(DeliveryTrackingRepository::new(pool.clone())),
            inbox: Arc::new(InboxRepository::new(pool.clone())),
            users: Arc::new(UserDirectory::new(pool.clone())),
            push_tokens: Arc::new(PushTokenRepository::new(pool.clone())),
            templates: Arc::new(EmailTemplateRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            broadcasts: store.clone(),
            tracking: store.clone(),
            inbox: store.clone(),
            users: store.clone(),
            push_tokens: store.clone(),
            templates: store,
        }
    }
}
