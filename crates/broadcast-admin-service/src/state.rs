//! 应用状态定义
//!
//! 包含 Axum 路由共享的引擎服务、幂等键存储与 JWT 管理器

use std::sync::Arc;

use broadcast_engine::repository::BroadcastStores;
use broadcast_engine::{
    AnalyticsAggregator, BroadcastService, DeliveryTracker, DeviceRegistry, EmailTemplateService,
    UserFeedService,
};
use broadcast_shared::cache::KeyedStore;

use crate::auth::JwtManager;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub broadcasts: Arc<BroadcastService>,
    pub feed: Arc<UserFeedService>,
    pub devices: Arc<DeviceRegistry>,
    pub templates: Arc<EmailTemplateService>,
    pub analytics: Arc<AnalyticsAggregator>,
    /// 提交幂等键存储
    pub idempotency: Arc<dyn KeyedStore>,
    pub jwt_manager: Arc<JwtManager>,
}

impl AppState {
    /// 由仓储组装各服务，`broadcasts` 与调度器共享同一实例
    pub fn new(
        stores: &BroadcastStores,
        broadcasts: Arc<BroadcastService>,
        idempotency: Arc<dyn KeyedStore>,
        jwt_manager: JwtManager,
    ) -> Self {
        let tracker = Arc::new(DeliveryTracker::new(stores.tracking.clone()));

        Self {
            broadcasts,
            feed: Arc::new(UserFeedService::new(
                stores.inbox.clone(),
                stores.broadcasts.clone(),
                tracker,
            )),
            devices: Arc::new(DeviceRegistry::new(stores.push_tokens.clone())),
            templates: Arc::new(EmailTemplateService::new(stores.templates.clone())),
            analytics: Arc::new(AnalyticsAggregator::new(
                stores.broadcasts.clone(),
                stores.tracking.clone(),
                stores.inbox.clone(),
            )),
            idempotency,
            jwt_manager: Arc::new(jwt_manager),
        }
    }
}
