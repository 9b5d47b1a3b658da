//! 推送设备注册

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{EngineError, Result};
use crate::models::{NewPushToken, PushToken};
use crate::repository::PushTokenRepositoryTrait;

/// token 最大长度
const MAX_TOKEN_LEN: usize = 4096;

pub struct DeviceRegistry {
    tokens: Arc<dyn PushTokenRepositoryTrait>,
}

impl DeviceRegistry {
    pub fn new(tokens: Arc<dyn PushTokenRepositoryTrait>) -> Self {
        Self { tokens }
    }

    /// 注册设备，同一 token 重复注册会刷新 last_used 并归属到当前用户
    #[instrument(skip(self, request), fields(platform = ?request.platform))]
    pub async fn register(&self, user_id: &str, mut request: NewPushToken) -> Result<PushToken> {
        request.token = request.token.trim().to_string();
        if request.token.is_empty() {
            return Err(EngineError::Validation("设备 token 不能为空".to_string()));
        }
        if request.token.len() > MAX_TOKEN_LEN {
            return Err(EngineError::Validation("设备 token 过长".to_string()));
        }

        let token = self.tokens.register(user_id, &request, Utc::now()).await?;
        info!(user_id, token_id = %token.id, "推送设备已注册");
        Ok(token)
    }

    /// 注销设备，`token` 为 None 时注销该用户全部设备
    #[instrument(skip(self, token))]
    pub async fn remove(&self, user_id: &str, token: Option<String>) -> Result<u64> {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let removed = self.tokens.remove(user_id, token).await?;
        info!(user_id, removed, "推送设备已注销");
        Ok(removed)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<PushToken>> {
        self.tokens.list_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DevicePlatform;
    use crate::repository::MockPushTokenRepositoryTrait;
    use uuid::Uuid;

    fn request(token: &str) -> NewPushToken {
        NewPushToken {
            token: token.to_string(),
            platform: DevicePlatform::Android,
            device_id: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_blank_token() {
        let mut repo = MockPushTokenRepositoryTrait::new();
        repo.expect_register().never();

        let registry = DeviceRegistry::new(Arc::new(repo));
        let result = registry.register("u1", request("   ")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_trims_token() {
        let mut repo = MockPushTokenRepositoryTrait::new();
        repo.expect_register()
            .withf(|user, req, _| user == "u1" && req.token == "tok-1")
            .times(1)
            .returning(|user, req, at| {
                Ok(PushToken {
                    id: Uuid::new_v4(),
                    user_id: user.to_string(),
                    token: req.token.clone(),
                    platform: req.platform,
                    device_id: None,
                    user_agent: None,
                    last_used: at,
                    created_at: at,
                })
            });

        let registry = DeviceRegistry::new(Arc::new(repo));
        let token = registry.register("u1", request(" tok-1 ")).await.unwrap();
        assert_eq!(token.token, "tok-1");
    }

    #[tokio::test]
    async fn test_remove_blank_token_removes_all() {
        let mut repo = MockPushTokenRepositoryTrait::new();
        repo.expect_remove()
            .withf(|user, token| user == "u1" && token.is_none())
            .times(1)
            .returning(|_, _| Ok(3));

        let registry = DeviceRegistry::new(Arc::new(repo));
        assert_eq!(registry.remove("u1", Some(String::new())).await.unwrap(), 3);
    }
}
