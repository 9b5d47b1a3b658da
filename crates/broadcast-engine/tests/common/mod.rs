//! 集成测试公共设施
//!
//! 基于内存存储与脚本化传输组装完整的广播服务，无需数据库与外部网关。

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use broadcast_engine::channels::{
    EmailMessage, EmailTransport, PushMessage, PushTransport, TokenResult,
};
use broadcast_engine::repository::{BroadcastStores, InMemoryStore, PushTokenRepositoryTrait};
use broadcast_engine::{
    BroadcastRequest, BroadcastService, EngineError, NewPushToken, Recipient, Transports,
    UserFeedService, DeliveryTracker,
};
use broadcast_engine::models::{Channel, DevicePlatform};
use broadcast_shared::config::DispatchConfig;
use chrono::Utc;
use fake::Fake;
use fake::faker::name::en::Name;
use parking_lot::Mutex;
use serde_json::Value;

/// 推送传输：记录每次调用，指定的 token 返回失败或已注销
#[derive(Default)]
pub struct ScriptedPush {
    pub failing: HashSet<String>,
    pub unregistered: HashSet<String>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedPush {
    pub fn sent_tokens(&self) -> Vec<String> {
        self.calls.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl PushTransport for ScriptedPush {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send_batch(
        &self,
        tokens: &[String],
        _message: &PushMessage,
    ) -> broadcast_engine::Result<Vec<TokenResult>> {
        self.calls.lock().push(tokens.to_vec());
        Ok(tokens
            .iter()
            .map(|t| {
                if self.unregistered.contains(t) {
                    TokenResult::unregistered(t.clone())
                } else if self.failing.contains(t) {
                    TokenResult::failed(t.clone(), "gateway rejected")
                } else {
                    TokenResult::delivered(t.clone())
                }
            })
            .collect())
    }
}

/// 邮件传输：记录已发送的邮件，指定地址发送失败
#[derive(Default)]
pub struct ScriptedEmail {
    pub failing: HashSet<String>,
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl ScriptedEmail {
    pub fn failing(addresses: &[&str]) -> Self {
        Self {
            failing: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn sent_to(&self) -> Vec<String> {
        let mut to: Vec<String> = self.sent.lock().iter().map(|m| m.to.clone()).collect();
        to.sort();
        to
    }
}

#[async_trait]
impl EmailTransport for ScriptedEmail {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, message: &EmailMessage) -> broadcast_engine::Result<()> {
        if self.failing.contains(&message.to) {
            return Err(EngineError::transport(Channel::Email, "mailbox unavailable"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub stores: BroadcastStores,
    pub push: Arc<ScriptedPush>,
    pub email: Arc<ScriptedEmail>,
    pub service: Arc<BroadcastService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transports(ScriptedPush::default(), ScriptedEmail::default())
    }

    pub fn with_transports(push: ScriptedPush, email: ScriptedEmail) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let stores = BroadcastStores::in_memory(store.clone());
        let push = Arc::new(push);
        let email = Arc::new(email);

        let config = DispatchConfig {
            email_batch_size: 2,
            email_batch_delay_ms: 5,
            ..Default::default()
        };
        let service = Arc::new(BroadcastService::new(
            stores.clone(),
            Transports {
                push: push.clone(),
                email: email.clone(),
            },
            &config,
        ));

        Self {
            store,
            stores,
            push,
            email,
            service,
        }
    }

    /// 添加 u1..=un，邮箱为 u{i}@example.com 且已订阅
    pub fn add_users(&self, n: usize) {
        for i in 1..=n {
            self.store.add_user(user(&format!("u{}", i)));
        }
    }

    pub async fn register_device(&self, user_id: &str, token: &str) {
        let request = NewPushToken {
            token: token.to_string(),
            platform: DevicePlatform::Android,
            device_id: None,
            user_agent: None,
        };
        PushTokenRepositoryTrait::register(self.store.as_ref(), user_id, &request, Utc::now())
            .await
            .expect("注册设备失败");
    }

    pub fn feed(&self) -> UserFeedService {
        UserFeedService::new(
            self.stores.inbox.clone(),
            self.stores.broadcasts.clone(),
            Arc::new(DeliveryTracker::new(self.stores.tracking.clone())),
        )
    }
}

pub fn user(id: &str) -> Recipient {
    Recipient {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        email_subscribed: true,
        name: Some(Name().fake()),
    }
}

/// 以 JSON 构造提交请求，字段与管理端接口一致
pub fn request(value: Value) -> BroadcastRequest {
    serde_json::from_value(value).expect("请求格式错误")
}
