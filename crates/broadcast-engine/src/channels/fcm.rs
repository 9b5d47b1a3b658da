//! FCM HTTP v1 推送传输
//!
//! v1 接口每次请求只接受一个 token，批内的 token 并发发送。
//! 返回 404 或错误码 `UNREGISTERED` 的 token 视为已失效。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ChannelConfig, PushMessage, PushTransport, TokenOutcome, TokenResult};
use crate::error::{EngineError, Result};
use crate::models::Channel;

/// 响应体中保留的最大字符数
const MAX_ERROR_BODY: usize = 120;

pub struct FcmPushTransport {
    client: reqwest::Client,
    config: ChannelConfig,
    project_id: String,
}

impl FcmPushTransport {
    pub fn new(config: ChannelConfig, project_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("推送 HTTP 客户端创建失败: {}", e)))?;

        Ok(Self {
            client,
            config,
            project_id: project_id.into(),
        })
    }

    fn send_url(&self) -> String {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or("https://fcm.googleapis.com")
            .trim_end_matches('/');
        format!("{}/v1/projects/{}/messages:send", endpoint, self.project_id)
    }

    fn payload(token: &str, message: &PushMessage) -> Value {
        json!({
            "message": {
                "token": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        })
    }

    async fn send_one(&self, url: &str, access_token: &str, token: &str, message: &PushMessage) -> TokenResult {
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&Self::payload(token, message))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return TokenResult::failed(token, format!("请求失败: {}", e)),
        };

        let status = response.status();
        if status.is_success() {
            return TokenResult::delivered(token);
        }

        let body = response.text().await.unwrap_or_default();
        if is_unregistered(status, &body) {
            debug!(status = %status, "推送 token 已失效");
            return TokenResult::unregistered(token);
        }

        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        TokenResult::failed(token, format!("FCM 返回 {}: {}", status.as_u16(), snippet))
    }
}

/// 判断 FCM 错误是否表示 token 已失效
fn is_unregistered(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }

    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["details"].as_array().map(|details| {
                details
                    .iter()
                    .any(|d| d["errorCode"].as_str() == Some("UNREGISTERED"))
            })
        })
        .unwrap_or(false)
}

#[async_trait]
impl PushTransport for FcmPushTransport {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send_batch(&self, tokens: &[String], message: &PushMessage) -> Result<Vec<TokenResult>> {
        let access_token = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| EngineError::transport(Channel::Push, "缺少 FCM access token"))?;

        let start = Instant::now();
        let url = self.send_url();

        let results = join_all(
            tokens
                .iter()
                .map(|token| self.send_one(&url, access_token, token, message)),
        )
        .await;

        let failed = results
            .iter()
            .filter(|r| !matches!(r.outcome, TokenOutcome::Delivered))
            .count();
        if failed > 0 {
            warn!(total = tokens.len(), failed, "FCM 批次存在失败 token");
        }

        info!(
            total = tokens.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "FCM 批次发送完成"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_url() {
        let transport = FcmPushTransport::new(
            ChannelConfig::new(true).with_endpoint("https://fcm.example.com/"),
            "demo-project",
        )
        .unwrap();

        assert_eq!(
            transport.send_url(),
            "https://fcm.example.com/v1/projects/demo-project/messages:send"
        );
    }

    #[test]
    fn test_unregistered_detection() {
        assert!(is_unregistered(StatusCode::NOT_FOUND, ""));

        let body = r#"{"error":{"code":400,"details":[{"errorCode":"UNREGISTERED"}]}}"#;
        assert!(is_unregistered(StatusCode::BAD_REQUEST, body));

        let body = r#"{"error":{"code":400,"details":[{"errorCode":"INVALID_ARGUMENT"}]}}"#;
        assert!(!is_unregistered(StatusCode::BAD_REQUEST, body));
        assert!(!is_unregistered(StatusCode::INTERNAL_SERVER_ERROR, "oops"));
    }

    #[test]
    fn test_payload_shape() {
        let message = PushMessage {
            title: "标题".into(),
            body: "正文".into(),
            data: [("type".to_string(), "SYSTEM".to_string())].into(),
        };

        let payload = FcmPushTransport::payload("tok-1", &message);
        assert_eq!(payload["message"]["token"], "tok-1");
        assert_eq!(payload["message"]["notification"]["title"], "标题");
        assert_eq!(payload["message"]["data"]["type"], "SYSTEM");
    }

    #[tokio::test]
    async fn test_missing_access_token_fails_batch() {
        let transport =
            FcmPushTransport::new(ChannelConfig::new(true), "demo-project").unwrap();
        let message = PushMessage {
            title: "t".into(),
            body: "b".into(),
            data: Default::default(),
        };

        let result = transport.send_batch(&["tok".to_string()], &message).await;
        assert!(matches!(result, Err(EngineError::Transport { .. })));
    }
}
