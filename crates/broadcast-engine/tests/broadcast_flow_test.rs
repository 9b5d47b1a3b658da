//! 立即发送流程集成测试
//!
//! 使用内存存储与脚本化传输，验证受众解析、各渠道投递与追踪状态。
//!
//! ```bash
//! cargo test -p broadcast-engine --test broadcast_flow_test
//! ```

mod common;

use broadcast_engine::models::{BroadcastStatus, Channel, DeliveryStatus};
use broadcast_engine::{DispatchReceipt, EngineError, SubmitOutcome};
use common::{Harness, ScriptedEmail, ScriptedPush, request, user};
use serde_json::json;

fn dispatched(outcome: SubmitOutcome) -> DispatchReceipt {
    match outcome {
        SubmitOutcome::Dispatched(receipt) => receipt,
        SubmitOutcome::Scheduled(r) => panic!("期望立即发送，实际进入排期: {:?}", r),
    }
}

#[tokio::test]
async fn test_all_users_in_app_completes() {
    let h = Harness::new();
    h.add_users(3);

    let outcome = h
        .service
        .submit(
            "admin",
            request(json!({
                "target": "ALL",
                "mode": "notification",
                "title": "系统维护",
                "message": "今晚 22:00 停机维护",
                "channels": { "inApp": true }
            })),
        )
        .await
        .unwrap();
    let receipt = dispatched(outcome);

    assert_eq!(receipt.status, BroadcastStatus::Completed);
    assert_eq!(receipt.total_users, 3);
    assert_eq!(receipt.in_app_created, 3);
    assert_eq!(receipt.email_queued, 0);
    assert!(receipt.completion.is_none());

    let stored = h.store.notification(receipt.notification_id).unwrap();
    assert_eq!(stored.status, BroadcastStatus::Completed);
    assert_eq!(stored.total_targets, 3);
    assert_eq!(stored.in_app_created, 3);
    assert!(stored.completed_at.is_some());

    let rows = h.store.tracking_rows(receipt.notification_id);
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|r| r.channel == Channel::InApp && r.status == DeliveryStatus::Sent));
    assert_eq!(h.store.inbox_rows(receipt.notification_id).len(), 3);
}

#[tokio::test]
async fn test_single_missing_user_writes_nothing() {
    let h = Harness::new();
    h.add_users(2);

    let result = h
        .service
        .submit(
            "admin",
            request(json!({
                "target": "SINGLE",
                "userIds": ["ghost"],
                "mode": "notification",
                "title": "hi",
                "message": "hello"
            })),
        )
        .await;

    assert!(matches!(result, Err(EngineError::NoRecipients)));
    assert_eq!(h.store.notification_count(), 0);
}

#[tokio::test]
async fn test_selected_users_skips_unknown_ids() {
    let h = Harness::new();
    h.add_users(3);
    h.store.deactivate_user("u3");

    let receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "SELECTED",
                    "userIds": ["u1", "u3", "nobody"],
                    "mode": "notification",
                    "title": "活动",
                    "message": "限时活动开始"
                })),
            )
            .await
            .unwrap(),
    );

    assert_eq!(receipt.total_users, 1);
    let rows = h.store.tracking_rows(receipt.notification_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, "u1");
}

#[tokio::test]
async fn test_validation_failure_writes_nothing() {
    let h = Harness::new();
    h.add_users(1);

    let result = h
        .service
        .submit(
            "admin",
            request(json!({
                "target": "ALL",
                "mode": "notification",
                "title": "t",
                "message": "m",
                "channels": { "inApp": false, "email": false, "push": false }
            })),
        )
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(h.store.notification_count(), 0);
}

#[tokio::test]
async fn test_email_partial_failure() {
    let h = Harness::with_transports(
        ScriptedPush::default(),
        ScriptedEmail::failing(&["u2@example.com"]),
    );
    h.add_users(3);

    let mut receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "ALL",
                    "mode": "email",
                    "subject": "月度报告",
                    "message": "本月数据已出炉",
                    "channels": { "email": true }
                })),
            )
            .await
            .unwrap(),
    );

    assert_eq!(receipt.status, BroadcastStatus::Sending);
    assert_eq!(receipt.email_queued, 3);

    let final_status = receipt.completion.take().unwrap().await.unwrap();
    assert_eq!(final_status, BroadcastStatus::Partial);

    let stored = h.store.notification(receipt.notification_id).unwrap();
    assert_eq!(stored.status, BroadcastStatus::Partial);
    assert_eq!(stored.email_sent, 2);
    assert_eq!(
        h.email.sent_to(),
        vec!["u1@example.com".to_string(), "u3@example.com".to_string()]
    );

    let rows = h.store.tracking_rows(receipt.notification_id);
    let failed = rows.iter().find(|r| r.user_id == "u2").unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.error_message.is_some());
    assert!(failed.failed_at.is_some());
}

#[tokio::test]
async fn test_email_skips_unsubscribed_users() {
    let h = Harness::new();
    h.add_users(1);
    let mut unsubscribed = user("u2");
    unsubscribed.email_subscribed = false;
    h.store.add_user(unsubscribed);

    let receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "ALL",
                    "mode": "email",
                    "subject": "通知",
                    "message": "内容",
                    "channels": { "inApp": true, "email": true }
                })),
            )
            .await
            .unwrap(),
    );
    assert_eq!(receipt.email_queued, 1);

    let rows = h.store.tracking_rows(receipt.notification_id);
    assert_eq!(rows.iter().filter(|r| r.channel == Channel::Email).count(), 1);
    assert_eq!(rows.iter().filter(|r| r.channel == Channel::InApp).count(), 2);
}

#[tokio::test]
async fn test_email_without_eligible_recipients_completes() {
    let h = Harness::new();
    let mut no_email = user("u1");
    no_email.email = None;
    h.store.add_user(no_email);

    let receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "ALL",
                    "mode": "email",
                    "subject": "通知",
                    "message": "内容",
                    "channels": { "inApp": true, "email": true }
                })),
            )
            .await
            .unwrap(),
    );

    assert_eq!(receipt.status, BroadcastStatus::Completed);
    assert!(receipt.completion.is_none());
    assert!(h.email.sent_to().is_empty());
}

#[tokio::test]
async fn test_push_per_device_outcomes() {
    let h = Harness::with_transports(
        ScriptedPush {
            unregistered: ["stale-token".to_string()].into_iter().collect(),
            ..Default::default()
        },
        ScriptedEmail::default(),
    );
    h.add_users(3);
    h.register_device("u1", "token-u1").await;
    h.register_device("u3", "stale-token").await;

    let receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "ALL",
                    "mode": "notification",
                    "title": "新消息",
                    "message": "你有一条新消息",
                    "channels": { "push": true }
                })),
            )
            .await
            .unwrap(),
    );

    assert_eq!(receipt.push_sent, 1);
    assert_eq!(receipt.status, BroadcastStatus::Completed);

    let rows = h.store.tracking_rows(receipt.notification_id);
    let by_user = |id: &str| rows.iter().find(|r| r.user_id == id).unwrap().clone();

    let u1 = by_user("u1");
    assert_eq!(u1.status, DeliveryStatus::Sent);
    assert_eq!(u1.device_token.as_deref(), Some("token-u1"));

    let u2 = by_user("u2");
    assert_eq!(u2.status, DeliveryStatus::Failed);
    assert_eq!(u2.error_message.as_deref(), Some("no registered device"));

    assert_eq!(by_user("u3").status, DeliveryStatus::Failed);
    assert!(h.store.push_tokens().iter().all(|t| t.token != "stale-token"));
}

#[tokio::test]
async fn test_in_app_failure_does_not_block_push() {
    let h = Harness::new();
    h.add_users(2);
    h.register_device("u1", "token-u1").await;
    h.register_device("u2", "token-u2").await;
    h.store.set_inbox_unavailable(true);

    let receipt = dispatched(
        h.service
            .submit(
                "admin",
                request(json!({
                    "target": "ALL",
                    "mode": "notification",
                    "title": "t",
                    "message": "m",
                    "channels": { "inApp": true, "push": true }
                })),
            )
            .await
            .unwrap(),
    );

    assert_eq!(receipt.in_app_created, 0);
    assert_eq!(receipt.push_sent, 2);

    let rows = h.store.tracking_rows(receipt.notification_id);
    assert!(rows
        .iter()
        .filter(|r| r.channel == Channel::InApp)
        .all(|r| r.status == DeliveryStatus::Failed));
    assert!(rows
        .iter()
        .filter(|r| r.channel == Channel::Push)
        .all(|r| r.status == DeliveryStatus::Sent));
}
