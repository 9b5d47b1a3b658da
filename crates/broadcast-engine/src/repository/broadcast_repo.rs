//! 广播记录仓储
//!
//! 状态迁移全部以条件 UPDATE 实现，认领与终态写入不依赖先读后写

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::tracking_repo::DeliveryTrackingRepository;
use super::traits::BroadcastRepositoryTrait;
use crate::error::Result;
use crate::models::{BroadcastStatus, ChannelCounters, Notification, TrackingSeed};

macro_rules! notification_columns {
    () => {
        r#"id, title, message, kind, priority, banner_url, cta_label, cta_url,
           target, target_user_ids, user_id, send_in_app, send_email, send_push,
           send_mode, scheduled_at, expiry_days, expires_at, email_subject,
           email_template, email_template_id, total_targets, in_app_created,
           push_sent, email_sent, status, created_by, created_at, updated_at,
           completed_at"#
    };
}

fn status_names(statuses: &[BroadcastStatus]) -> Vec<&'static str> {
    statuses.iter().map(BroadcastStatus::as_str).collect()
}

pub struct BroadcastRepository {
    pool: PgPool,
}

impl BroadcastRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BroadcastRepositoryTrait for BroadcastRepository {
    async fn create_with_tracking(
        &self,
        notification: &Notification,
        seeds: &[TrackingSeed],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(concat!(
            "INSERT INTO notifications (",
            notification_columns!(),
            r#")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)
            "#
        ))
        .bind(notification.id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind)
        .bind(notification.priority)
        .bind(&notification.banner_url)
        .bind(&notification.cta_label)
        .bind(&notification.cta_url)
        .bind(notification.target)
        .bind(&notification.target_user_ids)
        .bind(&notification.user_id)
        .bind(notification.send_in_app)
        .bind(notification.send_email)
        .bind(notification.send_push)
        .bind(notification.send_mode)
        .bind(notification.scheduled_at)
        .bind(notification.expiry_days)
        .bind(notification.expires_at)
        .bind(&notification.email_subject)
        .bind(&notification.email_template)
        .bind(notification.email_template_id)
        .bind(notification.total_targets)
        .bind(notification.in_app_created)
        .bind(notification.push_sent)
        .bind(notification.email_sent)
        .bind(notification.status)
        .bind(&notification.created_by)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .bind(notification.completed_at)
        .execute(&mut *tx)
        .await?;

        DeliveryTrackingRepository::seed_in_tx(
            &mut *tx,
            notification.id,
            seeds,
            notification.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(concat!(
            "SELECT ",
            notification_columns!(),
            " FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn list_scheduled(&self) -> Result<Vec<Notification>> {
        let scheduled = sqlx::query_as::<_, Notification>(concat!(
            "SELECT ",
            notification_columns!(),
            r#"
            FROM notifications
            WHERE status = $1 AND send_mode = 'LATER'
            ORDER BY scheduled_at ASC
            "#
        ))
        .bind(BroadcastStatus::Scheduled)
        .fetch_all(&self.pool)
        .await?;

        Ok(scheduled)
    }

    /// 到期候选只读查询，认领由 `transition` 的条件更新完成
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let due = sqlx::query_as::<_, Notification>(concat!(
            "SELECT ",
            notification_columns!(),
            r#"
            FROM notifications
            WHERE status = $1 AND send_mode = 'LATER' AND scheduled_at <= $2
            ORDER BY scheduled_at ASC
            LIMIT $3
            "#
        ))
        .bind(BroadcastStatus::Scheduled)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[BroadcastStatus],
        to: BroadcastStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(status_names(from))
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_counters(&self, id: Uuid, counters: ChannelCounters) -> Result<()> {
        if counters.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE notifications
            SET in_app_created = in_app_created + $2,
                push_sent = push_sent + $3,
                email_sent = email_sent + $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(counters.in_app_created)
        .bind(counters.push_sent)
        .bind(counters.email_sent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_total_targets(&self, id: Uuid, total: i32) -> Result<()> {
        sqlx::query("UPDATE notifications SET total_targets = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(total)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: BroadcastStatus,
        email_sent: i32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2,
                email_sent = email_sent + $3,
                completed_at = $4,
                updated_at = $4
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(email_sent)
        .bind(at)
        .bind(status_names(&[
            BroadcastStatus::Processing,
            BroadcastStatus::Sending,
        ]))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE expires_at IS NOT NULL AND expires_at <= $1 AND status = ANY($2)
            "#,
        )
        .bind(now)
        .bind(status_names(&BroadcastStatus::TERMINAL))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, NotificationKind, Priority, SendMode, TargetMode};
    use sqlx::types::Json;

    fn sample(id: Uuid) -> Notification {
        let now = Utc::now();
        Notification {
            id,
            title: "Maintenance".into(),
            message: "Downtime at 10pm".into(),
            kind: NotificationKind::System,
            priority: Priority::Normal,
            banner_url: None,
            cta_label: None,
            cta_url: None,
            target: TargetMode::AllUsers,
            target_user_ids: Json(vec![]),
            user_id: None,
            send_in_app: true,
            send_email: false,
            send_push: false,
            send_mode: SendMode::Now,
            scheduled_at: None,
            expiry_days: 7,
            expires_at: None,
            email_subject: None,
            email_template: None,
            email_template_id: None,
            total_targets: 1,
            in_app_created: 0,
            push_sent: 0,
            email_sent: 0,
            status: BroadcastStatus::Processing,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[tokio::test]
    #[ignore = "需要数据库连接"]
    async fn test_create_and_finalize() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let repo = BroadcastRepository::new(pool);
        let id = Uuid::new_v4();

        repo.create_with_tracking(
            &sample(id),
            &[TrackingSeed {
                user_id: "u1".into(),
                channel: Channel::InApp,
                email: None,
            }],
        )
        .await
        .unwrap();

        assert!(repo.get(id).await.unwrap().is_some());
        assert!(
            repo.finalize(id, BroadcastStatus::Completed, 0, Utc::now())
                .await
                .unwrap()
        );
        // 已是终态，不会再次写入
        assert!(
            !repo
                .finalize(id, BroadcastStatus::Failed, 0, Utc::now())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    #[ignore = "需要数据库连接"]
    async fn test_concurrent_claims_single_winner() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let repo = BroadcastRepository::new(pool);
        let id = Uuid::new_v4();

        let mut scheduled = sample(id);
        scheduled.status = BroadcastStatus::Scheduled;
        scheduled.send_mode = SendMode::Later;
        scheduled.scheduled_at = Some(Utc::now() - chrono::Duration::minutes(1));
        repo.create_with_tracking(&scheduled, &[]).await.unwrap();

        let due = repo.list_due(Utc::now(), 10).await.unwrap();
        assert!(due.iter().any(|n| n.id == id));

        let claim = || {
            repo.transition(id, &[BroadcastStatus::Scheduled], BroadcastStatus::Processing)
        };
        let (a, b) = tokio::join!(claim(), claim());
        assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|won| **won).count(), 1);
    }
}
