//! 站内信收件箱仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::InboxRepositoryTrait;
use crate::error::Result;
use crate::models::{FeedItem, FeedQuery, ReadStats, UserNotification};

pub struct InboxRepository {
    pool: PgPool,
}

impl InboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboxRepositoryTrait for InboxRepository {
    async fn insert_missing(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = user_ids.iter().map(|_| Uuid::new_v4()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO user_notifications (id, user_id, notification_id, is_read, created_at)
            SELECT u.id, u.user_id, $1, FALSE, $2
            FROM UNNEST($3::uuid[], $4::varchar[]) AS u(id, user_id)
            ON CONFLICT (user_id, notification_id) DO NOTHING
            "#,
        )
        .bind(notification_id)
        .bind(at)
        .bind(&ids)
        .bind(user_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_feed(
        &self,
        user_id: &str,
        query: &FeedQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<FeedItem>, i64)> {
        let kind = query.kind.map(|k| k.as_str());
        let priority = query.priority.map(|p| p.as_str());

        let items = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT un.id, un.notification_id, n.title, n.message, n.kind, n.priority,
                   n.banner_url, n.cta_label, n.cta_url, un.is_read, un.read_at,
                   n.expires_at, un.created_at
            FROM user_notifications un
            JOIN notifications n ON n.id = un.notification_id
            WHERE un.user_id = $1
              AND n.send_in_app
              AND (n.expires_at IS NULL OR n.expires_at > $2)
              AND ($3::varchar IS NULL OR n.kind = $3)
              AND ($4::varchar IS NULL OR n.priority = $4)
              AND (NOT $5 OR un.is_read = FALSE)
            ORDER BY un.created_at DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(kind)
        .bind(priority)
        .bind(query.unread_only)
        .bind(query.limit)
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_notifications un
            JOIN notifications n ON n.id = un.notification_id
            WHERE un.user_id = $1
              AND n.send_in_app
              AND (n.expires_at IS NULL OR n.expires_at > $2)
              AND ($3::varchar IS NULL OR n.kind = $3)
              AND ($4::varchar IS NULL OR n.priority = $4)
              AND (NOT $5 OR un.is_read = FALSE)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(kind)
        .bind(priority)
        .bind(query.unread_only)
        .fetch_one(&self.pool)
        .await?;

        Ok((items, total))
    }

    async fn unread_count(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_notifications un
            JOIN notifications n ON n.id = un.notification_id
            WHERE un.user_id = $1
              AND un.is_read = FALSE
              AND n.send_in_app
              AND (n.expires_at IS NULL OR n.expires_at > $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find(&self, user_id: &str, id: Uuid) -> Result<Option<UserNotification>> {
        let item = sqlx::query_as::<_, UserNotification>(
            r#"
            SELECT id, user_id, notification_id, is_read, read_at, created_at
            FROM user_notifications
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn find_by_notification(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<UserNotification>> {
        let item = sqlx::query_as::<_, UserNotification>(
            r#"
            SELECT id, user_id, notification_id, is_read, read_at, created_at
            FROM user_notifications
            WHERE notification_id = $1 AND user_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn mark_read(&self, user_id: &str, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE user_notifications
            SET is_read = TRUE, read_at = $2
            WHERE user_id = $1 AND is_read = FALSE
            RETURNING notification_id
            "#,
        )
        .bind(user_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn read_stats(&self, notification_id: Uuid) -> Result<ReadStats> {
        let stats = sqlx::query_as::<_, ReadStats>(
            r#"
            SELECT COUNT(*) FILTER (WHERE is_read) AS "read",
                   COUNT(*) FILTER (WHERE NOT is_read) AS unread
            FROM user_notifications
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}
