//! 投递追踪仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::DeliveryTrackingRepositoryTrait;
use crate::error::Result;
use crate::models::{
    AnalyticsRange, Channel, ChannelStatusCount, DeliveryStatus, DeliveryTracking,
    HourlyEngagement, NotificationStatusCount, StatusUpdate, TrackingSeed,
};

pub struct DeliveryTrackingRepository {
    pool: PgPool,
}

impl DeliveryTrackingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中批量预置 queued 行（供广播创建使用）
    ///
    /// (notification_id, user_id, channel) 冲突时跳过
    pub async fn seed_in_tx(
        conn: &mut PgConnection,
        notification_id: Uuid,
        seeds: &[TrackingSeed],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if seeds.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = seeds.iter().map(|_| Uuid::new_v4()).collect();
        let user_ids: Vec<&str> = seeds.iter().map(|s| s.user_id.as_str()).collect();
        let channels: Vec<&str> = seeds.iter().map(|s| s.channel.as_str()).collect();
        let emails: Vec<Option<String>> = seeds.iter().map(|s| s.email.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO delivery_tracking (id, notification_id, user_id, channel, status, email, created_at)
            SELECT s.id, $1, s.user_id, s.channel, 'queued', s.email, $2
            FROM UNNEST($3::uuid[], $4::varchar[], $5::varchar[], $6::varchar[])
                 AS s(id, user_id, channel, email)
            ON CONFLICT (notification_id, user_id, channel) DO NOTHING
            "#,
        )
        .bind(notification_id)
        .bind(at)
        .bind(&ids)
        .bind(&user_ids)
        .bind(&channels)
        .bind(&emails)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }
}

fn status_names(statuses: &[DeliveryStatus]) -> Vec<&'static str> {
    statuses.iter().map(DeliveryStatus::as_str).collect()
}

#[async_trait]
impl DeliveryTrackingRepositoryTrait for DeliveryTrackingRepository {
    async fn seed(&self, notification_id: Uuid, seeds: &[TrackingSeed]) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        Self::seed_in_tx(&mut *conn, notification_id, seeds, Utc::now()).await
    }

    async fn update_status(
        &self,
        notification_id: Uuid,
        user_ids: &[String],
        channel: Channel,
        update: &StatusUpdate,
    ) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE delivery_tracking
            SET status = $4,
                error_message = COALESCE($5, error_message),
                sent_at = CASE WHEN $4 = 'sent' THEN $6 ELSE sent_at END,
                opened_at = CASE WHEN $4 = 'opened' THEN $6 ELSE opened_at END,
                clicked_at = CASE WHEN $4 = 'clicked' THEN $6 ELSE clicked_at END,
                failed_at = CASE WHEN $4 = 'failed' THEN $6 ELSE failed_at END
            WHERE notification_id = $1
              AND user_id = ANY($2)
              AND channel = $3
              AND status = ANY($7)
            "#,
        )
        .bind(notification_id)
        .bind(user_ids)
        .bind(channel)
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(update.at)
        .bind(status_names(update.status.predecessors()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn attach_device_tokens(
        &self,
        notification_id: Uuid,
        tokens: &[(String, String)],
    ) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        let user_ids: Vec<&str> = tokens.iter().map(|(user, _)| user.as_str()).collect();
        let device_tokens: Vec<&str> = tokens.iter().map(|(_, token)| token.as_str()).collect();

        sqlx::query(
            r#"
            UPDATE delivery_tracking dt
            SET device_token = t.token
            FROM UNNEST($2::varchar[], $3::varchar[]) AS t(user_id, token)
            WHERE dt.notification_id = $1
              AND dt.channel = 'push'
              AND dt.user_id = t.user_id
            "#,
        )
        .bind(notification_id)
        .bind(&user_ids)
        .bind(&device_tokens)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_queued(
        &self,
        notification_id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_tracking
            SET status = 'failed', error_message = $2, failed_at = $3
            WHERE notification_id = $1 AND status = 'queued'
            "#,
        )
        .bind(notification_id)
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, notification_id: Uuid) -> Result<Vec<DeliveryTracking>> {
        let rows = sqlx::query_as::<_, DeliveryTracking>(
            r#"
            SELECT id, notification_id, user_id, channel, status, email, device_token,
                   error_message, sent_at, opened_at, clicked_at, failed_at, created_at
            FROM delivery_tracking
            WHERE notification_id = $1
            ORDER BY channel, user_id
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn count_by_channel_status(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<ChannelStatusCount>> {
        let counts = sqlx::query_as::<_, ChannelStatusCount>(
            r#"
            SELECT channel, status, COUNT(*) AS count
            FROM delivery_tracking
            WHERE notification_id = $1
            GROUP BY channel, status
            ORDER BY channel, status
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn count_in_range(&self, range: &AnalyticsRange) -> Result<Vec<NotificationStatusCount>> {
        let counts = sqlx::query_as::<_, NotificationStatusCount>(
            r#"
            SELECT notification_id, channel, status, COUNT(*) AS count
            FROM delivery_tracking
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at <= $2)
              AND ($3::varchar IS NULL OR channel = $3)
            GROUP BY notification_id, channel, status
            ORDER BY notification_id
            "#,
        )
        .bind(range.start_date)
        .bind(range.end_date)
        .bind(range.channel.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn hourly_engagement(&self, notification_id: Uuid) -> Result<Vec<HourlyEngagement>> {
        let buckets = sqlx::query_as::<_, HourlyEngagement>(
            r#"
            SELECT date_trunc('hour', COALESCE(clicked_at, opened_at)) AS hour,
                   COUNT(*) FILTER (WHERE status = 'opened') AS opened,
                   COUNT(*) FILTER (WHERE status = 'clicked') AS clicked
            FROM delivery_tracking
            WHERE notification_id = $1
              AND status IN ('opened', 'clicked')
              AND COALESCE(clicked_at, opened_at) IS NOT NULL
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(buckets)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivery_tracking
            WHERE created_at < $1 AND status IN ('sent', 'failed')
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
