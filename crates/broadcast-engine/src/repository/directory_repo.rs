//! 用户目录与推送设备注册表
//!
//! 两张表由认证服务维护，这里只实现引擎需要的读取与设备注册操作

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::{PushTokenRepositoryTrait, UserDirectoryTrait};
use crate::error::Result;
use crate::models::{NewPushToken, PushToken, Recipient};

pub struct UserDirectory {
    pool: PgPool,
}

impl UserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectoryTrait for UserDirectory {
    async fn list_active(&self, ids: Option<Vec<String>>) -> Result<Vec<Recipient>> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, email, email_subscribed, name
            FROM users
            WHERE is_active AND ($1::varchar[] IS NULL OR id = ANY($1))
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}

pub struct PushTokenRepository {
    pool: PgPool,
}

impl PushTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushTokenRepositoryTrait for PushTokenRepository {
    async fn register(
        &self,
        user_id: &str,
        token: &NewPushToken,
        at: DateTime<Utc>,
    ) -> Result<PushToken> {
        let saved = sqlx::query_as::<_, PushToken>(
            r#"
            INSERT INTO push_tokens (id, user_id, token, platform, device_id, user_agent, last_used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (token) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                platform = EXCLUDED.platform,
                device_id = EXCLUDED.device_id,
                user_agent = EXCLUDED.user_agent,
                last_used = EXCLUDED.last_used
            RETURNING id, user_id, token, platform, device_id, user_agent, last_used, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&token.token)
        .bind(token.platform)
        .bind(&token.device_id)
        .bind(&token.user_agent)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn remove(&self, user_id: &str, token: Option<String>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM push_tokens
            WHERE user_id = $1 AND ($2::varchar IS NULL OR token = $2)
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushToken>> {
        let tokens = sqlx::query_as::<_, PushToken>(
            r#"
            SELECT id, user_id, token, platform, device_id, user_agent, last_used, created_at
            FROM push_tokens
            WHERE user_id = $1
            ORDER BY last_used DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn list_for_users(&self, user_ids: &[String]) -> Result<Vec<PushToken>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let tokens = sqlx::query_as::<_, PushToken>(
            r#"
            SELECT id, user_id, token, platform, device_id, user_agent, last_used, created_at
            FROM push_tokens
            WHERE user_id = ANY($1)
            ORDER BY user_id, last_used DESC
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM push_tokens WHERE token = ANY($1)")
            .bind(tokens)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
