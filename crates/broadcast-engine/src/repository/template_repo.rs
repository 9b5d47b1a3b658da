//! 邮件模板仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::EmailTemplateRepositoryTrait;
use crate::error::Result;
use crate::models::EmailTemplate;

pub struct EmailTemplateRepository {
    pool: PgPool,
}

impl EmailTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailTemplateRepositoryTrait for EmailTemplateRepository {
    async fn create(&self, template: &EmailTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_templates
                (id, name, subject, html_content, kind, variables, is_active, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.subject)
        .bind(&template.html_content)
        .bind(template.kind)
        .bind(&template.variables)
        .bind(template.is_active)
        .bind(&template.created_by)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmailTemplate>> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            r#"
            SELECT id, name, subject, html_content, kind, variables, is_active,
                   created_by, created_at, updated_at
            FROM email_templates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    async fn list_active(&self) -> Result<Vec<EmailTemplate>> {
        let templates = sqlx::query_as::<_, EmailTemplate>(
            r#"
            SELECT id, name, subject, html_content, kind, variables, is_active,
                   created_by, created_at, updated_at
            FROM email_templates
            WHERE is_active
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(templates)
    }

    async fn update(&self, template: &EmailTemplate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE email_templates
            SET name = $2, subject = $3, html_content = $4, kind = $5,
                variables = $6, is_active = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.subject)
        .bind(&template.html_content)
        .bind(template.kind)
        .bind(&template.variables)
        .bind(template.is_active)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
