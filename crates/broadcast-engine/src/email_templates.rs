//! 邮件模板管理
//!
//! 删除为软删除：模板标记为不活跃后不再出现在列表中，也不能再被新广播引用，
//! 已排期广播在触发时会回退为纯文本正文。

use std::sync::Arc;

use chrono::Utc;
use sqlx::types::Json;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{EngineError, Result};
use crate::models::{EmailTemplate, EmailTemplatePatch, NewEmailTemplate};
use crate::repository::EmailTemplateRepositoryTrait;
use crate::template::TemplateEngine;

pub struct EmailTemplateService {
    templates: Arc<dyn EmailTemplateRepositoryTrait>,
    engine: TemplateEngine,
}

impl EmailTemplateService {
    pub fn new(templates: Arc<dyn EmailTemplateRepositoryTrait>) -> Self {
        Self {
            templates,
            engine: TemplateEngine::new(),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, created_by: &str, request: NewEmailTemplate) -> Result<EmailTemplate> {
        request.validate()?;

        let now = Utc::now();
        let template = EmailTemplate {
            id: Uuid::new_v4(),
            variables: Json(request.variables_or_default()),
            name: request.name,
            subject: request.subject,
            html_content: request.html_content,
            kind: request.kind,
            is_active: true,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.check_variables(&template);

        self.templates.create(&template).await?;
        info!(template_id = %template.id, "邮件模板已创建");
        Ok(template)
    }

    pub async fn list_active(&self) -> Result<Vec<EmailTemplate>> {
        self.templates.list_active().await
    }

    pub async fn get(&self, id: Uuid) -> Result<EmailTemplate> {
        self.templates
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("邮件模板", id))
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: EmailTemplatePatch) -> Result<EmailTemplate> {
        patch.validate()?;

        let mut template = self.get(id).await?;
        patch.apply(&mut template, Utc::now());
        self.check_variables(&template);

        self.templates.update(&template).await?;
        info!(template_id = %id, "邮件模板已更新");
        Ok(template)
    }

    /// 软删除
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut template = self.get(id).await?;
        if !template.is_active {
            return Ok(());
        }

        template.is_active = false;
        template.updated_at = Utc::now();
        self.templates.update(&template).await?;
        info!(template_id = %id, "邮件模板已停用");
        Ok(())
    }

    /// 正文中使用了未声明的变量时只记录警告，渲染时这些占位符会原样保留
    fn check_variables(&self, template: &EmailTemplate) {
        let undeclared: Vec<String> = self
            .engine
            .extract_variables(&template.html_content)
            .into_iter()
            .filter(|v| !template.variables.0.contains(v))
            .collect();
        if !undeclared.is_empty() {
            warn!(template_id = %template.id, ?undeclared, "模板使用了未声明的变量");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_TEMPLATE_VARIABLES, TemplateKind};
    use crate::repository::MockEmailTemplateRepositoryTrait;

    fn stored(active: bool) -> EmailTemplate {
        let now = Utc::now();
        EmailTemplate {
            id: Uuid::new_v4(),
            name: "欢迎".into(),
            subject: "Hello".into(),
            html_content: "<p>{{name}}</p>".into(),
            kind: TemplateKind::default(),
            variables: Json(vec!["name".into()]),
            is_active: active,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_defaults_variables() {
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_create().times(1).returning(|_| Ok(()));

        let service = EmailTemplateService::new(Arc::new(repo));
        let template = service
            .create(
                "admin",
                NewEmailTemplate {
                    name: "月报".into(),
                    subject: "本月动态".into(),
                    html_content: "<p>{{message}}</p>".into(),
                    kind: TemplateKind::default(),
                    variables: None,
                },
            )
            .await
            .unwrap();

        assert!(template.is_active);
        assert_eq!(template.variables.0.len(), DEFAULT_TEMPLATE_VARIABLES.len());
        assert_eq!(template.created_by, "admin");
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_create().never();

        let service = EmailTemplateService::new(Arc::new(repo));
        let result = service
            .create(
                "admin",
                NewEmailTemplate {
                    name: String::new(),
                    subject: "s".into(),
                    html_content: "<p/>".into(),
                    kind: TemplateKind::default(),
                    variables: None,
                },
            )
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_missing_template() {
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_get().returning(|_| Ok(None));
        repo.expect_update().never();

        let service = EmailTemplateService::new(Arc::new(repo));
        let result = service
            .update(Uuid::new_v4(), EmailTemplatePatch::default())
            .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let existing = stored(true);
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(existing.clone())));
        repo.expect_update()
            .withf(|t| t.subject == "新主题" && t.name == "欢迎")
            .times(1)
            .returning(|_| Ok(()));

        let service = EmailTemplateService::new(Arc::new(repo));
        let updated = service
            .update(
                Uuid::new_v4(),
                EmailTemplatePatch {
                    subject: Some("新主题".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.subject, "新主题");
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let existing = stored(true);
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(existing.clone())));
        repo.expect_update()
            .withf(|t| !t.is_active)
            .times(1)
            .returning(|_| Ok(()));

        let service = EmailTemplateService::new(Arc::new(repo));
        service.delete(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_inactive_is_noop() {
        let existing = stored(false);
        let mut repo = MockEmailTemplateRepositoryTrait::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(existing.clone())));
        repo.expect_update().never();

        let service = EmailTemplateService::new(Arc::new(repo));
        service.delete(Uuid::new_v4()).await.unwrap();
    }
}
