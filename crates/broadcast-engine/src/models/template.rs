//! 邮件模板

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use super::enums::TemplateKind;

/// 模板默认声明的变量
pub const DEFAULT_TEMPLATE_VARIABLES: [&str; 4] = ["name", "email", "message", "unsubscribeUrl"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub kind: TemplateKind,
    pub variables: Json<Vec<String>>,
    /// false 表示已软删除
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建模板请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewEmailTemplate {
    #[validate(length(min = 1, max = 255, message = "模板名称长度必须在1-255之间"))]
    pub name: String,
    #[validate(length(min = 1, max = 255, message = "邮件主题长度必须在1-255之间"))]
    pub subject: String,
    #[validate(length(min = 1, message = "模板内容不能为空"))]
    pub html_content: String,
    #[serde(default)]
    pub kind: TemplateKind,
    pub variables: Option<Vec<String>>,
}

impl NewEmailTemplate {
    pub fn variables_or_default(&self) -> Vec<String> {
        match &self.variables {
            Some(vars) if !vars.is_empty() => vars.clone(),
            _ => DEFAULT_TEMPLATE_VARIABLES.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// 更新模板请求，缺省字段保持不变
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplatePatch {
    #[validate(length(min = 1, max = 255, message = "模板名称长度必须在1-255之间"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255, message = "邮件主题长度必须在1-255之间"))]
    pub subject: Option<String>,
    #[validate(length(min = 1, message = "模板内容不能为空"))]
    pub html_content: Option<String>,
    pub kind: Option<TemplateKind>,
    pub variables: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl EmailTemplatePatch {
    pub fn apply(self, template: &mut EmailTemplate, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            template.name = name;
        }
        if let Some(subject) = self.subject {
            template.subject = subject;
        }
        if let Some(html) = self.html_content {
            template.html_content = html;
        }
        if let Some(kind) = self.kind {
            template.kind = kind;
        }
        if let Some(vars) = self.variables {
            template.variables = Json(vars);
        }
        if let Some(active) = self.is_active {
            template.is_active = active;
        }
        template.updated_at = now;
    }
}
