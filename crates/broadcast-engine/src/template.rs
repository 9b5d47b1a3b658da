//! 邮件模板引擎
//!
//! 支持 `{{variable}}` 语法的变量替换，未提供的变量保留原样并记录警告。
//!
//! ## 可用变量
//!
//! | 变量 | 说明 |
//! |------|------|
//! | `name` | 收件人名称，缺省为 `User` |
//! | `email` | 收件地址 |
//! | `message` | 广播正文 |
//! | `unsubscribeUrl` | 退订链接 |
//! | `notificationId` | 广播 id |
//! | `appName` | 应用名称 |
//!
//! 变量值在替换前做 HTML 转义，模板本身的标记保持不变。

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::models::{Notification, Recipient};

// 匹配 {{variable_name}} 格式，变量名支持字母、数字、下划线
static VARIABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("变量正则是合法的"));

/// 模板渲染上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl From<HashMap<String, String>> for TemplateContext {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// 模板引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// 渲染模板
    ///
    /// 变量值原样替换，未找到的变量保留原样。
    pub fn render(&self, template: &str, context: &TemplateContext) -> String {
        self.render_with(template, context, |v| v.to_string())
    }

    /// 渲染 HTML 模板，变量值先做转义
    pub fn render_html(&self, template: &str, context: &TemplateContext) -> String {
        self.render_with(template, context, escape_html)
    }

    /// 提取模板中的所有变量名
    pub fn extract_variables(&self, template: &str) -> Vec<String> {
        VARIABLE_REGEX
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    fn render_with<F>(&self, template: &str, context: &TemplateContext, encode: F) -> String
    where
        F: Fn(&str) -> String,
    {
        VARIABLE_REGEX
            .replace_all(template, |caps: &Captures| {
                let var_name = &caps[1];
                match context.get(var_name) {
                    Some(value) => encode(value),
                    None => {
                        warn!(variable = var_name, "模板变量未找到，保留原样");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

/// HTML 转义
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// 邮件正文渲染器
///
/// 为每个收件人构建变量上下文，有模板时渲染模板，否则退化为 `<p>{message}</p>`
#[derive(Debug, Clone)]
pub struct EmailRenderer {
    engine: TemplateEngine,
    app_url: String,
    app_name: String,
}

impl EmailRenderer {
    pub fn new(app_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            engine: TemplateEngine::new(),
            app_url: app_url.into(),
            app_name: app_name.into(),
        }
    }

    pub fn unsubscribe_url(&self, user_id: &str) -> String {
        format!(
            "{}/unsubscribe/{}",
            self.app_url.trim_end_matches('/'),
            user_id
        )
    }

    pub fn context_for(&self, notification: &Notification, recipient: &Recipient) -> TemplateContext {
        let mut context = TemplateContext::new();
        context
            .set("name", recipient.display_name())
            .set("email", recipient.verified_email().unwrap_or_default())
            .set("message", notification.message.as_str())
            .set("unsubscribeUrl", self.unsubscribe_url(&recipient.id))
            .set("notificationId", notification.id.to_string())
            .set("appName", self.app_name.as_str());
        context
    }

    /// 渲染单个收件人的邮件正文
    pub fn render_body(
        &self,
        notification: &Notification,
        template_html: Option<&str>,
        recipient: &Recipient,
    ) -> String {
        match template_html.filter(|html| !html.trim().is_empty()) {
            Some(html) => self
                .engine
                .render_html(html, &self.context_for(notification, recipient)),
            None => format!("<p>{}</p>", escape_html(&notification.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    use super::*;
    use crate::models::{BroadcastStatus, NotificationKind, Priority, SendMode, TargetMode};

    fn notification(message: &str) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            title: "维护通知".into(),
            message: message.into(),
            kind: NotificationKind::Announcement,
            priority: Priority::Normal,
            banner_url: None,
            cta_label: None,
            cta_url: None,
            target: TargetMode::AllUsers,
            target_user_ids: Json(vec![]),
            user_id: None,
            send_in_app: false,
            send_email: true,
            send_push: false,
            send_mode: SendMode::Now,
            scheduled_at: None,
            expiry_days: 7,
            expires_at: None,
            email_subject: Some("维护".into()),
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

    fn recipient(name: Option<&str>) -> Recipient {
        Recipient {
            id: "user-1".into(),
            email: Some("alice@example.com".into()),
            email_subscribed: true,
            name: name.map(String::from),
        }
    }

    #[test]
    fn test_render_simple() {
        let engine = TemplateEngine::new();
        let mut context = TemplateContext::new();
        context.set("name", "Alice").set("appName", "Broadcast");

        let rendered = engine.render("Hi {{name}}, welcome to {{appName}}", &context);
        assert_eq!(rendered, "Hi Alice, welcome to Broadcast");
    }

    #[test]
    fn test_unknown_variable_left_verbatim() {
        let engine = TemplateEngine::new();
        let context = TemplateContext::new();

        let rendered = engine.render("Hello {{missing}}!", &context);
        assert_eq!(rendered, "Hello {{missing}}!");
    }

    #[test]
    fn test_render_html_escapes_values() {
        let engine = TemplateEngine::new();
        let mut context = TemplateContext::new();
        context.set("message", "<script>alert('x')</script>");

        let rendered = engine.render_html("<div>{{message}}</div>", &context);
        assert_eq!(
            rendered,
            "<div>&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;</div>"
        );
    }

    #[test]
    fn test_extract_variables() {
        let engine = TemplateEngine::new();
        let vars = engine.extract_variables("{{name}} {{unsubscribeUrl}} {{name}}");
        assert_eq!(vars, vec!["name", "unsubscribeUrl", "name"]);
    }

    #[test]
    fn test_render_body_with_template() {
        let renderer = EmailRenderer::new("https://app.example.com/", "Broadcast");
        let notification = notification("今晚 22:00 停机");

        let body = renderer.render_body(
            &notification,
            Some("<h1>{{name}}</h1><p>{{message}}</p><a href=\"{{unsubscribeUrl}}\">退订</a>"),
            &recipient(None),
        );

        assert!(body.contains("<h1>User</h1>"));
        assert!(body.contains("<p>今晚 22:00 停机</p>"));
        assert!(body.contains("https://app.example.com/unsubscribe/user-1"));
    }

    #[test]
    fn test_render_body_falls_back_to_message() {
        let renderer = EmailRenderer::new("https://app.example.com", "Broadcast");
        let notification = notification("a < b");

        let body = renderer.render_body(&notification, None, &recipient(Some("Alice")));
        assert_eq!(body, "<p>a &lt; b</p>");

        let body = renderer.render_body(&notification, Some("   "), &recipient(Some("Alice")));
        assert_eq!(body, "<p>a &lt; b</p>");
    }
}
