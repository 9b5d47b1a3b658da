//! 广播提交请求与校验
//!
//! 请求按 `mode` 区分两种载荷（站内通知 / 邮件），所有校验在写库之前完成。

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use uuid::Uuid;
use validator::ValidateUrl;

use crate::audience::AudienceTarget;
use crate::error::{EngineError, Result};
use crate::models::{
    BroadcastStatus, ChannelSelection, Notification, NotificationKind, Priority, SendMode,
    TargetMode,
};

/// 排期时间至少需要晚于当前时间的秒数
pub const MIN_SCHEDULE_LEAD_SECS: i64 = 60;
pub const MAX_EXPIRY_DAYS: i64 = 365;
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

fn default_expiry_days() -> i64 {
    DEFAULT_EXPIRY_DAYS
}

/// 广播提交请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub target: TargetMode,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub channels: ChannelSelection,
    #[serde(default)]
    pub send_mode: SendMode,
    pub scheduled_at: Option<String>,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    #[serde(default)]
    pub cta: Option<CallToAction>,
    #[serde(flatten)]
    pub content: BroadcastContent,
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub priority: Priority,
    pub banner_url: Option<String>,
}

/// 按 `mode` 区分的内容载荷
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BroadcastContent {
    Notification {
        #[serde(default)]
        title: String,
        #[serde(default)]
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Email {
        #[serde(default)]
        subject: String,
        message: Option<String>,
        html_template: Option<String>,
        template_id: Option<Uuid>,
        title: Option<String>,
    },
}

impl BroadcastContent {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::Email { .. } => "email",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallToAction {
    pub label: Option<String>,
    pub url: Option<String>,
}

/// 校验通过的广播
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBroadcast {
    pub audience: AudienceTarget,
    pub channels: ChannelSelection,
    pub mode: &'static str,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub banner_url: Option<String>,
    pub cta_label: Option<String>,
    pub cta_url: Option<String>,
    pub send_mode: SendMode,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expiry_days: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub email_subject: Option<String>,
    pub email_template: Option<String>,
    pub email_template_id: Option<Uuid>,
}

impl BroadcastRequest {
    /// 校验请求
    ///
    /// 受众是否为空需要查询用户目录，由服务层在解析受众后判断
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedBroadcast> {
        let mode = self.content.mode();
        let (title, message, email_subject, email_template, email_template_id) =
            normalize_content(self.content)?;

        if !self.channels.any() {
            return Err(EngineError::Validation(
                "至少需要选择一个投递渠道（站内信/邮件/推送）".to_string(),
            ));
        }

        let audience = AudienceTarget::from_parts(self.target, self.user_ids)?;

        let scheduled_at = match self.send_mode {
            SendMode::Now => None,
            SendMode::Later => Some(parse_schedule(self.scheduled_at.as_deref(), now)?),
        };

        if !(0..=MAX_EXPIRY_DAYS).contains(&self.expiry_days) {
            return Err(EngineError::Validation(format!(
                "expiryDays 必须在 0 到 {} 之间",
                MAX_EXPIRY_DAYS
            )));
        }
        let expires_at = (self.expiry_days > 0).then(|| now + Duration::days(self.expiry_days));

        let cta = self.cta.unwrap_or_default();
        let cta_url = non_blank(cta.url);
        if let Some(url) = cta_url.as_deref() {
            validate_cta_url(url)?;
        }

        Ok(ValidatedBroadcast {
            audience,
            channels: self.channels,
            mode,
            title,
            message,
            kind: self.kind,
            priority: self.priority,
            banner_url: non_blank(self.banner_url),
            cta_label: non_blank(cta.label),
            cta_url,
            send_mode: self.send_mode,
            scheduled_at,
            expiry_days: self.expiry_days as i32,
            expires_at,
            email_subject,
            email_template,
            email_template_id,
        })
    }
}

type NormalizedContent = (String, String, Option<String>, Option<String>, Option<Uuid>);

fn normalize_content(content: BroadcastContent) -> Result<NormalizedContent> {
    match content {
        BroadcastContent::Notification { title, message } => {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(EngineError::Validation("通知标题不能为空".to_string()));
            }
            if message.trim().is_empty() {
                return Err(EngineError::Validation("通知内容不能为空".to_string()));
            }
            Ok((title, message, None, None, None))
        }
        BroadcastContent::Email {
            subject,
            message,
            html_template,
            template_id,
            title,
        } => {
            let subject = subject.trim().to_string();
            if subject.is_empty() {
                return Err(EngineError::Validation("邮件主题不能为空".to_string()));
            }
            let message = non_blank(message);
            let html_template = non_blank(html_template);
            if message.is_none() && html_template.is_none() && template_id.is_none() {
                return Err(EngineError::Validation(
                    "邮件内容（message 或 htmlTemplate）不能为空".to_string(),
                ));
            }
            // 邮件模式未提供标题时沿用主题
            let title = non_blank(title).unwrap_or_else(|| subject.clone());
            Ok((
                title,
                message.unwrap_or_default(),
                Some(subject),
                html_template,
                template_id,
            ))
        }
    }
}

/// 解析排期时间，接受 RFC 3339 或不带时区的本地时间（按 UTC 处理）
fn parse_schedule(raw: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Validation("sendMode=LATER 时 scheduledAt 必填".to_string()))?;

    let scheduled = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
                .map(|naive| naive.and_utc())
        })
        .map_err(|_| EngineError::Validation(format!("scheduledAt 格式无效: {}", raw)))?;

    if scheduled < now + Duration::seconds(MIN_SCHEDULE_LEAD_SECS) {
        return Err(EngineError::Validation(
            "scheduledAt 必须至少晚于当前时间 1 分钟".to_string(),
        ));
    }
    Ok(scheduled)
}

/// CTA 链接必须是 http(s) 绝对地址或以 `/` 开头的站内路径
///
/// `//host` 与 `/\host` 会被浏览器当作外部地址，不算站内路径
fn validate_cta_url(url: &str) -> Result<()> {
    if let Some(path) = url.strip_prefix('/') {
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(EngineError::Validation(format!("CTA 链接不能指向外部主机: {}", url)));
        }
        if format!("http://localhost/{}", path).validate_url() {
            return Ok(());
        }
        return Err(EngineError::Validation(format!("CTA 链接格式无效: {}", url)));
    }

    if !url.validate_url() {
        return Err(EngineError::Validation(format!(
            "CTA 链接格式无效（https://... 或 /path）: {}",
            url
        )));
    }
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(EngineError::Validation("CTA 链接必须使用 http 或 https".to_string()));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl ValidatedBroadcast {
    /// 生成待持久化的广播记录
    ///
    /// `target_user_ids` 为解析后的显式用户列表，ALL 模式下为空
    pub fn into_notification(
        self,
        id: Uuid,
        created_by: &str,
        total_targets: i32,
        single_user: Option<String>,
        now: DateTime<Utc>,
    ) -> Notification {
        let status = match self.send_mode {
            SendMode::Now => BroadcastStatus::Processing,
            SendMode::Later => BroadcastStatus::Scheduled,
        };
        Notification {
            id,
            title: self.title,
            message: self.message,
            kind: self.kind,
            priority: self.priority,
            banner_url: self.banner_url,
            cta_label: self.cta_label,
            cta_url: self.cta_url,
            target: self.audience.mode(),
            target_user_ids: Json(self.audience.user_ids()),
            user_id: single_user,
            send_in_app: self.channels.in_app,
            send_email: self.channels.email,
            send_push: self.channels.push,
            send_mode: self.send_mode,
            scheduled_at: self.scheduled_at,
            expiry_days: self.expiry_days,
            expires_at: self.expires_at,
            email_subject: self.email_subject,
            email_template: self.email_template,
            email_template_id: self.email_template_id,
            total_targets,
            in_app_created: 0,
            push_sent: 0,
            email_sent: 0,
            status,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> BroadcastRequest {
        serde_json::from_value(body).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "target": "ALL",
            "mode": "notification",
            "title": "Maintenance",
            "message": "Downtime at 10pm",
        })
    }

    fn with(mut body: serde_json::Value, key: &str, value: serde_json::Value) -> serde_json::Value {
        body[key] = value;
        body
    }

    #[test]
    fn test_defaults() {
        let now = Utc::now();
        let validated = request(base()).validate(now).unwrap();
        assert_eq!(validated.channels, ChannelSelection::default());
        assert_eq!(validated.send_mode, SendMode::Now);
        assert_eq!(validated.expiry_days, 7);
        assert_eq!(validated.expires_at, Some(now + Duration::days(7)));
        assert_eq!(validated.audience, AudienceTarget::All);
        assert_eq!(validated.mode, "notification");
    }

    #[test]
    fn test_no_channel_rejected() {
        let body = with(
            base(),
            "channels",
            json!({"inApp": false, "email": false, "push": false}),
        );
        let err = request(body).validate(Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_single_requires_exactly_one_id() {
        let now = Utc::now();
        let single = with(base(), "target", json!("SINGLE"));

        let two = with(single.clone(), "userIds", json!(["a", "b"]));
        assert!(request(two).validate(now).is_err());

        let zero = with(single.clone(), "userIds", json!([]));
        assert!(request(zero).validate(now).is_err());

        let one = with(single, "userIds", json!(["a"]));
        let validated = request(one).validate(now).unwrap();
        assert_eq!(validated.audience, AudienceTarget::Single("a".into()));
    }

    #[test]
    fn test_schedule_lead_time() {
        let now = Utc::now();
        let later = with(base(), "sendMode", json!("LATER"));

        let too_soon = with(
            later.clone(),
            "scheduledAt",
            json!((now + Duration::seconds(30)).to_rfc3339()),
        );
        assert!(request(too_soon).validate(now).is_err());

        let ok = with(
            later.clone(),
            "scheduledAt",
            json!((now + Duration::seconds(61)).to_rfc3339()),
        );
        let validated = request(ok).validate(now).unwrap();
        assert!(validated.scheduled_at.is_some());

        let missing = later.clone();
        assert!(request(missing).validate(now).is_err());

        let garbage = with(later, "scheduledAt", json!("tomorrow-ish"));
        assert!(request(garbage).validate(now).is_err());
    }

    #[test]
    fn test_expiry_bounds() {
        let now = Utc::now();
        assert!(request(with(base(), "expiryDays", json!(366))).validate(now).is_err());
        assert!(request(with(base(), "expiryDays", json!(-1))).validate(now).is_err());

        let never = request(with(base(), "expiryDays", json!(0))).validate(now).unwrap();
        assert_eq!(never.expires_at, None);
    }

    #[test]
    fn test_cta_url_rules() {
        let now = Utc::now();
        let cta = |url: &str| with(base(), "cta", json!({"label": "Open", "url": url}));

        assert!(request(cta("https://example.com/a")).validate(now).is_ok());
        assert!(request(cta("/settings/profile")).validate(now).is_ok());
        assert!(request(cta("ftp://example.com")).validate(now).is_err());
        assert!(request(cta("not a url")).validate(now).is_err());
        // 协议相对地址会跳转到外部主机
        assert!(request(cta("//evil.example.com/phish")).validate(now).is_err());
        assert!(request(cta("/\\evil.example.com")).validate(now).is_err());
        // 空白链接视为未设置
        assert!(request(cta("   ")).validate(now).is_ok());
    }

    #[test]
    fn test_notification_mode_requires_title_and_message() {
        let now = Utc::now();
        let no_title = json!({"target": "ALL", "mode": "notification", "message": "x"});
        assert!(request(no_title).validate(now).is_err());

        let blank_message = json!({"target": "ALL", "mode": "notification", "title": "t", "message": " "});
        assert!(request(blank_message).validate(now).is_err());
    }

    #[test]
    fn test_email_mode() {
        let now = Utc::now();
        let missing_body = json!({"target": "ALL", "mode": "email", "subject": "Hello"});
        assert!(request(missing_body).validate(now).is_err());

        let template_only = json!({
            "target": "ALL",
            "mode": "email",
            "subject": "Hello",
            "htmlTemplate": "<h1>{{name}}</h1>",
            "channels": {"email": true},
        });
        let validated = request(template_only).validate(now).unwrap();
        assert_eq!(validated.title, "Hello");
        assert_eq!(validated.email_subject.as_deref(), Some("Hello"));
        assert_eq!(validated.email_template.as_deref(), Some("<h1>{{name}}</h1>"));
        assert_eq!(validated.mode, "email");
    }

    #[test]
    fn test_unknown_mode_is_rejected_at_parse() {
        let body = json!({"target": "ALL", "mode": "sms", "title": "t", "message": "m"});
        assert!(serde_json::from_value::<BroadcastRequest>(body).is_err());
    }

    #[test]
    fn test_into_notification_status() {
        let now = Utc::now();
        let validated = request(base()).validate(now).unwrap();
        let record = validated.into_notification(Uuid::new_v4(), "admin-1", 3, None, now);
        assert_eq!(record.status, BroadcastStatus::Processing);
        assert_eq!(record.target, TargetMode::AllUsers);
        assert_eq!(record.total_targets, 3);
        assert!(record.send_in_app);
    }
}
