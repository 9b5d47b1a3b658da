//! 请求参数 DTO

use broadcast_engine::models::{FeedQuery, NotificationKind, Priority};
use serde::Deserialize;

/// 收件箱查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedParams {
    #[serde(rename = "type")]
    pub kind: Option<NotificationKind>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl From<FeedParams> for FeedQuery {
    fn from(params: FeedParams) -> Self {
        let defaults = FeedQuery::default();
        FeedQuery {
            kind: params.kind,
            priority: params.priority,
            unread_only: params.unread_only,
            page: params.page.unwrap_or(defaults.page),
            limit: params.limit.unwrap_or(defaults.limit),
        }
        .normalized()
    }
}

/// 点击追踪参数
#[derive(Debug, Default, Deserialize)]
pub struct ClickParams {
    /// true 时直接 303 跳转到 CTA 地址
    #[serde(default)]
    pub redirect: bool,
}

/// 注销设备参数，缺省 token 时注销全部设备
#[derive(Debug, Default, Deserialize)]
pub struct RemoveTokenParams {
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_params_defaults_and_clamp() {
        let query: FeedQuery = FeedParams::default().into();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 20);

        let query: FeedQuery = FeedParams {
            page: Some(-3),
            limit: Some(1000),
            ..Default::default()
        }
        .into();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 100);
    }
}
