//! 受众解析
//!
//! 将 ALL / SELECTED / SINGLE 目标转换为去重后的活跃用户列表

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{EngineError, Result};
use crate::models::{Notification, Recipient, TargetMode};
use crate::repository::UserDirectoryTrait;

/// 受众目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceTarget {
    All,
    Selected(Vec<String>),
    Single(String),
}

impl AudienceTarget {
    /// 由请求中的目标模式与用户列表构造
    ///
    /// SELECTED 需要非空列表，重复 id 保留首次出现；SINGLE 需要恰好一个 id
    pub fn from_parts(mode: TargetMode, user_ids: Vec<String>) -> Result<Self> {
        match mode {
            TargetMode::AllUsers => Ok(Self::All),
            TargetMode::SelectedUsers => {
                let mut seen = HashSet::new();
                let ids: Vec<String> = user_ids
                    .into_iter()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty() && seen.insert(id.clone()))
                    .collect();
                if ids.is_empty() {
                    return Err(EngineError::Validation(
                        "SELECTED 模式下 userIds 不能为空".to_string(),
                    ));
                }
                Ok(Self::Selected(ids))
            }
            TargetMode::SingleUser => {
                let mut ids = user_ids;
                if ids.len() != 1 {
                    return Err(EngineError::Validation(
                        "SINGLE 模式下 userIds 必须恰好包含 1 个用户".to_string(),
                    ));
                }
                Ok(Self::Single(ids.remove(0)))
            }
        }
    }

    /// 从已持久化的广播恢复目标，用于排期触发时重新解析
    pub fn from_notification(notification: &Notification) -> Self {
        match notification.target {
            TargetMode::AllUsers => Self::All,
            TargetMode::SelectedUsers => Self::Selected(notification.target_user_ids.0.clone()),
            TargetMode::SingleUser => Self::Single(
                notification
                    .user_id
                    .clone()
                    .or_else(|| notification.target_user_ids.0.first().cloned())
                    .unwrap_or_default(),
            ),
        }
    }

    pub fn mode(&self) -> TargetMode {
        match self {
            Self::All => TargetMode::AllUsers,
            Self::Selected(_) => TargetMode::SelectedUsers,
            Self::Single(_) => TargetMode::SingleUser,
        }
    }

    /// 显式指定的用户列表，ALL 为空
    pub fn user_ids(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Selected(ids) => ids.clone(),
            Self::Single(id) => vec![id.clone()],
        }
    }
}

/// 受众解析器
pub struct AudienceResolver {
    users: Arc<dyn UserDirectoryTrait>,
}

impl AudienceResolver {
    pub fn new(users: Arc<dyn UserDirectoryTrait>) -> Self {
        Self { users }
    }

    /// 解析为活跃用户列表，结果为空时返回 `NoRecipients`
    #[instrument(skip(self), fields(mode = %target.mode().as_str()))]
    pub async fn resolve(&self, target: &AudienceTarget) -> Result<Vec<Recipient>> {
        let recipients = match target {
            AudienceTarget::All => self.users.list_active(None).await?,
            AudienceTarget::Selected(ids) => self.users.list_active(Some(ids.clone())).await?,
            AudienceTarget::Single(id) if id.is_empty() => Vec::new(),
            AudienceTarget::Single(id) => self.users.list_active(Some(vec![id.clone()])).await?,
        };

        let mut seen = HashSet::new();
        let recipients: Vec<Recipient> = recipients
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();

        if recipients.is_empty() {
            return Err(EngineError::NoRecipients);
        }

        debug!(count = recipients.len(), "受众解析完成");
        Ok(recipients)
    }
}
