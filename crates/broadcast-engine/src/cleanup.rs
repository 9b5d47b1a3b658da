//! 数据保留清理 Worker
//!
//! 按 cron 表达式周期执行（默认每小时整点）：
//! 1. 删除早于保留期的 sent / failed 投递记录
//! 2. 删除已过期的终态广播，其追踪与收件箱行随之删除

use std::str::FromStr;
use std::sync::Arc;

use broadcast_shared::config::SchedulerConfig;
use broadcast_shared::observability::metrics;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::{error, info};

use crate::error::{EngineError, Result};
use crate::repository::{BroadcastRepositoryTrait, DeliveryTrackingRepositoryTrait};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tracking_purged: u64,
    pub broadcasts_deleted: u64,
}

pub struct RetentionCleaner {
    broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    tracking: Arc<dyn DeliveryTrackingRepositoryTrait>,
    schedule: Schedule,
    retention: Duration,
}

impl RetentionCleaner {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepositoryTrait>,
        tracking: Arc<dyn DeliveryTrackingRepositoryTrait>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(&config.cleanup_cron).map_err(|e| {
            EngineError::Config(format!("无效的 cron 表达式 {}: {}", config.cleanup_cron, e))
        })?;

        Ok(Self {
            broadcasts,
            tracking,
            schedule,
            retention: Duration::days(config.retention_days.max(1)),
        })
    }

    /// 下一次执行时间
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 主循环：等待到下一个触发点后执行清理
    pub async fn run(&self) {
        info!(retention_days = self.retention.num_days(), "RetentionCleaner 已启动");
        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                error!("cron 表达式没有下一次执行时间，清理任务退出");
                return;
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.tick(Utc::now()).await {
                Ok(report) => info!(
                    tracking_purged = report.tracking_purged,
                    broadcasts_deleted = report.broadcasts_deleted,
                    "数据保留清理完成"
                ),
                Err(e) => error!(error = %e, "数据保留清理出错"),
            }

            metrics::set_worker_last_run("retention_cleaner");
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - self.retention;
        let tracking_purged = self.tracking.purge_before(cutoff).await?;
        let broadcasts_deleted = self.broadcasts.delete_expired(now).await?;

        Ok(CleanupReport {
            tracking_purged,
            broadcasts_deleted,
        })
    }
}
