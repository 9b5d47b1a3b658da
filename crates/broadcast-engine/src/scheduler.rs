//! 排期广播调度 Worker
//!
//! 按固定间隔轮询到期的 SCHEDULED 广播，逐条以条件更新 SCHEDULED → PROCESSING 认领，
//! 认领失败说明已被其他实例或已被取消，直接跳过。
//! 认领成功后在独立 task 中执行投递流水线，错误或 panic 都会把广播结束为 FAILED。

use std::sync::Arc;
use std::time::Duration;

use broadcast_shared::config::SchedulerConfig;
use broadcast_shared::observability::metrics;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::jobs::run_guarded;
use crate::models::BroadcastStatus;
use crate::repository::BroadcastRepositoryTrait;
use crate::service::BroadcastService;

/// 单次轮询的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 到期候选数
    pub due: usize,
    /// 认领成功数
    pub claimed: usize,
    /// 认领失败（已被抢占或取消）数
    pub skipped: usize,
    /// 以 FAILED 结束的数量
    pub failed: usize,
}

pub struct BroadcastScheduler {
    service: Arc<BroadcastService>,
    broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    poll_interval: Duration,
    batch_size: i64,
}

impl BroadcastScheduler {
    pub fn new(
        service: Arc<BroadcastService>,
        broadcasts: Arc<dyn BroadcastRepositoryTrait>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            service,
            broadcasts,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// 主循环：持续轮询直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "BroadcastScheduler 已启动"
        );
        loop {
            match self.tick(Utc::now()).await {
                Ok(report) if report.due > 0 => {
                    info!(
                        due = report.due,
                        claimed = report.claimed,
                        skipped = report.skipped,
                        failed = report.failed,
                        "排期广播轮询完成"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "排期广播轮询出错"),
            }

            // 记录 Worker 健康状态
            metrics::set_worker_last_run("broadcast_scheduler");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 处理一轮到期广播
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.broadcasts.list_due(now, self.batch_size).await?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        for mut notification in due {
            let id = notification.id;

            let claimed = self
                .broadcasts
                .transition(id, &[BroadcastStatus::Scheduled], BroadcastStatus::Processing)
                .await?;
            if !claimed {
                report.skipped += 1;
                continue;
            }
            report.claimed += 1;
            notification.status = BroadcastStatus::Processing;

            info!(notification_id = %id, scheduled_at = ?notification.scheduled_at, "已认领排期广播");

            let service = self.service.clone();
            let status = match run_guarded(async move { service.dispatch_claimed(notification).await })
                .await
            {
                Ok(status) => status,
                Err(reason) => {
                    warn!(notification_id = %id, reason = %reason, "排期广播投递失败");
                    self.service.fail_broadcast(id, &reason).await;
                    BroadcastStatus::Failed
                }
            };

            if status == BroadcastStatus::Failed {
                report.failed += 1;
            }
        }

        Ok(report)
    }
}
