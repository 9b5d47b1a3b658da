//! 后台邮件任务队列
//!
//! 立即发送的广播在快速渠道完成后把邮件任务放入队列，HTTP 请求随即返回。
//! 队列 worker 用信号量限制同时运行的任务数，每个任务在独立的 tokio task 中执行，
//! 任务返回错误或 panic 时广播被标记为 FAILED，剩余 queued 行标记失败。

use std::future::Future;
use std::sync::Arc;

use broadcast_shared::observability::metrics;
use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{EmailDispatcher, EmailJob, EmailOutcome};
use crate::error::{EngineError, Result};
use crate::models::BroadcastStatus;
use crate::repository::BroadcastRepositoryTrait;
use crate::tracker::DeliveryTracker;

/// 队列容量，超过时提交方等待
const QUEUE_CAPACITY: usize = 256;

struct QueuedEmailJob {
    job: EmailJob,
    done: oneshot::Sender<BroadcastStatus>,
}

/// 邮件任务队列
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<QueuedEmailJob>,
}

impl DispatchQueue {
    /// 创建队列并启动 worker
    ///
    /// 所有 `DispatchQueue` 句柄被 drop 后 worker 在处理完已入队任务后退出。
    pub fn start(
        dispatcher: Arc<EmailDispatcher>,
        broadcasts: Arc<dyn BroadcastRepositoryTrait>,
        tracker: Arc<DeliveryTracker>,
        max_concurrent: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tokio::spawn(worker_loop(receiver, dispatcher, broadcasts, tracker, semaphore));
        info!(max_concurrent, "邮件任务队列已启动");

        Self { sender }
    }

    /// 提交邮件任务，返回的接收端在任务结束时收到最终状态
    pub async fn submit(&self, job: EmailJob) -> Result<oneshot::Receiver<BroadcastStatus>> {
        let (done, receiver) = oneshot::channel();
        self.sender
            .send(QueuedEmailJob { job, done })
            .await
            .map_err(|_| EngineError::Internal("邮件任务队列已关闭".to_string()))?;
        Ok(receiver)
    }
}

async fn worker_loop(
    mut receiver: mpsc::Receiver<QueuedEmailJob>,
    dispatcher: Arc<EmailDispatcher>,
    broadcasts: Arc<dyn BroadcastRepositoryTrait>,
    tracker: Arc<DeliveryTracker>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(queued) = receiver.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let dispatcher = dispatcher.clone();
        let broadcasts = broadcasts.clone();
        let tracker = tracker.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let QueuedEmailJob { job, done } = queued;
            let notification_id = job.notification.id;

            let outcome = run_guarded(async move { dispatcher.run(&job).await }).await;
            let status =
                finish_email_job(broadcasts.as_ref(), &tracker, notification_id, outcome).await;

            // 提交方可能不关心结果
            let _ = done.send(status);
        });
    }

    info!("邮件任务队列已关闭");
}

/// 在独立 task 中执行，错误与 panic 都转换为失败原因
pub async fn run_guarded<T, F>(future: F) -> std::result::Result<T, String>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) if join_err.is_panic() => Err("后台任务崩溃".to_string()),
        Err(_) => Err("后台任务被取消".to_string()),
    }
}

/// 根据邮件结果写入广播终态
pub async fn finish_email_job(
    broadcasts: &dyn BroadcastRepositoryTrait,
    tracker: &DeliveryTracker,
    notification_id: Uuid,
    outcome: std::result::Result<EmailOutcome, String>,
) -> BroadcastStatus {
    let (status, email_sent) = match outcome {
        Ok(outcome) => (
            BroadcastStatus::from_email_outcome(outcome.success, outcome.failure),
            i32::try_from(outcome.success).unwrap_or(i32::MAX),
        ),
        Err(reason) => {
            error!(notification_id = %notification_id, reason = %reason, "邮件任务失败");
            if let Err(e) = tracker.fail_queued(notification_id, &reason).await {
                warn!(notification_id = %notification_id, error = %e, "标记剩余投递失败时出错");
            }
            (BroadcastStatus::Failed, 0)
        }
    };

    match broadcasts
        .finalize(notification_id, status, email_sent, Utc::now())
        .await
    {
        Ok(true) => {
            metrics::record_broadcast_finalized(status.as_str());
            info!(notification_id = %notification_id, status = %status, email_sent, "广播已完成");
        }
        Ok(false) => {
            warn!(notification_id = %notification_id, status = %status, "广播已不在发送中，跳过终态写入");
        }
        Err(e) => {
            error!(notification_id = %notification_id, error = %e, "写入广播终态失败");
        }
    }

    status
}
