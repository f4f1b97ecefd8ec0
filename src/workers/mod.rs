//! Settlement orchestrator.
//!
//! Independent background workers, one per job kind, each with its own
//! concurrency cap and bounded retry policy. Queues are Redis sets keyed by
//! the domain id the job acts on: `SADD` coalesces duplicate enqueues for
//! the same id into a single unit of work, and workers `SPOP` batches off
//! the set. On terminal failure (attempt cap exhausted) the affected row is
//! marked failed and left for the operator reconciliation query; it is
//! never retried blindly after that.

pub mod escrow_activation;
pub mod expiry;
pub mod payment_confirmation;
pub mod refund;
pub mod retry;

use crate::errors::Result;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;
use uuid::Uuid;

pub const QUEUE_ACTIVATION: &str = "escrow-activation";
pub const QUEUE_CONFIRMATION: &str = "payment-confirmation";
pub const QUEUE_REFUND: &str = "escrow-refund";

/// Keyed job queues over Redis sets.
#[derive(Clone)]
pub struct JobQueues {
    redis: ConnectionManager,
}

impl JobQueues {
    pub fn new(redis: ConnectionManager) -> Self {
        JobQueues { redis }
    }

    fn key(queue: &str) -> String {
        format!("jobs:{}", queue)
    }

    /// Enqueue a job keyed by domain id. Enqueuing an id that is already
    /// queued is a no-op, which is what coalesces duplicate triggers.
    pub async fn enqueue(&self, queue: &str, id: Uuid) -> Result<()> {
        let _: () = redis::cmd("SADD")
            .arg(Self::key(queue))
            .arg(id.to_string())
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(())
    }

    /// Pop up to `count` job ids.
    pub async fn pop(&self, queue: &str, count: usize) -> Result<Vec<Uuid>> {
        let members: Vec<String> = redis::cmd("SPOP")
            .arg(Self::key(queue))
            .arg(count)
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(members
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }

    /// Re-enqueue after a backoff delay, without blocking the worker loop.
    pub fn requeue_after(&self, queue: &'static str, id: Uuid, delay: std::time::Duration) {
        let queues = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queues.enqueue(queue, id).await {
                error!(queue, id = %id, error = %e, "Failed to re-enqueue job");
            }
        });
    }
}

/// Drive one worker's poll loop: pop a batch, fan out under the concurrency
/// cap, repeat. The permit is held for the lifetime of each job so at most
/// `concurrency` jobs of this kind run at once.
pub async fn run_queue_loop<W, F, Fut>(
    worker: Arc<W>,
    queues: Arc<JobQueues>,
    queue: &'static str,
    concurrency: usize,
    poll_interval: std::time::Duration,
    process: F,
) where
    W: Send + Sync + 'static,
    F: Fn(Arc<W>, Uuid) -> Fut + Copy + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    loop {
        let batch = match queues.pop(queue, concurrency.max(1)).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(queue, error = %e, "Failed to pop jobs, backing off");
                tokio::time::sleep(poll_interval * 5).await;
                continue;
            }
        };

        if batch.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        for id in batch {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let worker = worker.clone();
            tokio::spawn(async move {
                let _permit = permit;
                process(worker, id).await;
            });
        }
    }
}
