//! Refund job: perform the on-chain refund for a cancelled or expired
//! escrow. The ledger-side sweep already happened in the same transaction
//! as the terminal status flip; this job only reconciles the chain.

use super::{JobQueues, QUEUE_REFUND};
use super::retry::RetryStrategy;
use crate::database::Database;
use crate::errors::Result;
use crate::metrics;
use crate::models::{Escrow, OnchainStatus};
use crate::rails::ChainClient;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct RefundWorker {
    db: Arc<Database>,
    chain: Arc<dyn ChainClient>,
    queues: Arc<JobQueues>,
    retry: RetryStrategy,
    max_attempts: u32,
}

impl RefundWorker {
    pub fn new(
        db: Arc<Database>,
        chain: Arc<dyn ChainClient>,
        queues: Arc<JobQueues>,
        retry: RetryStrategy,
        max_attempts: u32,
    ) -> Self {
        Self {
            db,
            chain,
            queues,
            retry,
            max_attempts,
        }
    }

    pub async fn run_forever(
        self: Arc<Self>,
        concurrency: usize,
        poll_interval: std::time::Duration,
    ) {
        let queues = self.queues.clone();
        super::run_queue_loop(
            self,
            queues,
            QUEUE_REFUND,
            concurrency,
            poll_interval,
            |worker, id| async move {
                if let Err(e) = worker.process(id).await {
                    error!(escrow_id = %id, error = %e, "Refund job failed unexpectedly");
                }
            },
        )
        .await;
    }

    pub async fn process(&self, escrow_id: Uuid) -> Result<()> {
        let escrow: Option<Escrow> =
            sqlx::query_as::<_, Escrow>("SELECT * FROM escrows WHERE id = $1")
                .bind(escrow_id)
                .fetch_optional(self.db.pool())
                .await?;

        let escrow = match escrow {
            Some(escrow) => escrow,
            None => {
                warn!(escrow_id = %escrow_id, "Refund job for unknown escrow, dropping");
                return Ok(());
            }
        };

        if !escrow.status()?.is_terminal() {
            warn!(
                escrow_id = %escrow_id,
                status = %escrow.status,
                "Refund job for non-terminal escrow, dropping"
            );
            return Ok(());
        }

        let chain_escrow_id = match &escrow.chain_escrow_id {
            Some(id) if escrow.onchain_status == OnchainStatus::Created.as_str() => id.clone(),
            _ => {
                // Nothing materialized on-chain (or already refunded);
                // the ledger sweep was the whole story.
                metrics::JOBS_COMPLETED.with_label_values(&[QUEUE_REFUND]).inc();
                return Ok(());
            }
        };

        let attempt = escrow.chain_attempts + 1;
        sqlx::query(
            "UPDATE escrows SET chain_attempts = $1, last_attempt_at = $2, updated_at = $2 WHERE id = $3",
        )
        .bind(attempt)
        .bind(Utc::now())
        .bind(escrow_id)
        .execute(self.db.pool())
        .await?;

        let result = self
            .retry
            .execute_with_retry(
                || async { self.chain.refund_escrow(&chain_escrow_id).await },
                "escrow-refund",
            )
            .await;

        match result {
            Ok(receipt) => {
                sqlx::query(
                    r#"
                    UPDATE escrows
                    SET onchain_status = $1, chain_tx_hash = $2, updated_at = $3
                    WHERE id = $4
                    "#,
                )
                .bind(OnchainStatus::Refunded.as_str())
                .bind(&receipt.tx_hash)
                .bind(Utc::now())
                .bind(escrow_id)
                .execute(self.db.pool())
                .await?;

                metrics::JOBS_COMPLETED.with_label_values(&[QUEUE_REFUND]).inc();
                info!(escrow_id = %escrow_id, tx_hash = %receipt.tx_hash, "On-chain refund completed");
                Ok(())
            }
            Err(e) if e.is_retryable() && attempt < self.max_attempts as i32 => {
                metrics::JOBS_RETRIED.with_label_values(&[QUEUE_REFUND]).inc();
                let delay = self.retry.calculate_delay(attempt as u32);
                warn!(
                    escrow_id = %escrow_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "On-chain refund failed, will retry"
                );
                self.queues.requeue_after(QUEUE_REFUND, escrow_id, delay);
                Ok(())
            }
            Err(e) => {
                sqlx::query(
                    "UPDATE escrows SET onchain_status = $1, updated_at = $2 WHERE id = $3",
                )
                .bind(OnchainStatus::Failed.as_str())
                .bind(Utc::now())
                .bind(escrow_id)
                .execute(self.db.pool())
                .await?;

                metrics::JOBS_FAILED_TERMINAL
                    .with_label_values(&[QUEUE_REFUND])
                    .inc();
                error!(
                    escrow_id = %escrow_id,
                    attempt,
                    error = %e,
                    "On-chain refund failed terminally, flagged for operator review"
                );
                Ok(())
            }
        }
    }
}
