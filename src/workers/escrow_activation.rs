//! Escrow-activation job: materialize a confirmed escrow on-chain and write
//! the chain references back onto the row.

use super::{JobQueues, QUEUE_ACTIVATION};
use super::retry::RetryStrategy;
use crate::database::Database;
use crate::errors::Result;
use crate::metrics;
use crate::models::{Escrow, OnchainStatus};
use crate::rails::{ChainClient, ChainEscrowSpec};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct EscrowActivationWorker {
    db: Arc<Database>,
    chain: Arc<dyn ChainClient>,
    queues: Arc<JobQueues>,
    retry: RetryStrategy,
    max_attempts: u32,
}

impl EscrowActivationWorker {
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
            QUEUE_ACTIVATION,
            concurrency,
            poll_interval,
            |worker, id| async move {
                if let Err(e) = worker.process(id).await {
                    error!(escrow_id = %id, error = %e, "Escrow activation job failed unexpectedly");
                }
            },
        )
        .await;
    }

    pub async fn process(&self, escrow_id: Uuid) -> Result<()> {
        let escrow = match self.load_escrow(escrow_id).await? {
            Some(escrow) => escrow,
            None => {
                warn!(escrow_id = %escrow_id, "Activation job for unknown escrow, dropping");
                return Ok(());
            }
        };

        match escrow.onchain_status.as_str() {
            "created" | "released" | "refunded" => {
                // A prior attempt landed; nothing to do.
                metrics::JOBS_COMPLETED
                    .with_label_values(&[QUEUE_ACTIVATION])
                    .inc();
                return Ok(());
            }
            "failed" if escrow.chain_attempts >= self.max_attempts as i32 => {
                // Terminal; waiting on operator review, never retried blindly.
                return Ok(());
            }
            _ => {}
        }

        let attempt = escrow.chain_attempts + 1;
        sqlx::query(
            r#"
            UPDATE escrows
            SET onchain_status = $1, chain_attempts = $2, last_attempt_at = $3, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(OnchainStatus::Submitted.as_str())
        .bind(attempt)
        .bind(Utc::now())
        .bind(escrow_id)
        .execute(self.db.pool())
        .await?;

        let spec = ChainEscrowSpec {
            reference: escrow.id,
            amount_minor: escrow.total_minor,
            expires_at: escrow.expires_at,
        };

        let result = self
            .retry
            .execute_with_retry(|| async { self.chain.create_escrow(&spec).await }, "escrow-activation")
            .await;

        match result {
            Ok(created) => {
                sqlx::query(
                    r#"
                    UPDATE escrows
                    SET onchain_status = $1, chain_escrow_id = $2, chain_tx_hash = $3, updated_at = $4
                    WHERE id = $5
                    "#,
                )
                .bind(OnchainStatus::Created.as_str())
                .bind(&created.chain_escrow_id)
                .bind(&created.tx_hash)
                .bind(Utc::now())
                .bind(escrow_id)
                .execute(self.db.pool())
                .await?;

                metrics::JOBS_COMPLETED
                    .with_label_values(&[QUEUE_ACTIVATION])
                    .inc();
                info!(
                    escrow_id = %escrow_id,
                    chain_escrow_id = %created.chain_escrow_id,
                    "Escrow materialized on-chain"
                );
                Ok(())
            }
            Err(e) if e.is_retryable() && attempt < self.max_attempts as i32 => {
                metrics::JOBS_RETRIED
                    .with_label_values(&[QUEUE_ACTIVATION])
                    .inc();
                let delay = self.retry.calculate_delay(attempt as u32);
                warn!(
                    escrow_id = %escrow_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Escrow activation failed, will retry"
                );
                self.queues.requeue_after(QUEUE_ACTIVATION, escrow_id, delay);
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
                    .with_label_values(&[QUEUE_ACTIVATION])
                    .inc();
                error!(
                    escrow_id = %escrow_id,
                    attempt,
                    error = %e,
                    "Escrow activation failed terminally, flagged for operator review"
                );
                Ok(())
            }
        }
    }

    async fn load_escrow(&self, escrow_id: Uuid) -> Result<Option<Escrow>> {
        sqlx::query_as::<_, Escrow>("SELECT * FROM escrows WHERE id = $1")
            .bind(escrow_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Into::into)
    }
}
