//! Expiry sweeper: periodically finds active escrows past their expiry,
//! sweeps the remaining balance out as an `expiry_return` settlement and
//! hands the on-chain leg to the refund queue.

use super::{JobQueues, QUEUE_REFUND};
use crate::database::Database;
use crate::errors::EscrowEngineError;
use crate::ledger::LedgerEngine;
use crate::models::SettlementKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

pub struct ExpirySweeper {
    db: Arc<Database>,
    ledger: Arc<LedgerEngine>,
    queues: Arc<JobQueues>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<LedgerEngine>,
        queues: Arc<JobQueues>,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            queues,
            interval,
        }
    }

    pub async fn run_forever(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.interval).await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Expiry sweep pass failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> crate::errors::Result<usize> {
        let expired: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM escrows
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < NOW()
            ORDER BY expires_at
            LIMIT 100
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut swept = 0;
        for (escrow_id,) in expired {
            match self
                .ledger
                .sweep_terminal(escrow_id, SettlementKind::ExpiryReturn, "expiry-sweeper")
                .await
            {
                Ok(amount) => {
                    swept += 1;
                    info!(escrow_id = %escrow_id, swept_minor = amount, "Expired escrow swept");
                    self.queues.enqueue(QUEUE_REFUND, escrow_id).await?;
                }
                // Lost the race to another transition; nothing to do.
                Err(EscrowEngineError::InvalidStateTransition { .. }) => {}
                Err(e) => {
                    error!(escrow_id = %escrow_id, error = %e, "Failed to sweep expired escrow");
                }
            }
        }

        Ok(swept)
    }
}
