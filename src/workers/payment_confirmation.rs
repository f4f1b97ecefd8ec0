//! Payment-confirmation job: release the approved amount on-chain, then
//! initiate the mobile-money disbursement to the merchant. The request is
//! completed only when the off-ramp completion webhook lands; this job's
//! responsibility ends at handing the payout to the rail.

use super::{JobQueues, QUEUE_CONFIRMATION};
use super::retry::RetryStrategy;
use crate::crypto::PiiCipher;
use crate::database::Database;
use crate::errors::Result;
use crate::metrics;
use crate::models::{FundingStatus, OnchainStatus, PaymentRequest, PaymentRequestStatus};
use crate::rails::{ChainClient, DisbursementRequest, MobileMoneyClient, StablecoinTransfer};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct PaymentConfirmationWorker {
    db: Arc<Database>,
    chain: Arc<dyn ChainClient>,
    mobile_money: Arc<dyn MobileMoneyClient>,
    cipher: Arc<dyn PiiCipher>,
    queues: Arc<JobQueues>,
    retry: RetryStrategy,
    max_attempts: u32,
    treasury_address: String,
}

impl PaymentConfirmationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        chain: Arc<dyn ChainClient>,
        mobile_money: Arc<dyn MobileMoneyClient>,
        cipher: Arc<dyn PiiCipher>,
        queues: Arc<JobQueues>,
        retry: RetryStrategy,
        max_attempts: u32,
        treasury_address: String,
    ) -> Self {
        Self {
            db,
            chain,
            mobile_money,
            cipher,
            queues,
            retry,
            max_attempts,
            treasury_address,
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
            QUEUE_CONFIRMATION,
            concurrency,
            poll_interval,
            |worker, id| async move {
                if let Err(e) = worker.process(id).await {
                    error!(payment_request_id = %id, error = %e, "Payment confirmation job failed unexpectedly");
                }
            },
        )
        .await;
    }

    pub async fn process(&self, payment_request_id: Uuid) -> Result<()> {
        let request = match self.load_request(payment_request_id).await? {
            Some(request) => request,
            None => {
                warn!(payment_request_id = %payment_request_id, "Confirmation job for unknown request, dropping");
                return Ok(());
            }
        };

        match request.status()? {
            PaymentRequestStatus::Approved => {}
            PaymentRequestStatus::Completed => {
                metrics::JOBS_COMPLETED
                    .with_label_values(&[QUEUE_CONFIRMATION])
                    .inc();
                return Ok(());
            }
            other => {
                warn!(
                    payment_request_id = %payment_request_id,
                    status = other.as_str(),
                    "Confirmation job for non-approved request, dropping"
                );
                return Ok(());
            }
        }

        if request.settlement_attempts >= self.max_attempts as i32 {
            // Already flagged terminally; operator review owns it now.
            return Ok(());
        }

        let attempt = request.settlement_attempts + 1;
        sqlx::query(
            r#"
            UPDATE payment_requests
            SET settlement_attempts = $1, last_attempt_at = $2, updated_at = $2,
                onchain_status = CASE WHEN onchain_status = 'none' THEN 'submitted' ELSE onchain_status END
            WHERE id = $3
            "#,
        )
        .bind(attempt)
        .bind(Utc::now())
        .bind(payment_request_id)
        .execute(self.db.pool())
        .await?;

        match self.settle(&request).await {
            Ok(()) => {
                metrics::JOBS_COMPLETED
                    .with_label_values(&[QUEUE_CONFIRMATION])
                    .inc();
                info!(payment_request_id = %payment_request_id, "Payment handed to rails");
                Ok(())
            }
            Err(e) if e.is_retryable() && attempt < self.max_attempts as i32 => {
                metrics::JOBS_RETRIED
                    .with_label_values(&[QUEUE_CONFIRMATION])
                    .inc();
                let delay = self.retry.calculate_delay(attempt as u32);
                warn!(
                    payment_request_id = %payment_request_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Payment confirmation failed, will retry"
                );
                self.queues
                    .requeue_after(QUEUE_CONFIRMATION, payment_request_id, delay);
                Ok(())
            }
            Err(e) => {
                // The request stays `approved`: completing it here would lie,
                // and retrying a money-moving call without review risks
                // double payment. Balances are untouched beyond the
                // approval-time reservation.
                metrics::JOBS_FAILED_TERMINAL
                    .with_label_values(&[QUEUE_CONFIRMATION])
                    .inc();
                error!(
                    payment_request_id = %payment_request_id,
                    attempt,
                    error = %e,
                    "Payment confirmation failed terminally, flagged for operator review"
                );
                Ok(())
            }
        }
    }

    /// The two external legs, each idempotent against partial prior runs.
    async fn settle(&self, request: &PaymentRequest) -> Result<()> {
        let tx_hash = self.release_on_chain(request).await?;
        self.initiate_offramp(request, &tx_hash).await
    }

    /// On-chain release, guarded by the provider-side payment-id check so a
    /// retry racing a prior success cannot double-spend.
    async fn release_on_chain(&self, request: &PaymentRequest) -> Result<String> {
        if request.onchain_status == OnchainStatus::Released.as_str() {
            return Ok(request.chain_tx_hash.clone().unwrap_or_default());
        }

        let already_used = self
            .retry
            .execute_with_retry(
                || async { self.chain.is_payment_id_used(request.id).await },
                "payment-id-guard",
            )
            .await?;

        let tx_hash = if already_used {
            info!(
                payment_request_id = %request.id,
                "Payment id already used on-chain, skipping transfer"
            );
            request.chain_tx_hash.clone().unwrap_or_default()
        } else {
            let transfer = StablecoinTransfer {
                to_address: self.treasury_address.clone(),
                amount_minor: request.amount_minor,
                payment_id: request.id,
            };
            let receipt = self
                .retry
                .execute_with_retry(
                    || async { self.chain.transfer_stablecoin(&transfer).await },
                    "stablecoin-release",
                )
                .await?;
            receipt.tx_hash
        };

        sqlx::query(
            r#"
            UPDATE payment_requests
            SET onchain_status = $1, chain_tx_hash = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(OnchainStatus::Released.as_str())
        .bind(&tx_hash)
        .bind(Utc::now())
        .bind(request.id)
        .execute(self.db.pool())
        .await?;

        Ok(tx_hash)
    }

    /// Hand the payout to the mobile-money rail, once. An off-ramp row that
    /// is pending or confirmed means a prior run already initiated it.
    async fn initiate_offramp(&self, request: &PaymentRequest, onchain_ref: &str) -> Result<()> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM offramp_transactions
            WHERE payment_request_id = $1 AND status IN ('pending', 'confirmed')
            "#,
        )
        .bind(request.id)
        .fetch_optional(self.db.pool())
        .await?;

        if existing.is_some() {
            return Ok(());
        }

        let merchant_phone = self.cipher.decrypt(&request.merchant_phone_cipher)?;
        let disbursement = DisbursementRequest {
            phone: merchant_phone,
            amount_minor: request.amount_minor,
            onchain_ref: onchain_ref.to_string(),
        };

        let initiation = self
            .retry
            .execute_with_retry(
                || async { self.mobile_money.disburse(&disbursement).await },
                "merchant-disbursement",
            )
            .await?;

        sqlx::query(
            r#"
            INSERT INTO offramp_transactions (
                id, payment_request_id, external_tx_code, amount_minor, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.id)
        .bind(&initiation.external_tx_code)
        .bind(request.amount_minor)
        .bind(FundingStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        info!(
            payment_request_id = %request.id,
            code = %initiation.external_tx_code,
            "Merchant disbursement initiated"
        );
        Ok(())
    }

    async fn load_request(&self, payment_request_id: Uuid) -> Result<Option<PaymentRequest>> {
        sqlx::query_as::<_, PaymentRequest>("SELECT * FROM payment_requests WHERE id = $1")
            .bind(payment_request_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(Into::into)
    }
}
