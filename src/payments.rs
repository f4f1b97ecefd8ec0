//! Payment-request approval workflow.
//!
//! Creation reserves funds through the ledger engine; approval is
//! sender-authorized and enqueues the settlement job; rejection compensates
//! the optimistic reservation. `completed` is reached only when the
//! off-ramp completion webhook reports the payout landed.

use crate::audit::{self, AuditEntry};
use crate::crypto::PiiCipher;
use crate::database::Database;
use crate::errors::{EscrowEngineError, Result};
use crate::ledger::{LedgerEngine, ReserveRequest};
use crate::models::{
    ApprovePaymentRequest, CreatePaymentRequestRequest, FundingStatus, OfframpTransaction,
    PaymentRequest, PaymentRequestStatus, RejectPaymentRequest, ReservationResponse,
};
use crate::workers::{JobQueues, QUEUE_CONFIRMATION};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// Result of applying an off-ramp completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfframpOutcome {
    Completed { payment_request_id: Uuid },
    AlreadyProcessed,
    Failed { payment_request_id: Uuid },
}

pub struct PaymentService {
    db: Arc<Database>,
    ledger: Arc<LedgerEngine>,
    cipher: Arc<dyn PiiCipher>,
    queues: Arc<JobQueues>,
}

impl PaymentService {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<LedgerEngine>,
        cipher: Arc<dyn PiiCipher>,
        queues: Arc<JobQueues>,
    ) -> Self {
        PaymentService {
            db,
            ledger,
            cipher,
            queues,
        }
    }

    pub async fn create_request(
        &self,
        request: CreatePaymentRequestRequest,
    ) -> Result<ReservationResponse> {
        request
            .validate()
            .map_err(|e| EscrowEngineError::Validation(e.to_string()))?;

        let merchant_phone_cipher = self.cipher.encrypt(&request.merchant_phone)?;
        let merchant_phone_index = self.cipher.hash_for_lookup(&request.merchant_phone);

        let outcome = self
            .ledger
            .reserve_and_deduct(ReserveRequest {
                escrow_id: request.escrow_id,
                category_id: request.category_id,
                recipient_user_id: request.recipient_user_id,
                amount_minor: request.amount_minor,
                bypass_daily_cap: false,
                merchant_phone_cipher,
                merchant_phone_index,
            })
            .await?;

        Ok(ReservationResponse {
            payment_request_id: outcome.payment_request_id,
            status: PaymentRequestStatus::PendingApproval,
            remaining_daily_minor: outcome.remaining_daily_minor,
        })
    }

    /// Approve and hand the settlement to the orchestrator. The enqueue is
    /// keyed by request id, so repeated approvals of a racing client
    /// coalesce into one unit of work.
    pub async fn approve(
        &self,
        payment_request_id: Uuid,
        request: ApprovePaymentRequest,
    ) -> Result<PaymentRequest> {
        let approved = self
            .ledger
            .approve(
                payment_request_id,
                request.approver_user_id,
                request.admin_override,
            )
            .await?;

        self.queues
            .enqueue(QUEUE_CONFIRMATION, payment_request_id)
            .await?;

        Ok(approved)
    }

    pub async fn reject(
        &self,
        payment_request_id: Uuid,
        request: RejectPaymentRequest,
    ) -> Result<PaymentRequest> {
        request
            .validate()
            .map_err(|e| EscrowEngineError::Validation(e.to_string()))?;

        self.ledger
            .reject(payment_request_id, request.rejector_user_id, &request.reason)
            .await
    }

    pub async fn get_request(&self, payment_request_id: Uuid) -> Result<PaymentRequest> {
        sqlx::query_as::<_, PaymentRequest>("SELECT * FROM payment_requests WHERE id = $1")
            .bind(payment_request_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(EscrowEngineError::PaymentRequestNotFound(payment_request_id))
    }

    /// Apply an off-ramp completion callback: one transaction locks the
    /// off-ramp row (idempotency key is the external transaction code),
    /// finalizes the payment request on success and records the receipt.
    pub async fn finalize_offramp(
        &self,
        external_tx_code: &str,
        success: bool,
        receipt_ref: Option<&str>,
    ) -> Result<OfframpOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let offramp = sqlx::query_as::<_, OfframpTransaction>(
            "SELECT * FROM offramp_transactions WHERE external_tx_code = $1 FOR UPDATE",
        )
        .bind(external_tx_code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EscrowEngineError::UnknownTransactionCode(external_tx_code.to_string()))?;

        if FundingStatus::parse(&offramp.status)? != FundingStatus::Pending {
            return Ok(OfframpOutcome::AlreadyProcessed);
        }

        let now = Utc::now();
        let outcome = if success {
            self.ledger
                .complete_payment_request_in(&mut tx, offramp.payment_request_id)
                .await?;

            sqlx::query(
                r#"
                UPDATE offramp_transactions
                SET status = $1, receipt_ref = $2, updated_at = $3
                WHERE id = $4
                "#,
            )
            .bind(FundingStatus::Confirmed.as_str())
            .bind(receipt_ref)
            .bind(now)
            .bind(offramp.id)
            .execute(&mut *tx)
            .await?;

            OfframpOutcome::Completed {
                payment_request_id: offramp.payment_request_id,
            }
        } else {
            // The payout bounced. The request stays `approved` and the
            // failed row is what the operator reconciliation query surfaces.
            sqlx::query(
                "UPDATE offramp_transactions SET status = $1, updated_at = $2 WHERE id = $3",
            )
            .bind(FundingStatus::Failed.as_str())
            .bind(now)
            .bind(offramp.id)
            .execute(&mut *tx)
            .await?;

            OfframpOutcome::Failed {
                payment_request_id: offramp.payment_request_id,
            }
        };

        audit::record(
            &mut *tx,
            AuditEntry {
                actor: "mobile-money-webhook",
                action: "offramp.finalize",
                entity_type: "offramp_transaction",
                entity_id: offramp.id.to_string(),
                before: Some(serde_json::json!({ "status": "pending" })),
                after: Some(serde_json::json!({
                    "status": if success { "confirmed" } else { "failed" },
                    "receipt_ref": receipt_ref,
                })),
                outcome: if success { "confirmed" } else { "failed" },
            },
        )
        .await?;

        tx.commit().await?;

        match &outcome {
            OfframpOutcome::Completed { payment_request_id } => {
                info!(
                    payment_request_id = %payment_request_id,
                    code = external_tx_code,
                    "Off-ramp payout confirmed, request completed"
                );
            }
            OfframpOutcome::Failed { payment_request_id } => {
                warn!(
                    payment_request_id = %payment_request_id,
                    code = external_tx_code,
                    "Off-ramp payout failed, flagged for operator review"
                );
            }
            OfframpOutcome::AlreadyProcessed => {}
        }

        Ok(outcome)
    }
}
