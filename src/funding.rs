//! Funding-intent -> escrow-activation workflow.
//!
//! Two entry paths, one terminal confirmation. Intent-first persists the
//! declared plan and only materializes the escrow on confirmed funding, so
//! an abandoned deposit never leaves an orphaned `pending_deposit` row.
//! Escrow-first (legacy) creates the row up front and confirmation flips
//! its status. Both converge on [`FundingService::confirm_by_code`], which
//! runs in a single transaction behind a row lock on the funding record:
//! concurrent webhook and fallback-poll deliveries for the same code are
//! resolved by the lock plus the `pending` status check, nothing else.

use crate::audit::{self, AuditEntry};
use crate::config::{FundingConfig, LedgerConfig};
use crate::crypto::PiiCipher;
use crate::database::Database;
use crate::errors::{EscrowEngineError, Result};
use crate::ledger::arith;
use crate::metrics;
use crate::models::{
    CategorySpec, CreateEscrowRequest, CreateFundingIntentRequest, Escrow, EscrowStatus,
    EscrowView, FundingIntent, FundingIntentResponse, FundingStatus, OnrampTransaction,
    SpendingCategory,
};
use crate::rails::{ChainClient, MobileMoneyClient, OnRampRequest};
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use sqlx::{Postgres, Transaction};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// Which funding record a transaction code resolved to.
pub enum FundingOrigin {
    IntentFirst(FundingIntent),
    EscrowFirst(OnrampTransaction),
}

/// Result of feeding a confirmation through the shared terminal function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Funding applied; the escrow (new or pre-existing) is active and
    /// ready for on-chain materialization.
    Confirmed { escrow_id: Uuid },
    /// The record had already left `pending`; duplicate deliveries land here.
    AlreadyProcessed,
    /// Provider reported failure or the amount check refused the funding.
    Failed { reason: String },
}

pub struct FundingService {
    db: Arc<Database>,
    mobile_money: Arc<dyn MobileMoneyClient>,
    chain: Arc<dyn ChainClient>,
    cipher: Arc<dyn PiiCipher>,
    config: FundingConfig,
    ledger_config: LedgerConfig,
    fallback_limiter: DefaultDirectRateLimiter,
}

impl FundingService {
    pub fn new(
        db: Arc<Database>,
        mobile_money: Arc<dyn MobileMoneyClient>,
        chain: Arc<dyn ChainClient>,
        cipher: Arc<dyn PiiCipher>,
        config: FundingConfig,
        ledger_config: LedgerConfig,
    ) -> Self {
        let per_minute = NonZeroU32::new(config.fallback_polls_per_minute.max(1))
            .expect("clamped to at least 1");
        let fallback_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        FundingService {
            db,
            mobile_money,
            chain,
            cipher,
            config,
            ledger_config,
            fallback_limiter,
        }
    }

    /// Intent-first entry: declare the plan, request an on-ramp, persist the
    /// intent. No escrow row exists until funding confirms.
    pub async fn create_intent(
        &self,
        request: CreateFundingIntentRequest,
    ) -> Result<FundingIntentResponse> {
        request
            .validate()
            .map_err(|e| EscrowEngineError::Validation(e.to_string()))?;
        validate_category_breakdown(&request.categories, request.total_minor)?;

        let quoted_rate = self.mobile_money.quote_exchange_rate().await?;

        let initiation = self
            .mobile_money
            .initiate_on_ramp(&OnRampRequest {
                phone: request.sender_phone.clone(),
                amount_minor: request.total_minor,
            })
            .await?;

        let intent_id = Uuid::new_v4();
        let now = Utc::now();
        let recipient_phone_cipher = self.cipher.encrypt(&request.recipient_phone)?;
        let recipient_phone_index = self.cipher.hash_for_lookup(&request.recipient_phone);

        sqlx::query(
            r#"
            INSERT INTO funding_intents (
                id, sender_user_id, recipient_user_id, recipient_phone_cipher,
                recipient_phone_index, expected_amount_minor, quoted_rate,
                categories, external_tx_code, status, escrow_expires_at,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            "#,
        )
        .bind(intent_id)
        .bind(request.sender_user_id)
        .bind(request.recipient_user_id)
        .bind(&recipient_phone_cipher)
        .bind(&recipient_phone_index)
        .bind(request.total_minor)
        .bind(quoted_rate)
        .bind(serde_json::to_value(&request.categories)?)
        .bind(&initiation.external_tx_code)
        .bind(FundingStatus::Pending.as_str())
        .bind(request.escrow_expires_at)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        audit::record(
            self.db.pool(),
            AuditEntry {
                actor: &request.sender_user_id.to_string(),
                action: "funding_intent.create",
                entity_type: "funding_intent",
                entity_id: intent_id.to_string(),
                before: None,
                after: Some(serde_json::json!({
                    "expected_amount_minor": request.total_minor,
                    "external_tx_code": initiation.external_tx_code,
                })),
                outcome: "pending",
            },
        )
        .await?;

        info!(
            intent_id = %intent_id,
            code = %initiation.external_tx_code,
            amount_minor = request.total_minor,
            "Funding intent created"
        );

        Ok(FundingIntentResponse {
            intent_id,
            external_tx_code: initiation.external_tx_code,
            status: FundingStatus::Pending,
            expected_amount_minor: request.total_minor,
            quoted_rate: Some(quoted_rate),
            escrow_id: None,
            failure_reason: None,
        })
    }

    /// Escrow-first (legacy) entry: the escrow row exists immediately in
    /// `pending_deposit` with a linked on-ramp transaction.
    pub async fn create_escrow_direct(&self, request: CreateEscrowRequest) -> Result<Escrow> {
        request
            .validate()
            .map_err(|e| EscrowEngineError::Validation(e.to_string()))?;
        validate_category_breakdown(&request.categories, request.total_minor)?;

        let initiation = self
            .mobile_money
            .initiate_on_ramp(&OnRampRequest {
                phone: request.sender_phone.clone(),
                amount_minor: request.total_minor,
            })
            .await?;

        let mut tx = self.db.pool().begin().await?;

        let escrow_id = insert_escrow_with_categories(
            &mut tx,
            request.sender_user_id,
            request.recipient_user_id,
            request.total_minor,
            &request.categories,
            request.expires_at,
            EscrowStatus::PendingDeposit,
            &self.ledger_config.one_time_categories,
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO onramp_transactions (
                id, escrow_id, external_tx_code, expected_amount_minor, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(escrow_id)
        .bind(&initiation.external_tx_code)
        .bind(request.total_minor)
        .bind(FundingStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry {
                actor: &request.sender_user_id.to_string(),
                action: "escrow.create_direct",
                entity_type: "escrow",
                entity_id: escrow_id.to_string(),
                before: None,
                after: Some(serde_json::json!({
                    "total_minor": request.total_minor,
                    "external_tx_code": initiation.external_tx_code,
                })),
                outcome: "pending_deposit",
            },
        )
        .await?;

        tx.commit().await?;

        info!(escrow_id = %escrow_id, "Escrow created (escrow-first), awaiting deposit");
        self.get_escrow_row(escrow_id).await
    }

    /// Shared terminal confirmation, reached from the webhook processor and
    /// the fallback reconciliation poll alike. One transaction: lock the
    /// funding record, check `pending`, verify the reported amount, then
    /// materialize or activate the escrow.
    pub async fn confirm_by_code(
        &self,
        external_tx_code: &str,
        reported_amount_minor: i64,
        success: bool,
        source: &str,
    ) -> Result<ConfirmOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let origin = lock_funding_record(&mut tx, external_tx_code).await?;

        let outcome = match origin {
            FundingOrigin::IntentFirst(intent) => {
                self.confirm_intent(&mut tx, intent, reported_amount_minor, success, source)
                    .await?
            }
            FundingOrigin::EscrowFirst(onramp) => {
                self.confirm_onramp(&mut tx, onramp, reported_amount_minor, success, source)
                    .await?
            }
        };

        tx.commit().await?;

        match &outcome {
            ConfirmOutcome::Confirmed { escrow_id } => {
                metrics::FUNDING_CONFIRMED.inc();
                info!(code = external_tx_code, escrow_id = %escrow_id, source, "Funding confirmed");
            }
            ConfirmOutcome::AlreadyProcessed => {
                info!(code = external_tx_code, source, "Funding confirmation was a no-op");
            }
            ConfirmOutcome::Failed { reason } => {
                metrics::FUNDING_FAILED.with_label_values(&[failure_label(reason)]).inc();
                warn!(code = external_tx_code, reason = %reason, source, "Funding failed");
            }
        }

        Ok(outcome)
    }

    async fn confirm_intent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        intent: FundingIntent,
        reported_amount_minor: i64,
        success: bool,
        source: &str,
    ) -> Result<ConfirmOutcome> {
        if intent.status()? != FundingStatus::Pending {
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        let now = Utc::now();

        if !success {
            let reason = "provider reported failure".to_string();
            mark_intent_failed(tx, intent.id, &reason, now).await?;
            return Ok(ConfirmOutcome::Failed { reason });
        }

        if reported_amount_minor < intent.expected_amount_minor {
            let reason = format!(
                "underfunded: reported {} expected {}",
                reported_amount_minor, intent.expected_amount_minor
            );
            mark_intent_failed(tx, intent.id, &reason, now).await?;
            return Ok(ConfirmOutcome::Failed { reason });
        }

        // Funds are confirmed: materialize the escrow and its categories
        // from the stored breakdown, exactly once.
        let specs = intent.category_specs()?;
        let escrow_id = insert_escrow_with_categories(
            tx,
            intent.sender_user_id,
            intent.recipient_user_id,
            intent.expected_amount_minor,
            &specs,
            intent.escrow_expires_at,
            EscrowStatus::Active,
            &self.ledger_config.one_time_categories,
        )
        .await?;

        sqlx::query(
            "UPDATE funding_intents SET status = $1, escrow_id = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(FundingStatus::Confirmed.as_str())
        .bind(escrow_id)
        .bind(now)
        .bind(intent.id)
        .execute(&mut **tx)
        .await?;

        audit::record(
            &mut **tx,
            AuditEntry {
                actor: source,
                action: "funding_intent.confirm",
                entity_type: "funding_intent",
                entity_id: intent.id.to_string(),
                before: Some(serde_json::json!({ "status": "pending" })),
                after: Some(serde_json::json!({
                    "status": "confirmed",
                    "escrow_id": escrow_id,
                    "reported_amount_minor": reported_amount_minor,
                })),
                outcome: "confirmed",
            },
        )
        .await?;

        Ok(ConfirmOutcome::Confirmed { escrow_id })
    }

    async fn confirm_onramp(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        onramp: OnrampTransaction,
        reported_amount_minor: i64,
        success: bool,
        source: &str,
    ) -> Result<ConfirmOutcome> {
        if FundingStatus::parse(&onramp.status)? != FundingStatus::Pending {
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        let now = Utc::now();

        // Escrow lock follows the funding-record lock; ordering is stable
        // because every confirmation path locks the funding record first.
        let escrow =
            sqlx::query_as::<_, Escrow>("SELECT * FROM escrows WHERE id = $1 FOR UPDATE")
                .bind(onramp.escrow_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or(EscrowEngineError::EscrowNotFound(onramp.escrow_id))?;

        let failure = if !success {
            Some("provider reported failure".to_string())
        } else if reported_amount_minor < onramp.expected_amount_minor {
            Some(format!(
                "underfunded: reported {} expected {}",
                reported_amount_minor, onramp.expected_amount_minor
            ))
        } else {
            None
        };

        if let Some(reason) = failure {
            sqlx::query(
                "UPDATE onramp_transactions SET status = $1, failure_reason = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(FundingStatus::Failed.as_str())
            .bind(&reason)
            .bind(now)
            .bind(onramp.id)
            .execute(&mut **tx)
            .await?;

            // The declared escrow never received funds; cancel it without a
            // settlement (there is nothing to sweep).
            if escrow.status()? == EscrowStatus::PendingDeposit {
                sqlx::query("UPDATE escrows SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(EscrowStatus::Cancelled.as_str())
                    .bind(now)
                    .bind(escrow.id)
                    .execute(&mut **tx)
                    .await?;
            }

            audit::record(
                &mut **tx,
                AuditEntry {
                    actor: source,
                    action: "onramp.fail",
                    entity_type: "onramp_transaction",
                    entity_id: onramp.id.to_string(),
                    before: Some(serde_json::json!({ "status": "pending" })),
                    after: Some(serde_json::json!({ "status": "failed", "reason": reason })),
                    outcome: "failed",
                },
            )
            .await?;

            return Ok(ConfirmOutcome::Failed { reason });
        }

        let escrow_status = escrow.status()?;
        if !escrow_status.can_transition_to(EscrowStatus::Active) {
            return Err(EscrowEngineError::InvalidStateTransition {
                entity: "escrow",
                from: escrow.status.clone(),
                to: EscrowStatus::Active.as_str().to_string(),
            });
        }

        sqlx::query("UPDATE onramp_transactions SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(FundingStatus::Confirmed.as_str())
            .bind(now)
            .bind(onramp.id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("UPDATE escrows SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(EscrowStatus::Active.as_str())
            .bind(now)
            .bind(escrow.id)
            .execute(&mut **tx)
            .await?;

        audit::record(
            &mut **tx,
            AuditEntry {
                actor: source,
                action: "onramp.confirm",
                entity_type: "escrow",
                entity_id: escrow.id.to_string(),
                before: Some(serde_json::json!({ "status": "pending_deposit" })),
                after: Some(serde_json::json!({ "status": "active" })),
                outcome: "active",
            },
        )
        .await?;

        Ok(ConfirmOutcome::Confirmed { escrow_id: escrow.id })
    }

    /// Status poll. When the intent has sat `pending` past the configured
    /// age, consult the provider's transaction lookup (rate limited) and
    /// feed any terminal answer through the shared confirmation. Never
    /// finalizes without the amount check inside `confirm_by_code`.
    pub async fn get_intent(&self, intent_id: Uuid) -> Result<FundingIntentResponse> {
        let intent = self.get_intent_row(intent_id).await?;

        if intent.status()? == FundingStatus::Pending {
            let age = Utc::now() - intent.created_at;
            if age.num_seconds() >= self.config.fallback_poll_min_age_secs
                && self.fallback_limiter.check().is_ok()
            {
                self.reconcile_pending_intent(&intent).await;
            }
        }

        let intent = self.get_intent_row(intent_id).await?;
        Ok(FundingIntentResponse {
            intent_id: intent.id,
            external_tx_code: intent.external_tx_code.clone(),
            status: intent.status()?,
            expected_amount_minor: intent.expected_amount_minor,
            quoted_rate: intent.quoted_rate,
            escrow_id: intent.escrow_id,
            failure_reason: intent.failure_reason.clone(),
        })
    }

    async fn reconcile_pending_intent(&self, intent: &FundingIntent) {
        match self
            .mobile_money
            .lookup_transaction(&intent.external_tx_code)
            .await
        {
            Ok(Some(status)) if status.finished => {
                info!(
                    intent_id = %intent.id,
                    code = %intent.external_tx_code,
                    "Fallback reconciliation found terminal provider state"
                );
                if let Err(e) = self
                    .confirm_by_code(
                        &intent.external_tx_code,
                        status.amount_minor,
                        status.succeeded,
                        "fallback-reconciliation",
                    )
                    .await
                {
                    warn!(intent_id = %intent.id, error = %e, "Fallback reconciliation failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                // Poll failures are not surfaced to the client; the webhook
                // remains the authoritative path.
                warn!(intent_id = %intent.id, error = %e, "Fallback provider lookup failed");
            }
        }
    }

    pub async fn get_escrow_view(&self, escrow_id: Uuid) -> Result<EscrowView> {
        let escrow = self.get_escrow_row(escrow_id).await?;

        let categories = sqlx::query_as::<_, SpendingCategory>(
            "SELECT * FROM spending_categories WHERE escrow_id = $1 ORDER BY name",
        )
        .bind(escrow_id)
        .fetch_all(self.db.pool())
        .await?;

        let onchain = match &escrow.chain_escrow_id {
            Some(chain_id) => self.chain.get_escrow(chain_id).await.ok(),
            None => None,
        };

        Ok(EscrowView {
            escrow,
            categories,
            onchain,
        })
    }

    pub async fn get_escrow_row(&self, escrow_id: Uuid) -> Result<Escrow> {
        sqlx::query_as::<_, Escrow>("SELECT * FROM escrows WHERE id = $1")
            .bind(escrow_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(EscrowEngineError::EscrowNotFound(escrow_id))
    }

    async fn get_intent_row(&self, intent_id: Uuid) -> Result<FundingIntent> {
        sqlx::query_as::<_, FundingIntent>("SELECT * FROM funding_intents WHERE id = $1")
            .bind(intent_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(EscrowEngineError::FundingIntentNotFound(intent_id))
    }
}

fn validate_category_breakdown(specs: &[CategorySpec], total_minor: i64) -> Result<()> {
    for spec in specs {
        spec.validate()
            .map_err(|e| EscrowEngineError::Validation(e.to_string()))?;
    }

    let mut names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != specs.len() {
        return Err(EscrowEngineError::Validation(
            "duplicate category names".to_string(),
        ));
    }

    let allocations: Vec<i64> = specs.iter().map(|s| s.allocated_minor).collect();
    if !arith::allocations_match_total(&allocations, total_minor) {
        return Err(EscrowEngineError::Validation(format!(
            "category allocations must sum to the declared total {}",
            total_minor
        )));
    }

    Ok(())
}

fn failure_label(reason: &str) -> &'static str {
    if reason.starts_with("underfunded") {
        "underfunded"
    } else {
        "provider_failed"
    }
}

async fn lock_funding_record(
    tx: &mut Transaction<'_, Postgres>,
    external_tx_code: &str,
) -> Result<FundingOrigin> {
    let intent = sqlx::query_as::<_, FundingIntent>(
        "SELECT * FROM funding_intents WHERE external_tx_code = $1 FOR UPDATE",
    )
    .bind(external_tx_code)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(intent) = intent {
        return Ok(FundingOrigin::IntentFirst(intent));
    }

    let onramp = sqlx::query_as::<_, OnrampTransaction>(
        "SELECT * FROM onramp_transactions WHERE external_tx_code = $1 FOR UPDATE",
    )
    .bind(external_tx_code)
    .fetch_optional(&mut **tx)
    .await?;

    match onramp {
        Some(onramp) => Ok(FundingOrigin::EscrowFirst(onramp)),
        None => Err(EscrowEngineError::UnknownTransactionCode(
            external_tx_code.to_string(),
        )),
    }
}

async fn mark_intent_failed(
    tx: &mut Transaction<'_, Postgres>,
    intent_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE funding_intents SET status = $1, failure_reason = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(FundingStatus::Failed.as_str())
    .bind(reason)
    .bind(now)
    .bind(intent_id)
    .execute(&mut **tx)
    .await?;

    audit::record(
        &mut **tx,
        AuditEntry {
            actor: "funding-confirmation",
            action: "funding_intent.fail",
            entity_type: "funding_intent",
            entity_id: intent_id.to_string(),
            before: Some(serde_json::json!({ "status": "pending" })),
            after: Some(serde_json::json!({ "status": "failed", "reason": reason })),
            outcome: "failed",
        },
    )
    .await?;

    Ok(())
}

/// Create an escrow row and its categories from a validated breakdown.
/// Category kinds are fixed here, at creation time, from the configured
/// one-time allow-list.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_escrow_with_categories(
    tx: &mut Transaction<'_, Postgres>,
    sender_user_id: Uuid,
    recipient_user_id: Uuid,
    total_minor: i64,
    specs: &[CategorySpec],
    expires_at: Option<DateTime<Utc>>,
    status: EscrowStatus,
    one_time_categories: &[String],
) -> Result<Uuid> {
    let escrow_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO escrows (
            id, sender_user_id, recipient_user_id, total_minor, remaining_minor,
            spent_minor, status, expires_at, onchain_status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $4, 0, $5, $6, $7, $8, $8)
        "#,
    )
    .bind(escrow_id)
    .bind(sender_user_id)
    .bind(recipient_user_id)
    .bind(total_minor)
    .bind(status.as_str())
    .bind(expires_at)
    .bind("none")
    .bind(now)
    .execute(&mut **tx)
    .await?;

    for spec in specs {
        let kind = if one_time_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&spec.name))
        {
            crate::models::CategoryKind::OneTime
        } else {
            crate::models::CategoryKind::Standard
        };

        sqlx::query(
            r#"
            INSERT INTO spending_categories (
                id, escrow_id, name, kind, allocated_minor, spent_minor,
                remaining_minor, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 0, $5, $6, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(escrow_id)
        .bind(&spec.name)
        .bind(kind.as_str())
        .bind(spec.allocated_minor)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(escrow_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, i64)]) -> Vec<CategorySpec> {
        pairs
            .iter()
            .map(|(name, allocated)| CategorySpec {
                name: name.to_string(),
                allocated_minor: *allocated,
            })
            .collect()
    }

    #[test]
    fn test_breakdown_must_cover_total() {
        assert!(validate_category_breakdown(
            &specs(&[("electricity", 30_000), ("water", 20_000)]),
            50_000
        )
        .is_ok());

        assert!(validate_category_breakdown(
            &specs(&[("electricity", 30_000), ("water", 20_000)]),
            60_000
        )
        .is_err());
    }

    #[test]
    fn test_breakdown_rejects_duplicates() {
        let result =
            validate_category_breakdown(&specs(&[("rent", 30_000), ("rent", 20_000)]), 50_000);
        assert!(matches!(result, Err(EscrowEngineError::Validation(_))));
    }

    #[test]
    fn test_breakdown_rejects_empty() {
        assert!(validate_category_breakdown(&[], 0).is_err());
    }

    #[test]
    fn test_failure_label_classification() {
        assert_eq!(failure_label("underfunded: reported 90 expected 100"), "underfunded");
        assert_eq!(failure_label("provider reported failure"), "provider_failed");
    }
}
