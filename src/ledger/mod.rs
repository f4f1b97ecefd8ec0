//! Ledger Invariant Engine.
//!
//! The only code path permitted to change `remaining`/`spent` columns on
//! escrows, spending categories and daily-spend counters. Every operation
//! is one ACID transaction; row locks are always acquired in the fixed
//! order escrow -> category -> daily-spend -> payment-request so two
//! concurrent operations can never form a lock cycle. Balance writes are
//! computed through [`arith`] and written as explicit values after a
//! locked read-validate step.

pub mod arith;

use crate::audit::{self, AuditEntry};
use crate::config::LedgerConfig;
use crate::database::Database;
use crate::errors::{EscrowEngineError, Result};
use crate::metrics;
use crate::models::{
    DailySpend, Escrow, EscrowStatus, PaymentRequest, PaymentRequestStatus, SettlementKind,
    SpendingCategory,
};
use arith::{Balances, DayWindow};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct LedgerEngine {
    db: Arc<Database>,
    config: LedgerConfig,
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub escrow_id: Uuid,
    pub category_id: Uuid,
    pub recipient_user_id: Uuid,
    pub amount_minor: i64,
    /// Administrator override; one-time categories bypass regardless.
    pub bypass_daily_cap: bool,
    pub merchant_phone_cipher: String,
    pub merchant_phone_index: String,
}

#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub payment_request_id: Uuid,
    /// `None` when the daily cap was bypassed.
    pub remaining_daily_minor: Option<i64>,
    pub bypassed_daily_cap: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityViolation {
    pub entity: &'static str,
    pub id: String,
    pub detail: String,
}

impl LedgerEngine {
    pub fn new(db: Arc<Database>, config: LedgerConfig) -> Self {
        LedgerEngine { db, config }
    }

    /// Reserve funds for a merchant payment and create the payment request.
    ///
    /// Deducts escrow and category `remaining` optimistically at request
    /// creation; rejection is the compensating action. The daily counter is
    /// only touched for cap-subject categories.
    pub async fn reserve_and_deduct(&self, req: ReserveRequest) -> Result<ReservationOutcome> {
        if req.amount_minor <= 0 {
            return Err(EscrowEngineError::Validation(
                "amount must be positive".to_string(),
            ));
        }

        let mut tx = self.db.pool().begin().await?;
        let now = Utc::now();

        let escrow = lock_escrow(&mut tx, req.escrow_id).await?;
        let escrow_status = escrow.status()?;
        if escrow_status != EscrowStatus::Active {
            metrics::RESERVATION_FAILURES
                .with_label_values(&["escrow_not_active"])
                .inc();
            return Err(EscrowEngineError::EscrowNotActive {
                escrow_id: escrow.id,
                status: escrow.status.clone(),
            });
        }

        if escrow.recipient_user_id != req.recipient_user_id {
            return Err(EscrowEngineError::Forbidden(
                "only the escrow recipient may request payments".to_string(),
            ));
        }

        let escrow_balances = Balances {
            total: escrow.total_minor,
            remaining: escrow.remaining_minor,
            spent: escrow.spent_minor,
        };
        let escrow_after = escrow_balances.reserve(req.amount_minor).ok_or_else(|| {
            metrics::RESERVATION_FAILURES
                .with_label_values(&["insufficient_escrow"])
                .inc();
            EscrowEngineError::InsufficientBalance {
                scope: "escrow",
                required: req.amount_minor,
                available: escrow.remaining_minor,
            }
        })?;

        let category = lock_category(&mut tx, req.category_id, req.escrow_id).await?;
        let category_balances = Balances {
            total: category.allocated_minor,
            remaining: category.remaining_minor,
            spent: category.spent_minor,
        };
        let category_after = category_balances.reserve(req.amount_minor).ok_or_else(|| {
            metrics::RESERVATION_FAILURES
                .with_label_values(&["insufficient_category"])
                .inc();
            EscrowEngineError::InsufficientBalance {
                scope: "category",
                required: req.amount_minor,
                available: category.remaining_minor,
            }
        })?;

        let bypass = req.bypass_daily_cap || category.kind()?.bypasses_daily_cap();
        let today = now.date_naive();

        let daily_after = if bypass {
            None
        } else {
            let daily = lock_daily_spend(
                &mut tx,
                req.recipient_user_id,
                today,
                self.config.default_daily_limit_minor,
            )
            .await?;
            let window = DayWindow {
                limit: daily.limit_minor,
                spent_today: daily.spent_today_minor,
                remaining_today: daily.remaining_today_minor,
                tx_count: daily.tx_count,
            };
            let after = window.reserve(req.amount_minor).ok_or_else(|| {
                metrics::RESERVATION_FAILURES
                    .with_label_values(&["daily_limit"])
                    .inc();
                EscrowEngineError::DailyLimitExceeded {
                    requested: req.amount_minor,
                    remaining_today: daily.remaining_today_minor,
                }
            })?;
            Some(after)
        };

        write_escrow_balances(&mut tx, escrow.id, escrow_after).await?;
        write_category_balances(&mut tx, category.id, category_after).await?;
        if let Some(window) = daily_after {
            write_daily_window(&mut tx, req.recipient_user_id, today, window).await?;
        }

        let request_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payment_requests (
                id, escrow_id, category_id, recipient_user_id, amount_minor,
                merchant_phone_cipher, merchant_phone_index, status,
                onchain_status, bypassed_daily_cap, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(request_id)
        .bind(req.escrow_id)
        .bind(req.category_id)
        .bind(req.recipient_user_id)
        .bind(req.amount_minor)
        .bind(&req.merchant_phone_cipher)
        .bind(&req.merchant_phone_index)
        .bind(PaymentRequestStatus::PendingApproval.as_str())
        .bind("none")
        .bind(bypass)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry {
                actor: &req.recipient_user_id.to_string(),
                action: "payment_request.reserve",
                entity_type: "payment_request",
                entity_id: request_id.to_string(),
                before: None,
                after: Some(serde_json::json!({
                    "escrow_id": req.escrow_id,
                    "category_id": req.category_id,
                    "amount_minor": req.amount_minor,
                    "bypassed_daily_cap": bypass,
                })),
                outcome: "reserved",
            },
        )
        .await?;

        tx.commit().await?;

        metrics::RESERVATIONS_TOTAL.inc();
        info!(
            payment_request_id = %request_id,
            escrow_id = %req.escrow_id,
            amount_minor = req.amount_minor,
            bypassed_daily_cap = bypass,
            "Reserved payment request"
        );

        Ok(ReservationOutcome {
            payment_request_id: request_id,
            remaining_daily_minor: daily_after.map(|w| w.remaining_today),
            bypassed_daily_cap: bypass,
        })
    }

    /// Approve a pending payment request. Funds were reserved at creation,
    /// so approval deducts nothing: it re-validates under fresh locks, flips
    /// status and writes the `payment_release` settlement record.
    pub async fn approve(
        &self,
        payment_request_id: Uuid,
        approver_id: Uuid,
        admin_override: bool,
    ) -> Result<PaymentRequest> {
        let mut tx = self.db.pool().begin().await?;

        let request = read_payment_request(&mut tx, payment_request_id).await?;

        let escrow = lock_escrow(&mut tx, request.escrow_id).await?;
        if !admin_override && escrow.sender_user_id != approver_id {
            return Err(EscrowEngineError::Forbidden(
                "only the escrow sender may approve payment requests".to_string(),
            ));
        }
        if escrow.status()? != EscrowStatus::Active {
            return Err(EscrowEngineError::EscrowNotActive {
                escrow_id: escrow.id,
                status: escrow.status.clone(),
            });
        }

        // Category lock completes the fixed ordering; the re-validation here
        // is consistency-only since reservation already moved the funds.
        let category = lock_category(&mut tx, request.category_id, request.escrow_id).await?;
        if category.allocated_minor != category.spent_minor + category.remaining_minor {
            return Err(EscrowEngineError::Internal(format!(
                "category {} failed conservation check during approval",
                category.id
            )));
        }

        let request = lock_payment_request(&mut tx, payment_request_id).await?;
        let status = request.status()?;
        if !status.can_transition_to(PaymentRequestStatus::Approved) {
            return Err(EscrowEngineError::InvalidStateTransition {
                entity: "payment_request",
                from: request.status.clone(),
                to: PaymentRequestStatus::Approved.as_str().to_string(),
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE payment_requests SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(PaymentRequestStatus::Approved.as_str())
            .bind(now)
            .bind(payment_request_id)
            .execute(&mut *tx)
            .await?;

        insert_settlement(
            &mut tx,
            request.escrow_id,
            Some(payment_request_id),
            request.amount_minor,
            SettlementKind::PaymentRelease,
        )
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry {
                actor: &approver_id.to_string(),
                action: "payment_request.approve",
                entity_type: "payment_request",
                entity_id: payment_request_id.to_string(),
                before: Some(serde_json::json!({ "status": request.status })),
                after: Some(serde_json::json!({
                    "status": "approved",
                    "admin_override": admin_override,
                })),
                outcome: "approved",
            },
        )
        .await?;

        tx.commit().await?;

        metrics::APPROVALS_TOTAL.inc();
        metrics::SETTLEMENTS_WRITTEN
            .with_label_values(&[SettlementKind::PaymentRelease.as_str()])
            .inc();
        info!(payment_request_id = %payment_request_id, approver = %approver_id, "Approved payment request");

        read_payment_request_committed(self.db.pool(), payment_request_id).await
    }

    /// Reject a pending payment request, reversing exactly what reservation
    /// deducted: escrow and category balances always, the daily counter only
    /// when the reservation was cap-subject.
    pub async fn reject(
        &self,
        payment_request_id: Uuid,
        rejector_id: Uuid,
        reason: &str,
    ) -> Result<PaymentRequest> {
        let mut tx = self.db.pool().begin().await?;

        let request = read_payment_request(&mut tx, payment_request_id).await?;

        let escrow = lock_escrow(&mut tx, request.escrow_id).await?;
        let category = lock_category(&mut tx, request.category_id, request.escrow_id).await?;

        // The daily row restored is the one the reservation touched: keyed
        // by the request's creation day, not today.
        let reservation_day = request.created_at.date_naive();
        let daily = if request.bypassed_daily_cap {
            None
        } else {
            Some(
                lock_daily_spend(
                    &mut tx,
                    request.recipient_user_id,
                    reservation_day,
                    self.config.default_daily_limit_minor,
                )
                .await?,
            )
        };

        let request = lock_payment_request(&mut tx, payment_request_id).await?;
        let status = request.status()?;
        if !status.can_transition_to(PaymentRequestStatus::Rejected) {
            return Err(EscrowEngineError::InvalidStateTransition {
                entity: "payment_request",
                from: request.status.clone(),
                to: PaymentRequestStatus::Rejected.as_str().to_string(),
            });
        }

        let escrow_after = Balances {
            total: escrow.total_minor,
            remaining: escrow.remaining_minor,
            spent: escrow.spent_minor,
        }
        .restore(request.amount_minor)
        .ok_or_else(|| {
            EscrowEngineError::Internal(format!(
                "escrow {} cannot restore {} (spent {})",
                escrow.id, request.amount_minor, escrow.spent_minor
            ))
        })?;

        let category_after = Balances {
            total: category.allocated_minor,
            remaining: category.remaining_minor,
            spent: category.spent_minor,
        }
        .restore(request.amount_minor)
        .ok_or_else(|| {
            EscrowEngineError::Internal(format!(
                "category {} cannot restore {} (spent {})",
                category.id, request.amount_minor, category.spent_minor
            ))
        })?;

        write_escrow_balances(&mut tx, escrow.id, escrow_after).await?;
        write_category_balances(&mut tx, category.id, category_after).await?;

        if let Some(daily) = daily {
            let window = DayWindow {
                limit: daily.limit_minor,
                spent_today: daily.spent_today_minor,
                remaining_today: daily.remaining_today_minor,
                tx_count: daily.tx_count,
            };
            let window_after = window.restore(request.amount_minor).ok_or_else(|| {
                EscrowEngineError::Internal(format!(
                    "daily window for {} cannot restore {} (spent today {})",
                    request.recipient_user_id, request.amount_minor, daily.spent_today_minor
                ))
            })?;
            write_daily_window(&mut tx, request.recipient_user_id, reservation_day, window_after)
                .await?;
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE payment_requests SET status = $1, reject_reason = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(PaymentRequestStatus::Rejected.as_str())
        .bind(reason)
        .bind(now)
        .bind(payment_request_id)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut *tx,
            AuditEntry {
                actor: &rejector_id.to_string(),
                action: "payment_request.reject",
                entity_type: "payment_request",
                entity_id: payment_request_id.to_string(),
                before: Some(serde_json::json!({ "status": request.status })),
                after: Some(serde_json::json!({
                    "status": "rejected",
                    "reason": reason,
                    "restored_minor": request.amount_minor,
                    "daily_restored": !request.bypassed_daily_cap,
                })),
                outcome: "rejected",
            },
        )
        .await?;

        tx.commit().await?;

        metrics::REJECTIONS_TOTAL.inc();
        info!(payment_request_id = %payment_request_id, reason, "Rejected payment request");

        read_payment_request_committed(self.db.pool(), payment_request_id).await
    }

    /// Finalize an approved request once the settlement legs have succeeded.
    /// Idempotent: finalizing an already-completed request is a no-op.
    /// Returns whether the row changed.
    pub async fn complete_payment_request(&self, payment_request_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;
        let changed = self
            .complete_payment_request_in(&mut tx, payment_request_id)
            .await?;
        tx.commit().await?;
        Ok(changed)
    }

    /// Transaction-scoped variant so callers (the off-ramp finalization)
    /// can compose it with their own row updates atomically.
    pub async fn complete_payment_request_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_request_id: Uuid,
    ) -> Result<bool> {
        let request = read_payment_request(tx, payment_request_id).await?;
        let escrow = lock_escrow(tx, request.escrow_id).await?;
        let request = lock_payment_request(tx, payment_request_id).await?;

        let status = request.status()?;
        if status == PaymentRequestStatus::Completed {
            return Ok(false);
        }
        if !status.can_transition_to(PaymentRequestStatus::Completed) {
            return Err(EscrowEngineError::InvalidStateTransition {
                entity: "payment_request",
                from: request.status.clone(),
                to: PaymentRequestStatus::Completed.as_str().to_string(),
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE payment_requests SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(PaymentRequestStatus::Completed.as_str())
            .bind(now)
            .bind(payment_request_id)
            .execute(&mut **tx)
            .await?;

        // A fully-drained escrow with no open requests has run its course.
        let open_requests: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM payment_requests
            WHERE escrow_id = $1 AND id <> $2 AND status IN ('pending_approval', 'approved')
            "#,
        )
        .bind(request.escrow_id)
        .bind(payment_request_id)
        .fetch_one(&mut **tx)
        .await?;

        if escrow.remaining_minor == 0
            && open_requests == 0
            && escrow.status()?.can_transition_to(EscrowStatus::Completed)
        {
            sqlx::query("UPDATE escrows SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(EscrowStatus::Completed.as_str())
                .bind(now)
                .bind(escrow.id)
                .execute(&mut **tx)
                .await?;
            info!(escrow_id = %escrow.id, "Escrow fully disbursed, marked completed");
        }

        audit::record(
            &mut **tx,
            AuditEntry {
                actor: "settlement-orchestrator",
                action: "payment_request.complete",
                entity_type: "payment_request",
                entity_id: payment_request_id.to_string(),
                before: Some(serde_json::json!({ "status": request.status })),
                after: Some(serde_json::json!({ "status": "completed" })),
                outcome: "completed",
            },
        )
        .await?;

        Ok(true)
    }

    /// Sweep an active escrow into a terminal state: the remaining balance
    /// leaves as a settlement and `remaining` is zeroed atomically with the
    /// status flip. Returns the swept amount.
    pub async fn sweep_terminal(
        &self,
        escrow_id: Uuid,
        kind: SettlementKind,
        actor: &str,
    ) -> Result<i64> {
        let target = match kind {
            SettlementKind::Refund => EscrowStatus::Cancelled,
            SettlementKind::ExpiryReturn => EscrowStatus::Expired,
            SettlementKind::PaymentRelease => {
                return Err(EscrowEngineError::Internal(
                    "payment_release is not a terminal sweep kind".to_string(),
                ))
            }
        };

        let mut tx = self.db.pool().begin().await?;

        let escrow = lock_escrow(&mut tx, escrow_id).await?;
        let status = escrow.status()?;
        if !status.can_transition_to(target) {
            warn!(
                escrow_id = %escrow_id,
                from = %escrow.status,
                to = target.as_str(),
                "Refused terminal transition"
            );
            return Err(EscrowEngineError::InvalidStateTransition {
                entity: "escrow",
                from: escrow.status.clone(),
                to: target.as_str().to_string(),
            });
        }

        let now = Utc::now();

        // A pending-deposit escrow never held confirmed funds: flip the
        // status and stop. Sweeps (and settlement records) are for escrows
        // that actually carried value.
        let swept = if status == EscrowStatus::PendingDeposit {
            sqlx::query("UPDATE escrows SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(target.as_str())
                .bind(now)
                .bind(escrow_id)
                .execute(&mut *tx)
                .await?;
            0
        } else {
            let (after, swept) = Balances {
                total: escrow.total_minor,
                remaining: escrow.remaining_minor,
                spent: escrow.spent_minor,
            }
            .sweep();

            sqlx::query(
                r#"
                UPDATE escrows
                SET remaining_minor = $1, spent_minor = $2, status = $3, updated_at = $4
                WHERE id = $5
                "#,
            )
            .bind(after.remaining)
            .bind(after.spent)
            .bind(target.as_str())
            .bind(now)
            .bind(escrow_id)
            .execute(&mut *tx)
            .await?;

            if swept > 0 {
                insert_settlement(&mut tx, escrow_id, None, swept, kind).await?;
            }
            swept
        };

        audit::record(
            &mut *tx,
            AuditEntry {
                actor,
                action: "escrow.sweep_terminal",
                entity_type: "escrow",
                entity_id: escrow_id.to_string(),
                before: Some(serde_json::json!({
                    "status": escrow.status,
                    "remaining_minor": escrow.remaining_minor,
                })),
                after: Some(serde_json::json!({
                    "status": target.as_str(),
                    "swept_minor": swept,
                })),
                outcome: target.as_str(),
            },
        )
        .await?;

        tx.commit().await?;

        if swept > 0 {
            metrics::SETTLEMENTS_WRITTEN
                .with_label_values(&[kind.as_str()])
                .inc();
        }
        info!(escrow_id = %escrow_id, swept_minor = swept, target = target.as_str(), "Swept escrow to terminal state");

        Ok(swept)
    }

    /// Full-table conservation audit, runnable at any time.
    pub async fn check_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        let mut violations = Vec::new();
        let pool = self.db.pool();

        let escrow_rows: Vec<(Uuid, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, total_minor, remaining_minor, spent_minor
            FROM escrows
            WHERE total_minor <> remaining_minor + spent_minor
            "#,
        )
        .fetch_all(pool)
        .await?;
        for (id, total, remaining, spent) in escrow_rows {
            violations.push(IntegrityViolation {
                entity: "escrow",
                id: id.to_string(),
                detail: format!(
                    "total {} != remaining {} + spent {}",
                    total, remaining, spent
                ),
            });
        }

        let allocation_rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT e.id, e.total_minor, COALESCE(SUM(c.allocated_minor), 0) AS allocated
            FROM escrows e
            LEFT JOIN spending_categories c ON c.escrow_id = e.id
            GROUP BY e.id, e.total_minor
            HAVING e.total_minor <> COALESCE(SUM(c.allocated_minor), 0)
            "#,
        )
        .fetch_all(pool)
        .await?;
        for (id, total, allocated) in allocation_rows {
            violations.push(IntegrityViolation {
                entity: "escrow",
                id: id.to_string(),
                detail: format!("category allocations {} != escrow total {}", allocated, total),
            });
        }

        let category_rows: Vec<(Uuid, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, allocated_minor, remaining_minor, spent_minor
            FROM spending_categories
            WHERE allocated_minor <> remaining_minor + spent_minor
            "#,
        )
        .fetch_all(pool)
        .await?;
        for (id, allocated, remaining, spent) in category_rows {
            violations.push(IntegrityViolation {
                entity: "spending_category",
                id: id.to_string(),
                detail: format!(
                    "allocated {} != remaining {} + spent {}",
                    allocated, remaining, spent
                ),
            });
        }

        let daily_rows: Vec<(Uuid, NaiveDate, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT recipient_user_id, day, limit_minor, spent_today_minor, remaining_today_minor
            FROM daily_spends
            WHERE limit_minor <> spent_today_minor + remaining_today_minor
            "#,
        )
        .fetch_all(pool)
        .await?;
        for (recipient, day, limit, spent, remaining) in daily_rows {
            violations.push(IntegrityViolation {
                entity: "daily_spend",
                id: format!("{}:{}", recipient, day),
                detail: format!("limit {} != spent {} + remaining {}", limit, spent, remaining),
            });
        }

        if !violations.is_empty() {
            warn!(count = violations.len(), "Ledger integrity violations detected");
        }

        Ok(violations)
    }
}

// =============================================================================
// Locked reads and balance writes
// =============================================================================

async fn lock_escrow(tx: &mut Transaction<'_, Postgres>, escrow_id: Uuid) -> Result<Escrow> {
    sqlx::query_as::<_, Escrow>("SELECT * FROM escrows WHERE id = $1 FOR UPDATE")
        .bind(escrow_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EscrowEngineError::EscrowNotFound(escrow_id))
}

async fn lock_category(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
    escrow_id: Uuid,
) -> Result<SpendingCategory> {
    sqlx::query_as::<_, SpendingCategory>(
        "SELECT * FROM spending_categories WHERE id = $1 AND escrow_id = $2 FOR UPDATE",
    )
    .bind(category_id)
    .bind(escrow_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EscrowEngineError::CategoryNotFound(category_id))
}

/// Lazily create the day's counter, then lock the committed row. The upsert
/// is safe to race: `ON CONFLICT DO NOTHING` plus the locked re-read always
/// observes whichever insert won.
async fn lock_daily_spend(
    tx: &mut Transaction<'_, Postgres>,
    recipient_user_id: Uuid,
    day: NaiveDate,
    default_limit_minor: i64,
) -> Result<DailySpend> {
    sqlx::query(
        r#"
        INSERT INTO daily_spends (
            recipient_user_id, day, limit_minor, spent_today_minor,
            remaining_today_minor, tx_count, created_at, updated_at
        ) VALUES ($1, $2, $3, 0, $3, 0, $4, $4)
        ON CONFLICT (recipient_user_id, day) DO NOTHING
        "#,
    )
    .bind(recipient_user_id)
    .bind(day)
    .bind(default_limit_minor)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    sqlx::query_as::<_, DailySpend>(
        "SELECT * FROM daily_spends WHERE recipient_user_id = $1 AND day = $2 FOR UPDATE",
    )
    .bind(recipient_user_id)
    .bind(day)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}

async fn read_payment_request(
    tx: &mut Transaction<'_, Postgres>,
    payment_request_id: Uuid,
) -> Result<PaymentRequest> {
    sqlx::query_as::<_, PaymentRequest>("SELECT * FROM payment_requests WHERE id = $1")
        .bind(payment_request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EscrowEngineError::PaymentRequestNotFound(payment_request_id))
}

async fn lock_payment_request(
    tx: &mut Transaction<'_, Postgres>,
    payment_request_id: Uuid,
) -> Result<PaymentRequest> {
    sqlx::query_as::<_, PaymentRequest>("SELECT * FROM payment_requests WHERE id = $1 FOR UPDATE")
        .bind(payment_request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EscrowEngineError::PaymentRequestNotFound(payment_request_id))
}

async fn read_payment_request_committed(
    pool: &sqlx::PgPool,
    payment_request_id: Uuid,
) -> Result<PaymentRequest> {
    sqlx::query_as::<_, PaymentRequest>("SELECT * FROM payment_requests WHERE id = $1")
        .bind(payment_request_id)
        .fetch_optional(pool)
        .await?
        .ok_or(EscrowEngineError::PaymentRequestNotFound(payment_request_id))
}

async fn write_escrow_balances(
    tx: &mut Transaction<'_, Postgres>,
    escrow_id: Uuid,
    balances: Balances,
) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET remaining_minor = $1, spent_minor = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(balances.remaining)
    .bind(balances.spent)
    .bind(Utc::now())
    .bind(escrow_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_category_balances(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
    balances: Balances,
) -> Result<()> {
    sqlx::query(
        "UPDATE spending_categories SET remaining_minor = $1, spent_minor = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(balances.remaining)
    .bind(balances.spent)
    .bind(Utc::now())
    .bind(category_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_daily_window(
    tx: &mut Transaction<'_, Postgres>,
    recipient_user_id: Uuid,
    day: NaiveDate,
    window: DayWindow,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE daily_spends
        SET spent_today_minor = $1, remaining_today_minor = $2, tx_count = $3, updated_at = $4
        WHERE recipient_user_id = $5 AND day = $6
        "#,
    )
    .bind(window.spent_today)
    .bind(window.remaining_today)
    .bind(window.tx_count)
    .bind(Utc::now())
    .bind(recipient_user_id)
    .bind(day)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_settlement(
    tx: &mut Transaction<'_, Postgres>,
    escrow_id: Uuid,
    payment_request_id: Option<Uuid>,
    amount_minor: i64,
    kind: SettlementKind,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settlements (id, escrow_id, payment_request_id, amount_minor, kind, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(escrow_id)
    .bind(payment_request_id)
    .bind(amount_minor)
    .bind(kind.as_str())
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
