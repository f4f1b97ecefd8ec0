//! Operator reconciliation queries.
//!
//! Money-moving failures are never dropped silently: terminally failed
//! settlement legs, bounced payouts and underfunded deposits all stay as
//! flagged rows, and this module is the one place that gathers them for a
//! human to act on.

use crate::database::Database;
use crate::errors::Result;
use crate::models::{Escrow, FundingIntent, OfframpTransaction, OnrampTransaction, PaymentRequest};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct FailedSettlements {
    /// Escrows whose on-chain leg (creation or refund) exhausted retries.
    pub failed_chain_legs: Vec<Escrow>,
    /// Approved requests whose settlement job gave up; balances reflect the
    /// approval-time reservation and nothing else.
    pub stalled_payment_requests: Vec<PaymentRequest>,
    /// Payouts the provider bounced.
    pub failed_offramps: Vec<OfframpTransaction>,
    /// Deposits that failed or arrived underfunded.
    pub failed_onramps: Vec<OnrampTransaction>,
    pub failed_intents: Vec<FundingIntent>,
}

pub async fn failed_rows(db: &Arc<Database>, max_attempts: u32) -> Result<FailedSettlements> {
    let pool = db.pool();

    let failed_chain_legs = sqlx::query_as::<_, Escrow>(
        "SELECT * FROM escrows WHERE onchain_status = 'failed' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    let stalled_payment_requests = sqlx::query_as::<_, PaymentRequest>(
        r#"
        SELECT * FROM payment_requests
        WHERE status = 'approved' AND (settlement_attempts >= $1 OR onchain_status = 'failed')
        ORDER BY updated_at
        "#,
    )
    .bind(max_attempts as i32)
    .fetch_all(pool)
    .await?;

    let failed_offramps = sqlx::query_as::<_, OfframpTransaction>(
        "SELECT * FROM offramp_transactions WHERE status = 'failed' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    let failed_onramps = sqlx::query_as::<_, OnrampTransaction>(
        "SELECT * FROM onramp_transactions WHERE status = 'failed' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    let failed_intents = sqlx::query_as::<_, FundingIntent>(
        "SELECT * FROM funding_intents WHERE status = 'failed' ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(FailedSettlements {
        failed_chain_legs,
        stalled_payment_requests,
        failed_offramps,
        failed_onramps,
        failed_intents,
    })
}
