use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::EscrowEngineError;

/// Escrow lifecycle. Transitions are monotonic: nothing leaves a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    PendingDeposit,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::PendingDeposit => "pending_deposit",
            EscrowStatus::Active => "active",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Cancelled => "cancelled",
            EscrowStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowEngineError> {
        match s {
            "pending_deposit" => Ok(EscrowStatus::PendingDeposit),
            "active" => Ok(EscrowStatus::Active),
            "completed" => Ok(EscrowStatus::Completed),
            "cancelled" => Ok(EscrowStatus::Cancelled),
            "expired" => Ok(EscrowStatus::Expired),
            other => Err(EscrowEngineError::Internal(format!(
                "unknown escrow status in store: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Completed | EscrowStatus::Cancelled | EscrowStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        matches!(
            (self, next),
            (EscrowStatus::PendingDeposit, EscrowStatus::Active)
                | (EscrowStatus::PendingDeposit, EscrowStatus::Cancelled)
                | (EscrowStatus::Active, EscrowStatus::Completed)
                | (EscrowStatus::Active, EscrowStatus::Cancelled)
                | (EscrowStatus::Active, EscrowStatus::Expired)
        )
    }
}

/// On-chain materialization of an escrow, independent of the ledger-side
/// lifecycle: the relational row can be `active` before the chain escrow
/// exists, and the activation worker advances this column separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnchainStatus {
    None,
    Submitted,
    Created,
    Released,
    Refunded,
    Failed,
}

impl OnchainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnchainStatus::None => "none",
            OnchainStatus::Submitted => "submitted",
            OnchainStatus::Created => "created",
            OnchainStatus::Released => "released",
            OnchainStatus::Refunded => "refunded",
            OnchainStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRequestStatus {
    PendingApproval,
    Approved,
    Completed,
    Rejected,
}

impl PaymentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRequestStatus::PendingApproval => "pending_approval",
            PaymentRequestStatus::Approved => "approved",
            PaymentRequestStatus::Completed => "completed",
            PaymentRequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowEngineError> {
        match s {
            "pending_approval" => Ok(PaymentRequestStatus::PendingApproval),
            "approved" => Ok(PaymentRequestStatus::Approved),
            "completed" => Ok(PaymentRequestStatus::Completed),
            "rejected" => Ok(PaymentRequestStatus::Rejected),
            other => Err(EscrowEngineError::Internal(format!(
                "unknown payment request status in store: {}",
                other
            ))),
        }
    }

    pub fn can_transition_to(&self, next: PaymentRequestStatus) -> bool {
        matches!(
            (self, next),
            (PaymentRequestStatus::PendingApproval, PaymentRequestStatus::Approved)
                | (PaymentRequestStatus::PendingApproval, PaymentRequestStatus::Rejected)
                | (PaymentRequestStatus::Approved, PaymentRequestStatus::Completed)
        )
    }
}

/// Funding intents and ramp transactions share one terminal vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStatus {
    Pending,
    Confirmed,
    Failed,
}

impl FundingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingStatus::Pending => "pending",
            FundingStatus::Confirmed => "confirmed",
            FundingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowEngineError> {
        match s {
            "pending" => Ok(FundingStatus::Pending),
            "confirmed" => Ok(FundingStatus::Confirmed),
            "failed" => Ok(FundingStatus::Failed),
            other => Err(EscrowEngineError::Internal(format!(
                "unknown funding status in store: {}",
                other
            ))),
        }
    }
}

/// Category tag fixed at escrow creation. One-time categories deduct escrow
/// and category balances but never touch the daily-spend counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Standard,
    OneTime,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Standard => "standard",
            CategoryKind::OneTime => "one_time",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowEngineError> {
        match s {
            "standard" => Ok(CategoryKind::Standard),
            "one_time" => Ok(CategoryKind::OneTime),
            other => Err(EscrowEngineError::Internal(format!(
                "unknown category kind in store: {}",
                other
            ))),
        }
    }

    pub fn bypasses_daily_cap(&self) -> bool {
        matches!(self, CategoryKind::OneTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    PaymentRelease,
    Refund,
    ExpiryReturn,
}

impl SettlementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::PaymentRelease => "payment_release",
            SettlementKind::Refund => "refund",
            SettlementKind::ExpiryReturn => "expiry_return",
        }
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Escrow {
    pub id: Uuid,
    pub sender_user_id: Uuid,
    pub recipient_user_id: Uuid,
    pub total_minor: i64,
    pub remaining_minor: i64,
    pub spent_minor: i64,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub onchain_status: String,
    pub chain_escrow_id: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub chain_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn status(&self) -> Result<EscrowStatus, EscrowEngineError> {
        EscrowStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpendingCategory {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub name: String,
    pub kind: String,
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub remaining_minor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpendingCategory {
    pub fn kind(&self) -> Result<CategoryKind, EscrowEngineError> {
        CategoryKind::parse(&self.kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailySpend {
    pub recipient_user_id: Uuid,
    pub day: NaiveDate,
    pub limit_minor: i64,
    pub spent_today_minor: i64,
    pub remaining_today_minor: i64,
    pub tx_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub category_id: Uuid,
    pub recipient_user_id: Uuid,
    pub amount_minor: i64,
    pub merchant_phone_cipher: String,
    pub merchant_phone_index: String,
    pub status: String,
    pub onchain_status: String,
    pub chain_tx_hash: Option<String>,
    pub bypassed_daily_cap: bool,
    pub reject_reason: Option<String>,
    pub settlement_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn status(&self) -> Result<PaymentRequestStatus, EscrowEngineError> {
        PaymentRequestStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FundingIntent {
    pub id: Uuid,
    pub sender_user_id: Uuid,
    pub recipient_user_id: Uuid,
    pub recipient_phone_cipher: String,
    pub recipient_phone_index: String,
    pub expected_amount_minor: i64,
    pub quoted_rate: Option<Decimal>,
    pub categories: serde_json::Value,
    pub external_tx_code: String,
    pub status: String,
    pub failure_reason: Option<String>,
    pub escrow_id: Option<Uuid>,
    pub escrow_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FundingIntent {
    pub fn status(&self) -> Result<FundingStatus, EscrowEngineError> {
        FundingStatus::parse(&self.status)
    }

    pub fn category_specs(&self) -> Result<Vec<CategorySpec>, EscrowEngineError> {
        serde_json::from_value(self.categories.clone()).map_err(|e| {
            EscrowEngineError::Internal(format!("corrupt category breakdown on intent: {}", e))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OnrampTransaction {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub external_tx_code: String,
    pub expected_amount_minor: i64,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OfframpTransaction {
    pub id: Uuid,
    pub payment_request_id: Uuid,
    pub external_tx_code: String,
    pub amount_minor: i64,
    pub status: String,
    pub receipt_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settlement {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub payment_request_id: Option<Uuid>,
    pub amount_minor: i64,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Request / response DTOs
// =============================================================================

/// One category line in a funding declaration. Allocations must sum to the
/// declared total.
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct CategorySpec {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(range(min = 1))]
    pub allocated_minor: i64,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateFundingIntentRequest {
    pub sender_user_id: Uuid,
    pub recipient_user_id: Uuid,
    /// The depositing (paying) phone; charged by the on-ramp.
    #[validate(length(min = 7, max = 20))]
    pub sender_phone: String,
    #[validate(length(min = 7, max = 20))]
    pub recipient_phone: String,
    #[validate(range(min = 1))]
    pub total_minor: i64,
    #[validate(length(min = 1, max = 16))]
    pub categories: Vec<CategorySpec>,
    pub escrow_expires_at: Option<DateTime<Utc>>,
}

/// Legacy escrow-first path: the escrow row exists before funding arrives.
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateEscrowRequest {
    pub sender_user_id: Uuid,
    pub recipient_user_id: Uuid,
    #[validate(length(min = 7, max = 20))]
    pub sender_phone: String,
    #[validate(range(min = 1))]
    pub total_minor: i64,
    #[validate(length(min = 1, max = 16))]
    pub categories: Vec<CategorySpec>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreatePaymentRequestRequest {
    pub escrow_id: Uuid,
    pub category_id: Uuid,
    pub recipient_user_id: Uuid,
    #[validate(range(min = 1))]
    pub amount_minor: i64,
    #[validate(length(min = 7, max = 20))]
    pub merchant_phone: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApprovePaymentRequest {
    pub approver_user_id: Uuid,
    /// Administrator path: skips the sender-identity check. The HTTP layer
    /// only sets this for authenticated admin actors.
    #[serde(default)]
    pub admin_override: bool,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct RejectPaymentRequest {
    pub rejector_user_id: Uuid,
    #[validate(length(min = 1, max = 256))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub payment_request_id: Uuid,
    pub status: PaymentRequestStatus,
    pub remaining_daily_minor: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FundingIntentResponse {
    pub intent_id: Uuid,
    pub external_tx_code: String,
    pub status: FundingStatus,
    pub expected_amount_minor: i64,
    pub quoted_rate: Option<Decimal>,
    pub escrow_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EscrowView {
    pub escrow: Escrow,
    pub categories: Vec<SpendingCategory>,
    pub onchain: Option<crate::rails::OnChainEscrowView>,
}

// =============================================================================
// Webhook payloads (shape contracts, transport-agnostic)
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FundingWebhookPayload {
    pub external_transaction_code: String,
    pub status: FundingWebhookStatus,
    pub amount_minor: i64,
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingWebhookStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OfframpWebhookPayload {
    pub external_transaction_code: String,
    pub status: OfframpWebhookStatus,
    #[serde(default)]
    pub receipt_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfframpWebhookStatus {
    Success,
    Failed,
}

/// Event shape emitted by the chain indexer for escrow contract activity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainEventPayload {
    pub chain_escrow_id: String,
    pub event: ChainEventKind,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainEventKind {
    Created,
    Released,
    Refunded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_terminal_states_are_absorbing() {
        for terminal in [
            EscrowStatus::Completed,
            EscrowStatus::Cancelled,
            EscrowStatus::Expired,
        ] {
            for next in [
                EscrowStatus::PendingDeposit,
                EscrowStatus::Active,
                EscrowStatus::Completed,
                EscrowStatus::Cancelled,
                EscrowStatus::Expired,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{:?} must not leave terminal state",
                    terminal
                );
            }
        }
    }

    #[test]
    fn test_escrow_activation_path() {
        assert!(EscrowStatus::PendingDeposit.can_transition_to(EscrowStatus::Active));
        assert!(!EscrowStatus::PendingDeposit.can_transition_to(EscrowStatus::Completed));
        assert!(EscrowStatus::Active.can_transition_to(EscrowStatus::Expired));
    }

    #[test]
    fn test_payment_request_state_machine() {
        let pending = PaymentRequestStatus::PendingApproval;
        assert!(pending.can_transition_to(PaymentRequestStatus::Approved));
        assert!(pending.can_transition_to(PaymentRequestStatus::Rejected));
        assert!(!pending.can_transition_to(PaymentRequestStatus::Completed));

        let approved = PaymentRequestStatus::Approved;
        assert!(approved.can_transition_to(PaymentRequestStatus::Completed));
        assert!(!approved.can_transition_to(PaymentRequestStatus::Rejected));

        assert!(!PaymentRequestStatus::Rejected.can_transition_to(PaymentRequestStatus::Approved));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            EscrowStatus::PendingDeposit,
            EscrowStatus::Active,
            EscrowStatus::Completed,
            EscrowStatus::Cancelled,
            EscrowStatus::Expired,
        ] {
            assert_eq!(EscrowStatus::parse(s.as_str()).unwrap(), s);
        }
        for s in [FundingStatus::Pending, FundingStatus::Confirmed, FundingStatus::Failed] {
            assert_eq!(FundingStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn test_one_time_category_bypasses_cap() {
        assert!(CategoryKind::OneTime.bypasses_daily_cap());
        assert!(!CategoryKind::Standard.bypasses_daily_cap());
    }
}
