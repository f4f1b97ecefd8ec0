use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EscrowEngineError>;

#[derive(Error, Debug)]
pub enum EscrowEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Escrow not found: {0}")]
    EscrowNotFound(Uuid),

    #[error("Spending category not found: {0}")]
    CategoryNotFound(Uuid),

    #[error("Payment request not found: {0}")]
    PaymentRequestNotFound(Uuid),

    #[error("No funding record for transaction code: {0}")]
    UnknownTransactionCode(String),

    #[error("Funding intent not found: {0}")]
    FundingIntentNotFound(Uuid),

    #[error("Insufficient {scope} balance: required {required}, available {available}")]
    InsufficientBalance {
        scope: &'static str,
        required: i64,
        available: i64,
    },

    #[error("Daily limit exceeded: requested {requested}, remaining today {remaining_today}")]
    DailyLimitExceeded {
        requested: i64,
        remaining_today: i64,
    },

    #[error("Escrow {escrow_id} is not active (status: {status})")]
    EscrowNotActive { escrow_id: Uuid, status: String },

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Underfunded external transaction: expected {expected}, reported {reported}")]
    UnderfundedExternalTransaction { expected: i64, reported: i64 },

    #[error("External rail unavailable: {0}")]
    ExternalRailUnavailable(String),

    #[error("Invalid on-chain address: {0}")]
    InvalidAddress(String),

    #[error("Exchange rate unavailable")]
    ExchangeRateUnavailable,

    #[error("Duplicate delivery")]
    DuplicateDelivery,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EscrowEngineError {
    fn from(err: serde_json::Error) -> Self {
        EscrowEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for EscrowEngineError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection failures are transient from the caller's
        // point of view; retry policy decides what to do with them.
        EscrowEngineError::ExternalRailUnavailable(err.to_string())
    }
}

impl ResponseError for EscrowEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            EscrowEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EscrowEngineError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EscrowEngineError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EscrowEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EscrowEngineError::EscrowNotFound(_) => StatusCode::NOT_FOUND,
            EscrowEngineError::CategoryNotFound(_) => StatusCode::NOT_FOUND,
            EscrowEngineError::PaymentRequestNotFound(_) => StatusCode::NOT_FOUND,
            EscrowEngineError::UnknownTransactionCode(_) => StatusCode::NOT_FOUND,
            EscrowEngineError::FundingIntentNotFound(_) => StatusCode::NOT_FOUND,
            EscrowEngineError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            EscrowEngineError::DailyLimitExceeded { .. } => StatusCode::BAD_REQUEST,
            EscrowEngineError::EscrowNotActive { .. } => StatusCode::CONFLICT,
            EscrowEngineError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            EscrowEngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EscrowEngineError::UnderfundedExternalTransaction { .. } => StatusCode::BAD_REQUEST,
            EscrowEngineError::ExternalRailUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EscrowEngineError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            EscrowEngineError::ExchangeRateUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EscrowEngineError::DuplicateDelivery => StatusCode::CONFLICT,
            EscrowEngineError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EscrowEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl EscrowEngineError {
    fn error_type(&self) -> &str {
        match self {
            EscrowEngineError::Database(_) => "database_error",
            EscrowEngineError::Migration(_) => "database_error",
            EscrowEngineError::Redis(_) => "cache_error",
            EscrowEngineError::Validation(_) => "validation_error",
            EscrowEngineError::EscrowNotFound(_) => "not_found",
            EscrowEngineError::CategoryNotFound(_) => "not_found",
            EscrowEngineError::PaymentRequestNotFound(_) => "not_found",
            EscrowEngineError::UnknownTransactionCode(_) => "not_found",
            EscrowEngineError::FundingIntentNotFound(_) => "not_found",
            EscrowEngineError::InsufficientBalance { .. } => "insufficient_balance",
            EscrowEngineError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            EscrowEngineError::EscrowNotActive { .. } => "invalid_state_transition",
            EscrowEngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EscrowEngineError::Forbidden(_) => "forbidden",
            EscrowEngineError::UnderfundedExternalTransaction { .. } => "underfunded_transaction",
            EscrowEngineError::ExternalRailUnavailable(_) => "rail_unavailable",
            EscrowEngineError::InvalidAddress(_) => "invalid_address",
            EscrowEngineError::ExchangeRateUnavailable => "rail_unavailable",
            EscrowEngineError::DuplicateDelivery => "duplicate_delivery",
            EscrowEngineError::Crypto(_) => "crypto_error",
            EscrowEngineError::Internal(_) => "internal_error",
        }
    }

    /// Transient faults are retried by the settlement workers; everything
    /// else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EscrowEngineError::ExternalRailUnavailable(_)
                | EscrowEngineError::ExchangeRateUnavailable
                | EscrowEngineError::Database(_)
                | EscrowEngineError::Redis(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        assert!(!EscrowEngineError::InsufficientBalance {
            scope: "escrow",
            required: 100,
            available: 50,
        }
        .is_retryable());
        assert!(!EscrowEngineError::Forbidden("not the sender".into()).is_retryable());
        assert!(!EscrowEngineError::InvalidStateTransition {
            entity: "escrow",
            from: "expired".into(),
            to: "active".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_rail_faults_are_retryable() {
        assert!(EscrowEngineError::ExternalRailUnavailable("timeout".into()).is_retryable());
        assert!(EscrowEngineError::ExchangeRateUnavailable.is_retryable());
    }
}
