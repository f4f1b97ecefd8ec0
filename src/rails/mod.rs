//! External rail contracts.
//!
//! The mobile-money provider and the chain RPC are collaborators consumed
//! through narrow async traits. Production uses the HTTP clients; the mock
//! clients simulate latency and failures for development and tests. Calls
//! carry a fixed timeout; a timed-out call is failed-and-retryable, never
//! assumed to have succeeded.

pub mod chain;
pub mod mobile_money;

use crate::config::RailsConfig;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnRampRequest {
    pub phone: String,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnRampInitiation {
    pub external_tx_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub phone: String,
    pub amount_minor: i64,
    /// Chain transaction hash of the release leg, carried for provider-side
    /// reconciliation.
    pub onchain_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementInitiation {
    pub external_tx_code: String,
}

/// Provider-side view of a transaction, returned by the status-listing
/// endpoint the fallback reconciliation poll consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailTransactionStatus {
    pub external_tx_code: String,
    pub finished: bool,
    pub succeeded: bool,
    pub amount_minor: i64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MobileMoneyClient: Send + Sync {
    async fn quote_exchange_rate(&self) -> Result<Decimal>;

    async fn initiate_on_ramp(&self, request: &OnRampRequest) -> Result<OnRampInitiation>;

    async fn disburse(&self, request: &DisbursementRequest) -> Result<DisbursementInitiation>;

    /// Authoritative status lookup for a previously initiated transaction.
    /// `None` when the provider does not know the code (yet).
    async fn lookup_transaction(
        &self,
        external_tx_code: &str,
    ) -> Result<Option<RailTransactionStatus>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEscrowSpec {
    /// Ledger-side escrow id, recorded on-chain for reconciliation.
    pub reference: Uuid,
    pub amount_minor: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEscrowCreated {
    pub chain_escrow_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StablecoinTransfer {
    pub to_address: String,
    pub amount_minor: i64,
    /// Provider-side double-spend guard key; one transfer per payment id.
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTxReceipt {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainEscrowView {
    pub remaining_minor: i64,
    pub released_minor: i64,
    pub active: bool,
    pub refunded: bool,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn create_escrow(&self, spec: &ChainEscrowSpec) -> Result<ChainEscrowCreated>;

    async fn transfer_stablecoin(&self, transfer: &StablecoinTransfer) -> Result<ChainTxReceipt>;

    async fn refund_escrow(&self, chain_escrow_id: &str) -> Result<ChainTxReceipt>;

    async fn get_escrow(&self, chain_escrow_id: &str) -> Result<OnChainEscrowView>;

    /// Idempotent confirmation query: has a transfer for this payment id
    /// already landed? Checked before releasing so a retry racing a prior
    /// success cannot double-spend.
    async fn is_payment_id_used(&self, payment_id: Uuid) -> Result<bool>;
}

/// Select rail implementations from configuration.
pub fn build_rails(
    config: &RailsConfig,
) -> (Arc<dyn MobileMoneyClient>, Arc<dyn ChainClient>) {
    match config.mode.as_str() {
        "http" => (
            Arc::new(mobile_money::HttpMobileMoneyClient::new(
                &config.mobile_money_url,
                config.request_timeout_secs,
            )),
            Arc::new(chain::HttpChainClient::new(
                &config.chain_url,
                config.request_timeout_secs,
            )),
        ),
        _ => (
            Arc::new(mobile_money::MockMobileMoneyClient::new(
                config.mock_latency_ms,
                config.mock_success_rate,
            )),
            Arc::new(chain::MockChainClient::new(
                config.mock_latency_ms,
                config.mock_success_rate,
            )),
        ),
    }
}
