use super::{
    ChainClient, ChainEscrowCreated, ChainEscrowSpec, ChainTxReceipt, OnChainEscrowView,
    StablecoinTransfer,
};
use crate::errors::{EscrowEngineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub struct HttpChainClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateEscrowResponse {
    chain_escrow_id: String,
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIdUsedResponse {
    used: bool,
}

#[derive(Debug, Deserialize)]
struct ChainErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl HttpChainClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client can be built");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn map_error(resp: reqwest::Response, context: &str) -> EscrowEngineError {
        let status = resp.status();
        let body: Option<ChainErrorBody> = resp.json().await.ok();

        match body.as_ref().and_then(|b| b.code.as_deref()) {
            Some("invalid_address") => EscrowEngineError::InvalidAddress(
                body.and_then(|b| b.message).unwrap_or_default(),
            ),
            Some("insufficient_balance") => EscrowEngineError::InsufficientBalance {
                scope: "chain",
                required: 0,
                available: 0,
            },
            _ => EscrowEngineError::ExternalRailUnavailable(format!(
                "{} returned {}",
                context, status
            )),
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn create_escrow(&self, spec: &ChainEscrowSpec) -> Result<ChainEscrowCreated> {
        let resp = self
            .client
            .post(format!("{}/v1/escrows", self.base_url))
            .json(spec)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::map_error(resp, "escrow creation").await);
        }

        let body: CreateEscrowResponse = resp.json().await?;
        Ok(ChainEscrowCreated {
            chain_escrow_id: body.chain_escrow_id,
            tx_hash: body.tx_hash,
        })
    }

    async fn transfer_stablecoin(&self, transfer: &StablecoinTransfer) -> Result<ChainTxReceipt> {
        let resp = self
            .client
            .post(format!("{}/v1/transfers", self.base_url))
            .json(transfer)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::map_error(resp, "stablecoin transfer").await);
        }

        let body: TransferResponse = resp.json().await?;
        Ok(ChainTxReceipt {
            tx_hash: body.tx_hash,
        })
    }

    async fn refund_escrow(&self, chain_escrow_id: &str) -> Result<ChainTxReceipt> {
        let resp = self
            .client
            .post(format!(
                "{}/v1/escrows/{}/refund",
                self.base_url, chain_escrow_id
            ))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::map_error(resp, "escrow refund").await);
        }

        let body: TransferResponse = resp.json().await?;
        Ok(ChainTxReceipt {
            tx_hash: body.tx_hash,
        })
    }

    async fn get_escrow(&self, chain_escrow_id: &str) -> Result<OnChainEscrowView> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/escrows/{}",
                self.base_url, chain_escrow_id
            ))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::map_error(resp, "escrow lookup").await);
        }

        Ok(resp.json().await?)
    }

    async fn is_payment_id_used(&self, payment_id: Uuid) -> Result<bool> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/payments/{}/used",
                self.base_url, payment_id
            ))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::map_error(resp, "payment id lookup").await);
        }

        let body: PaymentIdUsedResponse = resp.json().await?;
        Ok(body.used)
    }
}

/// Mock chain: in-memory escrow contract state plus the payment-id guard,
/// enough to drive the settlement workers end to end without a node.
pub struct MockChainClient {
    latency_ms: u64,
    success_rate: f64,
    escrows: Arc<RwLock<HashMap<String, OnChainEscrowView>>>,
    used_payment_ids: Arc<RwLock<HashSet<Uuid>>>,
}

impl MockChainClient {
    pub fn new(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            latency_ms,
            success_rate,
            escrows: Arc::new(RwLock::new(HashMap::new())),
            used_payment_ids: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    fn should_succeed(&self) -> bool {
        rand::random::<f64>() < self.success_rate
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn tx_hash() -> String {
        format!("0x{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn create_escrow(&self, spec: &ChainEscrowSpec) -> Result<ChainEscrowCreated> {
        self.simulate_latency().await;

        if !self.should_succeed() {
            warn!("Mock chain: simulated escrow creation failure");
            return Err(EscrowEngineError::ExternalRailUnavailable(
                "simulated chain failure".to_string(),
            ));
        }

        let chain_escrow_id = format!("ESC-{}", spec.reference.simple());
        self.escrows.write().await.insert(
            chain_escrow_id.clone(),
            OnChainEscrowView {
                remaining_minor: spec.amount_minor,
                released_minor: 0,
                active: true,
                refunded: false,
            },
        );

        info!(chain_escrow_id = %chain_escrow_id, amount_minor = spec.amount_minor, "Mock chain escrow created");
        Ok(ChainEscrowCreated {
            chain_escrow_id,
            tx_hash: Self::tx_hash(),
        })
    }

    async fn transfer_stablecoin(&self, transfer: &StablecoinTransfer) -> Result<ChainTxReceipt> {
        self.simulate_latency().await;

        if transfer.to_address.is_empty() {
            return Err(EscrowEngineError::InvalidAddress("empty address".to_string()));
        }

        if !self.should_succeed() {
            warn!("Mock chain: simulated transfer failure");
            return Err(EscrowEngineError::ExternalRailUnavailable(
                "simulated chain failure".to_string(),
            ));
        }

        self.used_payment_ids.write().await.insert(transfer.payment_id);
        info!(payment_id = %transfer.payment_id, amount_minor = transfer.amount_minor, "Mock stablecoin transfer");
        Ok(ChainTxReceipt {
            tx_hash: Self::tx_hash(),
        })
    }

    async fn refund_escrow(&self, chain_escrow_id: &str) -> Result<ChainTxReceipt> {
        self.simulate_latency().await;

        if !self.should_succeed() {
            return Err(EscrowEngineError::ExternalRailUnavailable(
                "simulated chain failure".to_string(),
            ));
        }

        let mut escrows = self.escrows.write().await;
        match escrows.get_mut(chain_escrow_id) {
            Some(view) => {
                view.active = false;
                view.refunded = true;
                view.remaining_minor = 0;
                Ok(ChainTxReceipt {
                    tx_hash: Self::tx_hash(),
                })
            }
            None => Err(EscrowEngineError::ExternalRailUnavailable(format!(
                "unknown chain escrow {}",
                chain_escrow_id
            ))),
        }
    }

    async fn get_escrow(&self, chain_escrow_id: &str) -> Result<OnChainEscrowView> {
        self.simulate_latency().await;

        self.escrows
            .read()
            .await
            .get(chain_escrow_id)
            .cloned()
            .ok_or_else(|| {
                EscrowEngineError::ExternalRailUnavailable(format!(
                    "unknown chain escrow {}",
                    chain_escrow_id
                ))
            })
    }

    async fn is_payment_id_used(&self, payment_id: Uuid) -> Result<bool> {
        self.simulate_latency().await;
        Ok(self.used_payment_ids.read().await.contains(&payment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_escrow_lifecycle() {
        let client = MockChainClient::new(0, 1.0);
        let created = client
            .create_escrow(&ChainEscrowSpec {
                reference: Uuid::new_v4(),
                amount_minor: 50_000,
                expires_at: None,
            })
            .await
            .unwrap();

        let view = client.get_escrow(&created.chain_escrow_id).await.unwrap();
        assert!(view.active);
        assert_eq!(view.remaining_minor, 50_000);

        client.refund_escrow(&created.chain_escrow_id).await.unwrap();
        let view = client.get_escrow(&created.chain_escrow_id).await.unwrap();
        assert!(view.refunded);
        assert_eq!(view.remaining_minor, 0);
    }

    #[tokio::test]
    async fn test_payment_id_guard_flips_after_transfer() {
        let client = MockChainClient::new(0, 1.0);
        let payment_id = Uuid::new_v4();

        assert!(!client.is_payment_id_used(payment_id).await.unwrap());

        client
            .transfer_stablecoin(&StablecoinTransfer {
                to_address: "0xabc".to_string(),
                amount_minor: 10_000,
                payment_id,
            })
            .await
            .unwrap();

        assert!(client.is_payment_id_used(payment_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_transfer_rejects_empty_address() {
        let client = MockChainClient::new(0, 1.0);
        let result = client
            .transfer_stablecoin(&StablecoinTransfer {
                to_address: String::new(),
                amount_minor: 10_000,
                payment_id: Uuid::new_v4(),
            })
            .await;
        assert!(matches!(result, Err(EscrowEngineError::InvalidAddress(_))));
    }
}
