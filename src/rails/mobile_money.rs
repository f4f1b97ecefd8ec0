use super::{
    DisbursementInitiation, DisbursementRequest, MobileMoneyClient, OnRampInitiation,
    OnRampRequest, RailTransactionStatus,
};
use crate::errors::{EscrowEngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub struct HttpMobileMoneyClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    rate: String,
}

#[derive(Debug, Deserialize)]
struct InitiationResponse {
    external_transaction_code: String,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusResponse {
    external_transaction_code: String,
    finished: bool,
    succeeded: bool,
    amount_minor: i64,
}

impl HttpMobileMoneyClient {
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
}

#[async_trait]
impl MobileMoneyClient for HttpMobileMoneyClient {
    async fn quote_exchange_rate(&self) -> Result<Decimal> {
        let resp = self
            .client
            .get(format!("{}/v1/rates/quote", self.base_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EscrowEngineError::ExchangeRateUnavailable);
        }

        let quote: QuoteResponse = resp.json().await?;
        Decimal::from_str(&quote.rate).map_err(|_| EscrowEngineError::ExchangeRateUnavailable)
    }

    async fn initiate_on_ramp(&self, request: &OnRampRequest) -> Result<OnRampInitiation> {
        let resp = self
            .client
            .post(format!("{}/v1/onramp", self.base_url))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EscrowEngineError::ExternalRailUnavailable(format!(
                "on-ramp initiation returned {}",
                resp.status()
            )));
        }

        let body: InitiationResponse = resp.json().await?;
        Ok(OnRampInitiation {
            external_tx_code: body.external_transaction_code,
        })
    }

    async fn disburse(&self, request: &DisbursementRequest) -> Result<DisbursementInitiation> {
        let resp = self
            .client
            .post(format!("{}/v1/disburse", self.base_url))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EscrowEngineError::ExternalRailUnavailable(format!(
                "disbursement returned {}",
                resp.status()
            )));
        }

        let body: InitiationResponse = resp.json().await?;
        Ok(DisbursementInitiation {
            external_tx_code: body.external_transaction_code,
        })
    }

    async fn lookup_transaction(
        &self,
        external_tx_code: &str,
    ) -> Result<Option<RailTransactionStatus>> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/transactions/{}",
                self.base_url, external_tx_code
            ))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            return Err(EscrowEngineError::ExternalRailUnavailable(format!(
                "transaction lookup returned {}",
                resp.status()
            )));
        }

        let body: TransactionStatusResponse = resp.json().await?;
        Ok(Some(RailTransactionStatus {
            external_tx_code: body.external_transaction_code,
            finished: body.finished,
            succeeded: body.succeeded,
            amount_minor: body.amount_minor,
        }))
    }
}

/// Mock provider: remembers what it initiated and reports it back as
/// succeeded at the expected amount. Latency and failure rate are
/// configurable so retry paths can be exercised locally.
pub struct MockMobileMoneyClient {
    latency_ms: u64,
    success_rate: f64,
    transactions: Arc<RwLock<HashMap<String, RailTransactionStatus>>>,
}

impl MockMobileMoneyClient {
    pub fn new(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            latency_ms,
            success_rate,
            transactions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn should_succeed(&self) -> bool {
        // random() is in [0, 1): rate 1.0 always succeeds, 0.0 always fails
        rand::random::<f64>() < self.success_rate
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }
}

#[async_trait]
impl MobileMoneyClient for MockMobileMoneyClient {
    async fn quote_exchange_rate(&self) -> Result<Decimal> {
        self.simulate_latency().await;
        // One stablecoin minor unit per 129.15 local minor units
        Ok(Decimal::from_str("129.15").expect("static rate parses"))
    }

    async fn initiate_on_ramp(&self, request: &OnRampRequest) -> Result<OnRampInitiation> {
        self.simulate_latency().await;

        if !self.should_succeed() {
            warn!("Mock mobile money: simulated on-ramp initiation failure");
            return Err(EscrowEngineError::ExternalRailUnavailable(
                "simulated provider failure".to_string(),
            ));
        }

        let code = format!("MM-{}", Uuid::new_v4().simple());
        self.transactions.write().await.insert(
            code.clone(),
            RailTransactionStatus {
                external_tx_code: code.clone(),
                finished: true,
                succeeded: true,
                amount_minor: request.amount_minor,
            },
        );

        info!(code = %code, amount_minor = request.amount_minor, "Mock on-ramp initiated");
        Ok(OnRampInitiation {
            external_tx_code: code,
        })
    }

    async fn disburse(&self, request: &DisbursementRequest) -> Result<DisbursementInitiation> {
        self.simulate_latency().await;

        if !self.should_succeed() {
            warn!("Mock mobile money: simulated disbursement failure");
            return Err(EscrowEngineError::ExternalRailUnavailable(
                "simulated provider failure".to_string(),
            ));
        }

        let code = format!("MM-OUT-{}", Uuid::new_v4().simple());
        self.transactions.write().await.insert(
            code.clone(),
            RailTransactionStatus {
                external_tx_code: code.clone(),
                finished: true,
                succeeded: true,
                amount_minor: request.amount_minor,
            },
        );

        info!(code = %code, amount_minor = request.amount_minor, "Mock disbursement initiated");
        Ok(DisbursementInitiation {
            external_tx_code: code,
        })
    }

    async fn lookup_transaction(
        &self,
        external_tx_code: &str,
    ) -> Result<Option<RailTransactionStatus>> {
        self.simulate_latency().await;
        Ok(self.transactions.read().await.get(external_tx_code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_on_ramp_round_trip() {
        let client = MockMobileMoneyClient::new(0, 1.0);
        let initiation = client
            .initiate_on_ramp(&OnRampRequest {
                phone: "+254700000001".to_string(),
                amount_minor: 50_000,
            })
            .await
            .unwrap();

        let status = client
            .lookup_transaction(&initiation.external_tx_code)
            .await
            .unwrap()
            .expect("initiated transaction is known");
        assert!(status.succeeded);
        assert_eq!(status.amount_minor, 50_000);
    }

    #[tokio::test]
    async fn test_mock_unknown_code_is_none() {
        let client = MockMobileMoneyClient::new(0, 1.0);
        assert!(client.lookup_transaction("MM-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_failure_rate_zero_always_fails() {
        let client = MockMobileMoneyClient::new(0, 0.0);
        let result = client
            .initiate_on_ramp(&OnRampRequest {
                phone: "+254700000001".to_string(),
                amount_minor: 1_000,
            })
            .await;
        assert!(matches!(
            result,
            Err(EscrowEngineError::ExternalRailUnavailable(_))
        ));
    }
}
