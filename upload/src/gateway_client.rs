//! The underlying blockchain gateway (§1 "treated as an external collaborator").
//! This module defines the narrow interface the bundling workers need against it
//! — submit, seed, query status, query item indexing, wallet balance — with one
//! HTTP-backed implementation and one fixed/deterministic fake for tests, the same
//! pairing `gateway_payment::gasless::Facilitator` uses for the stablecoin
//! facilitator RPC.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainGatewayError {
    #[error("chain gateway request failed: {0}")]
    Request(String),
    #[error("chain gateway returned an error: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTxStatus {
    Pending,
    Confirmations(u64),
    NotFound,
}

/// §4.8 poster/seeder/verifier + §4.1 pricing oracle's "blockchain-native price
/// feed" surface, narrowed to what the bundling workers call.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// §4.8 poster: "Submit the bundle transaction to the chain gateway". Returns
    /// the assigned tx id.
    async fn submit_transaction(&self, payload: &[u8], tags: &gateway_common::tags::TagList, signer_key_id: &str) -> Result<String, ChainGatewayError>;

    /// §4.8 seeder: "Stream the bundle payload to the chain's chunk API", bounded
    /// by [`gateway_common::config::SEED_STAGE_DEADLINE_SECONDS`].
    async fn seed_chunks(&self, tx_id: &str, payload: &[u8]) -> Result<(), ChainGatewayError>;

    /// §3 "deadline height" / §4.8 planner eligibility ("deadline height minus
    /// current chain height"): the chain's current block height.
    async fn current_height(&self) -> Result<u64, ChainGatewayError>;

    async fn transaction_status(&self, tx_id: &str) -> Result<ChainTxStatus, ChainGatewayError>;

    /// §4.8 verifier: "check each planned item is indexed via the chain's query
    /// interface (batch size 100, concurrency 10)". Returns, for each requested id
    /// in order, whether it is indexed.
    async fn items_indexed(&self, tx_id: &str, item_content_ids: &[String]) -> Result<Vec<bool>, ChainGatewayError>;

    /// §4.8 poster: "on chain-submit error, check wallet balance" to decide whether
    /// the failure is recoverable (insufficient native-token balance) or transient.
    async fn wallet_balance(&self) -> Result<u128, ChainGatewayError>;

    /// §4.1 "blockchain-native price feed": sampled price per 10 GiB of storage, in
    /// the chain's native token atomic units.
    async fn storage_price_per_10_gib(&self) -> Result<u128, ChainGatewayError>;
}

pub struct HttpChainGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(gateway_common::config::DEFAULT_HTTP_DEADLINE_SECONDS))
            .build()
            .expect("reqwest client builds with a static config");
        Self { client, base_url: base_url.into() }
    }
}

#[derive(Serialize)]
struct SubmitTxRequest<'a> {
    payload_base64: String,
    tags: &'a gateway_common::tags::TagList,
    signer_key_id: &'a str,
}

#[derive(Deserialize)]
struct SubmitTxResponse {
    tx_id: String,
}

#[async_trait]
impl ChainGateway for HttpChainGateway {
    async fn submit_transaction(&self, payload: &[u8], tags: &gateway_common::tags::TagList, signer_key_id: &str) -> Result<String, ChainGatewayError> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let body = SubmitTxRequest { payload_base64: STANDARD.encode(payload), tags, signer_key_id };
        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChainGatewayError::Rejected(format!("status {}", response.status())));
        }
        let parsed: SubmitTxResponse = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        Ok(parsed.tx_id)
    }

    async fn seed_chunks(&self, tx_id: &str, payload: &[u8]) -> Result<(), ChainGatewayError> {
        let response = self
            .client
            .post(format!("{}/chunks/{tx_id}", self.base_url))
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChainGatewayError::Rejected(format!("status {}", response.status())));
        }
        Ok(())
    }

    async fn current_height(&self) -> Result<u64, ChainGatewayError> {
        #[derive(Deserialize)]
        struct HeightResponse {
            height: u64,
        }
        let response = self
            .client
            .get(format!("{}/height", self.base_url))
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        let parsed: HeightResponse = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        Ok(parsed.height)
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<ChainTxStatus, ChainGatewayError> {
        #[derive(Deserialize)]
        struct StatusResponse {
            confirmations: Option<u64>,
        }
        let response = self
            .client
            .get(format!("{}/tx/{tx_id}/status", self.base_url))
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ChainTxStatus::NotFound);
        }
        let parsed: StatusResponse = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        Ok(match parsed.confirmations {
            Some(n) => ChainTxStatus::Confirmations(n),
            None => ChainTxStatus::Pending,
        })
    }

    async fn items_indexed(&self, tx_id: &str, item_content_ids: &[String]) -> Result<Vec<bool>, ChainGatewayError> {
        #[derive(Serialize)]
        struct Query<'a> {
            ids: &'a [String],
        }
        #[derive(Deserialize)]
        struct Response {
            indexed: Vec<bool>,
        }
        let response = self
            .client
            .post(format!("{}/tx/{tx_id}/items/indexed", self.base_url))
            .json(&Query { ids: item_content_ids })
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        let parsed: Response = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        Ok(parsed.indexed)
    }

    async fn wallet_balance(&self) -> Result<u128, ChainGatewayError> {
        #[derive(Deserialize)]
        struct Response {
            balance: String,
        }
        let response = self
            .client
            .get(format!("{}/wallet/balance", self.base_url))
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        let parsed: Response = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        parsed.balance.parse().map_err(|e| ChainGatewayError::Request(format!("malformed balance: {e}")))
    }

    async fn storage_price_per_10_gib(&self) -> Result<u128, ChainGatewayError> {
        #[derive(Deserialize)]
        struct Response {
            price_per_10_gib: String,
        }
        let response = self
            .client
            .get(format!("{}/price/storage", self.base_url))
            .send()
            .await
            .map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        let parsed: Response = response.json().await.map_err(|e| ChainGatewayError::Request(e.to_string()))?;
        parsed.price_per_10_gib.parse().map_err(|e| ChainGatewayError::Request(format!("malformed price: {e}")))
    }
}

/// Deterministic fake: every submission confirms instantly at 18+ blocks and every
/// item is reported indexed, unless `fail_submit`/`drop_confirmations` are set.
pub struct FakeChainGateway {
    pub wallet_balance: u128,
    pub confirmations: std::sync::atomic::AtomicU64,
    pub height: std::sync::atomic::AtomicU64,
}

impl FakeChainGateway {
    pub fn new() -> Self {
        Self {
            wallet_balance: 1_000_000_000_000,
            confirmations: std::sync::atomic::AtomicU64::new(gateway_common::config::BUNDLE_VERIFY_CONFIRMATIONS),
            height: std::sync::atomic::AtomicU64::new(1_000_000),
        }
    }
}

impl Default for FakeChainGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainGateway for FakeChainGateway {
    async fn current_height(&self) -> Result<u64, ChainGatewayError> {
        Ok(self.height.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn submit_transaction(&self, _payload: &[u8], _tags: &gateway_common::tags::TagList, _signer_key_id: &str) -> Result<String, ChainGatewayError> {
        Ok(format!("fake-tx-{}", uuid::Uuid::new_v4()))
    }

    async fn seed_chunks(&self, _tx_id: &str, _payload: &[u8]) -> Result<(), ChainGatewayError> {
        Ok(())
    }

    async fn transaction_status(&self, _tx_id: &str) -> Result<ChainTxStatus, ChainGatewayError> {
        Ok(ChainTxStatus::Confirmations(self.confirmations.load(std::sync::atomic::Ordering::SeqCst)))
    }

    async fn items_indexed(&self, _tx_id: &str, item_content_ids: &[String]) -> Result<Vec<bool>, ChainGatewayError> {
        Ok(vec![true; item_content_ids.len()])
    }

    async fn wallet_balance(&self) -> Result<u128, ChainGatewayError> {
        Ok(self.wallet_balance)
    }

    async fn storage_price_per_10_gib(&self) -> Result<u128, ChainGatewayError> {
        Ok(1_000_000_000)
    }
}
