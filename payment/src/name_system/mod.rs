//! Name-system purchase (§4.10, §3 "Name-system purchase"): an orthogonal flow
//! sharing the ledger. Quotes a cost in the governance token via a contract read,
//! debits the payer in credits using the §4.2 multi-payer reservation path, submits
//! the write through the chain SDK, and records a receipt or a failed-purchase row
//! with an automatic refund.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gateway_common::money::Credits;

use crate::ledger::reserve::{finalize as ledger_finalize, refund as ledger_refund, reserve as ledger_reserve};
use crate::ledger::{LedgerStore, ReserveDirective};
use crate::pricing::{credits_for_crypto, CryptoFeeMode};

#[derive(Debug, Error)]
pub enum NameSystemError {
    #[error("purchase {0} not found")]
    NotFound(Uuid),
    #[error("registry write failed: {0}")]
    RegistryWriteFailed(String),
    #[error(transparent)]
    Ledger(#[from] crate::ledger::LedgerError),
    #[error(transparent)]
    Money(#[from] gateway_common::money::MoneyError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Success,
    Failed,
}

/// §3 "Name-system purchase".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameSystemPurchase {
    pub nonce: Uuid,
    pub intent: String,
    pub name: String,
    pub cost_native_atomic: u128,
    pub cost_credits: Credits,
    pub result_id: Option<String>,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait NameSystemPurchaseStore: Send + Sync {
    async fn insert(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError>;
    async fn get(&self, nonce: Uuid) -> Result<Option<NameSystemPurchase>, NameSystemError>;
    async fn update(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError>;
}

pub struct InMemoryNameSystemPurchaseStore {
    inner: std::sync::Mutex<std::collections::HashMap<Uuid, NameSystemPurchase>>,
}

impl InMemoryNameSystemPurchaseStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryNameSystemPurchaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameSystemPurchaseStore for InMemoryNameSystemPurchaseStore {
    async fn insert(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError> {
        self.inner.lock().unwrap().insert(purchase.nonce, purchase);
        Ok(())
    }

    async fn get(&self, nonce: Uuid) -> Result<Option<NameSystemPurchase>, NameSystemError> {
        Ok(self.inner.lock().unwrap().get(&nonce).cloned())
    }

    async fn update(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError> {
        self.inner.lock().unwrap().insert(purchase.nonce, purchase);
        Ok(())
    }
}

/// The external name-registry contract (§1 "out of scope ... only the interface
/// they consume/expose is specified").
#[async_trait]
pub trait NameRegistry: Send + Sync {
    /// Reads the current native-token cost of registering/renewing `name` under `intent`.
    async fn quote_cost_atomic(&self, intent: &str, name: &str) -> Result<u128, NameSystemError>;
    /// Submits the registry write via the chain SDK; returns an opaque result id (e.g. tx hash).
    async fn submit_purchase(&self, intent: &str, name: &str) -> Result<String, NameSystemError>;
}

pub struct FakeNameRegistry {
    pub cost_atomic: u128,
}

#[async_trait]
impl NameRegistry for FakeNameRegistry {
    async fn quote_cost_atomic(&self, _intent: &str, _name: &str) -> Result<u128, NameSystemError> {
        Ok(self.cost_atomic)
    }

    async fn submit_purchase(&self, _intent: &str, name: &str) -> Result<String, NameSystemError> {
        Ok(format!("fake-tx-{name}"))
    }
}

#[derive(Deserialize)]
struct QuoteResponse {
    cost_atomic: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    result_id: String,
}

/// Production [`NameRegistry`]: the registry contract itself lives on-chain (§1
/// "out of scope"), so this talks to a bridge service that already knows how to
/// read/write it, the same minimal-client shape as [`crate::gasless::facilitator::HttpFacilitator`].
pub struct HttpNameRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNameRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                gateway_common::config::DEFAULT_HTTP_DEADLINE_SECONDS,
            ))
            .build()
            .expect("name registry http client builds with static config");
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl NameRegistry for HttpNameRegistry {
    async fn quote_cost_atomic(&self, intent: &str, name: &str) -> Result<u128, NameSystemError> {
        let response = self
            .client
            .get(format!("{}/quote/{intent}/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| NameSystemError::Store(anyhow::anyhow!(e)))?;
        let parsed: QuoteResponse =
            response.json().await.map_err(|e| NameSystemError::Store(anyhow::anyhow!(e)))?;
        parsed
            .cost_atomic
            .parse()
            .map_err(|e| NameSystemError::Store(anyhow::anyhow!("non-numeric cost_atomic: {e}")))
    }

    async fn submit_purchase(&self, intent: &str, name: &str) -> Result<String, NameSystemError> {
        let response = self
            .client
            .post(format!("{}/purchase/{intent}/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| NameSystemError::Store(anyhow::anyhow!(e)))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NameSystemError::RegistryWriteFailed(body));
        }
        let parsed: SubmitResponse =
            response.json().await.map_err(|e| NameSystemError::Store(anyhow::anyhow!(e)))?;
        Ok(parsed.result_id)
    }
}

/// Quotes the governance-token cost and converts it to credits (§4.10: fee mode
/// `add`, the name-system's documented choice per §4.1 `credits_for_crypto`).
pub async fn quote(
    registry: &dyn NameRegistry,
    intent: &str,
    name: &str,
    native_credits_equivalent: impl Fn(u128) -> Credits,
) -> Result<(u128, Credits), NameSystemError> {
    let cost_atomic = registry.quote_cost_atomic(intent, name).await?;
    let native_as_credits = native_credits_equivalent(cost_atomic);
    let converted = credits_for_crypto(native_as_credits, CryptoFeeMode::Add)?;
    Ok((cost_atomic, converted.net))
}

/// Executes a purchase: reserves `cost_credits` from `payers` (§4.2 multi-payer
/// path), submits the registry write, and finalizes or refunds depending on the
/// outcome, recording a receipt or failed-purchase row either way.
pub async fn purchase(
    ledger: &dyn LedgerStore,
    registry: &dyn NameRegistry,
    store: &dyn NameSystemPurchaseStore,
    intent: &str,
    name: &str,
    grantee: &str,
    cost_atomic: u128,
    cost_credits: Credits,
) -> Result<NameSystemPurchase, NameSystemError> {
    let nonce = Uuid::new_v4();
    let reserve_key = format!("name-system:{nonce}");
    ledger_reserve(ledger, grantee, &reserve_key, cost_credits, &[], ReserveDirective::ListOrSelf).await?;

    let mut record = NameSystemPurchase {
        nonce,
        intent: intent.to_string(),
        name: name.to_string(),
        cost_native_atomic: cost_atomic,
        cost_credits,
        result_id: None,
        status: PurchaseStatus::Pending,
        created_at: Utc::now(),
    };
    store.insert(record.clone()).await?;

    match registry.submit_purchase(intent, name).await {
        Ok(result_id) => {
            ledger_finalize(ledger, &reserve_key).await?;
            record.result_id = Some(result_id);
            record.status = PurchaseStatus::Success;
        }
        Err(err) => {
            log::warn!("name-system purchase of {name:?} failed, refunding: {err}");
            ledger_refund(ledger, &reserve_key).await?;
            record.status = PurchaseStatus::Failed;
        }
    }
    store.update(record.clone()).await?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;

    struct FailingRegistry;

    #[async_trait]
    impl NameRegistry for FailingRegistry {
        async fn quote_cost_atomic(&self, _intent: &str, _name: &str) -> Result<u128, NameSystemError> {
            Ok(1000)
        }
        async fn submit_purchase(&self, _intent: &str, _name: &str) -> Result<String, NameSystemError> {
            Err(NameSystemError::RegistryWriteFailed("registry unavailable".into()))
        }
    }

    #[tokio::test]
    async fn successful_purchase_finalizes_reservation() {
        let ledger = InMemoryLedgerStore::new();
        ledger.credit("alice", Credits(10_000)).await;
        let registry = FakeNameRegistry { cost_atomic: 1000 };
        let store = InMemoryNameSystemPurchaseStore::new();

        let purchase_result =
            purchase(&ledger, &registry, &store, "buy", "example.ar", "alice", 1000, Credits(500))
                .await
                .unwrap();

        assert_eq!(purchase_result.status, PurchaseStatus::Success);
        assert_eq!(ledger.balance("alice").await.unwrap(), Credits(9_500));
    }

    #[tokio::test]
    async fn failed_purchase_refunds_automatically() {
        let ledger = InMemoryLedgerStore::new();
        ledger.credit("alice", Credits(10_000)).await;
        let registry = FailingRegistry;
        let store = InMemoryNameSystemPurchaseStore::new();

        let purchase_result =
            purchase(&ledger, &registry, &store, "buy", "example.ar", "alice", 1000, Credits(500))
                .await
                .unwrap();

        assert_eq!(purchase_result.status, PurchaseStatus::Failed);
        assert_eq!(ledger.balance("alice").await.unwrap(), Credits(10_000));
    }
}
