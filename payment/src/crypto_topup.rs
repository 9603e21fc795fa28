//! Crypto top-up (§3 "Crypto deposit", §6 "POST /account/balance/:scheme"). A
//! payer submits a chain tx id claiming a native-token transfer to the gateway's
//! deposit address; this module polls (via [`ChainTxVerifier`]) whether that tx
//! is confirmed and, once it is, credits the ledger exactly once.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gateway_common::money::Credits;

use crate::ledger::{LedgerReason, LedgerStore};

#[derive(Debug, Error)]
pub enum CryptoTopUpError {
    #[error("transaction {0} not found on chain")]
    TxNotFound(String),
    #[error(transparent)]
    Ledger(#[from] crate::ledger::LedgerError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoDeposit {
    pub scheme: String,
    pub address: String,
    pub tx_id: String,
    pub submitted_amount_atomic: u128,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CryptoDepositStore: Send + Sync {
    async fn upsert(&self, deposit: CryptoDeposit) -> Result<(), CryptoTopUpError>;
    async fn by_tx(&self, scheme: &str, tx_id: &str) -> Result<Option<CryptoDeposit>, CryptoTopUpError>;
}

pub struct InMemoryCryptoDepositStore {
    inner: std::sync::Mutex<std::collections::HashMap<(String, String), CryptoDeposit>>,
}

impl InMemoryCryptoDepositStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryCryptoDepositStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CryptoDepositStore for InMemoryCryptoDepositStore {
    async fn upsert(&self, deposit: CryptoDeposit) -> Result<(), CryptoTopUpError> {
        self.inner.lock().unwrap().insert((deposit.scheme.clone(), deposit.tx_id.clone()), deposit);
        Ok(())
    }

    async fn by_tx(&self, scheme: &str, tx_id: &str) -> Result<Option<CryptoDeposit>, CryptoTopUpError> {
        Ok(self.inner.lock().unwrap().get(&(scheme.to_string(), tx_id.to_string())).cloned())
    }
}

/// Confirms (or rejects) a chain transaction against the gateway's deposit
/// address. The external collaborator here is the chain node/indexer itself
/// (§1 "underlying blockchain gateway ... out of scope").
#[async_trait]
pub trait ChainTxVerifier: Send + Sync {
    async fn confirmed_amount_atomic(&self, scheme: &str, tx_id: &str) -> Result<Option<u128>, CryptoTopUpError>;
}

pub struct FakeChainTxVerifier {
    pub confirmed_amount_atomic: u128,
}

#[async_trait]
impl ChainTxVerifier for FakeChainTxVerifier {
    async fn confirmed_amount_atomic(&self, _scheme: &str, _tx_id: &str) -> Result<Option<u128>, CryptoTopUpError> {
        Ok(Some(self.confirmed_amount_atomic))
    }
}

#[derive(serde::Deserialize)]
struct TxStatusResponse {
    confirmed: bool,
    amount_atomic: Option<String>,
}

/// Production [`ChainTxVerifier`]: queries the chain node/indexer for a tx's
/// confirmation status, same minimal-client shape as the other external collaborators.
pub struct HttpChainTxVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainTxVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                gateway_common::config::DEFAULT_HTTP_DEADLINE_SECONDS,
            ))
            .build()
            .expect("chain tx verifier http client builds with static config");
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl ChainTxVerifier for HttpChainTxVerifier {
    async fn confirmed_amount_atomic(&self, scheme: &str, tx_id: &str) -> Result<Option<u128>, CryptoTopUpError> {
        let response = self
            .client
            .get(format!("{}/tx/{scheme}/{tx_id}", self.base_url))
            .send()
            .await
            .map_err(|e| CryptoTopUpError::Store(anyhow::anyhow!(e)))?;
        let parsed: TxStatusResponse =
            response.json().await.map_err(|e| CryptoTopUpError::Store(anyhow::anyhow!(e)))?;
        if !parsed.confirmed {
            return Ok(None);
        }
        let amount = parsed.amount_atomic.ok_or_else(|| CryptoTopUpError::TxNotFound(tx_id.to_string()))?;
        amount
            .parse()
            .map(Some)
            .map_err(|e| CryptoTopUpError::Store(anyhow::anyhow!("non-numeric amount_atomic: {e}")))
    }
}

/// Submits a tx id for top-up verification. Returns the deposit's status; a
/// `Confirmed` result credits the ledger exactly once (idempotent on `(scheme, tx_id)`:
/// a deposit already marked `Confirmed` is returned unchanged without re-crediting).
pub async fn submit_deposit(
    ledger: &dyn LedgerStore,
    deposit_store: &dyn CryptoDepositStore,
    verifier: &dyn ChainTxVerifier,
    scheme: &str,
    address: &str,
    tx_id: &str,
    credits_per_atomic_unit: Credits,
) -> Result<CryptoDeposit, CryptoTopUpError> {
    if let Some(existing) = deposit_store.by_tx(scheme, tx_id).await? {
        if existing.status != DepositStatus::Pending {
            return Ok(existing);
        }
    }

    let confirmed = verifier.confirmed_amount_atomic(scheme, tx_id).await?;
    let (status, submitted_amount) = match confirmed {
        Some(amount) => (DepositStatus::Confirmed, amount),
        None => (DepositStatus::Pending, 0),
    };

    let deposit = CryptoDeposit {
        scheme: scheme.to_string(),
        address: address.to_string(),
        tx_id: tx_id.to_string(),
        submitted_amount_atomic: submitted_amount,
        status,
        created_at: Utc::now(),
    };
    deposit_store.upsert(deposit.clone()).await?;

    if status == DepositStatus::Confirmed {
        let credit_amount = credits_per_atomic_unit.0.saturating_mul(submitted_amount);
        ledger
            .append_entry(address, credit_amount as i128, LedgerReason::CryptoTopUp, Uuid::new_v4())
            .await?;
    }

    Ok(deposit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;

    #[tokio::test]
    async fn confirmed_deposit_credits_exactly_once() {
        let ledger = InMemoryLedgerStore::new();
        let deposit_store = InMemoryCryptoDepositStore::new();
        let verifier = FakeChainTxVerifier { confirmed_amount_atomic: 1 };
        let rate = Credits(1_000_000_000_000); // 1e12 credits per whole native token

        submit_deposit(&ledger, &deposit_store, &verifier, "tos", "alice", "0xabc", rate).await.unwrap();
        submit_deposit(&ledger, &deposit_store, &verifier, "tos", "alice", "0xabc", rate).await.unwrap();

        assert_eq!(ledger.balance("alice").await.unwrap(), Credits(1_000_000_000_000));
    }

    #[tokio::test]
    async fn pending_deposit_does_not_credit() {
        let ledger = InMemoryLedgerStore::new();
        let deposit_store = InMemoryCryptoDepositStore::new();
        struct NeverConfirms;
        #[async_trait::async_trait]
        impl ChainTxVerifier for NeverConfirms {
            async fn confirmed_amount_atomic(&self, _s: &str, _t: &str) -> Result<Option<u128>, CryptoTopUpError> {
                Ok(None)
            }
        }

        let deposit = submit_deposit(&ledger, &deposit_store, &NeverConfirms, "tos", "alice", "0xdef", Credits(1))
            .await
            .unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert_eq!(ledger.balance("alice").await.unwrap(), Credits::ZERO);
    }
}
