//! Fiat top-up quote + processor webhook (§4.1/§4.2/§6 "POST /stripe-webhook",
//! "GET /top-up/{checkout-session|payment-intent}/..."). The HMAC-verified webhook
//! is grounded on the teacher's callback-signature verification
//! (`common/src/api/callback.rs`): `timestamp + "." + body`, HMAC-SHA256, constant
//! -time compare, rejecting stale timestamps.

pub mod postgres;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use gateway_common::money::Credits;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook delivery before its signature is rejected outright,
/// independent of whether the HMAC itself still matches.
pub const WEBHOOK_MAX_AGE_SECONDS: i64 = 300;

#[derive(Debug, Error)]
pub enum FiatError {
    #[error("quote {0} not found or already consumed")]
    QuoteNotFound(Uuid),
    #[error("quote {0} has expired")]
    QuoteExpired(Uuid),
    #[error("webhook signature is invalid or stale")]
    BadWebhookSignature,
    #[error(transparent)]
    Money(#[from] gateway_common::money::MoneyError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// §3 "Fiat top-up quote".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiatTopUpQuote {
    pub id: Uuid,
    pub address: String,
    pub fiat_amount_minor_units: u64,
    pub fiat_currency: String,
    pub credit_equivalent: Credits,
    pub promo_codes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub processor_session_id: Option<String>,
}

impl FiatTopUpQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage seam for fiat quotes: created at `GET /top-up/...`, consumed by the
/// webhook or left to expire.
#[async_trait::async_trait]
pub trait FiatQuoteStore: Send + Sync {
    async fn insert(&self, quote: FiatTopUpQuote) -> Result<(), FiatError>;
    async fn get(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError>;
    async fn consume(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError>;
}

pub struct InMemoryFiatQuoteStore {
    inner: std::sync::Mutex<std::collections::HashMap<Uuid, FiatTopUpQuote>>,
}

impl InMemoryFiatQuoteStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryFiatQuoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FiatQuoteStore for InMemoryFiatQuoteStore {
    async fn insert(&self, quote: FiatTopUpQuote) -> Result<(), FiatError> {
        self.inner.lock().unwrap().insert(quote.id, quote);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn consume(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError> {
        Ok(self.inner.lock().unwrap().remove(&id))
    }
}

/// Generates the HMAC-SHA256 signature a webhook sender is expected to attach,
/// `timestamp + "." + body`, same construction as the teacher's callback signer.
pub fn sign_webhook(secret: &[u8], timestamp: i64, body: &str) -> String {
    let payload = format!("{timestamp}.{body}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a processor webhook: signature must match and the timestamp must be
/// within [`WEBHOOK_MAX_AGE_SECONDS`] of now in either direction.
pub fn verify_webhook(secret: &[u8], timestamp: i64, body: &str, signature: &str) -> bool {
    let now = Utc::now().timestamp();
    if (now - timestamp).abs() > WEBHOOK_MAX_AGE_SECONDS {
        return false;
    }
    let expected = sign_webhook(secret, timestamp, body);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// Creates a fiat top-up quote (§6 "GET /top-up/.../:address/:currency/:amount").
/// `valid_for` mirrors the processor's own checkout-session expiry.
pub fn create_quote(
    address: &str,
    fiat_amount_minor_units: u64,
    fiat_currency: &str,
    credit_equivalent: Credits,
    promo_codes: Vec<String>,
    valid_for: Duration,
) -> FiatTopUpQuote {
    FiatTopUpQuote {
        id: Uuid::new_v4(),
        address: address.to_string(),
        fiat_amount_minor_units,
        fiat_currency: fiat_currency.to_string(),
        credit_equivalent,
        promo_codes,
        expires_at: Utc::now() + valid_for,
        processor_session_id: None,
    }
}

/// Processes a webhook event: consumes the referenced quote and credits the
/// ledger. Consuming the quote (rather than leaving it) makes this idempotent —
/// a duplicate webhook delivery finds nothing left to consume.
pub async fn handle_webhook_event(
    ledger: &dyn crate::ledger::LedgerStore,
    quote_store: &dyn FiatQuoteStore,
    quote_id: Uuid,
) -> Result<(), FiatError> {
    let Some(quote) = quote_store.consume(quote_id).await? else {
        // Already consumed or never existed: treat as a no-op, not an error, since
        // webhook senders retry on anything but a 2xx.
        return Ok(());
    };
    if quote.is_expired(Utc::now()) {
        return Err(FiatError::QuoteExpired(quote_id));
    }
    ledger
        .append_entry(
            &quote.address,
            quote.credit_equivalent.0 as i128,
            crate::ledger::LedgerReason::FiatTopUp,
            Uuid::new_v4(),
        )
        .await
        .map_err(|e| FiatError::Store(anyhow::anyhow!(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;

    #[test]
    fn webhook_signature_round_trips() {
        let secret = b"top-secret";
        let now = Utc::now().timestamp();
        let body = r#"{"event":"checkout.session.completed"}"#;
        let signature = sign_webhook(secret, now, body);
        assert!(verify_webhook(secret, now, body, &signature));
    }

    #[test]
    fn webhook_rejects_stale_timestamp() {
        let secret = b"top-secret";
        let old = Utc::now().timestamp() - 1000;
        let body = "{}";
        let signature = sign_webhook(secret, old, body);
        assert!(!verify_webhook(secret, old, body, &signature));
    }

    #[test]
    fn webhook_rejects_tampered_body() {
        let secret = b"top-secret";
        let now = Utc::now().timestamp();
        let signature = sign_webhook(secret, now, "original");
        assert!(!verify_webhook(secret, now, "tampered", &signature));
    }

    #[tokio::test]
    async fn handling_event_twice_only_credits_once() {
        let ledger = InMemoryLedgerStore::new();
        let quote_store = InMemoryFiatQuoteStore::new();
        let quote = create_quote("alice", 1000, "usd", Credits(5_000), vec![], Duration::minutes(30));
        let id = quote.id;
        quote_store.insert(quote).await.unwrap();

        handle_webhook_event(&ledger, &quote_store, id).await.unwrap();
        handle_webhook_event(&ledger, &quote_store, id).await.unwrap();

        assert_eq!(ledger.balance("alice").await.unwrap(), Credits(5_000));
    }

    #[tokio::test]
    async fn expired_quote_is_rejected() {
        let ledger = InMemoryLedgerStore::new();
        let quote_store = InMemoryFiatQuoteStore::new();
        let mut quote = create_quote("alice", 1000, "usd", Credits(5_000), vec![], Duration::minutes(30));
        quote.expires_at = Utc::now() - Duration::minutes(1);
        let id = quote.id;
        quote_store.insert(quote).await.unwrap();

        let result = handle_webhook_event(&ledger, &quote_store, id).await;
        assert!(matches!(result, Err(FiatError::QuoteExpired(_))));
    }
}
