//! Upload-side client for the payment service's `/x402/*` protocol (§4.3, §4.5
//! step 6). The upload service never touches ledger/gasless-payment state
//! directly (§3 "Ownership"); it forwards the client's `X-PAYMENT` header and
//! relays back whatever the payment service decided.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::http_client::InterServiceClient;
use gateway_common::money::{AtomicUnits, Credits};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GaslessClientError {
    #[error(transparent)]
    Upstream(#[from] gateway_common::error::GatewayError),
}

/// Mirrors `gateway_payment::gasless::types::GaslessPaymentRecord`'s wire shape.
/// Upload only ever reads this over HTTP, so it carries its own copy rather than
/// a cross-crate dependency on the payment service's internal types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaslessPaymentRecord {
    pub id: uuid::Uuid,
    pub payer: String,
    pub payee: String,
    pub network: String,
    pub stablecoin_atomic_amount: AtomicUnits,
    pub credit_equivalent: Credits,
    pub chain_tx_hash: Option<String>,
    pub mode: String,
    pub declared_bytes: u64,
    pub actual_bytes: Option<u64>,
    pub item_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait GaslessClient: Send + Sync {
    /// `POST /x402/payment/:scheme/:address`, forwarding the raw `X-PAYMENT`
    /// header value the client sent. `mode_override` lets the raw-blob endpoint
    /// force `exact-only` (DESIGN.md Open Question #2); `None` leaves the payment
    /// service's per-endpoint default (`hybrid` for `POST /tx`) in place.
    async fn verify_and_settle(
        &self,
        scheme: &str,
        address: &str,
        bytes: u64,
        item_id: &str,
        payment_header: &str,
        mode_override: Option<&str>,
    ) -> Result<GaslessPaymentRecord, GaslessClientError>;

    /// `POST /x402/finalize` (§4.3 post-upload fraud finalization).
    async fn finalize(&self, data_item_id: &str, actual_byte_count: u64) -> Result<GaslessPaymentRecord, GaslessClientError>;
}

pub struct HttpGaslessClient {
    client: InterServiceClient,
}

impl HttpGaslessClient {
    pub fn new(client: InterServiceClient) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
struct FinalizeBody<'a> {
    data_item_id: &'a str,
    actual_byte_count: u64,
}

#[async_trait]
impl GaslessClient for HttpGaslessClient {
    async fn verify_and_settle(
        &self,
        scheme: &str,
        address: &str,
        bytes: u64,
        item_id: &str,
        payment_header: &str,
        mode_override: Option<&str>,
    ) -> Result<GaslessPaymentRecord, GaslessClientError> {
        // The payment service reads `X-PAYMENT` off the request itself; since
        // `InterServiceClient::post_json` doesn't expose per-call headers, the
        // header value travels as a query parameter the payment service accepts
        // as an inter-service equivalent of the client-facing header.
        let mut path = format!(
            "/x402/payment/{scheme}/{address}?bytes={bytes}&item_id={}&x_payment={}",
            urlencoding(item_id),
            urlencoding(payment_header),
        );
        if let Some(mode) = mode_override {
            path.push_str(&format!("&mode={}", urlencoding(mode)));
        }
        let record: GaslessPaymentRecord = self.client.post_json(&path, &serde_json::json!({})).await?;
        Ok(record)
    }

    async fn finalize(&self, data_item_id: &str, actual_byte_count: u64) -> Result<GaslessPaymentRecord, GaslessClientError> {
        let record: GaslessPaymentRecord = self
            .client
            .post_json("/x402/finalize", &FinalizeBody { data_item_id, actual_byte_count })
            .await?;
        Ok(record)
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Encodes a settled payment's receipt as the base64-JSON `X-Payment-Response`
/// header (§4.5 step 9), mirroring `gateway_payment::gasless::encode_payment_response`.
pub fn encode_payment_response(record: &GaslessPaymentRecord) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let body = serde_json::json!({
        "success": true,
        "transactionHash": record.chain_tx_hash,
        "payer": record.payer,
    });
    STANDARD.encode(serde_json::to_vec(&body).expect("payment response serializes"))
}

/// Fixed fake for tests exercising the balance-reservation branch only; panics if
/// a test actually routes through the gasless path without configuring one.
pub struct FakeGaslessClient;

#[async_trait]
impl GaslessClient for FakeGaslessClient {
    async fn verify_and_settle(
        &self,
        _scheme: &str,
        _address: &str,
        bytes: u64,
        item_id: &str,
        _payment_header: &str,
        mode_override: Option<&str>,
    ) -> Result<GaslessPaymentRecord, GaslessClientError> {
        Ok(GaslessPaymentRecord {
            id: uuid::Uuid::new_v4(),
            payer: "fake-payer".to_string(),
            payee: "fake-payee".to_string(),
            network: "fake".to_string(),
            stablecoin_atomic_amount: AtomicUnits(0),
            credit_equivalent: Credits::ZERO,
            chain_tx_hash: None,
            mode: mode_override.unwrap_or("hybrid").to_string(),
            declared_bytes: bytes,
            actual_bytes: None,
            item_id: Some(item_id.to_string()),
            status: "confirmed".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn finalize(&self, data_item_id: &str, actual_byte_count: u64) -> Result<GaslessPaymentRecord, GaslessClientError> {
        Ok(GaslessPaymentRecord {
            id: uuid::Uuid::new_v4(),
            payer: "fake-payer".to_string(),
            payee: "fake-payee".to_string(),
            network: "fake".to_string(),
            stablecoin_atomic_amount: AtomicUnits(0),
            credit_equivalent: Credits::ZERO,
            chain_tx_hash: None,
            mode: "hybrid".to_string(),
            declared_bytes: actual_byte_count,
            actual_bytes: Some(actual_byte_count),
            item_id: Some(data_item_id.to_string()),
            status: "confirmed".to_string(),
            created_at: Utc::now(),
        })
    }
}
