//! Upload-side wrapper around [`gateway_common::http_client::InterServiceClient`]
//! for the four inter-service endpoints the payment service exposes for §4.2's
//! reserve/check/refund/finalize lifecycle (§6 "protected (shared secret)").

use async_trait::async_trait;
use gateway_common::http_client::InterServiceClient;
use gateway_common::money::Credits;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentClientError {
    #[error("insufficient balance: need {need}, spendable {spendable}")]
    Insufficient { need: u128, spendable: u128 },
    #[error(transparent)]
    Upstream(#[from] gateway_common::error::GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDirective {
    ListOnly,
    ListOrSelf,
}

impl ReserveDirective {
    fn as_query_value(self) -> &'static str {
        match self {
            ReserveDirective::ListOnly => "list-only",
            ReserveDirective::ListOrSelf => "list-or-self",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    sufficient: bool,
    cost: Credits,
    #[serde(rename = "currentSpendable")]
    current_spendable: Credits,
}

pub struct CheckOutcome {
    pub sufficient: bool,
    pub cost: Credits,
    pub current_spendable: Credits,
}

#[derive(Debug, Deserialize)]
struct ReserveResponse {
    reserved: Credits,
}

/// §4.2/§4.5: the subset of the payment service's account API the upload ingest
/// path calls. A trait so workers and `ingest.rs` can be tested against a fixed
/// fake instead of a live payment service.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Returns the credits actually reserved, so the caller can record it as the
    /// item's `assessed_price` (§3 "Data item").
    async fn reserve(&self, scheme: &str, address: &str, bytes: u64, data_item_id: &str, directive: ReserveDirective) -> Result<Credits, PaymentClientError>;
    async fn refund(&self, scheme: &str, address: &str, bytes: u64, data_item_id: &str) -> Result<(), PaymentClientError>;
    async fn check(&self, scheme: &str, address: &str, bytes: u64, directive: ReserveDirective) -> Result<CheckOutcome, PaymentClientError>;
    async fn finalize(&self, data_item_id: &str) -> Result<(), PaymentClientError>;
}

pub struct HttpPaymentClient {
    client: InterServiceClient,
}

impl HttpPaymentClient {
    pub fn new(client: InterServiceClient) -> Self {
        Self { client }
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn reserve(&self, scheme: &str, address: &str, bytes: u64, data_item_id: &str, directive: ReserveDirective) -> Result<Credits, PaymentClientError> {
        let path = format!(
            "/reserve-balance/{scheme}/{address}?bytes={bytes}&data_item_id={}&directive={}",
            urlencode(data_item_id),
            directive.as_query_value(),
        );
        let response: ReserveResponse = self.client.get_json(&path).await.map_err(|err| match err {
            gateway_common::error::GatewayError::InsufficientBalance { need, spendable } => PaymentClientError::Insufficient { need, spendable },
            other => PaymentClientError::Upstream(other),
        })?;
        Ok(response.reserved)
    }

    async fn refund(&self, scheme: &str, address: &str, bytes: u64, data_item_id: &str) -> Result<(), PaymentClientError> {
        let path = format!("/refund-balance/{scheme}/{address}?bytes={bytes}&data_item_id={}", urlencode(data_item_id));
        self.client.get_json::<serde_json::Value>(&path).await?;
        Ok(())
    }

    async fn check(&self, scheme: &str, address: &str, bytes: u64, directive: ReserveDirective) -> Result<CheckOutcome, PaymentClientError> {
        let path = format!(
            "/check-balance/{scheme}/{address}?bytes={bytes}&data_item_id=check&directive={}",
            directive.as_query_value(),
        );
        let response: CheckResponse = self.client.get_json(&path).await?;
        Ok(CheckOutcome { sufficient: response.sufficient, cost: response.cost, current_spendable: response.current_spendable })
    }

    async fn finalize(&self, data_item_id: &str) -> Result<(), PaymentClientError> {
        let path = format!("/finalize-balance/na/na?bytes=0&data_item_id={}", urlencode(data_item_id));
        self.client.get_json::<serde_json::Value>(&path).await?;
        Ok(())
    }
}

/// Always-succeeds fake for workers/ingest tests that don't exercise payment
/// rejection paths.
pub struct FakePaymentClient {
    pub always_sufficient: bool,
}

impl FakePaymentClient {
    pub fn new() -> Self {
        Self { always_sufficient: true }
    }
}

impl Default for FakePaymentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentClient for FakePaymentClient {
    async fn reserve(&self, _scheme: &str, _address: &str, _bytes: u64, _data_item_id: &str, _directive: ReserveDirective) -> Result<Credits, PaymentClientError> {
        if self.always_sufficient {
            Ok(Credits::ZERO)
        } else {
            Err(PaymentClientError::Insufficient { need: 1, spendable: 0 })
        }
    }

    async fn refund(&self, _scheme: &str, _address: &str, _bytes: u64, _data_item_id: &str) -> Result<(), PaymentClientError> {
        Ok(())
    }

    async fn check(&self, _scheme: &str, _address: &str, _bytes: u64, _directive: ReserveDirective) -> Result<CheckOutcome, PaymentClientError> {
        Ok(CheckOutcome { sufficient: self.always_sufficient, cost: Credits::ZERO, current_spendable: Credits::ZERO })
    }

    async fn finalize(&self, _data_item_id: &str) -> Result<(), PaymentClientError> {
        Ok(())
    }
}
