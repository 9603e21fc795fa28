//! Wire types for the x402-style gasless-stablecoin payment protocol (§4.3).

use chrono::{DateTime, Utc};
use gateway_common::money::{AtomicUnits, Credits};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The `hybrid`/`exact-only`/`topup` accept modes (§4.3 "Mode semantics at accept").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum GaslessMode {
    ExactOnly,
    Topup,
    Hybrid,
}

/// `authorization` block of a decoded `X-PAYMENT` header (ERC-3009 style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub from: String,
    pub to: String,
    /// Decimal string so arbitrarily large on-chain `uint256` values survive JSON.
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    /// 32-byte nonce, hex-encoded (`0x`-prefixed).
    pub nonce: String,
    /// 65-byte `r||s||v` signature, hex-encoded.
    pub signature: String,
}

/// The decoded, base64-JSON `X-PAYMENT` header body (§4.3 "Client ... returns a
/// base64-encoded JSON authorization").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentHeaderPayload {
    pub scheme: String,
    pub network: String,
    pub authorization: Authorization,
    pub asset: String,
}

#[derive(Debug, Error)]
pub enum GaslessPaymentError {
    #[error("unsupported network {0}")]
    UnsupportedNetwork(String),
    #[error("chain id mismatch: header declares {declared}, configured network uses {configured}")]
    NetworkMismatch { declared: String, configured: u64 },
    #[error("malformed payment header: {0}")]
    Malformed(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("authorization does not pay the configured payee")]
    WrongPayee,
    #[error("authorization value {value} is below the required {required}")]
    ValueTooLow { value: u128, required: u128 },
    #[error("authorization is outside its valid time window")]
    OutsideValidityWindow,
    #[error("settlement failed: {0}")]
    SettlementFailed(String),
    #[error("payment record {0} not found")]
    NotFound(Uuid),
    #[error("payment record {0} is not in a state that allows this transition")]
    InvalidState(Uuid),
    #[error(transparent)]
    Money(#[from] gateway_common::money::MoneyError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum GaslessPaymentStatus {
    Pending,
    Confirmed,
    Refunded,
    Penalized,
}

/// §3 "Gasless-payment record".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaslessPaymentRecord {
    pub id: Uuid,
    pub payer: String,
    pub payee: String,
    pub network: String,
    pub stablecoin_atomic_amount: AtomicUnits,
    pub credit_equivalent: Credits,
    pub chain_tx_hash: Option<String>,
    pub mode: GaslessMode,
    pub declared_bytes: u64,
    pub actual_bytes: Option<u64>,
    pub item_id: Option<String>,
    pub status: GaslessPaymentStatus,
    pub created_at: DateTime<Utc>,
}
