//! Credit ledger & multi-party reservations (§4.2, §3 entities "Credit ledger
//! entry", "Delegation", "Reservation").

pub mod memory;
pub mod postgres;
pub mod reserve;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::money::{Credits, MoneyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: need {need}, spendable {spendable}")]
    Insufficient { need: Credits, spendable: Credits },
    #[error("no reservation found for item {0}")]
    ReservationNotFound(String),
    #[error("delegation {0} not found or inactive")]
    DelegationNotFound(Uuid),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A reason code recorded on every ledger entry and audit row (§3 "reason code").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LedgerReason {
    FiatTopUp,
    CryptoTopUp,
    GaslessTopUp,
    GaslessOverpaymentRefund,
    ReservationFinalized,
    ReservationRefunded,
    DelegationRevokedRefund,
    NameSystemPurchase,
    NameSystemRefund,
    Penalty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub address: String,
    /// Signed amount: positive credits in, negative credits out.
    pub signed_amount: i128,
    pub reason: LedgerReason,
    /// Correlates entries written as part of the same logical change (e.g. a
    /// reservation's draw-down and its later finalize/refund).
    pub change_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub grantor: String,
    pub grantee: String,
    pub approved: Credits,
    pub used: Credits,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl Delegation {
    pub fn remaining(&self) -> Credits {
        self.approved.checked_sub(self.used).unwrap_or(Credits::ZERO)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.used < self.approved && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// One payer's contribution to a reservation (§4.2 "overflow list").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationDraw {
    pub payer: String,
    /// `None` when drawn from the payer's own balance rather than a delegation.
    pub delegation_id: Option<Uuid>,
    pub amount: Credits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub item_id: String,
    pub grantee: String,
    pub amount: Credits,
    pub draws: Vec<ReservationDraw>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDirective {
    ListOnly,
    ListOrSelf,
}

/// Storage seam for the ledger. A Postgres-backed implementation
/// ([`postgres::PgLedgerStore`]) is used in production; an in-memory
/// implementation ([`memory::InMemoryLedgerStore`]) backs unit tests, per
/// SPEC_FULL.md's test-tooling section.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn balance(&self, address: &str) -> Result<Credits, LedgerError>;

    async fn append_entry(
        &self,
        address: &str,
        signed_amount: i128,
        reason: LedgerReason,
        change_id: Uuid,
    ) -> Result<(), LedgerError>;

    /// Delegations granted *to* `grantee`, active only, ordered by expiry
    /// ascending (earliest first) with `None` (no expiry) sorted last (§5
    /// ordering guarantee "payers are consumed in ascending delegation expiry").
    async fn active_delegations_to(&self, grantee: &str) -> Result<Vec<Delegation>, LedgerError>;

    /// Delegations granted *by* `grantor` to anyone, active only (§3 "spendable(A)
    /// = balance(A) + received − given − reservations"; `given` is this list).
    async fn active_delegations_from(&self, grantor: &str) -> Result<Vec<Delegation>, LedgerError>;

    /// Sum of every live reservation draw charged against `address`, whether
    /// drawn from `address`'s own balance or from a delegation it granted
    /// (§3 "Σ reservations referencing A").
    async fn reserved_amount_for(&self, address: &str) -> Result<Credits, LedgerError>;

    async fn delegation(&self, id: Uuid) -> Result<Option<Delegation>, LedgerError>;

    async fn insert_delegation(&self, delegation: Delegation) -> Result<(), LedgerError>;

    async fn revoke_delegation(&self, id: Uuid) -> Result<(), LedgerError>;

    async fn increase_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError>;

    async fn decrease_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError>;

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), LedgerError>;

    async fn reservation_by_item(&self, item_id: &str) -> Result<Option<Reservation>, LedgerError>;

    async fn delete_reservation(&self, id: Uuid) -> Result<(), LedgerError>;
}
