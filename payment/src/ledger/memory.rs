//! In-memory [`LedgerStore`] fake used by unit tests (SPEC_FULL.md's test-tooling
//! section: "in-memory store-trait fakes, not a shared test Postgres instance").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_common::money::Credits;
use uuid::Uuid;

use super::{Delegation, LedgerError, LedgerReason, LedgerStore, Reservation};

#[derive(Default)]
struct Inner {
    entries: Vec<(String, i128)>,
    delegations: HashMap<Uuid, Delegation>,
    reservations: HashMap<String, Reservation>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: credits `address` directly, bypassing the usual top-up flow.
    pub async fn credit(&self, address: &str, amount: Credits) {
        self.inner.lock().unwrap().entries.push((address.to_string(), amount.0 as i128));
    }

    pub async fn add_delegation(&self, delegation: Delegation) {
        self.inner.lock().unwrap().delegations.insert(delegation.id, delegation);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn balance(&self, address: &str) -> Result<Credits, LedgerError> {
        let inner = self.inner.lock().unwrap();
        let total: i128 = inner.entries.iter().filter(|(a, _)| a == address).map(|(_, amount)| *amount).sum();
        Ok(Credits(total.max(0) as u128))
    }

    async fn append_entry(
        &self,
        address: &str,
        signed_amount: i128,
        _reason: LedgerReason,
        _change_id: Uuid,
    ) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().entries.push((address.to_string(), signed_amount));
        Ok(())
    }

    async fn active_delegations_to(&self, grantee: &str) -> Result<Vec<Delegation>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.delegations.values().filter(|d| d.grantee == grantee).cloned().collect())
    }

    async fn active_delegations_from(&self, grantor: &str) -> Result<Vec<Delegation>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.delegations.values().filter(|d| d.grantor == grantor).cloned().collect())
    }

    async fn reserved_amount_for(&self, address: &str) -> Result<Credits, LedgerError> {
        let inner = self.inner.lock().unwrap();
        let mut total = Credits::ZERO;
        for reservation in inner.reservations.values() {
            for draw in &reservation.draws {
                if draw.payer == address {
                    total = total.checked_add(draw.amount)?;
                }
            }
        }
        Ok(total)
    }

    async fn delegation(&self, id: Uuid) -> Result<Option<Delegation>, LedgerError> {
        Ok(self.inner.lock().unwrap().delegations.get(&id).cloned())
    }

    async fn insert_delegation(&self, delegation: Delegation) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().delegations.insert(delegation.id, delegation);
        Ok(())
    }

    async fn revoke_delegation(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let delegation = inner.delegations.get_mut(&id).ok_or(LedgerError::DelegationNotFound(id))?;
        delegation.revoked = true;
        Ok(())
    }

    async fn increase_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let delegation = inner.delegations.get_mut(&id).ok_or(LedgerError::DelegationNotFound(id))?;
        delegation.used = delegation.used.checked_add(amount)?;
        Ok(())
    }

    async fn decrease_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let delegation = inner.delegations.get_mut(&id).ok_or(LedgerError::DelegationNotFound(id))?;
        delegation.used = delegation.used.checked_sub(amount).unwrap_or(Credits::ZERO);
        Ok(())
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().reservations.insert(reservation.item_id.clone(), reservation);
        Ok(())
    }

    async fn reservation_by_item(&self, item_id: &str) -> Result<Option<Reservation>, LedgerError> {
        Ok(self.inner.lock().unwrap().reservations.get(item_id).cloned())
    }

    async fn delete_reservation(&self, id: Uuid) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().reservations.retain(|_, r| r.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn balance_sums_signed_entries() {
        let store = InMemoryLedgerStore::new();
        store.credit("alice", Credits(500)).await;
        store
            .append_entry("alice", -200, LedgerReason::ReservationFinalized, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(store.balance("alice").await.unwrap(), Credits(300));
    }

    #[tokio::test]
    async fn unknown_delegation_id_is_reported() {
        let store = InMemoryLedgerStore::new();
        let result = store.increase_delegation_used(Uuid::new_v4(), Credits(1)).await;
        assert!(matches!(result, Err(LedgerError::DelegationNotFound(_))));
    }
}
