//! The reserve / refund / check / finalize algorithm (§4.2), written against the
//! [`LedgerStore`] trait so it runs identically over Postgres or the in-memory
//! fake. Reservations only encumber funds — they never touch `balance`, which is
//! the ledger-entry sum — matching the invariant in §3 and tested in §8.

use chrono::Utc;
use gateway_common::money::Credits;
use uuid::Uuid;

use super::{LedgerError, LedgerReason, LedgerStore, Reservation, ReservationDraw, ReserveDirective};

/// Outcome of [`check`]: whether the grantee can currently afford `cost`.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub sufficient: bool,
    pub cost: Credits,
    pub current_spendable: Credits,
}

/// `spendable(A) = balance(A) + Σ active delegations received (drawable by this
/// request, i.e. granted by a payer in `paid_by`) − Σ reservations already
/// referencing A` (§3). Delegations *given* by A don't enter here; they reduce
/// what A can draw as a grantor elsewhere, not A's own spendable as a grantee.
async fn delegated_headroom(store: &dyn LedgerStore, grantee: &str, paid_by: &[String]) -> Result<Credits, LedgerError> {
    let now = Utc::now();
    let delegations = store.active_delegations_to(grantee).await?;
    let mut total = store.balance(grantee).await?;
    for d in delegations.iter().filter(|d| d.is_active(now) && paid_by.iter().any(|p| p == &d.grantor)) {
        total = total.checked_add(d.remaining())?;
    }
    let reserved = store.reserved_amount_for(grantee).await?;
    Ok(total.checked_sub(reserved).unwrap_or(Credits::ZERO))
}

/// Draws `cost` from the active delegations to `grantee` granted by a payer in
/// `paid_by` (§4.2 "for each payer p ∈ P"), ascending expiry (`None` last), and,
/// if `directive` allows it and a shortfall remains, from the grantee's own
/// balance. Returns the draws and any shortfall still outstanding.
async fn plan_draws(
    store: &dyn LedgerStore,
    grantee: &str,
    cost: Credits,
    paid_by: &[String],
    directive: ReserveDirective,
) -> Result<(Vec<ReservationDraw>, Credits), LedgerError> {
    let now = Utc::now();
    let mut delegations = store
        .active_delegations_to(grantee)
        .await?
        .into_iter()
        .filter(|d| d.is_active(now) && paid_by.iter().any(|p| p == &d.grantor))
        .collect::<Vec<_>>();
    delegations.sort_by_key(|d| d.expires_at.map(|e| e.timestamp()).unwrap_or(i64::MAX));

    let mut draws = Vec::new();
    let mut remaining = cost;

    for delegation in &delegations {
        if remaining.is_zero() {
            break;
        }
        let draw_amount = delegation.remaining().min(remaining);
        if draw_amount.is_zero() {
            continue;
        }
        draws.push(ReservationDraw {
            payer: delegation.grantor.clone(),
            delegation_id: Some(delegation.id),
            amount: draw_amount,
        });
        remaining = remaining.checked_sub(draw_amount)?;
    }

    if !remaining.is_zero() && directive == ReserveDirective::ListOrSelf {
        let balance = store.balance(grantee).await?;
        let self_draw = balance.min(remaining);
        if !self_draw.is_zero() {
            draws.push(ReservationDraw { payer: grantee.to_string(), delegation_id: None, amount: self_draw });
            remaining = remaining.checked_sub(self_draw)?;
        }
    }

    Ok((draws, remaining))
}

/// §4.2 "reserve operation". Idempotent on `item_id`. `paid_by` is the payer set
/// `P`: only delegations granted by one of these addresses are drawable (§6
/// `&paidBy[]=…`).
pub async fn reserve(
    store: &dyn LedgerStore,
    grantee: &str,
    item_id: &str,
    cost: Credits,
    paid_by: &[String],
    directive: ReserveDirective,
) -> Result<Uuid, LedgerError> {
    if let Some(existing) = store.reservation_by_item(item_id).await? {
        return Ok(existing.id);
    }

    let (draws, shortfall) = plan_draws(store, grantee, cost, paid_by, directive).await?;
    if !shortfall.is_zero() {
        let spendable = delegated_headroom(store, grantee, paid_by).await?;
        return Err(LedgerError::Insufficient { need: cost, spendable });
    }

    for draw in &draws {
        if let Some(delegation_id) = draw.delegation_id {
            store.increase_delegation_used(delegation_id, draw.amount).await?;
        }
    }

    let reservation = Reservation {
        id: Uuid::new_v4(),
        item_id: item_id.to_string(),
        grantee: grantee.to_string(),
        amount: cost,
        draws,
    };
    let id = reservation.id;
    store.insert_reservation(reservation).await?;
    Ok(id)
}

/// §4.2 "check operation": same arithmetic as reserve, without writes.
pub async fn check(
    store: &dyn LedgerStore,
    grantee: &str,
    cost: Credits,
    paid_by: &[String],
    directive: ReserveDirective,
) -> Result<CheckResult, LedgerError> {
    let (_, shortfall) = plan_draws(store, grantee, cost, paid_by, directive).await?;
    let current_spendable = delegated_headroom(store, grantee, paid_by).await?;
    Ok(CheckResult { sufficient: shortfall.is_zero(), cost, current_spendable })
}

/// §4.2 "refund operation". A no-op (not an error) on a missing or
/// already-refunded reservation, per the idempotence contract in §8.
pub async fn refund(store: &dyn LedgerStore, item_id: &str) -> Result<(), LedgerError> {
    let Some(reservation) = store.reservation_by_item(item_id).await? else {
        return Ok(());
    };
    for draw in &reservation.draws {
        if let Some(delegation_id) = draw.delegation_id {
            store.decrease_delegation_used(delegation_id, draw.amount).await?;
        }
    }
    store.delete_reservation(reservation.id).await
}

/// §4.2 "finalize": the reservation is absorbed. This is the point at which the
/// actual ledger debit happens — reservations only encumber, they never debit
/// balance directly.
pub async fn finalize(store: &dyn LedgerStore, item_id: &str) -> Result<(), LedgerError> {
    let Some(reservation) = store.reservation_by_item(item_id).await? else {
        return Ok(());
    };
    let change_id = Uuid::new_v4();
    for draw in &reservation.draws {
        store
            .append_entry(&draw.payer, -(draw.amount.0 as i128), LedgerReason::ReservationFinalized, change_id)
            .await?;
    }
    store.delete_reservation(reservation.id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedgerStore;
    use crate::ledger::Delegation;
    use chrono::Duration;

    #[tokio::test]
    async fn reserve_draws_own_balance_when_list_or_self() {
        let store = InMemoryLedgerStore::new();
        store.credit("alice", Credits(1_000)).await;

        let id = reserve(&store, "alice", "item-1", Credits(300), &[], ReserveDirective::ListOrSelf)
            .await
            .unwrap();
        let reservation = store.reservation_by_item("item-1").await.unwrap().unwrap();
        assert_eq!(reservation.id, id);
        assert_eq!(reservation.draws.len(), 1);
        assert_eq!(reservation.draws[0].payer, "alice");
    }

    #[tokio::test]
    async fn reserve_is_idempotent_on_item_id() {
        let store = InMemoryLedgerStore::new();
        store.credit("alice", Credits(1_000)).await;

        let first = reserve(&store, "alice", "item-1", Credits(300), &[], ReserveDirective::ListOrSelf).await.unwrap();
        let second = reserve(&store, "alice", "item-1", Credits(300), &[], ReserveDirective::ListOrSelf).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reserve_fails_with_zero_delegations_and_zero_balance() {
        let store = InMemoryLedgerStore::new();
        let result = reserve(&store, "alice", "item-1", Credits(300), &[], ReserveDirective::ListOnly).await;
        assert!(matches!(result, Err(LedgerError::Insufficient { .. })));
    }

    #[tokio::test]
    async fn reserve_consumes_delegations_in_ascending_expiry_order() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let later = Delegation {
            id: Uuid::new_v4(),
            grantor: "late-grantor".into(),
            grantee: "alice".into(),
            approved: Credits(1_000),
            used: Credits::ZERO,
            expires_at: Some(now + Duration::days(30)),
            revoked: false,
        };
        let sooner = Delegation {
            id: Uuid::new_v4(),
            grantor: "soon-grantor".into(),
            grantee: "alice".into(),
            approved: Credits(50),
            used: Credits::ZERO,
            expires_at: Some(now + Duration::days(1)),
            revoked: false,
        };
        store.add_delegation(later).await;
        store.add_delegation(sooner.clone()).await;

        let paid_by = ["late-grantor".to_string(), "soon-grantor".to_string()];
        reserve(&store, "alice", "item-1", Credits(50), &paid_by, ReserveDirective::ListOnly).await.unwrap();
        let updated = store.delegation(sooner.id).await.unwrap().unwrap();
        assert_eq!(updated.used, Credits(50));
    }

    #[tokio::test]
    async fn reserve_ignores_delegations_not_in_the_payer_set() {
        let store = InMemoryLedgerStore::new();
        let outsider = Delegation {
            id: Uuid::new_v4(),
            grantor: "not-authorized".into(),
            grantee: "alice".into(),
            approved: Credits(1_000),
            used: Credits::ZERO,
            expires_at: None,
            revoked: false,
        };
        store.add_delegation(outsider.clone()).await;

        let paid_by = ["authorized".to_string()];
        let result = reserve(&store, "alice", "item-1", Credits(50), &paid_by, ReserveDirective::ListOnly).await;
        assert!(matches!(result, Err(LedgerError::Insufficient { .. })));
        let untouched = store.delegation(outsider.id).await.unwrap().unwrap();
        assert_eq!(untouched.used, Credits::ZERO);
    }

    #[tokio::test]
    async fn refund_is_idempotent_on_missing_reservation() {
        let store = InMemoryLedgerStore::new();
        assert!(refund(&store, "no-such-item").await.is_ok());
    }

    #[tokio::test]
    async fn finalize_absorbs_reservation_and_writes_audit_entry() {
        let store = InMemoryLedgerStore::new();
        store.credit("alice", Credits(1_000)).await;
        reserve(&store, "alice", "item-1", Credits(300), &[], ReserveDirective::ListOrSelf).await.unwrap();

        finalize(&store, "item-1").await.unwrap();
        assert!(store.reservation_by_item("item-1").await.unwrap().is_none());
        assert_eq!(store.balance("alice").await.unwrap(), Credits(700));
    }

    /// §8 scenario 6: grantee G, cost 200, D1 (A→G, approved 80, used 0), D2
    /// (B→G, approved 150, used 10), `paidBy=[A, B]`, `list-or-self`. D1 drawn
    /// 80 (moves to inactive/used), D2 drawn 120 (used becomes 130), remainder 0.
    #[tokio::test]
    async fn reserve_splits_across_a_multi_party_payer_set() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let d1 = Delegation {
            id: Uuid::new_v4(),
            grantor: "A".into(),
            grantee: "G".into(),
            approved: Credits(80),
            used: Credits::ZERO,
            expires_at: Some(now + Duration::days(1)),
            revoked: false,
        };
        let d2 = Delegation {
            id: Uuid::new_v4(),
            grantor: "B".into(),
            grantee: "G".into(),
            approved: Credits(150),
            used: Credits(10),
            expires_at: Some(now + Duration::days(30)),
            revoked: false,
        };
        store.add_delegation(d1.clone()).await;
        store.add_delegation(d2.clone()).await;

        let paid_by = ["A".to_string(), "B".to_string()];
        let id = reserve(&store, "G", "item-1", Credits(200), &paid_by, ReserveDirective::ListOrSelf).await.unwrap();

        let reservation = store.reservation_by_item("item-1").await.unwrap().unwrap();
        assert_eq!(reservation.id, id);
        assert_eq!(reservation.draws.len(), 2);
        assert_eq!(reservation.draws[0].payer, "A");
        assert_eq!(reservation.draws[0].amount, Credits(80));
        assert_eq!(reservation.draws[1].payer, "B");
        assert_eq!(reservation.draws[1].amount, Credits(120));

        assert_eq!(store.delegation(d1.id).await.unwrap().unwrap().used, Credits(80));
        assert_eq!(store.delegation(d2.id).await.unwrap().unwrap().used, Credits(130));

        refund(&store, "item-1").await.unwrap();
        assert_eq!(store.delegation(d2.id).await.unwrap().unwrap().used, Credits(10));
        assert_eq!(store.delegation(d1.id).await.unwrap().unwrap().used, Credits::ZERO);
    }
}
