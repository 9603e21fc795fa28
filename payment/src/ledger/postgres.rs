//! Postgres-backed [`LedgerStore`] (production). `Credits`/amount columns are
//! stored as `TEXT` (base-10 `u128`) rather than a numeric type bounded to 64
//! bits or a fractional decimal — this repo never needs range queries over
//! amounts, only exact round-tripping, and `u128::to_string`/`parse` is exact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::money::Credits;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Delegation, LedgerError, LedgerReason, LedgerStore, Reservation, ReservationDraw};

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> LedgerError {
        LedgerError::Store(err.into())
    }
}

fn parse_credits(raw: &str) -> Result<Credits, LedgerError> {
    raw.parse::<u128>()
        .map(Credits)
        .map_err(|e| LedgerError::Store(anyhow::anyhow!("corrupt amount column {raw:?}: {e}")))
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn balance(&self, address: &str) -> Result<Credits, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(signed_amount::numeric), 0)::text AS total
            FROM ledger_entries
            WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let total: String = row.try_get("total").map_err(Self::map_err)?;
        // `total` may be "0" or a negative string if entries ever drove a balance
        // negative in error; clamp at zero since a spendable balance is never negative.
        let parsed: i128 = total.parse().unwrap_or(0);
        Ok(Credits(parsed.max(0) as u128))
    }

    async fn append_entry(
        &self,
        address: &str,
        signed_amount: i128,
        reason: LedgerReason,
        change_id: Uuid,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, address, signed_amount, reason, change_id, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(address)
        .bind(signed_amount.to_string())
        .bind(reason.to_string())
        .bind(change_id)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn active_delegations_to(&self, grantee: &str) -> Result<Vec<Delegation>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, grantor, grantee, approved, used, expires_at, revoked
            FROM delegations
            WHERE grantee = $1 AND revoked = false AND used::numeric < approved::numeric
            ORDER BY expires_at ASC NULLS LAST
            "#,
        )
        .bind(grantee)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        rows.into_iter().map(row_to_delegation).collect()
    }

    async fn active_delegations_from(&self, grantor: &str) -> Result<Vec<Delegation>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, grantor, grantee, approved, used, expires_at, revoked
            FROM delegations
            WHERE grantor = $1 AND revoked = false AND used::numeric < approved::numeric
            ORDER BY expires_at ASC NULLS LAST
            "#,
        )
        .bind(grantor)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        rows.into_iter().map(row_to_delegation).collect()
    }

    async fn reserved_amount_for(&self, address: &str) -> Result<Credits, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount::numeric), 0)::text AS total
            FROM reservation_draws
            WHERE payer = $1
            "#,
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let total: String = row.try_get("total").map_err(Self::map_err)?;
        parse_credits(&total)
    }

    async fn delegation(&self, id: Uuid) -> Result<Option<Delegation>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, grantor, grantee, approved, used, expires_at, revoked
            FROM delegations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;

        row.map(row_to_delegation).transpose()
    }

    async fn insert_delegation(&self, delegation: Delegation) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO delegations (id, grantor, grantee, approved, used, expires_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(delegation.id)
        .bind(&delegation.grantor)
        .bind(&delegation.grantee)
        .bind(delegation.approved.0.to_string())
        .bind(delegation.used.0.to_string())
        .bind(delegation.expires_at)
        .bind(delegation.revoked)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn revoke_delegation(&self, id: Uuid) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE delegations SET revoked = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::DelegationNotFound(id));
        }
        Ok(())
    }

    async fn increase_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE delegations
            SET used = (used::numeric + $2::numeric)::text
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(amount.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DelegationNotFound(id));
        }
        Ok(())
    }

    async fn decrease_delegation_used(&self, id: Uuid, amount: Credits) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE delegations
            SET used = GREATEST(used::numeric - $2::numeric, 0)::text
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(amount.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DelegationNotFound(id));
        }
        Ok(())
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;

        sqlx::query(
            r#"
            INSERT INTO reservations (id, item_id, grantee, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reservation.id)
        .bind(&reservation.item_id)
        .bind(&reservation.grantee)
        .bind(reservation.amount.0.to_string())
        .execute(&mut *tx)
        .await
        .map_err(Self::map_err)?;

        for draw in &reservation.draws {
            sqlx::query(
                r#"
                INSERT INTO reservation_draws (reservation_id, payer, delegation_id, amount)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(reservation.id)
            .bind(&draw.payer)
            .bind(draw.delegation_id)
            .bind(draw.amount.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        }

        tx.commit().await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn reservation_by_item(&self, item_id: &str) -> Result<Option<Reservation>, LedgerError> {
        let Some(header) = sqlx::query(
            r#"
            SELECT id, item_id, grantee, amount
            FROM reservations
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?
        else {
            return Ok(None);
        };

        let id: Uuid = header.try_get("id").map_err(Self::map_err)?;
        let grantee: String = header.try_get("grantee").map_err(Self::map_err)?;
        let amount: String = header.try_get("amount").map_err(Self::map_err)?;

        let draw_rows = sqlx::query(
            r#"
            SELECT payer, delegation_id, amount
            FROM reservation_draws
            WHERE reservation_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let mut draws = Vec::with_capacity(draw_rows.len());
        for row in draw_rows {
            let payer: String = row.try_get("payer").map_err(Self::map_err)?;
            let delegation_id: Option<Uuid> = row.try_get("delegation_id").map_err(Self::map_err)?;
            let draw_amount: String = row.try_get("amount").map_err(Self::map_err)?;
            draws.push(ReservationDraw { payer, delegation_id, amount: parse_credits(&draw_amount)? });
        }

        Ok(Some(Reservation { id, item_id: item_id.to_string(), grantee, amount: parse_credits(&amount)?, draws }))
    }

    async fn delete_reservation(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM reservation_draws WHERE reservation_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

fn row_to_delegation(row: sqlx::postgres::PgRow) -> Result<Delegation, LedgerError> {
    let id: Uuid = row.try_get("id").map_err(PgLedgerStore::map_err)?;
    let grantor: String = row.try_get("grantor").map_err(PgLedgerStore::map_err)?;
    let grantee: String = row.try_get("grantee").map_err(PgLedgerStore::map_err)?;
    let approved: String = row.try_get("approved").map_err(PgLedgerStore::map_err)?;
    let used: String = row.try_get("used").map_err(PgLedgerStore::map_err)?;
    let expires_at: Option<DateTime<Utc>> = row.try_get("expires_at").map_err(PgLedgerStore::map_err)?;
    let revoked: bool = row.try_get("revoked").map_err(PgLedgerStore::map_err)?;

    Ok(Delegation {
        id,
        grantor,
        grantee,
        approved: parse_credits(&approved)?,
        used: parse_credits(&used)?,
        expires_at,
        revoked,
    })
}

