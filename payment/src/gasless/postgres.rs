//! Postgres-backed [`GaslessPaymentStore`] (production), mirroring
//! [`crate::ledger::postgres::PgLedgerStore`]'s text-encoded-`u128` convention.

use async_trait::async_trait;
use gateway_common::money::{AtomicUnits, Credits};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::store::GaslessPaymentStore;
use super::types::{GaslessPaymentError, GaslessPaymentRecord, GaslessPaymentStatus};
use super::GaslessMode;

pub struct PgGaslessPaymentStore {
    pool: PgPool,
}

impl PgGaslessPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> GaslessPaymentError {
        GaslessPaymentError::Store(err.into())
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<GaslessPaymentRecord, GaslessPaymentError> {
    let stablecoin_amount: String = row.try_get("stablecoin_atomic_amount").map_err(PgGaslessPaymentStore::map_err)?;
    let credit_equivalent: String = row.try_get("credit_equivalent").map_err(PgGaslessPaymentStore::map_err)?;
    let mode: String = row.try_get("mode").map_err(PgGaslessPaymentStore::map_err)?;
    let status: String = row.try_get("status").map_err(PgGaslessPaymentStore::map_err)?;
    let declared_bytes: i64 = row.try_get("declared_bytes").map_err(PgGaslessPaymentStore::map_err)?;
    let actual_bytes: Option<i64> = row.try_get("actual_bytes").map_err(PgGaslessPaymentStore::map_err)?;

    Ok(GaslessPaymentRecord {
        id: row.try_get("id").map_err(PgGaslessPaymentStore::map_err)?,
        payer: row.try_get("payer").map_err(PgGaslessPaymentStore::map_err)?,
        payee: row.try_get("payee").map_err(PgGaslessPaymentStore::map_err)?,
        network: row.try_get("network").map_err(PgGaslessPaymentStore::map_err)?,
        stablecoin_atomic_amount: AtomicUnits(
            stablecoin_amount
                .parse()
                .map_err(|e| GaslessPaymentError::Store(anyhow::anyhow!("corrupt stablecoin_atomic_amount: {e}")))?,
        ),
        credit_equivalent: Credits(
            credit_equivalent
                .parse()
                .map_err(|e| GaslessPaymentError::Store(anyhow::anyhow!("corrupt credit_equivalent: {e}")))?,
        ),
        chain_tx_hash: row.try_get("chain_tx_hash").map_err(PgGaslessPaymentStore::map_err)?,
        mode: mode
            .parse::<GaslessMode>()
            .map_err(|e| GaslessPaymentError::Store(anyhow::anyhow!("corrupt mode column {mode:?}: {e}")))?,
        declared_bytes: declared_bytes as u64,
        actual_bytes: actual_bytes.map(|v| v as u64),
        item_id: row.try_get("item_id").map_err(PgGaslessPaymentStore::map_err)?,
        status: match status.as_str() {
            "pending" => GaslessPaymentStatus::Pending,
            "confirmed" => GaslessPaymentStatus::Confirmed,
            "refunded" => GaslessPaymentStatus::Refunded,
            "penalized" => GaslessPaymentStatus::Penalized,
            other => {
                return Err(GaslessPaymentError::Store(anyhow::anyhow!("corrupt status column {other:?}")))
            }
        },
        created_at: row.try_get("created_at").map_err(PgGaslessPaymentStore::map_err)?,
    })
}

#[async_trait]
impl GaslessPaymentStore for PgGaslessPaymentStore {
    async fn insert(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError> {
        sqlx::query(
            r#"
            INSERT INTO gasless_payments
                (id, payer, payee, network, stablecoin_atomic_amount, credit_equivalent,
                 chain_tx_hash, mode, declared_bytes, actual_bytes, item_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(&record.payer)
        .bind(&record.payee)
        .bind(&record.network)
        .bind(record.stablecoin_atomic_amount.0.to_string())
        .bind(record.credit_equivalent.0.to_string())
        .bind(&record.chain_tx_hash)
        .bind(record.mode.to_string())
        .bind(record.declared_bytes as i64)
        .bind(record.actual_bytes.map(|v| v as i64))
        .bind(&record.item_id)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError> {
        let row = sqlx::query("SELECT * FROM gasless_payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_record).transpose()
    }

    async fn by_item(&self, item_id: &str) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError> {
        let row = sqlx::query("SELECT * FROM gasless_payments WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_record).transpose()
    }

    async fn update(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError> {
        sqlx::query(
            r#"
            UPDATE gasless_payments
            SET chain_tx_hash = $2, status = $3, actual_bytes = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.chain_tx_hash)
        .bind(record.status.to_string())
        .bind(record.actual_bytes.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}
