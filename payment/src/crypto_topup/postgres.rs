//! Postgres-backed [`CryptoDepositStore`] (production).

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{CryptoDeposit, CryptoDepositStore, CryptoTopUpError, DepositStatus};

pub struct PgCryptoDepositStore {
    pool: PgPool,
}

impl PgCryptoDepositStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> CryptoTopUpError {
        CryptoTopUpError::Store(err.into())
    }
}

fn row_to_deposit(row: sqlx::postgres::PgRow) -> Result<CryptoDeposit, CryptoTopUpError> {
    let submitted_amount_atomic: String =
        row.try_get("submitted_amount_atomic").map_err(PgCryptoDepositStore::map_err)?;
    let status: String = row.try_get("status").map_err(PgCryptoDepositStore::map_err)?;
    Ok(CryptoDeposit {
        scheme: row.try_get("scheme").map_err(PgCryptoDepositStore::map_err)?,
        address: row.try_get("address").map_err(PgCryptoDepositStore::map_err)?,
        tx_id: row.try_get("tx_id").map_err(PgCryptoDepositStore::map_err)?,
        submitted_amount_atomic: submitted_amount_atomic
            .parse()
            .map_err(|e| CryptoTopUpError::Store(anyhow::anyhow!("corrupt submitted_amount_atomic: {e}")))?,
        status: match status.as_str() {
            "pending" => DepositStatus::Pending,
            "confirmed" => DepositStatus::Confirmed,
            "rejected" => DepositStatus::Rejected,
            other => return Err(CryptoTopUpError::Store(anyhow::anyhow!("corrupt status column {other:?}"))),
        },
        created_at: row.try_get("created_at").map_err(PgCryptoDepositStore::map_err)?,
    })
}

#[async_trait]
impl CryptoDepositStore for PgCryptoDepositStore {
    async fn upsert(&self, deposit: CryptoDeposit) -> Result<(), CryptoTopUpError> {
        sqlx::query(
            r#"
            INSERT INTO crypto_deposits (scheme, tx_id, address, submitted_amount_atomic, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (scheme, tx_id) DO UPDATE
            SET submitted_amount_atomic = EXCLUDED.submitted_amount_atomic, status = EXCLUDED.status
            "#,
        )
        .bind(&deposit.scheme)
        .bind(&deposit.tx_id)
        .bind(&deposit.address)
        .bind(deposit.submitted_amount_atomic.to_string())
        .bind(deposit.status.to_string())
        .bind(deposit.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn by_tx(&self, scheme: &str, tx_id: &str) -> Result<Option<CryptoDeposit>, CryptoTopUpError> {
        let row = sqlx::query("SELECT * FROM crypto_deposits WHERE scheme = $1 AND tx_id = $2")
            .bind(scheme)
            .bind(tx_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_deposit).transpose()
    }
}
