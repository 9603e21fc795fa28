//! Postgres-backed [`FiatQuoteStore`] (production).

use async_trait::async_trait;
use gateway_common::money::Credits;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{FiatError, FiatQuoteStore, FiatTopUpQuote};

pub struct PgFiatQuoteStore {
    pool: PgPool,
}

impl PgFiatQuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> FiatError {
        FiatError::Store(err.into())
    }
}

fn row_to_quote(row: sqlx::postgres::PgRow) -> Result<FiatTopUpQuote, FiatError> {
    let credit_equivalent: String = row.try_get("credit_equivalent").map_err(PgFiatQuoteStore::map_err)?;
    let promo_codes: Vec<String> = row.try_get("promo_codes").map_err(PgFiatQuoteStore::map_err)?;
    Ok(FiatTopUpQuote {
        id: row.try_get("id").map_err(PgFiatQuoteStore::map_err)?,
        address: row.try_get("address").map_err(PgFiatQuoteStore::map_err)?,
        fiat_amount_minor_units: {
            let v: i64 = row.try_get("fiat_amount_minor_units").map_err(PgFiatQuoteStore::map_err)?;
            v as u64
        },
        fiat_currency: row.try_get("fiat_currency").map_err(PgFiatQuoteStore::map_err)?,
        credit_equivalent: Credits(
            credit_equivalent
                .parse()
                .map_err(|e| FiatError::Store(anyhow::anyhow!("corrupt credit_equivalent: {e}")))?,
        ),
        promo_codes,
        expires_at: row.try_get("expires_at").map_err(PgFiatQuoteStore::map_err)?,
        processor_session_id: row.try_get("processor_session_id").map_err(PgFiatQuoteStore::map_err)?,
    })
}

#[async_trait]
impl FiatQuoteStore for PgFiatQuoteStore {
    async fn insert(&self, quote: FiatTopUpQuote) -> Result<(), FiatError> {
        sqlx::query(
            r#"
            INSERT INTO fiat_quotes
                (id, address, fiat_amount_minor_units, fiat_currency, credit_equivalent,
                 promo_codes, expires_at, processor_session_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(quote.id)
        .bind(&quote.address)
        .bind(quote.fiat_amount_minor_units as i64)
        .bind(&quote.fiat_currency)
        .bind(quote.credit_equivalent.0.to_string())
        .bind(&quote.promo_codes)
        .bind(quote.expires_at)
        .bind(&quote.processor_session_id)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError> {
        let row = sqlx::query("SELECT * FROM fiat_quotes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_quote).transpose()
    }

    /// Deletes the quote as part of the read, so a retried webhook finds nothing
    /// left to consume (matches [`super::InMemoryFiatQuoteStore::consume`]).
    async fn consume(&self, id: Uuid) -> Result<Option<FiatTopUpQuote>, FiatError> {
        let row = sqlx::query("DELETE FROM fiat_quotes WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_quote).transpose()
    }
}
