//! Postgres Store
//!
//! One pool backs all three driven ports that live in the database:
//! price history ([`PriceStore`]), the watchlist ([`InstrumentDirectory`])
//! and the broker session written by the token-refresh job
//! ([`AuthProvider`]).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::application::ports::{
    AuthError, AuthProvider, DirectoryError, InstrumentDirectory, PriceStore, SessionCredentials,
    StoreError,
};
use crate::domain::instrument::{Identifier, PricePoint, Symbol, TrackedInstrument, Venue};
use crate::infrastructure::config::DatabaseSettings;

const SCHEMA: [&str; 4] = [
    r"
    CREATE TABLE IF NOT EXISTS watchlist_item (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        exchange TEXT,
        instrument_token TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS ltp_history (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        exchange TEXT,
        date DATE NOT NULL,
        ltp NUMERIC NOT NULL,
        fetched_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (symbol, date)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS broker_session (
        id BIGSERIAL PRIMARY KEY,
        access_token TEXT NOT NULL,
        feed_token TEXT NOT NULL DEFAULT '',
        refreshed_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS watchlist_item_token_idx ON watchlist_item (instrument_token)",
];

type WatchlistRow = (String, Option<String>, String);

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool using the given settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect(settings.url())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        tracing::debug!("Schema ensured");
        Ok(())
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PriceStore for PgStore {
    async fn exists_price_point(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ltp_history WHERE symbol = $1 AND date = $2)",
        )
        .bind(symbol.as_str())
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn update_price_point(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
        price: Decimal,
        written_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE ltp_history SET ltp = $1, fetched_at = $2 WHERE symbol = $3 AND date = $4",
        )
        .bind(price)
        .bind(written_at)
        .bind(symbol.as_str())
        .bind(date)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn upsert_price_point(&self, point: &PricePoint) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO ltp_history (symbol, exchange, date, ltp, fetched_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (symbol, date)
            DO UPDATE SET ltp = EXCLUDED.ltp, fetched_at = EXCLUDED.fetched_at
            ",
        )
        .bind(point.symbol.as_str())
        .bind(point.venue.as_ref().map(Venue::as_str))
        .bind(point.date)
        .bind(point.price)
        .bind(point.last_written_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM ltp_history WHERE date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InstrumentDirectory for PgStore {
    async fn resolve(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<TrackedInstrument>, DirectoryError> {
        let row = sqlx::query_as::<_, WatchlistRow>(
            r"
            SELECT instrument_token, exchange, symbol
            FROM watchlist_item
            WHERE instrument_token = $1
            ORDER BY id
            LIMIT 1
            ",
        )
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(directory_error)?;
        Ok(row.and_then(instrument_from_row))
    }

    async fn resolve_many(
        &self,
        identifiers: &[Identifier],
    ) -> Result<Vec<TrackedInstrument>, DirectoryError> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }
        let tokens: Vec<String> = identifiers.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, WatchlistRow>(
            r"
            SELECT DISTINCT ON (instrument_token) instrument_token, exchange, symbol
            FROM watchlist_item
            WHERE instrument_token = ANY($1)
            ORDER BY instrument_token, id
            ",
        )
        .bind(tokens)
        .fetch_all(&self.pool)
        .await
        .map_err(directory_error)?;
        Ok(rows.into_iter().filter_map(instrument_from_row).collect())
    }

    async fn tracked_instruments(&self) -> Result<Vec<TrackedInstrument>, DirectoryError> {
        let rows = sqlx::query_as::<_, WatchlistRow>(
            r"
            SELECT DISTINCT ON (instrument_token) instrument_token, exchange, symbol
            FROM watchlist_item
            WHERE instrument_token IS NOT NULL AND instrument_token <> ''
            ORDER BY instrument_token, id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(directory_error)?;
        Ok(rows.into_iter().filter_map(instrument_from_row).collect())
    }
}

#[async_trait]
impl AuthProvider for PgStore {
    async fn current_credentials(&self) -> Result<SessionCredentials, AuthError> {
        let row = sqlx::query_as::<_, (String, String)>(
            r"
            SELECT access_token, feed_token
            FROM broker_session
            ORDER BY refreshed_at DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        match row {
            Some((access_token, feed_token)) if !access_token.trim().is_empty() => {
                Ok(SessionCredentials::new(access_token, feed_token))
            }
            Some(_) => Err(AuthError::Unavailable("stored access token is empty".to_string())),
            None => Err(AuthError::Unavailable(
                "no broker session stored, run the token refresh job".to_string(),
            )),
        }
    }
}

fn instrument_from_row((token, exchange, symbol): WatchlistRow) -> Option<TrackedInstrument> {
    let identifier = Identifier::new(token);
    if identifier.is_empty() || symbol.trim().is_empty() {
        return None;
    }
    Some(TrackedInstrument::new(
        identifier,
        Venue::parse_optional(exchange.as_deref()),
        Symbol::new(symbol),
    ))
}

fn store_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn directory_error(error: sqlx::Error) -> DirectoryError {
    DirectoryError::Lookup(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchlist_row_maps_to_instrument() {
        let instrument =
            instrument_from_row(("3045".into(), Some("nse".into()), "SBIN-EQ".into())).unwrap();
        assert_eq!(instrument.identifier, Identifier::new("3045"));
        assert_eq!(instrument.venue, Some(Venue::new("NSE")));
        assert_eq!(instrument.symbol, Symbol::new("SBIN-EQ"));
    }

    #[test]
    fn blank_exchange_is_unfetchable() {
        let instrument = instrument_from_row(("1".into(), Some(" ".into()), "X".into())).unwrap();
        assert!(!instrument.is_fetchable());
    }

    #[test]
    fn blank_token_or_symbol_is_skipped() {
        assert!(instrument_from_row((" ".into(), None, "X".into())).is_none());
        assert!(instrument_from_row(("1".into(), None, "".into())).is_none());
    }

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }
}
