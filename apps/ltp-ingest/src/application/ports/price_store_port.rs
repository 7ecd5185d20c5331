//! Price Store Port (Driven Port)
//!
//! Per-(symbol, day) price series with upsert semantics.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::instrument::{PricePoint, Symbol};

/// Store operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Query failed.
    #[error("Store query failed: {0}")]
    Query(String),

    /// Store is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Port for persisting price points.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Whether a price point exists for `(symbol, date)`.
    async fn exists_price_point(&self, symbol: &Symbol, date: NaiveDate)
    -> Result<bool, StoreError>;

    /// Overwrite price and write time of an existing row. Returns rows affected.
    async fn update_price_point(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
        price: Decimal,
        written_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Insert the row, or overwrite it if `(symbol, date)` already exists.
    async fn upsert_price_point(&self, point: &PricePoint) -> Result<(), StoreError>;

    /// Delete rows dated strictly before `cutoff`. Returns rows deleted.
    async fn prune_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError>;
}
