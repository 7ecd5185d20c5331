//! Price Recorder
//!
//! Idempotent "observe price P for symbol S on day D". Keeps an in-memory
//! existence cache of symbols known to have a row for the current day so the
//! hot path is a single update instead of a read followed by a write.
//!
//! The cache is an optimization only. If it claims a row exists but the
//! update touches nothing (row pruned elsewhere), the recorder falls back to
//! an upsert and the data stays correct.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::application::ports::{Clock, PriceStore, StoreError};
use crate::domain::instrument::{PricePoint, Symbol, Venue};
use crate::infrastructure::metrics::{self, WritePath};

// =============================================================================
// Existence Cache
// =============================================================================

/// Symbols known to already have a price point for one calendar day.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    day: Option<NaiveDate>,
    symbols: HashSet<Symbol>,
}

impl ExistenceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cache to `day`, clearing it if the day changed.
    ///
    /// Returns `true` if entries for an earlier day were discarded.
    pub fn roll_to(&mut self, day: NaiveDate) -> bool {
        if self.day == Some(day) {
            return false;
        }
        let had_day = self.day.is_some();
        self.day = Some(day);
        self.symbols.clear();
        had_day
    }

    /// Whether `symbol` is known to have a row on `day`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol, day: NaiveDate) -> bool {
        self.day == Some(day) && self.symbols.contains(symbol)
    }

    /// Remember that `symbol` has a row on `day`.
    pub fn insert(&mut self, symbol: Symbol, day: NaiveDate) {
        self.roll_to(day);
        self.symbols.insert(symbol);
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// How an observation was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// An existing row was overwritten.
    Updated,
    /// A new row was created for the day.
    Inserted,
}

/// Writes observed prices into the per-day series.
pub struct PriceRecorder {
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    cache: Mutex<ExistenceCache>,
}

impl PriceRecorder {
    /// Create a recorder.
    #[must_use]
    pub fn new(store: Arc<dyn PriceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: Mutex::new(ExistenceCache::new()),
        }
    }

    /// Current calendar day according to the recorder's clock.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Invalidate the existence cache if `today` differs from its day.
    ///
    /// Returns `true` on rollover.
    pub fn roll_day(&self, today: NaiveDate) -> bool {
        self.cache.lock().roll_to(today)
    }

    /// Whether the cache currently knows `symbol` has a row on `day`.
    #[must_use]
    pub fn is_cached(&self, symbol: &Symbol, day: NaiveDate) -> bool {
        self.cache.lock().contains(symbol, day)
    }

    /// Record `price` for `symbol` on `date`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails. The cache is only updated
    /// after a successful write.
    pub async fn observe(
        &self,
        symbol: &Symbol,
        venue: Option<&Venue>,
        price: Decimal,
        date: NaiveDate,
    ) -> Result<WriteOutcome, StoreError> {
        let outcome = if self.is_cached(symbol, date) {
            self.update_or_insert(symbol, venue, price, date).await?
        } else if self.store.exists_price_point(symbol, date).await? {
            self.update_or_insert(symbol, venue, price, date).await?
        } else {
            self.insert(symbol, venue, price, date).await?;
            metrics::record_price_write(WritePath::Insert);
            WriteOutcome::Inserted
        };

        self.cache.lock().insert(symbol.clone(), date);
        debug!(symbol = %symbol, %date, %price, ?outcome, "Recorded price");
        Ok(outcome)
    }

    /// Record `price` for `symbol` on today's date.
    ///
    /// # Errors
    ///
    /// See [`observe`](Self::observe).
    pub async fn observe_today(
        &self,
        symbol: &Symbol,
        venue: Option<&Venue>,
        price: Decimal,
    ) -> Result<WriteOutcome, StoreError> {
        let today = self.clock.today();
        self.observe(symbol, venue, price, today).await
    }

    async fn update_or_insert(
        &self,
        symbol: &Symbol,
        venue: Option<&Venue>,
        price: Decimal,
        date: NaiveDate,
    ) -> Result<WriteOutcome, StoreError> {
        let affected = self
            .store
            .update_price_point(symbol, date, price, self.clock.now())
            .await?;
        if affected > 0 {
            metrics::record_price_write(WritePath::Update);
            return Ok(WriteOutcome::Updated);
        }

        debug!(symbol = %symbol, %date, "Cached row missing, falling back to upsert");
        self.insert(symbol, venue, price, date).await?;
        metrics::record_price_write(WritePath::Upsert);
        Ok(WriteOutcome::Inserted)
    }

    async fn insert(
        &self,
        symbol: &Symbol,
        venue: Option<&Venue>,
        price: Decimal,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        let point = PricePoint {
            symbol: symbol.clone(),
            venue: venue.cloned(),
            date,
            price,
            last_written_at: self.clock.now(),
        };
        self.store.upsert_price_point(&point).await
    }
}

impl std::fmt::Debug for PriceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceRecorder")
            .field("cached_symbols", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;

    use super::*;
    use crate::application::ports::{MockClock, MockPriceStore};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn clock() -> Arc<dyn Clock> {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2025, 3, 3, 4, 0, 0).unwrap());
        clock.expect_today().returning(|| day(3));
        Arc::new(clock)
    }

    #[test]
    fn cache_rolls_over_on_new_day() {
        let mut cache = ExistenceCache::new();
        assert!(!cache.roll_to(day(1)));
        cache.insert("A".into(), day(1));
        assert!(cache.contains(&"A".into(), day(1)));

        assert!(cache.roll_to(day(2)));
        assert!(cache.is_empty());
        assert!(!cache.contains(&"A".into(), day(1)));
        assert!(!cache.contains(&"A".into(), day(2)));
    }

    #[test]
    fn cache_does_not_answer_for_other_days() {
        let mut cache = ExistenceCache::new();
        cache.insert("A".into(), day(1));
        assert!(!cache.contains(&"A".into(), day(2)));
    }

    #[tokio::test]
    async fn first_observation_checks_existence_then_inserts() {
        let mut store = MockPriceStore::new();
        store
            .expect_exists_price_point()
            .times(1)
            .returning(|_, _| Ok(false));
        store
            .expect_upsert_price_point()
            .withf(|p| p.symbol.as_str() == "TCS-EQ" && p.price == Decimal::new(1005, 1))
            .times(1)
            .returning(|_| Ok(()));
        store.expect_update_price_point().never();

        let recorder = PriceRecorder::new(Arc::new(store), clock());
        let outcome = recorder
            .observe(&"TCS-EQ".into(), None, Decimal::new(1005, 1), day(3))
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Inserted);
        assert!(recorder.is_cached(&"TCS-EQ".into(), day(3)));
    }

    #[tokio::test]
    async fn cached_symbol_skips_existence_check() {
        let mut store = MockPriceStore::new();
        store
            .expect_exists_price_point()
            .times(1)
            .returning(|_, _| Ok(true));
        store
            .expect_update_price_point()
            .with(
                eq(Symbol::new("A")),
                eq(day(3)),
                mockall::predicate::always(),
                mockall::predicate::always(),
            )
            .times(2)
            .returning(|_, _, _, _| Ok(1));

        let recorder = PriceRecorder::new(Arc::new(store), clock());
        let symbol = Symbol::new("A");
        recorder.observe(&symbol, None, Decimal::ONE, day(3)).await.unwrap();
        let outcome = recorder
            .observe(&symbol, None, Decimal::TWO, day(3))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
    }

    #[tokio::test]
    async fn stale_cache_falls_back_to_upsert() {
        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().never();
        store
            .expect_update_price_point()
            .times(1)
            .returning(|_, _, _, _| Ok(0));
        store
            .expect_upsert_price_point()
            .times(1)
            .returning(|_| Ok(()));

        let recorder = PriceRecorder::new(Arc::new(store), clock());
        recorder.cache.lock().insert("A".into(), day(3));

        let outcome = recorder
            .observe(&"A".into(), None, Decimal::ONE, day(3))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);
    }

    #[tokio::test]
    async fn rollover_forces_existence_check() {
        let mut store = MockPriceStore::new();
        store
            .expect_exists_price_point()
            .with(eq(Symbol::new("A")), eq(day(4)))
            .times(1)
            .returning(|_, _| Ok(false));
        store
            .expect_upsert_price_point()
            .times(1)
            .returning(|_| Ok(()));

        let recorder = PriceRecorder::new(Arc::new(store), clock());
        recorder.cache.lock().insert("A".into(), day(3));

        assert!(recorder.roll_day(day(4)));
        assert!(!recorder.is_cached(&"A".into(), day(3)));
        recorder
            .observe(&"A".into(), None, Decimal::ONE, day(4))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_write_is_not_cached() {
        let mut store = MockPriceStore::new();
        store
            .expect_exists_price_point()
            .returning(|_, _| Ok(false));
        store
            .expect_upsert_price_point()
            .returning(|_| Err(StoreError::Query("boom".into())));

        let recorder = PriceRecorder::new(Arc::new(store), clock());
        let result = recorder
            .observe(&"A".into(), None, Decimal::ONE, day(3))
            .await;

        assert!(result.is_err());
        assert!(!recorder.is_cached(&"A".into(), day(3)));
    }
}
