//! In-Memory Store
//!
//! Process-local [`PriceStore`] and [`InstrumentDirectory`] used by tests and
//! local runs without a database. Write counters make it possible to assert
//! how many round trips a flush or cycle actually made.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{DirectoryError, InstrumentDirectory, PriceStore, StoreError};
use crate::domain::instrument::{Identifier, PricePoint, Symbol, TrackedInstrument};

/// Snapshot of store call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    /// Existence checks.
    pub exists: u64,
    /// Update-only writes.
    pub updates: u64,
    /// Insert-or-update writes.
    pub upserts: u64,
}

impl StoreCounters {
    /// Writes of either kind.
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.updates + self.upserts
    }
}

/// In-memory price history keyed by `(symbol, date)`.
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    points: RwLock<HashMap<(Symbol, NaiveDate), PricePoint>>,
    exists: AtomicU64,
    updates: AtomicU64,
    upserts: AtomicU64,
    failing: AtomicBool,
}

impl InMemoryPriceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored point for `(symbol, date)`.
    #[must_use]
    pub fn get(&self, symbol: &Symbol, date: NaiveDate) -> Option<PricePoint> {
        self.points.read().get(&(symbol.clone(), date)).cloned()
    }

    /// Latest price for `(symbol, date)`.
    #[must_use]
    pub fn price(&self, symbol: &str, date: NaiveDate) -> Option<Decimal> {
        self.get(&Symbol::new(symbol), date).map(|p| p.price)
    }

    /// All stored points, ordered by symbol then date.
    #[must_use]
    pub fn points(&self) -> Vec<PricePoint> {
        let mut points: Vec<PricePoint> = self.points.read().values().cloned().collect();
        points.sort_by(|a, b| (&a.symbol, a.date).cmp(&(&b.symbol, b.date)));
        points
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    /// Delete a row behind the engine's back.
    pub fn remove(&self, symbol: &str, date: NaiveDate) -> Option<PricePoint> {
        self.points.write().remove(&(Symbol::new(symbol), date))
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Call counts so far.
    #[must_use]
    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            exists: self.exists.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            upserts: self.upserts.load(Ordering::SeqCst),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn exists_price_point(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.exists.fetch_add(1, Ordering::SeqCst);
        Ok(self.points.read().contains_key(&(symbol.clone(), date)))
    }

    async fn update_price_point(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
        price: Decimal,
        written_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut points = self.points.write();
        Ok(points
            .get_mut(&(symbol.clone(), date))
            .map_or(0, |point| {
                point.price = price;
                point.last_written_at = written_at;
                1
            }))
    }

    async fn upsert_price_point(&self, point: &PricePoint) -> Result<(), StoreError> {
        self.check()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut points = self.points.write();
        points
            .entry((point.symbol.clone(), point.date))
            .and_modify(|existing| {
                existing.price = point.price;
                existing.last_written_at = point.last_written_at;
            })
            .or_insert_with(|| point.clone());
        Ok(())
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        self.check()?;
        let mut points = self.points.write();
        let before = points.len();
        points.retain(|(_, date), _| *date >= cutoff);
        Ok((before - points.len()) as u64)
    }
}

/// In-memory watchlist.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    instruments: RwLock<BTreeMap<Identifier, TrackedInstrument>>,
    lookups: AtomicU64,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded with `instruments`.
    #[must_use]
    pub fn with_instruments(instruments: impl IntoIterator<Item = TrackedInstrument>) -> Self {
        let directory = Self::new();
        for instrument in instruments {
            directory.add(instrument);
        }
        directory
    }

    /// Add or replace an instrument.
    pub fn add(&self, instrument: TrackedInstrument) {
        self.instruments
            .write()
            .insert(instrument.identifier.clone(), instrument);
    }

    /// Remove an instrument.
    pub fn remove(&self, identifier: &str) -> Option<TrackedInstrument> {
        self.instruments.write().remove(&Identifier::new(identifier))
    }

    /// Number of lookup calls served.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstrumentDirectory for InMemoryDirectory {
    async fn resolve(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<TrackedInstrument>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.instruments.read().get(identifier).cloned())
    }

    async fn resolve_many(
        &self,
        identifiers: &[Identifier],
    ) -> Result<Vec<TrackedInstrument>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let instruments = self.instruments.read();
        let mut seen = std::collections::HashSet::new();
        Ok(identifiers
            .iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| instruments.get(id).cloned())
            .collect())
    }

    async fn tracked_instruments(&self) -> Result<Vec<TrackedInstrument>, DirectoryError> {
        Ok(self.instruments.read().values().cloned().collect())
    }
}
