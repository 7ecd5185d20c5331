//! Tick Buffer
//!
//! Coalesces bursts of observations between flushes. Holds at most one
//! observation per identifier: a newer tick for the same identifier replaces
//! the older one (last write wins within a flush interval).
//!
//! [`TickBuffer::drain`] swaps the map out under the lock and returns it, so
//! ticks arriving while a flush is persisting land in a fresh buffer.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::instrument::{Identifier, PriceObservation};

/// Identifier-keyed accumulator of the latest observation per instrument.
#[derive(Debug, Default)]
pub struct TickBuffer {
    inner: Mutex<HashMap<Identifier, PriceObservation>>,
}

impl TickBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation, replacing any earlier one for the same identifier.
    ///
    /// Returns `true` if an earlier observation was overwritten.
    pub fn record(&self, observation: PriceObservation) -> bool {
        let mut inner = self.inner.lock();
        inner
            .insert(observation.identifier.clone(), observation)
            .is_some()
    }

    /// Take everything buffered so far and leave an empty buffer behind.
    #[must_use]
    pub fn drain(&self) -> Vec<PriceObservation> {
        let snapshot = std::mem::take(&mut *self.inner.lock());
        snapshot.into_values().collect()
    }

    /// Number of identifiers with a pending observation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn tick(id: &str, price: i64) -> PriceObservation {
        PriceObservation::new(id.into(), Some("NSE".into()), Decimal::from(price), Utc::now())
    }

    #[test]
    fn last_write_wins_per_identifier() {
        let buffer = TickBuffer::new();
        assert!(!buffer.record(tick("A", 10)));
        assert!(buffer.record(tick("A", 11)));
        assert!(buffer.record(tick("A", 12)));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].price, Decimal::from(12));
    }

    #[test]
    fn drain_clears_buffer() {
        let buffer = TickBuffer::new();
        buffer.record(tick("A", 1));
        buffer.record(tick("B", 2));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn ticks_after_drain_start_fresh_buffer() {
        let buffer = TickBuffer::new();
        buffer.record(tick("A", 1));
        let first = buffer.drain();
        buffer.record(tick("A", 2));

        assert_eq!(first[0].price, Decimal::from(1));
        assert_eq!(buffer.drain()[0].price, Decimal::from(2));
    }
}
