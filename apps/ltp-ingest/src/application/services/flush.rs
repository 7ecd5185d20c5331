//! Flush Scheduler
//!
//! Periodically drains the [`TickBuffer`] and persists the latest observation
//! per identifier through the [`PriceRecorder`]. A failure on one identifier
//! is logged and the rest of the batch still goes through.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::recorder::PriceRecorder;
use super::resolver::SymbolResolver;
use crate::domain::buffer::TickBuffer;
use crate::infrastructure::metrics;

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Observations taken from the buffer.
    pub drained: usize,
    /// Observations persisted.
    pub written: usize,
    /// Observations dropped because no symbol could be found.
    pub unresolved: usize,
    /// Observations whose resolve or write failed.
    pub failed: usize,
}

/// Drains the tick buffer on a fixed interval.
#[derive(Debug)]
pub struct FlushScheduler {
    buffer: Arc<TickBuffer>,
    recorder: Arc<PriceRecorder>,
    resolver: Arc<SymbolResolver>,
    interval: Duration,
}

impl FlushScheduler {
    /// Create a scheduler.
    #[must_use]
    pub const fn new(
        buffer: Arc<TickBuffer>,
        recorder: Arc<PriceRecorder>,
        resolver: Arc<SymbolResolver>,
        interval: Duration,
    ) -> Self {
        Self {
            buffer,
            recorder,
            resolver,
            interval,
        }
    }

    /// Drain the buffer once and persist everything in it.
    pub async fn flush_once(&self) -> FlushReport {
        let batch = self.buffer.drain();
        let mut report = FlushReport {
            drained: batch.len(),
            ..FlushReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let started = Instant::now();
        let today = self.recorder.today();
        if self.recorder.roll_day(today) {
            info!(%today, "Calendar day rolled over, existence cache cleared");
        }

        for observation in batch {
            let (symbol, venue) = match self.resolver.resolve(&observation).await {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    warn!(identifier = %observation.identifier, "Dropping tick for unknown identifier");
                    metrics::record_unresolved_observation();
                    report.unresolved += 1;
                    continue;
                }
                Err(e) => {
                    warn!(identifier = %observation.identifier, error = %e, "Symbol lookup failed");
                    metrics::record_unresolved_observation();
                    report.failed += 1;
                    continue;
                }
            };

            match self
                .recorder
                .observe(&symbol, venue.as_ref(), observation.price, today)
                .await
            {
                Ok(_) => report.written += 1,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to persist price");
                    metrics::record_price_write_failure();
                    report.failed += 1;
                }
            }
        }

        metrics::record_flush_duration(started.elapsed());
        debug!(?report, "Flushed tick buffer");
        report
    }

    /// Flush on every interval until cancelled, then flush what is left.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let report = self.flush_once().await;
                    debug!(?report, "Final flush before shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{
        DirectoryError, MockClock, MockInstrumentDirectory, MockPriceStore, StoreError,
    };
    use crate::domain::instrument::{PriceObservation, TrackedInstrument};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn clock() -> Arc<MockClock> {
        let mut clock = MockClock::new();
        clock.expect_now().returning(Utc::now);
        clock.expect_today().returning(today);
        Arc::new(clock)
    }

    fn tick(id: &str, price: i64) -> PriceObservation {
        PriceObservation::new(id.into(), Some("NSE".into()), Decimal::from(price), Utc::now())
    }

    fn directory() -> Arc<MockInstrumentDirectory> {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_resolve().returning(|id| match id.as_str() {
            "bad" => Err(DirectoryError::Lookup("down".into())),
            "unknown" => Ok(None),
            other => Ok(Some(TrackedInstrument::new(
                id.clone(),
                Some("NSE".into()),
                format!("{other}-EQ").as_str().into(),
            ))),
        });
        Arc::new(directory)
    }

    fn scheduler(store: MockPriceStore, buffer: Arc<TickBuffer>) -> FlushScheduler {
        let recorder = Arc::new(PriceRecorder::new(Arc::new(store), clock()));
        let resolver = Arc::new(SymbolResolver::new(directory()));
        FlushScheduler::new(buffer, recorder, resolver, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn coalesced_ticks_write_once_with_latest_price() {
        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().returning(|_, _| Ok(false));
        store
            .expect_upsert_price_point()
            .withf(|p| p.price == Decimal::from(12) && p.symbol.as_str() == "A-EQ")
            .times(1)
            .returning(|_| Ok(()));

        let buffer = Arc::new(TickBuffer::new());
        for price in [10, 11, 12] {
            buffer.record(tick("A", price));
        }

        let report = scheduler(store, Arc::clone(&buffer)).flush_once().await;
        assert_eq!(report.drained, 1);
        assert_eq!(report.written, 1);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_abort_flush() {
        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().returning(|_, _| Ok(false));
        store.expect_upsert_price_point().returning(|p| {
            if p.symbol.as_str() == "fail-EQ" {
                Err(StoreError::Query("constraint".into()))
            } else {
                Ok(())
            }
        });

        let buffer = Arc::new(TickBuffer::new());
        for id in ["ok", "fail", "unknown", "bad"] {
            buffer.record(tick(id, 1));
        }

        let report = scheduler(store, buffer).flush_once().await;
        assert_eq!(
            report,
            FlushReport {
                drained: 4,
                written: 1,
                unresolved: 1,
                failed: 2,
            }
        );
    }

    #[tokio::test]
    async fn empty_buffer_touches_nothing() {
        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().never();
        let report = scheduler(store, Arc::new(TickBuffer::new())).flush_once().await;
        assert_eq!(report, FlushReport::default());
    }

    #[tokio::test]
    async fn run_flushes_remaining_ticks_on_cancel() {
        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().returning(|_, _| Ok(false));
        store
            .expect_upsert_price_point()
            .times(1)
            .returning(|_| Ok(()));

        let buffer = Arc::new(TickBuffer::new());
        let scheduler = FlushScheduler::new(
            Arc::clone(&buffer),
            Arc::new(PriceRecorder::new(Arc::new(store), clock())),
            Arc::new(SymbolResolver::new(directory())),
            Duration::from_secs(3600),
        );

        buffer.record(tick("A", 5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run(cancel).await;
        assert!(buffer.is_empty());
    }
}
