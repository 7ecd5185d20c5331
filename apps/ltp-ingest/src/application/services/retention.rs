//! Retention Pruner
//!
//! Housekeeping task that deletes price points older than the retention
//! horizon on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::ports::{Clock, PriceStore, StoreError};

/// Periodically prunes old price points.
pub struct RetentionPruner {
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    retention_days: u32,
    interval: Duration,
}

impl RetentionPruner {
    /// Create a pruner keeping `retention_days` days of history.
    #[must_use]
    pub fn new(
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn Clock>,
        retention_days: u32,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention_days,
            interval,
        }
    }

    /// Oldest day that is kept.
    #[must_use]
    pub fn cutoff(&self) -> NaiveDate {
        let today = self.clock.today();
        today
            .checked_sub_days(Days::new(u64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Delete everything dated before the cutoff.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn prune_once(&self) -> Result<u64, StoreError> {
        let cutoff = self.cutoff();
        let deleted = self.store.prune_before(cutoff).await?;
        if deleted > 0 {
            info!(%cutoff, deleted, "Pruned old price points");
        }
        Ok(deleted)
    }

    /// Prune on every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if self.retention_days == 0 {
            info!("Retention pruning disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.prune_once().await {
                        warn!(error = %e, "Retention pruning failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RetentionPruner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionPruner")
            .field("retention_days", &self.retention_days)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::application::ports::{MockClock, MockPriceStore};

    fn clock() -> Arc<MockClock> {
        let mut clock = MockClock::new();
        clock
            .expect_today()
            .returning(|| NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());
        Arc::new(clock)
    }

    #[tokio::test]
    async fn prunes_before_retention_cutoff() {
        let mut store = MockPriceStore::new();
        store
            .expect_prune_before()
            .with(eq(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()))
            .times(1)
            .returning(|_| Ok(4));

        let pruner = RetentionPruner::new(Arc::new(store), clock(), 10, Duration::from_secs(60));
        assert_eq!(pruner.prune_once().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn disabled_pruner_exits_immediately() {
        let mut store = MockPriceStore::new();
        store.expect_prune_before().never();
        let pruner = RetentionPruner::new(Arc::new(store), clock(), 0, Duration::from_millis(1));
        pruner.run(CancellationToken::new()).await;
    }
}
