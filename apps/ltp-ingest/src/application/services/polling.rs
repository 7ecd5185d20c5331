//! Polling Transport
//!
//! Pull-based ingestion: on a fixed interval, fetch latest prices for every
//! tracked instrument, one venue chunk at a time with a pause between calls,
//! and write them straight through the [`PriceRecorder`].
//!
//! A failed chunk is logged and skipped. The next cycle retries it, so the
//! cycle interval doubles as the retry throttle. Rejected credentials are the
//! exception: the cycle is abandoned and the worker stops until the transport
//! is started again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::recorder::PriceRecorder;
use crate::application::ports::{
    AuthProvider, InstrumentDirectory, QuoteClient, Transport, TransportError,
};
use crate::domain::grouping::{DEFAULT_MAX_BATCH, group_by_venue};
use crate::domain::instrument::{Identifier, TrackedInstrument};
use crate::domain::streaming::{ConnectionState, TransportKind, TransportStatus};
use crate::infrastructure::metrics;

/// Polling cadence and batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Time between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Maximum identifiers per fetch call.
    pub max_batch: usize,
    /// Pause between consecutive fetch calls in a cycle.
    pub batch_delay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(7),
            max_batch: DEFAULT_MAX_BATCH,
            batch_delay: Duration::from_secs(1),
        }
    }
}

/// Counts from one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fetch calls issued.
    pub chunks: usize,
    /// Fetch calls that failed.
    pub failed_chunks: usize,
    /// Prices persisted.
    pub written: usize,
    /// Prices whose write failed.
    pub failed_writes: usize,
    /// Tracked instruments skipped for lack of a venue.
    pub unfetchable: usize,
    /// The broker rejected the session; remaining chunks were not fetched.
    pub auth_rejected: bool,
}

struct PollingInner {
    config: PollingConfig,
    quotes: Arc<dyn QuoteClient>,
    recorder: Arc<PriceRecorder>,
    tracked: RwLock<BTreeMap<Identifier, TrackedInstrument>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Timer-driven transport backed by the broker's quote endpoint.
pub struct PollingTransport {
    inner: Arc<PollingInner>,
    auth: Arc<dyn AuthProvider>,
    directory: Arc<dyn InstrumentDirectory>,
    worker: Mutex<Option<Worker>>,
}

impl PollingTransport {
    /// Create a stopped transport with nothing tracked.
    #[must_use]
    pub fn new(
        config: PollingConfig,
        auth: Arc<dyn AuthProvider>,
        quotes: Arc<dyn QuoteClient>,
        directory: Arc<dyn InstrumentDirectory>,
        recorder: Arc<PriceRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                config,
                quotes,
                recorder,
                tracked: RwLock::new(BTreeMap::new()),
            }),
            auth,
            directory,
            worker: Mutex::new(None),
        }
    }

    /// Run one fetch cycle immediately.
    pub async fn poll_once(&self) -> CycleReport {
        self.inner.poll_once().await
    }

    /// Snapshot of the tracked instruments.
    #[must_use]
    pub fn tracked_instruments(&self) -> Vec<TrackedInstrument> {
        self.inner.tracked.read().values().cloned().collect()
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl PollingInner {
    async fn poll_once(&self) -> CycleReport {
        let instruments: Vec<TrackedInstrument> = self.tracked.read().values().cloned().collect();
        let grouping = group_by_venue(&instruments, self.config.max_batch);
        let mut report = CycleReport {
            unfetchable: grouping.unfetchable.len(),
            ..CycleReport::default()
        };

        if !grouping.unfetchable.is_empty() {
            warn!(
                count = grouping.unfetchable.len(),
                identifiers = ?grouping.unfetchable,
                "Skipping instruments with no venue"
            );
        }

        for (index, chunk) in grouping.chunks.iter().enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            report.chunks += 1;

            let quotes = match self.quotes.fetch_prices(chunk).await {
                Ok(quotes) => quotes,
                Err(e) if e.is_auth() => {
                    error!(venue = %chunk.venue, error = %e, "Broker rejected session, abandoning cycle");
                    metrics::record_fetch_failure(e.reason());
                    report.failed_chunks += 1;
                    report.auth_rejected = true;
                    break;
                }
                Err(e) => {
                    warn!(venue = %chunk.venue, size = chunk.len(), error = %e, "Price fetch failed, skipping chunk");
                    metrics::record_fetch_failure(e.reason());
                    report.failed_chunks += 1;
                    continue;
                }
            };

            for quote in quotes {
                let instrument = self.tracked.read().get(&quote.identifier).cloned();
                let Some(instrument) = instrument else {
                    debug!(identifier = %quote.identifier, "Ignoring price for untracked identifier");
                    continue;
                };
                match self
                    .recorder
                    .observe_today(&instrument.symbol, instrument.venue.as_ref(), quote.price)
                    .await
                {
                    Ok(_) => report.written += 1,
                    Err(e) => {
                        warn!(symbol = %instrument.symbol, error = %e, "Failed to persist price");
                        metrics::record_price_write_failure();
                        report.failed_writes += 1;
                    }
                }
            }
        }

        debug!(?report, "Polling cycle complete");
        report
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX), "Polling transport started");
        metrics::set_transport_running(TransportKind::Polling, true);

        loop {
            let report = tokio::select! {
                () = cancel.cancelled() => break,
                report = self.poll_once() => report,
            };
            if report.auth_rejected {
                error!("Polling stopped until credentials are refreshed and the transport restarted");
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }

        metrics::set_transport_running(TransportKind::Polling, false);
        info!("Polling transport stopped");
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        if let Err(e) = self.auth.current_credentials().await {
            error!(error = %e, "Cannot start polling without session credentials");
            return Err(TransportError::Auth(e));
        }

        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        Ok(())
    }

    async fn subscribe_identifiers(&self, identifiers: &[Identifier]) -> bool {
        let (known, unknown): (Vec<_>, Vec<_>) = {
            let tracked = self.inner.tracked.read();
            identifiers
                .iter()
                .filter(|id| !id.is_empty())
                .cloned()
                .partition(|id| tracked.contains_key(id))
        };
        if unknown.is_empty() {
            return !known.is_empty();
        }

        let resolved = match self.directory.resolve_many(&unknown).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, count = unknown.len(), "Failed to resolve identifiers");
                return !known.is_empty();
            }
        };
        if resolved.len() < unknown.len() {
            warn!(
                requested = unknown.len(),
                resolved = resolved.len(),
                "Some identifiers could not be resolved"
            );
        }

        let count = {
            let mut tracked = self.inner.tracked.write();
            for instrument in &resolved {
                tracked.insert(instrument.identifier.clone(), instrument.clone());
            }
            tracked.len()
        };
        metrics::set_subscribed_instruments(TransportKind::Polling, count);
        info!(added = resolved.len(), tracked = count, "Polling subscription updated");

        !known.is_empty() || !resolved.is_empty()
    }

    async fn disconnect(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Polling task ended abnormally");
            }
        }
    }

    fn status(&self) -> TransportStatus {
        let running = self.is_running();
        TransportStatus {
            running,
            subscribed_count: self.inner.tracked.read().len(),
            state: if running {
                ConnectionState::Connected
            } else {
                ConnectionState::Idle
            },
        }
    }
}

impl std::fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingTransport")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{
        AuthError, BrokerError, LtpQuote, MockAuthProvider, MockClock, MockInstrumentDirectory,
        MockPriceStore, MockQuoteClient, SessionCredentials,
    };

    fn auth() -> Arc<MockAuthProvider> {
        let mut auth = MockAuthProvider::new();
        auth.expect_current_credentials()
            .returning(|| Ok(SessionCredentials::new("jwt", "feed")));
        Arc::new(auth)
    }

    fn recorder(store: MockPriceStore) -> Arc<PriceRecorder> {
        let mut clock = MockClock::new();
        clock.expect_now().returning(Utc::now);
        clock
            .expect_today()
            .returning(|| NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        Arc::new(PriceRecorder::new(Arc::new(store), Arc::new(clock)))
    }

    fn directory() -> MockInstrumentDirectory {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_resolve_many().returning(|ids| {
            Ok(ids
                .iter()
                .filter(|id| id.as_str() != "ghost")
                .map(|id| {
                    let venue = if id.as_str().starts_with('B') { "BSE" } else { "NSE" };
                    TrackedInstrument::new(id.clone(), Some(venue.into()), id.as_str().into())
                })
                .collect())
        });
        directory
    }

    fn config() -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(20),
            max_batch: 2,
            batch_delay: Duration::ZERO,
        }
    }

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().map(|s| Identifier::new(s)).collect()
    }

    #[tokio::test]
    async fn subscribe_returns_false_when_nothing_resolves() {
        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(MockQuoteClient::new()),
            Arc::new(directory()),
            recorder(MockPriceStore::new()),
        );
        assert!(!transport.subscribe_identifiers(&ids(&["ghost"])).await);
        assert!(!transport.subscribe_identifiers(&[]).await);
        assert_eq!(transport.status().subscribed_count, 0);
    }

    #[tokio::test]
    async fn subscribe_merges_and_skips_known() {
        let mut directory = MockInstrumentDirectory::new();
        directory
            .expect_resolve_many()
            .times(2)
            .returning(|ids| {
                Ok(ids
                    .iter()
                    .map(|id| TrackedInstrument::new(id.clone(), Some("NSE".into()), id.as_str().into()))
                    .collect())
            });

        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(MockQuoteClient::new()),
            Arc::new(directory),
            recorder(MockPriceStore::new()),
        );
        assert!(transport.subscribe_identifiers(&ids(&["A", "B"])).await);
        assert!(transport.subscribe_identifiers(&ids(&["A"])).await);
        assert!(transport.subscribe_identifiers(&ids(&["A", "C"])).await);
        assert_eq!(transport.status().subscribed_count, 3);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_stop_cycle() {
        let mut quotes = MockQuoteClient::new();
        quotes.expect_fetch_prices().returning(|chunk| {
            if chunk.venue.as_str() == "BSE" {
                Err(BrokerError::RateLimited)
            } else {
                Ok(chunk
                    .identifiers
                    .iter()
                    .map(|id| LtpQuote::new(id.clone(), Decimal::new(1005, 1)))
                    .collect())
            }
        });

        let mut store = MockPriceStore::new();
        store.expect_exists_price_point().returning(|_, _| Ok(false));
        store.expect_upsert_price_point().times(3).returning(|_| Ok(()));

        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(quotes),
            Arc::new(directory()),
            recorder(store),
        );
        transport
            .subscribe_identifiers(&ids(&["N1", "N2", "N3", "B1"]))
            .await;

        let report = transport.poll_once().await;
        assert_eq!(report.chunks, 3);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.written, 3);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_disconnect_stops() {
        let mut quotes = MockQuoteClient::new();
        quotes.expect_fetch_prices().returning(|_| Ok(Vec::new()));

        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(quotes),
            Arc::new(directory()),
            recorder(MockPriceStore::new()),
        );
        transport.disconnect().await;

        transport.start().await.unwrap();
        transport.start().await.unwrap();
        assert!(transport.status().running);

        transport.disconnect().await;
        assert!(!transport.status().running);
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn start_fails_without_credentials() {
        let mut auth = MockAuthProvider::new();
        auth.expect_current_credentials()
            .returning(|| Err(AuthError::Unavailable("no session".into())));
        let mut quotes = MockQuoteClient::new();
        quotes.expect_fetch_prices().never();

        let transport = PollingTransport::new(
            config(),
            Arc::new(auth),
            Arc::new(quotes),
            Arc::new(directory()),
            recorder(MockPriceStore::new()),
        );

        assert!(matches!(transport.start().await, Err(TransportError::Auth(_))));
        assert!(!transport.status().running);
    }

    #[tokio::test]
    async fn rejected_session_abandons_cycle() {
        let mut quotes = MockQuoteClient::new();
        quotes
            .expect_fetch_prices()
            .times(1)
            .returning(|_| Err(BrokerError::Unauthorized("AG8001".into())));

        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(quotes),
            Arc::new(directory()),
            recorder(MockPriceStore::new()),
        );
        transport.subscribe_identifiers(&ids(&["N1", "N2", "B1"])).await;

        let report = transport.poll_once().await;
        assert!(report.auth_rejected);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.failed_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_session_stops_worker() {
        let mut quotes = MockQuoteClient::new();
        quotes
            .expect_fetch_prices()
            .times(1)
            .returning(|_| Err(BrokerError::Unauthorized("401".into())));

        let transport = PollingTransport::new(
            config(),
            auth(),
            Arc::new(quotes),
            Arc::new(directory()),
            recorder(MockPriceStore::new()),
        );
        transport.subscribe_identifiers(&ids(&["N1"])).await;
        transport.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;

        let status = transport.status();
        assert!(!status.running);
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(status.subscribed_count, 1);
        transport.disconnect().await;
    }
}
