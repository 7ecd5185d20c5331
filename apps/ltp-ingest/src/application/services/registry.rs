//! Ingestion Engine
//!
//! Owner of the single active transport and entry point for callers that
//! manage the watchlist. Starts the transport lazily on the first
//! subscription; concurrent first callers wait on the same initialization
//! instead of starting a second transport. Status reads never wait on an
//! in-flight start.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::polling::{PollingConfig, PollingTransport};
use super::recorder::PriceRecorder;
use super::streaming::{StreamingConfig, StreamingTransport};
use crate::application::ports::{
    AuthProvider, Clock, InstrumentDirectory, PriceStore, QuoteClient, StreamConnector, Transport,
    TransportError,
};
use crate::domain::instrument::Identifier;
use crate::domain::streaming::{TransportKind, TransportStatus};

/// Engine-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Which transport to construct.
    pub transport: TransportKind,
    /// Polling transport settings.
    pub polling: PollingConfig,
    /// Streaming transport settings.
    pub streaming: StreamingConfig,
    /// How long a caller waits for an in-flight transport start.
    pub init_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Polling,
            polling: PollingConfig::default(),
            streaming: StreamingConfig::default(),
            init_wait: Duration::from_secs(5),
        }
    }
}

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct EngineDependencies {
    /// Session credentials.
    pub auth: Arc<dyn AuthProvider>,
    /// REST price fetches.
    pub quotes: Arc<dyn QuoteClient>,
    /// Streaming connections.
    pub connector: Arc<dyn StreamConnector>,
    /// Watchlist lookups.
    pub directory: Arc<dyn InstrumentDirectory>,
    /// Price persistence.
    pub store: Arc<dyn PriceStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Process-wide ingestion engine. Construct once and share by `Arc`.
pub struct IngestionEngine {
    transport: Arc<dyn Transport>,
    directory: Arc<dyn InstrumentDirectory>,
    started: AtomicBool,
    init: Mutex<()>,
    init_wait: Duration,
}

impl IngestionEngine {
    /// Wrap an existing transport.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<dyn InstrumentDirectory>,
        init_wait: Duration,
    ) -> Self {
        Self {
            transport,
            directory,
            started: AtomicBool::new(false),
            init: Mutex::new(()),
            init_wait,
        }
    }

    /// Build the transport selected by `config` and wrap it.
    #[must_use]
    pub fn from_config(config: EngineConfig, deps: EngineDependencies) -> Self {
        let recorder = Arc::new(PriceRecorder::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.clock),
        ));
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Polling => Arc::new(PollingTransport::new(
                config.polling,
                deps.auth,
                deps.quotes,
                Arc::clone(&deps.directory),
                recorder,
            )),
            TransportKind::Streaming => Arc::new(StreamingTransport::new(
                config.streaming,
                deps.auth,
                deps.connector,
                Arc::clone(&deps.directory),
                recorder,
            )),
        };
        info!(transport = %config.transport, "Ingestion engine configured");
        Self::new(transport, deps.directory, config.init_wait)
    }

    /// Kind of the owned transport.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Track `identifiers`, starting the transport on first use.
    ///
    /// Returns `false` if the transport could not be started or none of the
    /// identifiers resolved.
    pub async fn subscribe_identifiers(&self, identifiers: &[Identifier]) -> bool {
        if identifiers.is_empty() {
            return false;
        }
        if !self.ensure_started().await {
            warn!("Transport not started, cannot subscribe");
            return false;
        }
        self.transport.subscribe_identifiers(identifiers).await
    }

    /// Track a single identifier.
    pub async fn subscribe_identifier(&self, identifier: Identifier) -> bool {
        self.subscribe_identifiers(std::slice::from_ref(&identifier))
            .await
    }

    /// Subscribe everything the watchlist currently tracks.
    pub async fn resync_from_store(&self) -> bool {
        let instruments = match self.directory.tracked_instruments().await {
            Ok(instruments) => instruments,
            Err(e) => {
                error!(error = %e, "Failed to load tracked instruments");
                return false;
            }
        };
        let identifiers: Vec<Identifier> = instruments.into_iter().map(|i| i.identifier).collect();
        if identifiers.is_empty() {
            info!("No tracked instruments to subscribe");
            return false;
        }
        info!(count = identifiers.len(), "Resyncing subscriptions from store");
        self.subscribe_identifiers(&identifiers).await
    }

    /// Status of the transport, or not-running if it was never started.
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        if self.started.load(Ordering::Acquire) {
            self.transport.status()
        } else {
            TransportStatus::not_started()
        }
    }

    /// Stop the transport, restart it, and resubscribe from the store.
    ///
    /// Recovers a transport that gave up after exhausting reconnects.
    pub async fn restart(&self) -> bool {
        info!("Restarting transport");
        self.disconnect().await;
        if !self.ensure_started().await {
            return false;
        }
        self.resync_from_store().await
    }

    /// Stop the transport. Safe to call at any time.
    pub async fn disconnect(&self) {
        let _init = self.init.lock().await;
        self.transport.disconnect().await;
        self.started.store(false, Ordering::Release);
    }

    async fn ensure_started(&self) -> bool {
        if self.started.load(Ordering::Acquire) {
            return true;
        }
        let Ok(_init) = tokio::time::timeout(self.init_wait, self.init.lock()).await else {
            warn!(
                wait_ms = u64::try_from(self.init_wait.as_millis()).unwrap_or(u64::MAX),
                "Timed out waiting for transport initialization"
            );
            return false;
        };
        if self.started.load(Ordering::Acquire) {
            return true;
        }

        match self.transport.start().await {
            Ok(()) => {
                info!(transport = %self.transport.kind(), "Transport started");
                self.started.store(true, Ordering::Release);
                true
            }
            Err(TransportError::TransientNetwork(reason)) => {
                warn!(%reason, "Transport started degraded, recovering in background");
                self.started.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                error!(error = %e, "Transport failed to start");
                false
            }
        }
    }
}

impl std::fmt::Debug for IngestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionEngine")
            .field("transport", &self.transport.kind())
            .field("init_wait", &self.init_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use mockall::Sequence;

    use super::*;
    use crate::application::ports::{
        AuthError, DirectoryError, MockInstrumentDirectory, MockTransport,
    };
    use crate::domain::instrument::TrackedInstrument;

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().map(|s| Identifier::new(s)).collect()
    }

    fn engine(transport: MockTransport, directory: MockInstrumentDirectory) -> IngestionEngine {
        IngestionEngine::new(
            Arc::new(transport),
            Arc::new(directory),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn status_before_start_is_not_running() {
        let mut transport = MockTransport::new();
        transport.expect_status().never();
        let engine = engine(transport, MockInstrumentDirectory::new());
        assert_eq!(engine.status(), TransportStatus::not_started());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_subscribes_start_transport_once() {
        let starts = Arc::new(AtomicUsize::new(0));
        let mut transport = MockTransport::new();
        transport.expect_kind().return_const(TransportKind::Polling);
        let counter = Arc::clone(&starts);
        transport.expect_start().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        transport.expect_subscribe_identifiers().returning(|_| true);

        let engine = Arc::new(engine(transport, MockInstrumentDirectory::new()));
        let a = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.subscribe_identifiers(&ids(&["1"])).await }
        });
        let b = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.subscribe_identifiers(&ids(&["2"])).await }
        });

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_returns_false_and_retries_later() {
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport.expect_kind().return_const(TransportKind::Streaming);
        transport
            .expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(TransportError::Auth(AuthError::Unavailable("expired".into()))));
        transport
            .expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        transport.expect_subscribe_identifiers().returning(|_| true);

        let engine = engine(transport, MockInstrumentDirectory::new());
        assert!(!engine.subscribe_identifiers(&ids(&["1"])).await);
        assert!(engine.subscribe_identifiers(&ids(&["1"])).await);
    }

    #[tokio::test]
    async fn transient_start_failure_counts_as_started() {
        let mut transport = MockTransport::new();
        transport.expect_kind().return_const(TransportKind::Streaming);
        transport
            .expect_start()
            .times(1)
            .returning(|| Err(TransportError::TransientNetwork("refused".into())));
        transport.expect_subscribe_identifiers().times(2).returning(|_| true);

        let engine = engine(transport, MockInstrumentDirectory::new());
        assert!(engine.subscribe_identifiers(&ids(&["1"])).await);
        assert!(engine.subscribe_identifiers(&ids(&["2"])).await);
    }

    #[tokio::test]
    async fn empty_subscribe_is_false_without_starting() {
        let mut transport = MockTransport::new();
        transport.expect_start().never();
        let engine = engine(transport, MockInstrumentDirectory::new());
        assert!(!engine.subscribe_identifiers(&[]).await);
    }

    #[tokio::test]
    async fn resync_subscribes_full_tracked_set() {
        let mut directory = MockInstrumentDirectory::new();
        directory.expect_tracked_instruments().returning(|| {
            Ok(vec![
                TrackedInstrument::new("1".into(), Some("NSE".into()), "A".into()),
                TrackedInstrument::new("2".into(), Some("BSE".into()), "B".into()),
            ])
        });
        let mut transport = MockTransport::new();
        transport.expect_kind().return_const(TransportKind::Polling);
        transport.expect_start().returning(|| Ok(()));
        transport
            .expect_subscribe_identifiers()
            .withf(|ids| ids.len() == 2)
            .times(1)
            .returning(|_| true);

        assert!(engine(transport, directory).resync_from_store().await);
    }

    #[tokio::test]
    async fn resync_failure_is_false() {
        let mut directory = MockInstrumentDirectory::new();
        directory
            .expect_tracked_instruments()
            .returning(|| Err(DirectoryError::Lookup("db down".into())));
        let mut transport = MockTransport::new();
        transport.expect_start().never();

        assert!(!engine(transport, directory).resync_from_store().await);
    }

    #[tokio::test]
    async fn restart_disconnects_then_starts_again() {
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport.expect_kind().return_const(TransportKind::Streaming);
        transport.expect_disconnect().times(1).in_sequence(&mut seq).return_const(());
        transport
            .expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        transport.expect_subscribe_identifiers().returning(|_| true);

        let mut directory = MockInstrumentDirectory::new();
        directory.expect_tracked_instruments().returning(|| {
            Ok(vec![TrackedInstrument::new("1".into(), Some("NSE".into()), "A".into())])
        });

        assert!(engine(transport, directory).restart().await);
    }

    /// Transport whose start never completes, like a connect that hangs.
    struct HangingStart;

    #[async_trait]
    impl Transport for HangingStart {
        fn kind(&self) -> TransportKind {
            TransportKind::Streaming
        }

        async fn start(&self) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn subscribe_identifiers(&self, _identifiers: &[Identifier]) -> bool {
            true
        }

        async fn disconnect(&self) {}

        fn status(&self) -> TransportStatus {
            TransportStatus {
                running: true,
                subscribed_count: 1,
                state: crate::domain::streaming::ConnectionState::Connecting,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_answers_while_start_hangs() {
        let engine = Arc::new(IngestionEngine::new(
            Arc::new(HangingStart),
            Arc::new(MockInstrumentDirectory::new()),
            Duration::from_secs(5),
        ));
        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.subscribe_identifiers(&ids(&["1"])).await }
        });
        tokio::task::yield_now().await;

        assert_eq!(engine.status(), TransportStatus::not_started());
        // A second caller gives up after the init wait instead of queueing forever.
        assert!(!engine.subscribe_identifiers(&ids(&["2"])).await);
        assert_eq!(engine.status(), TransportStatus::not_started());
        first.abort();
    }
}
