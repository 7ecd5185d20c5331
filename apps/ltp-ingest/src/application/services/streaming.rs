//! Streaming Transport
//!
//! Push-based ingestion over a persistent broker connection.
//!
//! # Tasks
//!
//! One session (between `start` and `disconnect`) runs three tasks:
//!
//! - **supervisor**: owns the connection, forwards ticks into a bounded
//!   broadcast channel, applies subscribe commands, runs the liveness
//!   watchdog, and reconnects with exponential backoff
//! - **buffer stage**: moves ticks from the channel into the [`TickBuffer`];
//!   when it falls behind the channel overwrites the oldest ticks
//! - **flush**: the [`FlushScheduler`] persisting the buffer on an interval
//!
//! # State Machine
//!
//! ```text
//! Idle -> Connecting -> Connected -> (Reconnecting <-> Connected) -> Failed
//! ```
//!
//! Every successful (re)connection resets the backoff and re-subscribes all
//! tracked identifiers. `Failed` is terminal: `start` refuses with
//! [`TransportError::ExhaustedReconnect`] until the transport is disconnected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::flush::FlushScheduler;
use super::liveness::{LivenessConfig, LivenessEvent, LivenessState, LivenessWatchdog};
use super::recorder::PriceRecorder;
use super::resolver::SymbolResolver;
use crate::application::ports::{
    AuthError, AuthProvider, InstrumentDirectory, MarketStream, SessionCredentials,
    StreamConnector, StreamEvent, Transport, TransportError,
};
use crate::domain::buffer::TickBuffer;
use crate::domain::grouping::{DEFAULT_MAX_BATCH, VenueChunk, group_by_venue};
use crate::domain::instrument::{Identifier, PriceObservation, TrackedInstrument};
use crate::domain::streaming::{ConnectionState, TransportKind, TransportStatus};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Streaming transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    /// Maximum identifiers per subscribe request.
    pub max_batch: usize,
    /// Interval between buffer flushes.
    pub flush_interval: Duration,
    /// Capacity of the tick channel between the connection and the buffer.
    pub tick_channel_capacity: usize,
    /// Silent-connection detection.
    pub liveness: LivenessConfig,
    /// Reconnect schedule.
    pub backoff: BackoffConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
            flush_interval: Duration::from_secs(2),
            tick_channel_capacity: 4096,
            liveness: LivenessConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

enum Command {
    Subscribe(Vec<VenueChunk>),
}

enum PumpExit {
    Cancelled,
    Lost(String),
}

struct StreamingShared {
    config: StreamingConfig,
    auth: Arc<dyn AuthProvider>,
    connector: Arc<dyn StreamConnector>,
    resolver: Arc<SymbolResolver>,
    buffer: Arc<TickBuffer>,
    recorder: Arc<PriceRecorder>,
    state: RwLock<ConnectionState>,
    tracked: RwLock<BTreeMap<Identifier, TrackedInstrument>>,
    commands: RwLock<Option<mpsc::UnboundedSender<Command>>>,
    connects: AtomicU32,
}

impl StreamingShared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Stream state changed");
            metrics::set_transport_running(TransportKind::Streaming, state.is_running());
        }
    }

    fn subscription_chunks(&self) -> Vec<VenueChunk> {
        let tracked = self.tracked.read();
        group_by_venue(tracked.values(), self.config.max_batch).chunks
    }
}

struct Session {
    cancel: CancellationToken,
    flush_cancel: CancellationToken,
    ingest_tasks: Vec<JoinHandle<()>>,
    flush_task: JoinHandle<()>,
}

// =============================================================================
// Transport
// =============================================================================

/// Persistent-connection transport with buffering and reconnection.
pub struct StreamingTransport {
    shared: Arc<StreamingShared>,
    directory: Arc<dyn InstrumentDirectory>,
    session: Mutex<Option<Session>>,
}

impl StreamingTransport {
    /// Create an idle transport.
    #[must_use]
    pub fn new(
        config: StreamingConfig,
        auth: Arc<dyn AuthProvider>,
        connector: Arc<dyn StreamConnector>,
        directory: Arc<dyn InstrumentDirectory>,
        recorder: Arc<PriceRecorder>,
    ) -> Self {
        Self {
            shared: Arc::new(StreamingShared {
                config,
                auth,
                connector,
                resolver: Arc::new(SymbolResolver::new(Arc::clone(&directory))),
                buffer: Arc::new(TickBuffer::new()),
                recorder,
                state: RwLock::new(ConnectionState::Idle),
                tracked: RwLock::new(BTreeMap::new()),
                commands: RwLock::new(None),
                connects: AtomicU32::new(0),
            }),
            directory,
            session: Mutex::new(None),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of successful connections since creation.
    #[must_use]
    pub fn connection_count(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Snapshot of the tracked instruments.
    #[must_use]
    pub fn tracked_instruments(&self) -> Vec<TrackedInstrument> {
        self.shared.tracked.read().values().cloned().collect()
    }

    fn open_session(
        &self,
        credentials: SessionCredentials,
        initial: Option<Box<dyn MarketStream>>,
    ) -> Session {
        let cancel = CancellationToken::new();
        let flush_cancel = CancellationToken::new();
        let (tick_tx, tick_rx) = broadcast::channel(self.shared.config.tick_channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.shared.commands.write() = Some(command_tx);

        let flush = FlushScheduler::new(
            Arc::clone(&self.shared.buffer),
            Arc::clone(&self.shared.recorder),
            Arc::clone(&self.shared.resolver),
            self.shared.config.flush_interval,
        );
        let flush_task = tokio::spawn({
            let flush_cancel = flush_cancel.clone();
            async move { flush.run(flush_cancel).await }
        });

        let buffer_task = tokio::spawn(buffer_stage(
            tick_rx,
            Arc::clone(&self.shared.buffer),
            cancel.clone(),
        ));
        let supervisor_task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            credentials,
            initial,
            tick_tx,
            command_rx,
            cancel.clone(),
        ));

        Session {
            cancel,
            flush_cancel,
            ingest_tasks: vec![supervisor_task, buffer_task],
            flush_task,
        }
    }

    async fn close_session(session: Session) {
        session.cancel.cancel();
        for task in session.ingest_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream task ended abnormally");
            }
        }
        session.flush_cancel.cancel();
        if let Err(e) = session.flush_task.await {
            warn!(error = %e, "Flush task ended abnormally");
        }
    }
}

#[async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            let state = self.shared.state();
            if state.is_active() {
                return Ok(());
            }
            if state.is_failed() {
                return Err(TransportError::ExhaustedReconnect {
                    attempts: self.shared.config.backoff.max_attempts,
                });
            }
        }
        if let Some(stale) = session.take() {
            Self::close_session(stale).await;
        }

        self.shared.set_state(ConnectionState::Connecting);
        let credentials = match self.shared.auth.current_credentials().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "Cannot start stream without session credentials");
                self.shared.set_state(ConnectionState::Idle);
                return Err(TransportError::Auth(e));
            }
        };

        match self.shared.connector.connect(&credentials).await {
            Ok(stream) => {
                *session = Some(self.open_session(credentials, Some(stream)));
                info!("Stream transport started");
                Ok(())
            }
            Err(e) if e.is_auth() => {
                error!(error = %e, "Stream rejected credentials");
                metrics::record_fetch_failure(e.reason());
                self.shared.set_state(ConnectionState::Idle);
                Err(TransportError::Auth(AuthError::Unavailable(e.to_string())))
            }
            Err(e) => {
                warn!(error = %e, "Initial stream connection failed, reconnecting in background");
                metrics::record_fetch_failure(e.reason());
                self.shared.set_state(ConnectionState::Reconnecting);
                *session = Some(self.open_session(credentials, None));
                Err(TransportError::TransientNetwork(e.to_string()))
            }
        }
    }

    async fn subscribe_identifiers(&self, identifiers: &[Identifier]) -> bool {
        let (known, unknown): (Vec<_>, Vec<_>) = {
            let tracked = self.shared.tracked.read();
            identifiers
                .iter()
                .filter(|id| !id.is_empty())
                .cloned()
                .partition(|id| tracked.contains_key(id))
        };

        let resolved = if unknown.is_empty() {
            Vec::new()
        } else {
            match self.directory.resolve_many(&unknown).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(error = %e, count = unknown.len(), "Failed to resolve identifiers");
                    Vec::new()
                }
            }
        };
        if resolved.len() < unknown.len() {
            warn!(
                requested = unknown.len(),
                resolved = resolved.len(),
                "Some identifiers could not be resolved"
            );
        }
        if known.is_empty() && resolved.is_empty() {
            return false;
        }

        self.shared.resolver.remember(&resolved);
        let (targets, count) = {
            let mut tracked = self.shared.tracked.write();
            for instrument in &resolved {
                tracked.insert(instrument.identifier.clone(), instrument.clone());
            }
            let targets: Vec<TrackedInstrument> = known
                .iter()
                .chain(resolved.iter().map(|i| &i.identifier))
                .filter_map(|id| tracked.get(id).cloned())
                .collect();
            (targets, tracked.len())
        };
        metrics::set_subscribed_instruments(TransportKind::Streaming, count);

        let chunks = group_by_venue(&targets, self.shared.config.max_batch).chunks;
        let sent = self
            .shared
            .commands
            .read()
            .as_ref()
            .is_some_and(|tx| tx.send(Command::Subscribe(chunks)).is_ok());
        if sent {
            info!(identifiers = targets.len(), tracked = count, "Subscription requested");
        } else {
            info!(
                identifiers = targets.len(),
                tracked = count,
                "Not connected, subscription will be sent on connect"
            );
        }
        true
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        *self.shared.commands.write() = None;
        if let Some(active) = session.take() {
            Self::close_session(active).await;
            info!("Stream transport disconnected");
        }
        self.shared.set_state(ConnectionState::Idle);
    }

    fn status(&self) -> TransportStatus {
        let state = self.shared.state();
        TransportStatus {
            running: state.is_running(),
            subscribed_count: self.shared.tracked.read().len(),
            state,
        }
    }
}

impl std::fmt::Debug for StreamingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTransport")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session Tasks
// =============================================================================

async fn buffer_stage(
    mut ticks: broadcast::Receiver<PriceObservation>,
    buffer: Arc<TickBuffer>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            received = ticks.recv() => match received {
                Ok(observation) => {
                    buffer.record(observation);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Tick buffer fell behind, oldest ticks overwritten");
                    metrics::record_ticks_dropped(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = cancel.cancelled() => break,
        }
    }

    while let Ok(observation) = ticks.try_recv() {
        buffer.record(observation);
    }
}

async fn supervise(
    shared: Arc<StreamingShared>,
    mut credentials: SessionCredentials,
    initial: Option<Box<dyn MarketStream>>,
    ticks: broadcast::Sender<PriceObservation>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut policy = BackoffPolicy::new(shared.config.backoff.clone());
    let mut next = initial;

    loop {
        let mut stream = if let Some(stream) = next.take() {
            stream
        } else {
            let Some(delay) = policy.next_delay() else {
                error!(
                    attempts = policy.attempt_count(),
                    "Reconnect attempts exhausted, stream transport failed"
                );
                shared.set_state(ConnectionState::Failed);
                return;
            };

            shared.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect();
            info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling stream reconnect"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match shared.auth.current_credentials().await {
                Ok(fresh) => credentials = fresh,
                Err(e) => warn!(error = %e, "Credential refresh failed, reusing previous"),
            }

            let connected = tokio::select! {
                () = cancel.cancelled() => return,
                result = shared.connector.connect(&credentials) => result,
            };
            match connected {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(attempt = policy.attempt_count(), error = %e, "Stream reconnect failed");
                    metrics::record_fetch_failure(e.reason());
                    continue;
                }
            }
        };

        policy.reset();
        shared.connects.fetch_add(1, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connected);

        while commands.try_recv().is_ok() {}
        let chunks = shared.subscription_chunks();
        if !chunks.is_empty() {
            if let Err(e) = stream.subscribe(&chunks).await {
                warn!(error = %e, "Failed to restore subscriptions");
                metrics::record_fetch_failure(e.reason());
                stream.close().await;
                continue;
            }
            info!(chunks = chunks.len(), "Subscriptions restored");
        }

        let exit = pump(&shared, stream.as_mut(), &ticks, &mut commands, &cancel).await;
        stream.close().await;
        match exit {
            PumpExit::Cancelled => return,
            PumpExit::Lost(reason) => {
                warn!(%reason, "Stream connection lost");
            }
        }
    }
}

async fn pump(
    shared: &StreamingShared,
    stream: &mut dyn MarketStream,
    ticks: &broadcast::Sender<PriceObservation>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    cancel: &CancellationToken,
) -> PumpExit {
    let liveness = Arc::new(LivenessState::new());
    let (liveness_tx, mut liveness_rx) = mpsc::channel(1);
    let watchdog_cancel = cancel.child_token();
    tokio::spawn(
        LivenessWatchdog::new(
            shared.config.liveness.clone(),
            Arc::clone(&liveness),
            liveness_tx,
            watchdog_cancel.clone(),
        )
        .run(),
    );

    let exit = loop {
        tokio::select! {
            () = cancel.cancelled() => break PumpExit::Cancelled,
            Some(LivenessEvent::Stale { silent_for }) = liveness_rx.recv() => {
                break PumpExit::Lost(format!("no ticks for {}ms", silent_for.as_millis()));
            }
            command = commands.recv() => match command {
                Some(Command::Subscribe(chunks)) => {
                    if let Err(e) = stream.subscribe(&chunks).await {
                        metrics::record_fetch_failure(e.reason());
                        break PumpExit::Lost(format!("subscribe failed: {e}"));
                    }
                }
                None => break PumpExit::Cancelled,
            },
            event = stream.next_event() => match event {
                Some(StreamEvent::Tick(observation)) => {
                    liveness.record_tick();
                    metrics::record_ticks_received(1);
                    let _ = ticks.send(observation);
                }
                Some(StreamEvent::Error(e)) => break PumpExit::Lost(e.to_string()),
                None => break PumpExit::Lost("connection closed".to_string()),
            },
        }
    };

    watchdog_cancel.cancel();
    exit
}
