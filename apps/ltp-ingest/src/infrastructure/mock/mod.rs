//! Scripted Collaborators
//!
//! Deterministic stand-ins for the broker, the token store and the clock.
//! Integration tests drive whole ingestion flows through these; they are
//! also handy for running the engine locally without broker access.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Offset, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::application::ports::{
    AuthError, AuthProvider, BrokerError, Clock, LtpQuote, MarketStream, QuoteClient,
    SessionCredentials, StreamConnector, StreamEvent,
};
use crate::domain::grouping::VenueChunk;
use crate::domain::instrument::{Identifier, PriceObservation, Venue};

// =============================================================================
// Quote Client
// =============================================================================

/// Quote client answering from a price table.
#[derive(Debug, Default)]
pub struct ScriptedQuoteClient {
    prices: RwLock<BTreeMap<Identifier, Decimal>>,
    failing_venues: RwLock<HashSet<Venue>>,
    requests: Mutex<Vec<VenueChunk>>,
}

impl ScriptedQuoteClient {
    /// Create a client with no prices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price returned for an identifier.
    pub fn set_price(&self, identifier: &str, price: Decimal) {
        self.prices.write().insert(Identifier::new(identifier), price);
    }

    /// Stop returning a price for an identifier.
    pub fn remove_price(&self, identifier: &str) {
        self.prices.write().remove(&Identifier::new(identifier));
    }

    /// Make requests for `venue` fail with a network error.
    pub fn fail_venue(&self, venue: &str) {
        self.failing_venues.write().insert(Venue::new(venue));
    }

    /// Let requests for `venue` succeed again.
    pub fn heal_venue(&self, venue: &str) {
        self.failing_venues.write().remove(&Venue::new(venue));
    }

    /// Every chunk requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<VenueChunk> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl QuoteClient for ScriptedQuoteClient {
    async fn fetch_prices(&self, chunk: &VenueChunk) -> Result<Vec<LtpQuote>, BrokerError> {
        self.requests.lock().push(chunk.clone());
        if self.failing_venues.read().contains(&chunk.venue) {
            return Err(BrokerError::Network(format!("{} unreachable", chunk.venue)));
        }
        let prices = self.prices.read();
        Ok(chunk
            .identifiers
            .iter()
            .filter_map(|id| prices.get(id).map(|price| LtpQuote::new(id.clone(), *price)))
            .collect())
    }
}

// =============================================================================
// Stream Connector
// =============================================================================

#[derive(Debug, Default)]
struct StreamScript {
    sender: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
    subscribed: Mutex<BTreeSet<Identifier>>,
    subscribe_calls: AtomicUsize,
    attempts: AtomicU32,
    connections: AtomicU32,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    reject_auth: AtomicBool,
}

/// Stream connector whose connections are fed by a [`StreamHandle`].
///
/// Only the most recent connection receives pushed events; opening a new
/// one closes the previous.
#[derive(Debug, Default, Clone)]
pub struct ScriptedStreamConnector {
    script: Arc<StreamScript>,
}

impl ScriptedStreamConnector {
    /// Create a connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle controlling this connector's connections.
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            script: Arc::clone(&self.script),
        }
    }
}

#[async_trait]
impl StreamConnector for ScriptedStreamConnector {
    async fn connect(
        &self,
        _credentials: &SessionCredentials,
    ) -> Result<Box<dyn MarketStream>, BrokerError> {
        let script = &self.script;
        script.attempts.fetch_add(1, Ordering::SeqCst);

        if script.reject_auth.load(Ordering::SeqCst) {
            return Err(BrokerError::Unauthorized("session rejected".to_string()));
        }
        if script.always_fail.load(Ordering::SeqCst) {
            return Err(BrokerError::Network("connection refused".to_string()));
        }
        let remaining = script.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            script.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Network("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *script.sender.lock() = Some(tx);
        script.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            events: rx,
            script: Arc::clone(script),
        }))
    }
}

/// One scripted connection.
#[derive(Debug)]
pub struct ScriptedStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    script: Arc<StreamScript>,
}

#[async_trait]
impl MarketStream for ScriptedStream {
    async fn subscribe(&mut self, chunks: &[VenueChunk]) -> Result<(), BrokerError> {
        self.script.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut subscribed = self.script.subscribed.lock();
        for chunk in chunks {
            subscribed.extend(chunk.identifiers.iter().cloned());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.events.close();
    }
}

/// Test-side control of a [`ScriptedStreamConnector`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    script: Arc<StreamScript>,
}

impl StreamHandle {
    /// Push a tick to the current connection. Returns `false` if none is open.
    pub fn push_tick(&self, identifier: &str, price: Decimal) -> bool {
        let observation = PriceObservation::new(Identifier::new(identifier), None, price, Utc::now());
        self.push(StreamEvent::Tick(observation))
    }

    /// Push an arbitrary event to the current connection.
    pub fn push(&self, event: StreamEvent) -> bool {
        self.script
            .sender
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Drop the current connection from the server side.
    pub fn close(&self) {
        self.script.sender.lock().take();
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next(&self, count: u32) {
        self.script.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every connection attempt until turned off.
    pub fn always_fail(&self, fail: bool) {
        self.script.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Reject credentials on every attempt until turned off.
    pub fn reject_auth(&self, reject: bool) {
        self.script.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.script
            .sender
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Connection attempts, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.script.attempts.load(Ordering::SeqCst)
    }

    /// Successful connections.
    #[must_use]
    pub fn connections(&self) -> u32 {
        self.script.connections.load(Ordering::SeqCst)
    }

    /// Subscribe calls across all connections.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.script.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Every identifier ever subscribed.
    #[must_use]
    pub fn subscribed(&self) -> BTreeSet<Identifier> {
        self.script.subscribed.lock().clone()
    }

    /// Forget recorded subscriptions.
    pub fn clear_subscribed(&self) {
        self.script.subscribed.lock().clear();
    }
}

// =============================================================================
// Auth
// =============================================================================

/// Auth provider returning fixed credentials, or none.
#[derive(Debug, Default)]
pub struct StaticAuthProvider {
    credentials: RwLock<Option<SessionCredentials>>,
}

impl StaticAuthProvider {
    /// Provider with credentials.
    #[must_use]
    pub fn new(access_token: &str, feed_token: &str) -> Self {
        Self {
            credentials: RwLock::new(Some(SessionCredentials::new(access_token, feed_token))),
        }
    }

    /// Provider with no session.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the credentials.
    pub fn set(&self, credentials: Option<SessionCredentials>) {
        *self.credentials.write() = credentials;
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn current_credentials(&self) -> Result<SessionCredentials, AuthError> {
        self.credentials
            .read()
            .clone()
            .ok_or_else(|| AuthError::Unavailable("no session stored".to_string()))
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    /// Clock at `now` whose calendar day is taken in UTC.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    /// Clock at `now` whose calendar day is taken in `offset`.
    #[must_use]
    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: RwLock::new(now),
            offset,
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.write();
        *now += by;
    }

    /// Move forward by whole days.
    pub fn advance_days(&self, days: i64) {
        self.advance(ChronoDuration::days(days));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    fn today(&self) -> NaiveDate {
        self.now.read().with_timezone(&self.offset).date_naive()
    }
}
