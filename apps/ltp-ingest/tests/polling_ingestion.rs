//! Polling Ingestion Integration Tests
//!
//! Drives the polling transport and the persistence path end to end with
//! in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use ltp_ingest::application::services::SymbolResolver;
use ltp_ingest::infrastructure::mock::{
    ManualClock, ScriptedQuoteClient, ScriptedStreamConnector, StaticAuthProvider,
};
use ltp_ingest::infrastructure::persistence::{InMemoryDirectory, InMemoryPriceStore};
use ltp_ingest::{
    Clock, EngineConfig, EngineDependencies, FlushScheduler, Identifier, IngestionEngine,
    PollingConfig, PollingTransport, PriceObservation, PriceRecorder, SessionCredentials,
    TickBuffer, TrackedInstrument, Transport, TransportKind,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn instrument(id: &str, venue: Option<&str>, symbol: &str) -> TrackedInstrument {
    TrackedInstrument::new(id.into(), venue.map(Into::into), symbol.into())
}

struct Harness {
    auth: Arc<StaticAuthProvider>,
    quotes: Arc<ScriptedQuoteClient>,
    directory: Arc<InMemoryDirectory>,
    store: Arc<InMemoryPriceStore>,
    clock: Arc<ManualClock>,
    recorder: Arc<PriceRecorder>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryPriceStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap(),
        ));
        let recorder = Arc::new(PriceRecorder::new(store.clone(), clock.clone()));
        Self {
            auth: Arc::new(StaticAuthProvider::new("jwt", "feed")),
            quotes: Arc::new(ScriptedQuoteClient::new()),
            directory: Arc::new(InMemoryDirectory::with_instruments([
                instrument("1", Some("NSE"), "AAA"),
                instrument("2", None, "BBB"),
                instrument("3", Some("BSE"), "CCC"),
            ])),
            store,
            clock,
            recorder,
        }
    }

    fn polling(&self) -> PollingTransport {
        PollingTransport::new(
            PollingConfig {
                interval: Duration::from_secs(7),
                max_batch: 50,
                batch_delay: Duration::ZERO,
            },
            self.auth.clone(),
            self.quotes.clone(),
            self.directory.clone(),
            self.recorder.clone(),
        )
    }

    fn engine(&self) -> IngestionEngine {
        let mut config = EngineConfig::default();
        config.polling.batch_delay = Duration::ZERO;
        IngestionEngine::from_config(
            config,
            EngineDependencies {
                auth: self.auth.clone(),
                quotes: self.quotes.clone(),
                connector: Arc::new(ScriptedStreamConnector::new()),
                directory: self.directory.clone(),
                store: self.store.clone(),
                clock: self.clock.clone(),
            },
        )
    }
}

#[tokio::test]
async fn polling_cycle_writes_fetchable_prices_only() {
    let h = Harness::new();
    h.quotes.set_price("1", dec("100.5"));
    let transport = h.polling();

    assert!(
        transport
            .subscribe_identifiers(&[Identifier::new("1"), Identifier::new("2")])
            .await
    );
    let report = transport.poll_once().await;

    assert_eq!(report.chunks, 1);
    assert_eq!(report.written, 1);
    assert_eq!(report.unfetchable, 1);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("100.5")));
    assert_eq!(h.store.price("BBB", day(2)), None);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn unavailable_price_writes_no_row() {
    let h = Harness::new();
    h.directory.add(instrument("4", Some("NSE"), "DDD"));
    h.quotes.set_price("1", dec("100.5"));
    let transport = h.polling();
    transport
        .subscribe_identifiers(&[Identifier::new("1"), Identifier::new("4")])
        .await;

    let report = transport.poll_once().await;

    assert_eq!(report.chunks, 1);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(report.written, 1);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("100.5")));
    assert_eq!(h.store.price("DDD", day(2)), None);
}

#[tokio::test]
async fn second_cycle_overwrites_same_day_row() {
    let h = Harness::new();
    let transport = h.polling();
    transport.subscribe_identifiers(&[Identifier::new("1")]).await;

    h.quotes.set_price("1", dec("100"));
    transport.poll_once().await;
    h.quotes.set_price("1", dec("101.25"));
    transport.poll_once().await;

    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("101.25")));
    // First write inserts, second is a cached update with no existence check.
    let counters = h.store.counters();
    assert_eq!(counters.exists, 1);
    assert_eq!(counters.updates, 1);
    assert_eq!(counters.upserts, 1);
}

#[tokio::test]
async fn failed_venue_does_not_block_other_venues() {
    let h = Harness::new();
    h.quotes.set_price("1", dec("10"));
    h.quotes.set_price("3", dec("20"));
    h.quotes.fail_venue("NSE");
    let transport = h.polling();
    transport
        .subscribe_identifiers(&[Identifier::new("1"), Identifier::new("3")])
        .await;

    let report = transport.poll_once().await;

    assert_eq!(report.chunks, 2);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(h.store.price("AAA", day(2)), None);
    assert_eq!(h.store.price("CCC", day(2)), Some(dec("20")));

    h.quotes.heal_venue("NSE");
    let report = transport.poll_once().await;
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("10")));
}

#[tokio::test]
async fn delisted_price_keeps_last_row() {
    let h = Harness::new();
    h.quotes.set_price("1", dec("7"));
    let transport = h.polling();
    transport.subscribe_identifiers(&[Identifier::new("1")]).await;
    transport.poll_once().await;

    h.quotes.remove_price("1");
    let report = transport.poll_once().await;

    assert_eq!(report.written, 0);
    assert_eq!(report.failed_chunks, 0);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("7")));
}

#[tokio::test]
async fn externally_pruned_row_is_recreated() {
    let h = Harness::new();
    h.quotes.set_price("1", dec("5"));
    let transport = h.polling();
    transport.subscribe_identifiers(&[Identifier::new("1")]).await;

    transport.poll_once().await;
    h.store.remove("AAA", day(2));
    h.quotes.set_price("1", dec("6"));
    let report = transport.poll_once().await;

    assert_eq!(report.written, 1);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("6")));
}

#[tokio::test(start_paused = true)]
async fn engine_starts_polling_on_first_subscription() {
    let h = Harness::new();
    h.quotes.set_price("1", dec("100.5"));
    let engine = h.engine();
    assert_eq!(engine.transport_kind(), TransportKind::Polling);
    assert!(!engine.status().running);

    assert!(engine.resync_from_store().await);
    tokio::time::sleep(Duration::from_secs(8)).await;

    let status = engine.status();
    assert!(status.running);
    assert_eq!(status.subscribed_count, 3);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("100.5")));

    engine.disconnect().await;
    assert!(!engine.status().running);
}

#[tokio::test]
async fn engine_without_session_does_not_start() {
    let h = Harness::new();
    h.auth.set(None);
    let engine = h.engine();

    assert!(!engine.resync_from_store().await);
    assert!(!engine.status().running);
    assert!(h.quotes.requests().is_empty());

    h.auth.set(Some(SessionCredentials::new("jwt", "feed")));
    assert!(engine.resync_from_store().await);
    assert!(engine.status().running);
    engine.disconnect().await;
}

#[tokio::test]
async fn unknown_identifiers_are_rejected() {
    let h = Harness::new();
    let engine = h.engine();

    assert!(!engine.subscribe_identifiers(&[]).await);
    assert!(!engine.subscribe_identifier(Identifier::new("404")).await);
    engine.disconnect().await;
}

#[tokio::test]
async fn flush_coalesces_to_latest_observation() {
    let h = Harness::new();
    let buffer = Arc::new(TickBuffer::new());
    let resolver = Arc::new(SymbolResolver::new(h.directory.clone()));
    let flush = FlushScheduler::new(
        buffer.clone(),
        h.recorder.clone(),
        resolver,
        Duration::from_secs(2),
    );

    for price in ["10", "11", "12"] {
        buffer.record(PriceObservation::new(
            "1".into(),
            None,
            dec(price),
            h.clock.now(),
        ));
    }
    let report = flush.flush_once().await;

    assert_eq!(report.drained, 1);
    assert_eq!(report.written, 1);
    assert_eq!(h.store.counters().writes(), 1);
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("12")));
}

#[tokio::test]
async fn day_rollover_starts_a_new_row() {
    let h = Harness::new();
    let buffer = Arc::new(TickBuffer::new());
    let resolver = Arc::new(SymbolResolver::new(h.directory.clone()));
    let flush = FlushScheduler::new(
        buffer.clone(),
        h.recorder.clone(),
        resolver,
        Duration::from_secs(2),
    );

    buffer.record(PriceObservation::new("1".into(), None, dec("10"), h.clock.now()));
    flush.flush_once().await;
    assert!(h.recorder.is_cached(&"AAA".into(), day(2)));

    h.clock.advance_days(1);
    buffer.record(PriceObservation::new("1".into(), None, dec("11"), h.clock.now()));
    flush.flush_once().await;

    assert!(!h.recorder.is_cached(&"AAA".into(), day(2)));
    assert_eq!(h.store.price("AAA", day(2)), Some(dec("10")));
    assert_eq!(h.store.price("AAA", day(3)), Some(dec("11")));
    assert_eq!(h.store.len(), 2);
}
