#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! LTP Ingest - Live Latest-Traded-Price Ingestion
//!
//! Keeps the latest traded price of every tracked instrument fresh in a
//! per-(symbol, day) price series, using either the broker's batch quote API
//! (polling) or its push tick stream (streaming).
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `instrument`: identifiers, venues, symbols, observations, price points
//!   - `grouping`: venue partitioning and batch chunking
//!   - `buffer`: last-write-wins tick buffer
//!   - `streaming`: connection state machine and transport status
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: broker, auth, directory, store, clock and transport traits
//!   - `services`: polling and streaming transports, flush scheduler,
//!     price recorder, ingestion engine, retention
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `angel`: SmartAPI quote client and SmartStream connector
//!   - `persistence`: Postgres store and in-memory fakes
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//! polling:   watchlist ─► venue chunks ─► quote API ─► recorder ─► ltp_history
//! streaming: SmartStream ─► tick channel ─► tick buffer ─► flush ─► recorder ─► ltp_history
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ingestion types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::buffer::TickBuffer;
pub use domain::grouping::{DEFAULT_MAX_BATCH, VenueChunk, VenueGrouping, group_by_venue};
pub use domain::instrument::{
    Identifier, PriceObservation, PricePoint, Symbol, TrackedInstrument, Venue,
};
pub use domain::streaming::{ConnectionState, TransportKind, TransportStatus};

// Ports
pub use application::ports::{
    AuthError, AuthProvider, BrokerError, Clock, DirectoryError, InstrumentDirectory, LtpQuote,
    MarketStream, PriceStore, QuoteClient, SessionCredentials, StoreError, StreamConnector,
    StreamEvent, SystemClock, Transport, TransportError,
};

// Services
pub use application::services::{
    BackoffConfig, EngineConfig, EngineDependencies, FlushScheduler, IngestionEngine,
    LivenessConfig, PollingConfig, PollingTransport, PriceRecorder, RetentionPruner,
    StreamingConfig, StreamingTransport,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
