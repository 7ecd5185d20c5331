//! LTP Ingest Binary
//!
//! Starts the live price ingester.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ltp-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL`: Postgres connection string
//! - `ANGEL_API_KEY`: SmartAPI private key
//! - `ANGEL_CLIENT_CODE`: client code (streaming transport only)
//!
//! ## Optional
//! - `LTP_TRANSPORT`: polling | streaming (default: polling)
//! - `LTP_POLL_INTERVAL_MS`, `LTP_BATCH_SIZE`, `LTP_BATCH_DELAY_MS`: polling cadence
//! - `LTP_FLUSH_INTERVAL_MS`, `LTP_LIVENESS_WINDOW_SECS`, `LTP_RECONNECT_*`: streaming
//! - `LTP_RETENTION_DAYS`: history kept (default: 10, 0 disables pruning)
//! - `HEALTH_PORT`: health/status/metrics HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ltp-ingest)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use ltp_ingest::infrastructure::angel::{
    AngelQuoteClient, AngelQuoteConfig, AngelStreamConfig, AngelStreamConnector,
};
use ltp_ingest::infrastructure::health::{HealthServer, HealthServerState};
use ltp_ingest::infrastructure::persistence::PgStore;
use ltp_ingest::infrastructure::telemetry;
use ltp_ingest::{
    AuthProvider, EngineDependencies, IngestConfig, IngestionEngine, RetentionPruner, SystemClock,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting LTP ingester");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = IngestConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Database: prices, watchlist and broker session
    let store = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("connecting to Postgres")?,
    );
    store.ensure_schema().await.context("ensuring schema")?;

    let auth: Arc<dyn AuthProvider> = Arc::clone(&store) as Arc<dyn AuthProvider>;
    let quotes = AngelQuoteClient::new(
        AngelQuoteConfig::from_settings(&config.broker),
        Arc::clone(&auth),
    )?;
    let connector = AngelStreamConnector::new(AngelStreamConfig::from_settings(
        &config.broker,
        config.ingest.keepalive,
    ));
    let clock = Arc::new(SystemClock::from_offset_minutes(
        config.ingest.utc_offset_minutes,
    ));

    let deps = EngineDependencies {
        auth,
        quotes: Arc::new(quotes),
        connector: Arc::new(connector),
        directory: Arc::clone(&store) as _,
        store: Arc::clone(&store) as _,
        clock: Arc::clone(&clock) as _,
    };
    let engine = Arc::new(IngestionEngine::from_config(config.engine_config(), deps));

    // Initial subscription from the watchlist
    if engine.resync_from_store().await {
        tracing::info!("Initial subscription complete");
    } else {
        tracing::warn!("Initial subscription did not start ingestion, use POST /resubscribe");
    }

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn retention pruner
    let pruner = RetentionPruner::new(
        Arc::clone(&store) as _,
        clock,
        config.retention.days,
        config.retention.interval,
    );
    let retention_task = tokio::spawn(pruner.run(shutdown_token.clone()));

    tracing::info!("LTP ingester ready");

    await_shutdown(shutdown_token).await;

    // Stop ingestion; the final flush drains buffered ticks
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.disconnect())
        .await
        .is_err()
    {
        tracing::warn!("Transport did not stop within the shutdown timeout");
    }
    let _ = retention_task.await;
    store.close().await;

    tracing::info!("LTP ingester stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        transport = %config.ingest.transport,
        batch_size = config.ingest.batch_size,
        health_port = config.server.health_port,
        retention_days = config.retention.days,
        "Configuration loaded"
    );
    tracing::debug!(
        api_root = %config.broker.api_root,
        stream_url = %config.broker.stream_url,
        utc_offset_minutes = config.ingest.utc_offset_minutes,
        "Broker endpoints"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
