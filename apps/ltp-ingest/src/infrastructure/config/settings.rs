//! Ingestion Configuration Settings
//!
//! Configuration for the ingester, loaded from environment variables.
//! Numeric values that fail to parse fall back to their defaults; missing
//! required values are reported as [`ConfigError`].

use std::time::Duration;

use crate::application::services::{
    BackoffConfig, EngineConfig, LivenessConfig, PollingConfig, StreamingConfig,
};
use crate::domain::grouping::DEFAULT_MAX_BATCH;
use crate::domain::streaming::TransportKind;

/// Default SmartAPI REST root.
pub const DEFAULT_API_ROOT: &str = "https://apiconnect.angelone.in";

/// Default SmartStream endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://smartapisocket.angelone.in/smart-stream";

// =============================================================================
// Sections
// =============================================================================

/// Database connection settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

impl DatabaseSettings {
    /// Create database settings.
    #[must_use]
    pub const fn new(url: String, max_connections: u32) -> Self {
        Self {
            url,
            max_connections,
        }
    }

    /// Connection string.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Broker API settings.
#[derive(Clone)]
pub struct BrokerSettings {
    api_key: String,
    /// Client code sent with stream connections.
    pub client_code: String,
    /// REST API root URL.
    pub api_root: String,
    /// Stream WebSocket URL.
    pub stream_url: String,
    /// REST request timeout.
    pub http_timeout: Duration,
    /// REST attempts for retryable failures.
    pub http_max_attempts: u32,
}

impl BrokerSettings {
    /// Create broker settings with default endpoints.
    #[must_use]
    pub fn new(api_key: String, client_code: String) -> Self {
        Self {
            api_key,
            client_code,
            api_root: DEFAULT_API_ROOT.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            http_timeout: Duration::from_secs(10),
            http_max_attempts: 3,
        }
    }

    /// Broker private API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("api_key", &"[REDACTED]")
            .field("client_code", &self.client_code)
            .field("api_root", &self.api_root)
            .field("stream_url", &self.stream_url)
            .field("http_timeout", &self.http_timeout)
            .field("http_max_attempts", &self.http_max_attempts)
            .finish()
    }
}

/// Ingestion timing and batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Active transport.
    pub transport: TransportKind,
    /// Polling cycle interval.
    pub poll_interval: Duration,
    /// Upstream batch limit.
    pub batch_size: usize,
    /// Pause between fetch calls within a cycle.
    pub batch_delay: Duration,
    /// Streaming flush interval.
    pub flush_interval: Duration,
    /// Tick channel capacity.
    pub tick_channel_capacity: usize,
    /// Liveness window.
    pub liveness_window: Duration,
    /// Liveness check period.
    pub liveness_check: Duration,
    /// Stream keepalive ping period.
    pub keepalive: Duration,
    /// Backoff base delay.
    pub reconnect_base: Duration,
    /// Backoff cap per attempt.
    pub reconnect_max_delay: Duration,
    /// Reconnect attempts before failing.
    pub reconnect_max_attempts: u32,
    /// Wait bound for an in-flight transport start.
    pub init_wait: Duration,
    /// Minutes east of UTC that define the calendar day.
    pub utc_offset_minutes: i32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Polling,
            poll_interval: Duration::from_millis(7000),
            batch_size: DEFAULT_MAX_BATCH,
            batch_delay: Duration::from_millis(1000),
            flush_interval: Duration::from_millis(2000),
            tick_channel_capacity: 4096,
            liveness_window: Duration::from_secs(60),
            liveness_check: Duration::from_secs(10),
            keepalive: Duration::from_secs(30),
            reconnect_base: Duration::from_millis(2000),
            reconnect_max_delay: Duration::from_secs(1800),
            reconnect_max_attempts: 10,
            init_wait: Duration::from_millis(5000),
            utc_offset_minutes: 330,
        }
    }
}

/// Retention housekeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Days of history to keep (0 disables pruning).
    pub days: u32,
    /// Pruning period.
    pub interval: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days: 10,
            interval: Duration::from_secs(3600),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health, status and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

// =============================================================================
// Complete Configuration
// =============================================================================

/// Complete ingester configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Database settings.
    pub database: DatabaseSettings,
    /// Broker settings.
    pub broker: BrokerSettings,
    /// Ingestion settings.
    pub ingest: IngestSettings,
    /// Retention settings.
    pub retention: RetentionSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required values are missing or empty, or if the
    /// transport name is not recognised.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let transport = match env.get("LTP_TRANSPORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LTP_TRANSPORT".to_string(), raw))?,
            None => TransportKind::default(),
        };

        let database = DatabaseSettings::new(
            env.required("DATABASE_URL")?,
            env.parse_or("DATABASE_MAX_CONNECTIONS", 5),
        );

        let client_code = match transport {
            TransportKind::Streaming => env.required("ANGEL_CLIENT_CODE")?,
            TransportKind::Polling => env.get("ANGEL_CLIENT_CODE").unwrap_or_default(),
        };
        let mut broker = BrokerSettings::new(env.required("ANGEL_API_KEY")?, client_code);
        if let Some(root) = env.get("ANGEL_API_ROOT") {
            broker.api_root = root.trim_end_matches('/').to_string();
        }
        if let Some(url) = env.get("ANGEL_STREAM_URL") {
            broker.stream_url = url;
        }
        broker.http_timeout = env.secs_or("ANGEL_HTTP_TIMEOUT_SECS", broker.http_timeout);
        broker.http_max_attempts = env.parse_or("ANGEL_HTTP_MAX_ATTEMPTS", broker.http_max_attempts);

        let defaults = IngestSettings::default();
        let ingest = IngestSettings {
            transport,
            poll_interval: env.millis_or("LTP_POLL_INTERVAL_MS", defaults.poll_interval),
            batch_size: env.parse_or("LTP_BATCH_SIZE", defaults.batch_size),
            batch_delay: env.millis_or("LTP_BATCH_DELAY_MS", defaults.batch_delay),
            flush_interval: env.millis_or("LTP_FLUSH_INTERVAL_MS", defaults.flush_interval),
            tick_channel_capacity: env
                .parse_or("LTP_TICK_CHANNEL_CAPACITY", defaults.tick_channel_capacity),
            liveness_window: env.secs_or("LTP_LIVENESS_WINDOW_SECS", defaults.liveness_window),
            liveness_check: env.secs_or("LTP_LIVENESS_CHECK_SECS", defaults.liveness_check),
            keepalive: env.secs_or("LTP_KEEPALIVE_SECS", defaults.keepalive),
            reconnect_base: env.millis_or("LTP_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_max_delay: env
                .secs_or("LTP_RECONNECT_MAX_DELAY_SECS", defaults.reconnect_max_delay),
            reconnect_max_attempts: env
                .parse_or("LTP_RECONNECT_MAX_ATTEMPTS", defaults.reconnect_max_attempts),
            init_wait: env.millis_or("LTP_INIT_WAIT_MS", defaults.init_wait),
            utc_offset_minutes: env.parse_or("LTP_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes),
        };

        let retention_defaults = RetentionSettings::default();
        let retention = RetentionSettings {
            days: env.parse_or("LTP_RETENTION_DAYS", retention_defaults.days),
            interval: env.secs_or("LTP_RETENTION_INTERVAL_SECS", retention_defaults.interval),
        };

        let server = ServerSettings {
            health_port: env.parse_or("HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            database,
            broker,
            ingest,
            retention,
            server,
        })
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let ingest = &self.ingest;
        EngineConfig {
            transport: ingest.transport,
            polling: PollingConfig {
                interval: ingest.poll_interval,
                max_batch: ingest.batch_size,
                batch_delay: ingest.batch_delay,
            },
            streaming: StreamingConfig {
                max_batch: ingest.batch_size,
                flush_interval: ingest.flush_interval,
                tick_channel_capacity: ingest.tick_channel_capacity,
                liveness: LivenessConfig {
                    window: ingest.liveness_window,
                    check_interval: ingest.liveness_check,
                },
                backoff: BackoffConfig {
                    base_delay: ingest.reconnect_base,
                    max_delay: ingest.reconnect_max_delay,
                    jitter_factor: 0.0,
                    max_attempts: ingest.reconnect_max_attempts,
                },
            },
            init_wait: ingest.init_wait,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {0} has invalid value {1:?}")]
    InvalidValue(String, String),
}

// =============================================================================
// Lookup Helpers
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value.to_string())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
