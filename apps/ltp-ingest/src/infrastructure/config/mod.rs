//! Configuration Module
//!
//! Environment-driven configuration for the ingester.

mod settings;

pub use settings::{
    BrokerSettings, ConfigError, DEFAULT_API_ROOT, DEFAULT_STREAM_URL, DatabaseSettings,
    IngestConfig, IngestSettings, RetentionSettings, ServerSettings,
};
