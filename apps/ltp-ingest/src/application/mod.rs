//! Application Layer - Use cases and port definitions.
//!
//! Services here depend only on the port traits; concrete broker, store and
//! clock adapters are injected from the infrastructure layer.

/// Port interfaces for external systems.
pub mod ports;

/// Transports, flush scheduling, persistence logic and the ingestion engine.
pub mod services;
