//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Angel One SmartAPI adapters (REST quotes, SmartStream).
pub mod angel;

/// Configuration loaded from the environment.
pub mod config;

/// Health, status and control HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Scripted broker, auth and clock collaborators.
pub mod mock;

/// Postgres and in-memory stores.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
