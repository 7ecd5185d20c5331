//! Health, Status and Control Endpoint
//!
//! HTTP surface for orchestrators, monitoring and operators.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the ingestion engine
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (200 only while the transport runs)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /resubscribe` - resubscribe everything tracked in the store
//! - `POST /restart` - disconnect, restart the transport and resubscribe

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::IngestionEngine;
use crate::domain::streaming::{ConnectionState, TransportKind, TransportStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Transport details.
    pub transport: TransportInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and ingesting.
    Healthy,
    /// Running but connecting or recovering.
    Degraded,
    /// Not running.
    Unhealthy,
}

/// Transport details in the health response.
#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    /// Transport kind.
    pub kind: TransportKind,
    /// Whether the transport is running.
    pub running: bool,
    /// Tracked instrument count.
    pub subscribed_count: usize,
    /// Connection state.
    pub state: ConnectionState,
}

/// Response to control requests.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Transport details after the operation.
    pub transport: TransportInfo,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    engine: Arc<IngestionEngine>,
}

impl HealthServerState {
    /// Create server state for `engine`.
    #[must_use]
    pub fn new(version: String, engine: Arc<IngestionEngine>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            engine,
        }
    }

    fn transport_info(&self) -> TransportInfo {
        let TransportStatus {
            running,
            subscribed_count,
            state,
        } = self.engine.status();
        TransportInfo {
            kind: self.engine.transport_kind(),
            running,
            subscribed_count,
            state,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the router with all endpoints.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/resubscribe", post(resubscribe_handler))
        .route("/restart", post(restart_handler))
        .with_state(state)
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the server stops with
    /// a fatal error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let transport = state.transport_info();
    let status = determine_health_status(&transport);
    let response = HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        transport,
    };
    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.engine.status().running {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn resubscribe_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let ok = state.engine.resync_from_store().await;
    control_response(&state, ok)
}

async fn restart_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let ok = state.engine.restart().await;
    control_response(&state, ok)
}

fn control_response(state: &HealthServerState, ok: bool) -> (StatusCode, Json<ControlResponse>) {
    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let transport = state.transport_info();
    (status_code, Json(ControlResponse { ok, transport }))
}

fn determine_health_status(transport: &TransportInfo) -> HealthStatus {
    match (transport.running, transport.state) {
        (true, ConnectionState::Connected) => HealthStatus::Healthy,
        (true, _) => HealthStatus::Degraded,
        (false, _) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
