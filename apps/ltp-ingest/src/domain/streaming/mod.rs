//! Transport Lifecycle Types
//!
//! Connection state machine for the streaming transport and the status
//! snapshot every transport reports.
//!
//! ```text
//! Idle -> Connecting -> Connected -> (Reconnecting <-> Connected) -> Failed
//! ```
//!
//! `Failed` is terminal until an explicit restart; `disconnect` returns any
//! state to `Idle`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or disconnected on request.
    #[default]
    Idle,

    /// First connection attempt in progress.
    Connecting,

    /// Connected and receiving ticks.
    Connected,

    /// Connection lost; a reconnect is scheduled or in progress.
    Reconnecting,

    /// Reconnect attempts exhausted. Needs an explicit restart.
    Failed,
}

impl ConnectionState {
    /// Whether the transport counts as running for status purposes.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Whether a start request should be treated as a no-op.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_running()
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Stable lowercase name used in logs and the status endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transport Kind & Status
// =============================================================================

/// Which ingestion transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Timer-driven REST fetches.
    #[default]
    Polling,
    /// Persistent push connection.
    Streaming,
}

impl TransportKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a transport kind string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport kind: {0}")]
pub struct UnknownTransportKind(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" | "rest" => Ok(Self::Polling),
            "streaming" | "stream" | "websocket" | "ws" => Ok(Self::Streaming),
            other => Err(UnknownTransportKind(other.to_string())),
        }
    }
}

/// Point-in-time status of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportStatus {
    /// Whether the transport is running (or recovering).
    pub running: bool,
    /// Number of tracked instruments.
    pub subscribed_count: usize,
    /// Connection state. Polling reports `Connected` while its timer runs.
    pub state: ConnectionState,
}

impl TransportStatus {
    /// Status of a transport that has not been started.
    #[must_use]
    pub const fn not_started() -> Self {
        Self {
            running: false,
            subscribed_count: 0,
            state: ConnectionState::Idle,
        }
    }
}
