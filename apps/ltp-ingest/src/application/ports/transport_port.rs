//! Transport Port (Driver Port)
//!
//! Common capability of the polling and streaming transports. The
//! [`IngestionEngine`](crate::application::services::IngestionEngine) holds
//! exactly one implementation, chosen at construction.

use async_trait::async_trait;

use super::auth_port::AuthError;
use crate::domain::instrument::Identifier;
use crate::domain::streaming::{TransportKind, TransportStatus};

/// Failure to start or keep a transport running.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Network failure; recovery is automatic.
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Credentials missing or rejected; needs an external token refresh.
    #[error("Authentication failure: {0}")]
    Auth(#[from] AuthError),

    /// Reconnect attempts exhausted; needs an explicit restart.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ExhaustedReconnect {
        /// Attempts made.
        attempts: u32,
    },
}

/// An ingestion transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// Start ingesting. Calling while already running is a no-op success.
    async fn start(&self) -> Result<(), TransportError>;

    /// Add identifiers to the tracked set.
    ///
    /// Returns `false` if none of them could be resolved.
    async fn subscribe_identifiers(&self, identifiers: &[Identifier]) -> bool;

    /// Stop all timers and connections. Safe in any state.
    async fn disconnect(&self);

    /// Current status.
    fn status(&self) -> TransportStatus;
}
