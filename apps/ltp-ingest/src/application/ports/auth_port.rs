//! Auth Port (Driven Port)
//!
//! Supplies the session credentials issued by the external token-refresh job.
//! The engine never authenticates on its own.

use std::fmt;

use async_trait::async_trait;

/// Access and stream tokens for the broker session.
///
/// The `Debug` implementation redacts both tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Bearer token for REST and stream authorization.
    pub access_token: String,
    /// Feed token required by the streaming endpoint.
    pub feed_token: String,
}

impl SessionCredentials {
    /// Create credentials.
    #[must_use]
    pub fn new(access_token: impl Into<String>, feed_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            feed_token: feed_token.into(),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_token", &"[REDACTED]")
            .field("feed_token", &"[REDACTED]")
            .finish()
    }
}

/// Credential lookup error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No usable session exists yet.
    #[error("Session credentials unavailable: {0}")]
    Unavailable(String),

    /// The credential store could not be read.
    #[error("Credential store error: {0}")]
    Store(String),
}

/// Port for obtaining current session credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Return the latest credentials.
    async fn current_credentials(&self) -> Result<SessionCredentials, AuthError>;
}
