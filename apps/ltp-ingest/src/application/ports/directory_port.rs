//! Instrument Directory Port (Driven Port)
//!
//! Resolves identifiers to symbol and venue using the watchlist collaborator.

use async_trait::async_trait;

use crate::domain::instrument::{Identifier, TrackedInstrument};

/// Directory lookup error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// Backing store failed.
    #[error("Directory lookup failed: {0}")]
    Lookup(String),
}

/// Port for resolving instruments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    /// Resolve a single identifier. `Ok(None)` means unknown.
    async fn resolve(&self, identifier: &Identifier)
    -> Result<Option<TrackedInstrument>, DirectoryError>;

    /// Resolve many identifiers at once. Unknown identifiers are omitted.
    async fn resolve_many(
        &self,
        identifiers: &[Identifier],
    ) -> Result<Vec<TrackedInstrument>, DirectoryError>;

    /// Every tracked instrument with a known identifier.
    async fn tracked_instruments(&self) -> Result<Vec<TrackedInstrument>, DirectoryError>;
}
