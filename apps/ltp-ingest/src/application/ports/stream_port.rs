//! Stream Port (Driven Port)
//!
//! Persistent push connection to the broker. Ticks are pulled explicitly with
//! [`MarketStream::next_event`] instead of being delivered through callbacks.

use async_trait::async_trait;

use super::auth_port::SessionCredentials;
use super::quote_port::BrokerError;
use crate::domain::grouping::VenueChunk;
use crate::domain::instrument::PriceObservation;

/// Event read from an open stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A normalized price tick.
    Tick(PriceObservation),
    /// The connection reported an error and should be treated as dead.
    Error(BrokerError),
}

/// An open market data connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketStream: Send {
    /// Subscribe to last-traded-price updates for the given chunks.
    ///
    /// Re-subscribing identifiers that are already subscribed is harmless.
    async fn subscribe(&mut self, chunks: &[VenueChunk]) -> Result<(), BrokerError>;

    /// Wait for the next event. `None` means the connection closed.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Port for opening market data connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a new connection using the given credentials.
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn MarketStream>, BrokerError>;
}
