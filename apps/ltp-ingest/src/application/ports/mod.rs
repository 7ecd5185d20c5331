//! Application Ports (Driver and Driven)
//!
//! - **Driver Ports**: [`Transport`], the capability the engine drives
//! - **Driven Ports**: broker quotes and stream, auth, directory, price store, clock

mod auth_port;
mod clock_port;
mod directory_port;
mod price_store_port;
mod quote_port;
mod stream_port;
mod transport_port;

pub use auth_port::{AuthError, AuthProvider, SessionCredentials};
pub use clock_port::{Clock, SystemClock};
pub use directory_port::{DirectoryError, InstrumentDirectory};
pub use price_store_port::{PriceStore, StoreError};
pub use quote_port::{BrokerError, LtpQuote, QuoteClient};
pub use stream_port::{MarketStream, StreamConnector, StreamEvent};
pub use transport_port::{Transport, TransportError};

#[cfg(test)]
pub use auth_port::MockAuthProvider;
#[cfg(test)]
pub use clock_port::MockClock;
#[cfg(test)]
pub use directory_port::MockInstrumentDirectory;
#[cfg(test)]
pub use price_store_port::MockPriceStore;
#[cfg(test)]
pub use quote_port::MockQuoteClient;
#[cfg(test)]
pub use stream_port::{MockMarketStream, MockStreamConnector};
#[cfg(test)]
pub use transport_port::MockTransport;
