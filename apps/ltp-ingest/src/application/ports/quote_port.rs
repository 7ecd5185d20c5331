//! Quote Port (Driven Port)
//!
//! Synchronous "current price for N identifiers" capability of the broker.
//! Adapters normalize whatever the broker returns into [`LtpQuote`].

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::grouping::VenueChunk;
use crate::domain::instrument::Identifier;

/// Latest traded price returned for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpQuote {
    /// Identifier the price belongs to.
    pub identifier: Identifier,
    /// Latest traded price.
    pub price: Decimal,
}

impl LtpQuote {
    /// Create a quote.
    #[must_use]
    pub const fn new(identifier: Identifier, price: Decimal) -> Self {
        Self { identifier, price }
    }
}

/// Broker call error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Upstream rate limit hit.
    #[error("Rate limited by broker")]
    RateLimited,

    /// Credentials rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transport-level failure (DNS, TCP, TLS, timeout, closed socket).
    #[error("Network error: {0}")]
    Network(String),

    /// Response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Broker returned an application-level error.
    #[error("Broker API error {code}: {message}")]
    Api {
        /// Broker error code or HTTP status.
        code: String,
        /// Error message.
        message: String,
    },
}

impl BrokerError {
    /// Short label used as a metric dimension.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unauthorized(_) => "unauthorized",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::Api { .. } => "api",
        }
    }

    /// Whether the failure is an authentication problem.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Port for fetching latest traded prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteClient: Send + Sync {
    /// Fetch prices for one venue chunk.
    ///
    /// Identifiers the broker has no price for are simply absent from the result.
    async fn fetch_prices(&self, chunk: &VenueChunk) -> Result<Vec<LtpQuote>, BrokerError>;
}
