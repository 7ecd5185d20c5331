//! Instrument and Price Types
//!
//! Canonical shapes for what is tracked and what is observed:
//!
//! - [`TrackedInstrument`]: an identifier the engine keeps fresh, with its venue and symbol
//! - [`PriceObservation`]: one price seen by a transport, consumed once
//! - [`PricePoint`]: the persisted per-(symbol, day) row
//!
//! Broker adapters convert their wire formats into these types at the boundary,
//! so nothing past the adapter ever inspects raw broker payloads.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque instrument token assigned by the broker or venue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier, trimming surrounding whitespace.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    /// Borrow the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty after trimming.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Exchange segment an identifier is listed on (e.g. `NSE`, `BSE`, `NFO`).
///
/// Stored upper-cased so `nse` and `NSE` group together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Venue(String);

impl Venue {
    /// Create a venue, normalising case and whitespace.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_uppercase())
    }

    /// Parse an optional raw venue, treating blank strings as absent.
    #[must_use]
    pub fn parse_optional(value: Option<&str>) -> Option<Self> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    /// Borrow the venue code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Venue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Human-readable trading symbol (e.g. `TCS-EQ`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Tracked Instrument
// =============================================================================

/// An instrument whose latest traded price is being kept fresh.
///
/// Never mutated once created; removal from the watchlist triggers a full
/// resync rather than an in-place edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedInstrument {
    /// Broker token.
    pub identifier: Identifier,
    /// Exchange segment. `None` means the instrument cannot be fetched.
    pub venue: Option<Venue>,
    /// Trading symbol used as the persistence key.
    pub symbol: Symbol,
}

impl TrackedInstrument {
    /// Create a tracked instrument.
    #[must_use]
    pub fn new(identifier: Identifier, venue: Option<Venue>, symbol: Symbol) -> Self {
        Self {
            identifier,
            venue,
            symbol,
        }
    }

    /// Whether the instrument has a venue and can be included in fetch requests.
    #[must_use]
    pub const fn is_fetchable(&self) -> bool {
        self.venue.is_some()
    }
}

// =============================================================================
// Observations
// =============================================================================

/// One observed latest-traded price, produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Broker token the price belongs to.
    pub identifier: Identifier,
    /// Venue reported with the price, if any.
    pub venue: Option<Venue>,
    /// Symbol, when the transport already knows it.
    pub symbol: Option<Symbol>,
    /// Observed price.
    pub price: Decimal,
    /// When the transport observed the price.
    pub observed_at: DateTime<Utc>,
}

impl PriceObservation {
    /// Create an observation with no symbol attached.
    #[must_use]
    pub const fn new(
        identifier: Identifier,
        venue: Option<Venue>,
        price: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            venue,
            symbol: None,
            price,
            observed_at,
        }
    }

    /// Attach a known symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

// =============================================================================
// Persisted Price Point
// =============================================================================

/// The persisted latest price of a symbol for one calendar day.
///
/// Exactly one row exists per `(symbol, date)`; later observations on the
/// same day overwrite `price` and `last_written_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Trading symbol.
    pub symbol: Symbol,
    /// Venue recorded with the first write of the day.
    pub venue: Option<Venue>,
    /// Calendar day.
    pub date: NaiveDate,
    /// Latest observed price.
    pub price: Decimal,
    /// Wall-clock time of the most recent write.
    pub last_written_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_is_normalised() {
        assert_eq!(Venue::new(" nse "), Venue::new("NSE"));
        assert_eq!(Venue::new("bse").as_str(), "BSE");
    }

    #[test]
    fn blank_venue_is_absent() {
        assert_eq!(Venue::parse_optional(Some("   ")), None);
        assert_eq!(Venue::parse_optional(None), None);
        assert_eq!(Venue::parse_optional(Some("nfo")), Some(Venue::new("NFO")));
    }

    #[test]
    fn identifier_trims_whitespace() {
        let id = Identifier::new(" 2885 ");
        assert_eq!(id.as_str(), "2885");
        assert!(Identifier::new("  ").is_empty());
    }

    #[test]
    fn instrument_without_venue_is_unfetchable() {
        let instrument = TrackedInstrument::new("11536".into(), None, "TCS-EQ".into());
        assert!(!instrument.is_fetchable());
    }

    #[test]
    fn observation_with_symbol() {
        let obs = PriceObservation::new(
            "2885".into(),
            Some("NSE".into()),
            Decimal::new(28_505, 1),
            Utc::now(),
        )
        .with_symbol("RELIANCE-EQ".into());
        assert_eq!(obs.symbol, Some(Symbol::new("RELIANCE-EQ")));
    }

    #[test]
    fn identifier_serializes_transparently() {
        let json = serde_json::to_string(&Identifier::new("3045")).unwrap();
        assert_eq!(json, "\"3045\"");
    }
}
