//! SmartStream Binary Codec
//!
//! Decodes the little-endian binary tick packets pushed by SmartStream.
//!
//! # LTP Packet Layout
//!
//! | Bytes  | Field              | Type        |
//! |--------|--------------------|-------------|
//! | 0      | subscription mode  | u8          |
//! | 1      | exchange type      | u8          |
//! | 2..27  | token              | NUL-padded ASCII |
//! | 27..35 | sequence number    | i64         |
//! | 35..43 | exchange timestamp | i64 (epoch ms) |
//! | 43..51 | last traded price  | i64 (paise) |
//!
//! Quote and snap-quote packets extend the same prefix, so anything at least
//! [`LTP_PACKET_LEN`] bytes long decodes as an LTP tick.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::instrument::{Identifier, PriceObservation, Venue};

/// Length of an LTP-mode packet.
pub const LTP_PACKET_LEN: usize = 51;

const TOKEN_RANGE: std::ops::Range<usize> = 2..27;
const SEQUENCE_OFFSET: usize = 27;
const TIMESTAMP_OFFSET: usize = 35;
const LTP_OFFSET: usize = 43;

/// Exchange types and the venue names used in the watchlist.
const EXCHANGE_TYPES: [(u8, &str); 7] = [
    (1, "NSE"),
    (2, "NFO"),
    (3, "BSE"),
    (4, "BFO"),
    (5, "MCX"),
    (7, "NCX"),
    (13, "CDS"),
];

/// Currency derivatives are quoted with seven decimal places instead of paise.
const CDS_EXCHANGE_TYPE: u8 = 13;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Packet shorter than an LTP packet.
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    /// Token bytes are empty or not ASCII.
    #[error("invalid token field")]
    InvalidToken,
}

/// A decoded LTP tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtpPacket {
    /// Subscription mode the packet was sent for.
    pub mode: u8,
    /// Numeric exchange type.
    pub exchange_type: u8,
    /// Instrument token.
    pub token: String,
    /// Sequence number.
    pub sequence: i64,
    /// Exchange timestamp in epoch milliseconds.
    pub exchange_timestamp: i64,
    /// Raw price in the exchange's minor unit.
    pub raw_ltp: i64,
}

impl LtpPacket {
    /// Price in major currency units.
    #[must_use]
    pub fn price(&self) -> Decimal {
        let scale = if self.exchange_type == CDS_EXCHANGE_TYPE {
            7
        } else {
            2
        };
        Decimal::new(self.raw_ltp, scale).normalize()
    }

    /// Venue for the packet's exchange type, if known.
    #[must_use]
    pub fn venue(&self) -> Option<Venue> {
        venue_for_exchange_type(self.exchange_type)
    }

    /// Exchange timestamp, or `fallback` when it is not a valid instant.
    #[must_use]
    pub fn observed_at(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        if self.exchange_timestamp <= 0 {
            return fallback;
        }
        DateTime::from_timestamp_millis(self.exchange_timestamp).unwrap_or(fallback)
    }

    /// Convert into a price observation.
    #[must_use]
    pub fn into_observation(self, received_at: DateTime<Utc>) -> PriceObservation {
        let observed_at = self.observed_at(received_at);
        let venue = self.venue();
        let price = self.price();
        PriceObservation::new(Identifier::new(self.token), venue, price, observed_at)
    }
}

/// Decode a binary tick frame.
///
/// # Errors
///
/// Returns `CodecError` if the frame is shorter than an LTP packet or the
/// token field is unusable.
pub fn decode_ltp(frame: &[u8]) -> Result<LtpPacket, CodecError> {
    if frame.len() < LTP_PACKET_LEN {
        return Err(CodecError::TooShort(frame.len()));
    }

    let token_bytes = &frame[TOKEN_RANGE];
    let end = token_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(token_bytes.len());
    let token = std::str::from_utf8(&token_bytes[..end])
        .map_err(|_| CodecError::InvalidToken)?
        .trim();
    if token.is_empty() || !token.is_ascii() {
        return Err(CodecError::InvalidToken);
    }

    Ok(LtpPacket {
        mode: frame[0],
        exchange_type: frame[1],
        token: token.to_string(),
        sequence: read_i64(frame, SEQUENCE_OFFSET),
        exchange_timestamp: read_i64(frame, TIMESTAMP_OFFSET),
        raw_ltp: read_i64(frame, LTP_OFFSET),
    })
}

fn read_i64(frame: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

/// Numeric exchange type for a venue.
#[must_use]
pub fn exchange_type_code(venue: &Venue) -> Option<u8> {
    EXCHANGE_TYPES
        .iter()
        .find(|(_, name)| *name == venue.as_str())
        .map(|(code, _)| *code)
}

/// Venue for a numeric exchange type.
#[must_use]
pub fn venue_for_exchange_type(code: u8) -> Option<Venue> {
    EXCHANGE_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| Venue::new(name))
}
