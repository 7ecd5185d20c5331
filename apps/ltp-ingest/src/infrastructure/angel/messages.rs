//! Angel One Wire Messages
//!
//! Serde types for the SmartAPI quote endpoint and the SmartStream
//! subscription protocol. Broker payloads are loose about field names and
//! number encodings, so everything is normalised here once and the rest of
//! the crate only ever sees [`LtpQuote`].

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::LtpQuote;
use crate::domain::grouping::VenueChunk;
use crate::domain::instrument::Identifier;

// =============================================================================
// Quote API
// =============================================================================

/// Body of `POST /rest/secure/angelbroking/market/v1/quote`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// Quote mode. Always `LTP`.
    pub mode: &'static str,
    /// Venue to identifiers.
    pub exchange_tokens: BTreeMap<String, Vec<String>>,
}

impl QuoteRequest {
    /// Build an LTP request for one venue chunk.
    #[must_use]
    pub fn ltp(chunk: &VenueChunk) -> Self {
        let tokens = chunk
            .identifiers
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        let mut exchange_tokens = BTreeMap::new();
        exchange_tokens.insert(chunk.venue.as_str().to_string(), tokens);
        Self {
            mode: "LTP",
            exchange_tokens,
        }
    }
}

/// Standard SmartAPI response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteEnvelope {
    /// Whether the call succeeded.
    #[serde(default)]
    pub status: bool,
    /// Human readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Broker error code, e.g. `AG8001`.
    #[serde(default)]
    pub errorcode: Option<String>,
    /// Payload.
    #[serde(default)]
    pub data: Option<QuoteData>,
}

/// Quote payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteData {
    /// Instruments a price was returned for.
    #[serde(default)]
    pub fetched: Vec<FetchedQuote>,
    /// Instruments the broker could not price.
    #[serde(default)]
    pub unfetched: Vec<serde_json::Value>,
}

/// One entry of `data.fetched`.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedQuote {
    /// Token, under either of the names the broker uses.
    #[serde(default, rename = "symbolToken", alias = "instrumentToken")]
    pub token: Option<Scalar>,
    /// Price, under either of the names the broker uses.
    #[serde(default, rename = "ltp", alias = "lastPrice")]
    pub price: Option<Scalar>,
    /// Venue echoed back by the broker.
    #[serde(default)]
    pub exchange: Option<String>,
}

impl FetchedQuote {
    /// Normalise into a quote. Entries missing a token or a price are dropped.
    #[must_use]
    pub fn into_quote(self) -> Option<LtpQuote> {
        let identifier = Identifier::new(self.token?.as_text());
        if identifier.is_empty() {
            return None;
        }
        let price = self.price?.as_decimal()?;
        Some(LtpQuote::new(identifier, price))
    }
}

impl QuoteEnvelope {
    /// All usable quotes in the response.
    #[must_use]
    pub fn into_quotes(self) -> Vec<LtpQuote> {
        self.data
            .map(|data| {
                data.fetched
                    .into_iter()
                    .filter_map(FetchedQuote::into_quote)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A JSON value the broker sends as either a string or a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// String encoding.
    Text(String),
    /// Numeric encoding.
    Number(serde_json::Number),
}

impl Scalar {
    /// Text form.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }

    /// Decimal form, if the value is numeric.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        let text = self.as_text();
        let trimmed = text.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()
    }
}

// =============================================================================
// SmartStream
// =============================================================================

/// SmartStream subscribe action.
pub const ACTION_SUBSCRIBE: u8 = 1;

/// SmartStream LTP mode.
pub const MODE_LTP: u8 = 1;

/// Subscription request sent as a text frame.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Correlation id echoed in error replies.
    #[serde(rename = "correlationID")]
    pub correlation_id: String,
    /// Action code.
    pub action: u8,
    /// Request parameters.
    pub params: SubscribeParams,
}

/// Subscription parameters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    /// Feed mode.
    pub mode: u8,
    /// One entry per exchange type.
    pub token_list: Vec<TokenList>,
}

/// Tokens on one exchange type.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenList {
    /// Numeric exchange type.
    pub exchange_type: u8,
    /// Tokens.
    pub tokens: Vec<String>,
}

/// Error reply sent as a text frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorReply {
    /// Correlation id of the failed request.
    #[serde(default, rename = "correlationID")]
    pub correlation_id: Option<String>,
    /// Error code.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Error message.
    #[serde(default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::Venue;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn request_groups_single_venue() {
        let chunk = VenueChunk {
            venue: Venue::new("NSE"),
            identifiers: vec![Identifier::new("3045"), Identifier::new("881")],
        };
        let json = serde_json::to_value(QuoteRequest::ltp(&chunk)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"mode": "LTP", "exchangeTokens": {"NSE": ["3045", "881"]}})
        );
    }

    #[test]
    fn normalises_both_field_spellings() {
        let body = r#"{
            "status": true,
            "message": "SUCCESS",
            "errorcode": "",
            "data": {
                "fetched": [
                    {"exchange": "NSE", "symbolToken": "3045", "ltp": 571.75},
                    {"exchange": "NSE", "instrumentToken": 881, "lastPrice": "100.5"},
                    {"exchange": "NSE", "symbolToken": "99"}
                ],
                "unfetched": [{"symbolToken": "12"}]
            }
        }"#;
        let envelope: QuoteEnvelope = serde_json::from_str(body).unwrap();
        let quotes = envelope.into_quotes();
        assert_eq!(
            quotes,
            vec![
                LtpQuote::new(Identifier::new("3045"), dec("571.75")),
                LtpQuote::new(Identifier::new("881"), dec("100.5")),
            ]
        );
    }

    #[test]
    fn missing_data_yields_no_quotes() {
        let envelope: QuoteEnvelope =
            serde_json::from_str(r#"{"status": false, "message": "Invalid Token", "errorcode": "AG8001", "data": null}"#)
                .unwrap();
        assert!(!envelope.status);
        assert_eq!(envelope.errorcode.as_deref(), Some("AG8001"));
        assert!(envelope.into_quotes().is_empty());
    }

    #[test]
    fn subscribe_request_shape() {
        let request = SubscribeRequest {
            correlation_id: "abc".to_string(),
            action: ACTION_SUBSCRIBE,
            params: SubscribeParams {
                mode: MODE_LTP,
                token_list: vec![TokenList {
                    exchange_type: 1,
                    tokens: vec!["3045".to_string()],
                }],
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "correlationID": "abc",
                "action": 1,
                "params": {"mode": 1, "tokenList": [{"exchangeType": 1, "tokens": ["3045"]}]}
            })
        );
    }
}
