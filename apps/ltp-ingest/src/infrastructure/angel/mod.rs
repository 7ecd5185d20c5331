//! Angel One Adapters
//!
//! Broker adapters for Angel One SmartAPI:
//!
//! - **Quote client**: REST LTP quotes for the polling transport (JSON)
//! - **Stream connector**: SmartStream WebSocket for the streaming transport (binary ticks)

pub mod codec;
pub mod http_client;
pub mod messages;
pub mod stream;

pub use codec::{CodecError, LtpPacket, decode_ltp, exchange_type_code, venue_for_exchange_type};
pub use http_client::{AngelQuoteClient, AngelQuoteConfig};
pub use stream::{AngelStream, AngelStreamConfig, AngelStreamConnector};
