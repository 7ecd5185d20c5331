//! SmartStream Connector
//!
//! [`StreamConnector`] over the SmartStream v2 WebSocket. Each connection is
//! authorized with headers, subscribes with JSON text frames and receives
//! binary LTP packets. A text `ping` keeps idle connections open.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::{decode_ltp, exchange_type_code};
use super::messages::{
    ACTION_SUBSCRIBE, MODE_LTP, StreamErrorReply, SubscribeParams, SubscribeRequest, TokenList,
};
use crate::application::ports::{
    BrokerError, MarketStream, SessionCredentials, StreamConnector, StreamEvent,
};
use crate::domain::grouping::VenueChunk;
use crate::infrastructure::config::{BrokerSettings, DEFAULT_STREAM_URL};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream connector configuration.
#[derive(Clone)]
pub struct AngelStreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Private API key.
    pub api_key: String,
    /// Client code.
    pub client_code: String,
    /// Keepalive ping period.
    pub keepalive: Duration,
}

impl AngelStreamConfig {
    /// Configuration with the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>, client_code: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            api_key: api_key.into(),
            client_code: client_code.into(),
            keepalive: Duration::from_secs(30),
        }
    }

    /// Configuration derived from broker settings.
    #[must_use]
    pub fn from_settings(settings: &BrokerSettings, keepalive: Duration) -> Self {
        Self {
            url: settings.stream_url.clone(),
            api_key: settings.api_key().to_string(),
            client_code: settings.client_code.clone(),
            keepalive,
        }
    }
}

impl std::fmt::Debug for AngelStreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AngelStreamConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("client_code", &self.client_code)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

/// Opens SmartStream connections.
#[derive(Debug, Clone)]
pub struct AngelStreamConnector {
    config: AngelStreamConfig,
}

impl AngelStreamConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: AngelStreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamConnector for AngelStreamConnector {
    async fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn MarketStream>, BrokerError> {
        let request = build_request(&self.config, credentials)?;
        tracing::info!(url = %self.config.url, "Connecting to SmartStream");

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(classify_connect_error)?;

        tracing::info!("SmartStream connected");
        Ok(Box::new(AngelStream::new(socket, self.config.keepalive)))
    }
}

/// One open SmartStream connection.
pub struct AngelStream {
    socket: Socket,
    keepalive: Interval,
}

impl AngelStream {
    fn new(socket: Socket, keepalive: Duration) -> Self {
        let period = keepalive.max(Duration::from_secs(1));
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { socket, keepalive }
    }

    async fn send_text(&mut self, text: String) -> Result<(), BrokerError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))
    }
}

#[async_trait]
impl MarketStream for AngelStream {
    async fn subscribe(&mut self, chunks: &[VenueChunk]) -> Result<(), BrokerError> {
        for request in subscribe_requests(chunks) {
            let json =
                serde_json::to_string(&request).map_err(|e| BrokerError::Decode(e.to_string()))?;
            self.send_text(json).await?;
            tracing::debug!(
                correlation_id = %request.correlation_id,
                tokens = request.params.token_list.iter().map(|l| l.tokens.len()).sum::<usize>(),
                "Sent subscribe request"
            );
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            tokio::select! {
                _ = self.keepalive.tick() => {
                    if let Err(e) = self.send_text("ping".to_string()).await {
                        return Some(StreamEvent::Error(e));
                    }
                }
                frame = self.socket.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => match decode_ltp(&data) {
                            Ok(packet) => {
                                return Some(StreamEvent::Tick(packet.into_observation(Utc::now())));
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, len = data.len(), "Skipping undecodable frame");
                            }
                        },
                        Some(Ok(Message::Text(text))) => handle_text(&text),
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "SmartStream sent close frame");
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Some(StreamEvent::Error(BrokerError::Network(e.to_string())));
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!(error = %e, "Error closing SmartStream socket");
        }
    }
}

fn handle_text(text: &str) {
    if text.trim() == "pong" {
        return;
    }
    match serde_json::from_str::<StreamErrorReply>(text) {
        Ok(reply) if reply.error_code.is_some() => {
            tracing::warn!(
                correlation_id = reply.correlation_id.as_deref().unwrap_or_default(),
                code = reply.error_code.as_deref().unwrap_or_default(),
                message = reply.error_message.as_deref().unwrap_or_default(),
                "SmartStream rejected request"
            );
        }
        _ => tracing::debug!(%text, "Ignoring text frame"),
    }
}

/// Build the authorized handshake request.
fn build_request(
    config: &AngelStreamConfig,
    credentials: &SessionCredentials,
) -> Result<Request, BrokerError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| BrokerError::Network(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in [
        ("authorization", credentials.access_token.as_str()),
        ("x-api-key", config.api_key.as_str()),
        ("x-client-code", config.client_code.as_str()),
        ("x-feed-token", credentials.feed_token.as_str()),
    ] {
        let value = HeaderValue::from_str(value)
            .map_err(|_| BrokerError::Unauthorized(format!("invalid {name} header value")))?;
        headers.insert(name, value);
    }
    Ok(request)
}

/// One subscribe request per chunk. Chunks on unknown venues are skipped.
fn subscribe_requests(chunks: &[VenueChunk]) -> Vec<SubscribeRequest> {
    chunks
        .iter()
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            let Some(exchange_type) = exchange_type_code(&chunk.venue) else {
                tracing::warn!(venue = %chunk.venue, "No stream exchange type for venue, skipping");
                return None;
            };
            Some(SubscribeRequest {
                correlation_id: uuid::Uuid::new_v4().simple().to_string()[..10].to_string(),
                action: ACTION_SUBSCRIBE,
                params: SubscribeParams {
                    mode: MODE_LTP,
                    token_list: vec![TokenList {
                        exchange_type,
                        tokens: chunk
                            .identifiers
                            .iter()
                            .map(|id| id.as_str().to_string())
                            .collect(),
                    }],
                },
            })
        })
        .collect()
}

fn classify_connect_error(error: tungstenite::Error) -> BrokerError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            BrokerError::Unauthorized(format!("handshake rejected: {}", response.status()))
        }
        tungstenite::Error::Http(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
            BrokerError::RateLimited
        }
        other => BrokerError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::{Identifier, Venue};

    fn chunk(venue: &str, ids: &[&str]) -> VenueChunk {
        VenueChunk {
            venue: Venue::new(venue),
            identifiers: ids.iter().map(|id| Identifier::new(*id)).collect(),
        }
    }

    #[test]
    fn handshake_carries_session_headers() {
        let config = AngelStreamConfig::new("api-key", "C123");
        let creds = SessionCredentials::new("jwt-token", "feed-token");
        let request = build_request(&config, &creds).unwrap();
        let headers = request.headers();

        assert_eq!(headers["authorization"], "jwt-token");
        assert_eq!(headers["x-api-key"], "api-key");
        assert_eq!(headers["x-client-code"], "C123");
        assert_eq!(headers["x-feed-token"], "feed-token");
        assert_eq!(request.uri().host(), Some("smartapisocket.angelone.in"));
    }

    #[test]
    fn invalid_token_characters_are_rejected() {
        let config = AngelStreamConfig::new("api-key", "C123");
        let creds = SessionCredentials::new("bad\ntoken", "feed");
        assert!(build_request(&config, &creds).unwrap_err().is_auth());
    }

    #[test]
    fn one_request_per_chunk_with_exchange_type() {
        let requests = subscribe_requests(&[
            chunk("NSE", &["1", "2"]),
            chunk("NFO", &["3"]),
            chunk("XYZ", &["4"]),
        ]);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].action, ACTION_SUBSCRIBE);
        assert_eq!(requests[0].params.mode, MODE_LTP);
        assert_eq!(requests[0].params.token_list[0].exchange_type, 1);
        assert_eq!(requests[0].params.token_list[0].tokens, vec!["1", "2"]);
        assert_eq!(requests[1].params.token_list[0].exchange_type, 2);
        assert_ne!(requests[0].correlation_id, requests[1].correlation_id);
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = AngelStreamConfig::new("very-secret", "C1");
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
