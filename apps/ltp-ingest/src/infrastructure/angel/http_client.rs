//! SmartAPI Quote Client
//!
//! [`QuoteClient`] over the SmartAPI `market/v1/quote` REST endpoint.
//! Rate limits and rejected credentials surface immediately; timeouts,
//! server errors and network failures are retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};

use super::messages::{QuoteEnvelope, QuoteRequest};
use crate::application::ports::{AuthProvider, BrokerError, LtpQuote, QuoteClient};
use crate::application::services::{BackoffConfig, BackoffPolicy};
use crate::domain::grouping::VenueChunk;
use crate::infrastructure::config::{BrokerSettings, DEFAULT_API_ROOT};

const QUOTE_PATH: &str = "/rest/secure/angelbroking/market/v1/quote";

/// Broker error codes that mean the session token is invalid or expired.
const AUTH_ERROR_CODES: [&str; 3] = ["AG8001", "AG8002", "AG8003"];

/// Quote client configuration.
#[derive(Clone)]
pub struct AngelQuoteConfig {
    /// REST root URL.
    pub api_root: String,
    /// Private API key.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts for retryable failures.
    pub max_attempts: u32,
    /// First retry delay.
    pub retry_base: Duration,
}

impl AngelQuoteConfig {
    /// Configuration with default endpoint and retry settings.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
        }
    }

    /// Configuration derived from broker settings.
    #[must_use]
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            api_root: settings.api_root.clone(),
            api_key: settings.api_key().to_string(),
            timeout: settings.http_timeout,
            max_attempts: settings.http_max_attempts.max(1),
            retry_base: Duration::from_millis(500),
        }
    }

    fn quote_url(&self) -> String {
        format!("{}{QUOTE_PATH}", self.api_root.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for AngelQuoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AngelQuoteConfig")
            .field("api_root", &self.api_root)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// SmartAPI quote client.
pub struct AngelQuoteClient {
    config: AngelQuoteConfig,
    auth: Arc<dyn AuthProvider>,
    http: Client,
}

impl AngelQuoteClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Network` if the HTTP client cannot be built.
    pub fn new(config: AngelQuoteConfig, auth: Arc<dyn AuthProvider>) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::Network(e.to_string()))?;
        Ok(Self { config, auth, http })
    }

    async fn fetch_once(&self, request: &QuoteRequest) -> Result<Vec<LtpQuote>, BrokerError> {
        let credentials = self
            .auth
            .current_credentials()
            .await
            .map_err(|e| BrokerError::Unauthorized(e.to_string()))?;

        let response = self
            .http
            .post(self.config.quote_url())
            .header("X-PrivateKey", &self.config.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", credentials.access_token))
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let envelope: QuoteEnvelope = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        classify_envelope(envelope)
    }
}

#[async_trait]
impl QuoteClient for AngelQuoteClient {
    async fn fetch_prices(&self, chunk: &VenueChunk) -> Result<Vec<LtpQuote>, BrokerError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let request = QuoteRequest::ltp(chunk);
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = BackoffPolicy::new(BackoffConfig {
            base_delay: self.config.retry_base,
            max_delay: self.config.timeout,
            jitter_factor: 0.1,
            max_attempts,
        });

        loop {
            match self.fetch_once(&request).await {
                Err(e) if is_retryable(&e) && backoff.attempt_count() + 1 < max_attempts => {
                    let delay = backoff.next_delay().unwrap_or(self.config.retry_base);
                    tracing::warn!(
                        venue = %chunk.venue,
                        attempt = backoff.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Quote request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Map a non-success HTTP status to a broker error.
fn classify_status(status: StatusCode, body: String) -> BrokerError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Unauthorized(body),
        StatusCode::REQUEST_TIMEOUT => BrokerError::Network(format!("HTTP 408: {body}")),
        s if s.is_server_error() => BrokerError::Network(format!("HTTP {}: {body}", s.as_u16())),
        s => BrokerError::Api {
            code: s.as_u16().to_string(),
            message: body,
        },
    }
}

/// Unwrap a decoded envelope, mapping application-level failures.
fn classify_envelope(envelope: QuoteEnvelope) -> Result<Vec<LtpQuote>, BrokerError> {
    if envelope.status {
        return Ok(envelope.into_quotes());
    }
    let code = envelope.errorcode.unwrap_or_default();
    let message = envelope.message.unwrap_or_default();
    if AUTH_ERROR_CODES.contains(&code.as_str()) {
        Err(BrokerError::Unauthorized(format!("{code}: {message}")))
    } else {
        Err(BrokerError::Api { code, message })
    }
}

const fn is_retryable(error: &BrokerError) -> bool {
    matches!(error, BrokerError::Network(_))
}
