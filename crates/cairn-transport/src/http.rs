//! HTTP transport backend for S3-like blob endpoints.
//!
//! A chunk location is appended to a base URL; PUT stores the body and GET
//! fetches it. Response status codes are mapped onto the transport error
//! taxonomy so the retry layer can tell transient failures from permanent
//! ones.

use crate::factory::TransportType;
use crate::transport::{
    ChunkLocation, ChunkTransport, StatsCounters, TransportError, TransportResult, TransportStats,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout applied by the HTTP client.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport speaking plain HTTP PUT/GET/DELETE against a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    stats: std::sync::Arc<StatsCounters>,
}

impl HttpTransport {
    /// Create a transport for `base_url`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Other` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Other` if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            stats: std::sync::Arc::new(StatsCounters::default()),
        })
    }

    /// Attach a bearer token to every request
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a location
    #[must_use]
    pub fn url_for(&self, location: &ChunkLocation) -> String {
        format!(
            "{}/{}",
            self.base_url,
            location.as_str().trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, location: &ChunkLocation) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url_for(location));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> TransportResult<reqwest::Response> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        debug!("HTTP {} from {}: {}", status, url, body);
        Err(map_status(status, &url, body))
    }
}

/// Map a non-success status onto the transport error taxonomy.
///
/// 5xx, 408 and 429 are transient; 401/403 are authorization failures; 404
/// means the blob is missing; any other 4xx is a permanent client error.
#[must_use]
pub fn map_status(status: StatusCode, url: &str, body: String) -> TransportError {
    let code = status.as_u16();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };

    match status {
        s if s.is_server_error() => TransportError::Server {
            status: code,
            message,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => TransportError::Server {
            status: code,
            message,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::Unauthorized(format!("{code} for {url}"))
        }
        StatusCode::NOT_FOUND => TransportError::NotFound(url.to_string()),
        _ => TransportError::Client {
            status: code,
            message,
        },
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() || e.is_request() || e.is_body() {
        TransportError::ConnectionReset(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn put_bytes(&self, location: &ChunkLocation, data: Bytes) -> TransportResult<String> {
        let len = data.len();
        let result: TransportResult<String> = async {
            let response = self
                .send(self.request(reqwest::Method::PUT, location).body(data))
                .await?;
            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
                .unwrap_or_default();
            Ok(etag)
        }
        .await;

        self.stats.record_put(len, &result);
        result
    }

    async fn get_bytes(&self, location: &ChunkLocation) -> TransportResult<Bytes> {
        let result: TransportResult<Bytes> = async {
            let response = self
                .send(self.request(reqwest::Method::GET, location))
                .await?;
            response.bytes().await.map_err(map_reqwest_error)
        }
        .await;

        self.stats.record_get(&result);
        result
    }

    async fn delete_bytes(&self, location: &ChunkLocation) -> TransportResult<()> {
        match self
            .send(self.request(reqwest::Method::DELETE, location))
            .await
        {
            Ok(_) | Err(TransportError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
