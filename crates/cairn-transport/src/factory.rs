//! Transport factory for creating transport instances.
//!
//! This module provides a factory for building a chunk transport from
//! configuration, so callers can hold an `Arc<dyn ChunkTransport>` without
//! naming the backend.

use crate::http::HttpTransport;
use crate::localfs::LocalFsTransport;
use crate::memory::MemoryTransport;
use crate::transport::{ChunkTransport, TransportError, TransportResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Transport backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportType {
    /// In-process map
    Memory,
    /// One file per blob below a root directory
    #[default]
    LocalFs,
    /// HTTP PUT/GET against a base URL
    Http,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::LocalFs => write!(f, "localfs"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "localfs" | "fs" => Ok(Self::LocalFs),
            "http" | "https" => Ok(Self::Http),
            other => Err(TransportError::Other(format!(
                "unknown transport type: {other}"
            ))),
        }
    }
}

/// Configuration for creating a transport.
#[derive(Debug, Clone, Default)]
pub struct TransportFactoryConfig {
    /// Type of transport to create
    pub transport_type: TransportType,
    /// Root directory for `LocalFs`
    pub root: Option<PathBuf>,
    /// Base URL for `Http`
    pub base_url: Option<String>,
    /// Bearer token for `Http`
    pub bearer_token: Option<String>,
    /// Request timeout for `Http`
    pub request_timeout: Option<Duration>,
}

impl TransportFactoryConfig {
    /// In-memory transport configuration.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            transport_type: TransportType::Memory,
            ..Self::default()
        }
    }

    /// Local filesystem transport configuration.
    ///
    /// # Arguments
    /// * `root` - Directory holding chunk blobs
    #[must_use]
    pub fn localfs(root: impl Into<PathBuf>) -> Self {
        Self {
            transport_type: TransportType::LocalFs,
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// HTTP transport configuration.
    ///
    /// # Arguments
    /// * `base_url` - URL chunk keys are appended to
    #[must_use]
    pub fn http(base_url: impl Into<String>) -> Self {
        Self {
            transport_type: TransportType::Http,
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Set a bearer token for HTTP requests.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Factory for creating transport instances.
///
/// # Examples
///
/// ```no_run
/// use cairn_transport::factory::{TransportFactory, TransportFactoryConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TransportFactory::create(TransportFactoryConfig::localfs("/var/lib/cairn")).await?;
/// println!("Created {} transport", transport.transport_type());
/// # Ok(())
/// # }
/// ```
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport based on the provided configuration.
    ///
    /// # Errors
    /// Returns `TransportError::Other` if a required setting is missing, or
    /// the backend's own construction error.
    pub async fn create(
        config: TransportFactoryConfig,
    ) -> TransportResult<Arc<dyn ChunkTransport>> {
        match config.transport_type {
            TransportType::Memory => Ok(Arc::new(MemoryTransport::new())),
            TransportType::LocalFs => {
                let root = config.root.ok_or_else(|| {
                    TransportError::Other("localfs transport needs a root".into())
                })?;
                Ok(Arc::new(LocalFsTransport::new(root).await?))
            }
            TransportType::Http => {
                let base_url = config.base_url.ok_or_else(|| {
                    TransportError::Other("http transport needs a base_url".into())
                })?;
                let mut transport = match config.request_timeout {
                    Some(timeout) => HttpTransport::with_timeout(base_url, timeout)?,
                    None => HttpTransport::new(base_url)?,
                };
                if let Some(token) = config.bearer_token {
                    transport = transport.with_bearer_token(token);
                }
                Ok(Arc::new(transport))
            }
        }
    }
}
