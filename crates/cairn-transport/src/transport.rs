//! Transport trait and shared types.
//!
//! The core store only needs two capabilities from a backend: store bytes at
//! an opaque location and fetch them back. Wire details stay inside each
//! implementation; callers see success, an ETag-like token, or a classified
//! [`TransportError`].

use crate::factory::TransportType;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Opaque storage location of one chunk blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkLocation(String);

impl ChunkLocation {
    /// Wrap a location string
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Location as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChunkLocation {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChunkLocation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// Connection dropped mid-operation
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Backend reported a server-side failure
    #[error("Server error {status}: {message}")]
    Server {
        /// Status code reported by the backend
        status: u16,
        /// Backend message
        message: String,
    },

    /// Backend rejected the request as invalid
    #[error("Client error {status}: {message}")]
    Client {
        /// Status code reported by the backend
        status: u16,
        /// Backend message
        message: String,
    },

    /// Credentials missing or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Nothing stored at the location
    #[error("No blob at location {0}")]
    NotFound(String),

    /// Location string cannot be used by this backend
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, resets, server errors and connection-level I/O failures are
    /// transient. Authorization, validation and missing-blob errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionReset(_) | Self::Server { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::WouldBlock
            ),
            Self::Client { .. }
            | Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::InvalidLocation(_)
            | Self::Other(_) => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Snapshot of transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes stored by successful PUTs
    pub bytes_sent: u64,
    /// Bytes returned by successful GETs
    pub bytes_received: u64,
    /// Successful PUTs
    pub puts: u64,
    /// Successful GETs
    pub gets: u64,
    /// Failed PUTs
    pub put_errors: u64,
    /// Failed GETs
    pub get_errors: u64,
}

/// Atomic counters backing [`TransportStats`]
#[derive(Debug, Default)]
pub struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    puts: AtomicU64,
    gets: AtomicU64,
    put_errors: AtomicU64,
    get_errors: AtomicU64,
}

impl StatsCounters {
    /// Record the outcome of a PUT of `len` bytes
    pub fn record_put<T>(&self, len: usize, result: &TransportResult<T>) {
        if result.is_ok() {
            self.puts.fetch_add(1, Ordering::Relaxed);
            self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        } else {
            self.put_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a GET
    pub fn record_get(&self, result: &TransportResult<Bytes>) {
        match result {
            Ok(data) => {
                self.gets.fetch_add(1, Ordering::Relaxed);
                self.bytes_received
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.get_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
        }
    }
}

/// Chunk transport capability.
///
/// Implementations must be safe to call from many tasks at once; the store
/// fans chunk transfers out across a worker pool.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Store `data` at `location`, returning an ETag or checksum token
    async fn put_bytes(&self, location: &ChunkLocation, data: Bytes) -> TransportResult<String>;

    /// Fetch the bytes stored at `location`
    async fn get_bytes(&self, location: &ChunkLocation) -> TransportResult<Bytes>;

    /// Remove the blob at `location`
    ///
    /// Used by garbage collection outside the store; removing a missing blob
    /// is not an error.
    async fn delete_bytes(&self, location: &ChunkLocation) -> TransportResult<()>;

    /// Backend kind
    fn transport_type(&self) -> TransportType;

    /// Counter snapshot
    fn stats(&self) -> TransportStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::ConnectionReset("peer closed".into()).is_transient());
        assert!(
            TransportError::Server {
                status: 503,
                message: "busy".into()
            }
            .is_transient()
        );
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_transient());

        assert!(
            !TransportError::Client {
                status: 400,
                message: "bad".into()
            }
            .is_transient()
        );
        assert!(!TransportError::Unauthorized("no token".into()).is_transient());
        assert!(!TransportError::NotFound("x".into()).is_transient());
        assert!(!TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_transient());
    }

    #[test]
    fn test_stats_counters() {
        let counters = StatsCounters::default();
        counters.record_put(10, &Ok::<_, TransportError>("etag".to_string()));
        counters.record_put::<String>(5, &Err(TransportError::Timeout));
        counters.record_get(&Ok(Bytes::from_static(b"abc")));
        counters.record_get(&Err(TransportError::NotFound("k".into())));

        let stats = counters.snapshot();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.bytes_sent, 10);
        assert_eq!(stats.put_errors, 1);
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.bytes_received, 3);
        assert_eq!(stats.get_errors, 1);
    }

    #[test]
    fn test_location_display() {
        let loc = ChunkLocation::from("chunks/blake3/ab/abcd");
        assert_eq!(loc.to_string(), "chunks/blake3/ab/abcd");
        assert_eq!(loc.as_str(), "chunks/blake3/ab/abcd");
    }
}
