//! Error types for the object store

use crate::transfer::{ChunkFailure, TransferState};
use cairn_files::{ContentDigest, FilesError};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in store and transfer operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad chunk size, zero workers or an unusable retry policy
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A chunk kept failing with retryable errors until retries ran out
    #[error("Transient transfer error on chunk {index} after {attempts} attempts: {message}")]
    TransientTransfer {
        /// Chunk index
        index: u64,
        /// Attempts made, including the first
        attempts: u32,
        /// Last error seen
        message: String,
    },

    /// A chunk failed with an error that retrying cannot fix
    #[error("Permanent transfer error on chunk {index} after {attempts} attempts: {message}")]
    PermanentTransfer {
        /// Chunk index
        index: u64,
        /// Attempts made, including the first
        attempts: u32,
        /// Error reported by the transport
        message: String,
    },

    /// No manifest is registered for the digest
    #[error("Object not found: {0}")]
    NotFound(ContentDigest),

    /// Fetched bytes do not hash to the digest they were stored under.
    ///
    /// With `chunk` set, both digests are of that chunk's bytes; without it
    /// they are of the whole reassembled object.
    #[error(
        "Data corruption{}: expected {expected}, got {actual}",
        .chunk.map(|index| format!(" in chunk {index}")).unwrap_or_default()
    )]
    DataCorruption {
        /// Digest the bytes should have
        expected: ContentDigest,
        /// Digest of the bytes actually read
        actual: ContentDigest,
        /// Chunk that failed verification, `None` for the object check
        chunk: Option<u64>,
    },

    /// One or more chunks of a transfer failed
    #[error("{0}")]
    PartialFailure(PartialFailure),

    /// The caller cancelled the transfer
    #[error("Transfer cancelled")]
    Cancelled,

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunking or reassembly error
    #[error("File engine error: {0}")]
    Files(#[from] FilesError),

    /// Manifest persistence failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A manifest violates its invariants
    #[error("Invalid manifest: {0}")]
    Manifest(String),
}

impl StoreError {
    /// Whether retrying the whole operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientTransfer { .. } => true,
            Self::PartialFailure(failure) => failure.failed.iter().all(ChunkFailure::is_transient),
            _ => false,
        }
    }
}

/// Aggregate failure of a chunked transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    /// Failed chunks, ascending by index
    pub failed: Vec<ChunkFailure>,
    /// Chunks the operation planned (or submitted, for streams)
    pub total: usize,
    /// Terminal state the coordinator reached
    pub state: TransferState,
}

impl PartialFailure {
    /// Indices of the failed chunks
    #[must_use]
    pub fn failed_indices(&self) -> Vec<u64> {
        self.failed.iter().map(|f| f.index).collect()
    }

    /// First integrity failure, if any chunk failed verification
    #[must_use]
    pub fn corruption(&self) -> Option<&ChunkFailure> {
        self.failed.iter().find(|f| f.is_integrity())
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} chunks failed ({})",
            self.failed.len(),
            self.total,
            self.state
        )?;
        for failure in &self.failed {
            write!(f, "; chunk {}: {}", failure.index, failure.error)?;
        }
        Ok(())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::FailureKind;

    fn failure(index: u64, kind: FailureKind) -> ChunkFailure {
        ChunkFailure {
            index,
            kind,
            attempts: 1,
            error: "boom".into(),
        }
    }

    #[test]
    fn test_partial_failure_names_chunks() {
        let err = StoreError::PartialFailure(PartialFailure {
            failed: vec![failure(3, FailureKind::Permanent)],
            total: 10,
            state: TransferState::Aborted,
        });
        let text = err.to_string();
        assert!(text.contains("1 of 10"), "{text}");
        assert!(text.contains("chunk 3"), "{text}");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let err = StoreError::PartialFailure(PartialFailure {
            failed: vec![
                failure(0, FailureKind::Transient),
                failure(4, FailureKind::Transient),
            ],
            total: 5,
            state: TransferState::PartiallyFailed,
        });
        assert!(err.is_transient());
        assert!(!StoreError::Cancelled.is_transient());
    }

    #[test]
    fn test_corruption_names_chunk_when_known() {
        let expected = ContentDigest::of(cairn_files::HashAlgorithm::Blake3, b"good");
        let actual = ContentDigest::of(cairn_files::HashAlgorithm::Blake3, b"bad");

        let object = StoreError::DataCorruption {
            expected,
            actual,
            chunk: None,
        };
        assert!(object.to_string().starts_with("Data corruption: expected"));

        let chunk = StoreError::DataCorruption {
            expected,
            actual,
            chunk: Some(12),
        };
        assert!(chunk.to_string().starts_with("Data corruption in chunk 12:"));
    }
}
