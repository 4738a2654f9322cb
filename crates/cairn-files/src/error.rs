//! Error types for the byte engine

use thiserror::Error;

/// Errors produced while planning, chunking or reassembling bytes
#[derive(Debug, Error)]
pub enum FilesError {
    /// Chunk size must be greater than zero
    #[error("Invalid chunk size: {0} (must be > 0)")]
    InvalidChunkSize(usize),

    /// Chunk index outside the planned range
    #[error("Chunk index {index} out of bounds ({total} chunks)")]
    ChunkOutOfBounds {
        /// Requested index
        index: u64,
        /// Number of planned chunks
        total: u64,
    },

    /// Chunk bytes do not fit the planned range
    #[error("Chunk {index} has length {actual}, expected {expected}")]
    ChunkLengthMismatch {
        /// Chunk index
        index: u64,
        /// Planned length
        expected: u64,
        /// Length actually supplied
        actual: u64,
    },

    /// Chunk delivered a second time
    #[error("Chunk {index} was already received")]
    DuplicateChunk {
        /// Chunk index
        index: u64,
    },

    /// Reassembly finished before every chunk arrived
    #[error("Reassembly incomplete: {received}/{total} chunks received")]
    Incomplete {
        /// Chunks received so far
        received: u64,
        /// Chunks expected
        total: u64,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for byte engine operations
pub type Result<T> = std::result::Result<T, FilesError>;
