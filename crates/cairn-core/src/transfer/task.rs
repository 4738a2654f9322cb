//! Transfer tasks and their results.

use crate::error::StoreError;
use crate::manifest::Chunk;
use crate::transfer::sink::ChunkSink;
use bytes::Bytes;
use cairn_files::ContentDigest;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Direction of a chunk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// PUT the chunk's bytes
    Upload,
    /// GET the chunk's bytes
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Where a task's bytes come from or go to
#[derive(Clone)]
pub enum TaskPayload {
    /// Bytes to upload
    Source(Bytes),
    /// Sink receiving the downloaded bytes at the chunk's offset
    Target(Arc<dyn ChunkSink>),
}

impl fmt::Debug for TaskPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(data) => f.debug_tuple("Source").field(&data.len()).finish(),
            Self::Target(_) => f.debug_tuple("Target").finish(),
        }
    }
}

/// One chunk transfer, owned by the worker executing it
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Chunk being moved
    pub chunk: Chunk,
    /// Bytes source or destination
    pub payload: TaskPayload,
    /// Attempts made so far
    pub attempt_count: u32,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
}

impl TransferTask {
    /// Task uploading `data` as `chunk`
    pub fn upload(chunk: Chunk, data: Bytes) -> Self {
        Self {
            chunk,
            payload: TaskPayload::Source(data),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Task downloading `chunk` into `sink`
    pub fn download(chunk: Chunk, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            chunk,
            payload: TaskPayload::Target(sink),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Transfer direction, derived from the payload
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.payload {
            TaskPayload::Source(_) => Direction::Upload,
            TaskPayload::Target(_) => Direction::Download,
        }
    }
}

/// A chunk ready to upload together with its bytes
#[derive(Debug, Clone)]
pub struct UploadChunk {
    /// Chunk metadata, location included
    pub chunk: Chunk,
    /// The chunk's bytes
    pub data: Bytes,
}

/// Why a chunk failed terminally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retryable errors persisted past the retry budget
    Transient,
    /// The transport rejected the request outright
    Permanent,
    /// Downloaded bytes did not match the chunk digest
    Integrity {
        /// Digest recorded in the manifest
        expected: ContentDigest,
        /// Digest of the bytes received
        actual: ContentDigest,
    },
}

/// Terminal outcome of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The chunk was transferred
    Success {
        /// Backend ETag for uploads, chunk digest hex for downloads
        etag: String,
    },
    /// The chunk could not be transferred
    Failure {
        /// Failure class
        kind: FailureKind,
        /// Last error message
        error: String,
    },
}

/// Result of executing one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Index of the chunk the task moved
    pub index: u64,
    /// Success or failure
    pub outcome: TransferOutcome,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Wall time spent, backoff included
    pub duration: Duration,
}

impl TransferResult {
    /// Whether the chunk was transferred
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Success { .. })
    }

    /// The failure described by this result, if it failed
    #[must_use]
    pub fn failure(&self) -> Option<ChunkFailure> {
        match &self.outcome {
            TransferOutcome::Success { .. } => None,
            TransferOutcome::Failure { kind, error } => Some(ChunkFailure {
                index: self.index,
                kind: *kind,
                attempts: self.attempts,
                error: error.clone(),
            }),
        }
    }
}

/// A failed chunk as reported in a `PartialFailure`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Chunk index
    pub index: u64,
    /// Failure class
    pub kind: FailureKind,
    /// Attempts made
    pub attempts: u32,
    /// Last error message
    pub error: String,
}

impl ChunkFailure {
    /// Whether the chunk failed only with retryable errors
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    /// Whether the chunk failed verification
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self.kind, FailureKind::Integrity { .. })
    }

    /// Single-chunk error equivalent to this failure
    #[must_use]
    pub fn to_error(&self) -> StoreError {
        match self.kind {
            FailureKind::Transient => StoreError::TransientTransfer {
                index: self.index,
                attempts: self.attempts,
                message: self.error.clone(),
            },
            FailureKind::Permanent => StoreError::PermanentTransfer {
                index: self.index,
                attempts: self.attempts,
                message: self.error.clone(),
            },
            FailureKind::Integrity { expected, actual } => StoreError::DataCorruption {
                expected,
                actual,
                chunk: Some(self.index),
            },
        }
    }
}
