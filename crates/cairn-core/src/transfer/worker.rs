//! Single-chunk transfer with retry and exponential backoff.
//!
//! A worker owns one [`TransferTask`] at a time and always hands back a
//! [`TransferResult`]: transport errors are classified and recorded, never
//! propagated.

use crate::config::RetryPolicy;
use crate::transfer::task::{FailureKind, TaskPayload, TransferOutcome, TransferResult, TransferTask};
use cairn_files::ContentDigest;
use cairn_transport::{ChunkTransport, TransportError};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Why a single attempt failed
enum AttemptError {
    Transport(TransportError),
    Integrity {
        expected: ContentDigest,
        actual: ContentDigest,
    },
    Sink(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_transient())
    }

    fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(e) if e.is_transient() => FailureKind::Transient,
            Self::Transport(_) | Self::Sink(_) => FailureKind::Permanent,
            Self::Integrity { expected, actual } => FailureKind::Integrity {
                expected: *expected,
                actual: *actual,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Transport(e) => e.to_string(),
            Self::Integrity { expected, actual } => {
                format!("chunk digest mismatch: expected {expected}, got {actual}")
            }
            Self::Sink(msg) => msg.clone(),
        }
    }
}

/// Executes chunk transfers against a transport
pub struct TransferWorker {
    transport: Arc<dyn ChunkTransport>,
    retry: RetryPolicy,
}

impl TransferWorker {
    /// Create a worker
    ///
    /// # Arguments
    ///
    /// * `transport` - Backend chunks are moved to and from
    /// * `retry` - Retry budget and backoff for each task
    pub fn new(transport: Arc<dyn ChunkTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Run `task` to a terminal outcome.
    ///
    /// Transient errors (timeouts, resets, 5xx) are retried up to
    /// `max_retries` times with a delay of `min(base * 2^(n-1), max)` before
    /// retry `n`. Anything else ends the task on the attempt it occurred.
    pub async fn execute(&self, mut task: TransferTask) -> TransferResult {
        let start = Instant::now();
        let index = task.chunk.index;
        let direction = task.direction();
        let max_attempts = self.retry.max_attempts();

        loop {
            task.attempt_count += 1;
            let attempt = task.attempt_count;

            match self.attempt(&task).await {
                Ok(etag) => {
                    debug!(
                        "Chunk {} {} ok after {} attempt(s) ({} bytes)",
                        index, direction, attempt, task.chunk.length
                    );
                    return TransferResult {
                        index,
                        outcome: TransferOutcome::Success { etag },
                        attempts: attempt,
                        duration: start.elapsed(),
                    };
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_retry(attempt);
                    let message = err.message();
                    warn!(
                        "Chunk {} {} attempt {}/{} failed: {}; retrying in {:?}",
                        index, direction, attempt, max_attempts, message, delay
                    );
                    task.last_error = Some(message);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let message = err.message();
                    error!(
                        "Chunk {} {} failed after {} attempt(s): {}",
                        index, direction, attempt, message
                    );
                    return TransferResult {
                        index,
                        outcome: TransferOutcome::Failure {
                            kind: err.kind(),
                            error: message,
                        },
                        attempts: attempt,
                        duration: start.elapsed(),
                    };
                }
            }
        }
    }

    async fn attempt(&self, task: &TransferTask) -> Result<String, AttemptError> {
        let location = &task.chunk.location;
        match &task.payload {
            TaskPayload::Source(data) => {
                let put = self.transport.put_bytes(location, data.clone());
                match tokio::time::timeout(self.retry.attempt_timeout(), put).await {
                    Ok(result) => result.map_err(AttemptError::Transport),
                    Err(_) => Err(AttemptError::Transport(TransportError::Timeout)),
                }
            }
            TaskPayload::Target(sink) => {
                let get = self.transport.get_bytes(location);
                let data = match tokio::time::timeout(self.retry.attempt_timeout(), get).await {
                    Ok(result) => result.map_err(AttemptError::Transport)?,
                    Err(_) => return Err(AttemptError::Transport(TransportError::Timeout)),
                };

                let expected = task.chunk.digest;
                let actual = ContentDigest::of(expected.algorithm(), &data);
                if actual != expected {
                    return Err(AttemptError::Integrity { expected, actual });
                }

                // Sinks may write to disk
                let sink = Arc::clone(sink);
                let chunk = task.chunk.clone();
                tokio::task::spawn_blocking(move || sink.write_chunk(&chunk, &data))
                    .await
                    .map_err(|e| AttemptError::Sink(e.to_string()))?
                    .map_err(|e| AttemptError::Sink(e.to_string()))?;
                Ok(actual.to_hex())
            }
        }
    }
}
