//! Store and retry configuration.
//!
//! Durations are kept as millisecond fields so the structs deserialize from
//! plain TOML or JSON numbers.

use crate::error::{Result, StoreError};
use cairn_files::{DEFAULT_CHUNK_SIZE, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a coordinator does after a chunk fails terminally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop scheduling queued chunks and report the failure
    #[default]
    FailFast,
    /// Transfer every chunk, then report all failures together
    ContinueOnError,
}

/// Retry and timeout settings for a single chunk transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Budget for one attempt; exceeding it counts as a transient failure
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound on attempts for one chunk
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the first retry
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Cap on a single backoff delay
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Backoff before retry `retry` (1-based): `min(base * 2^(retry-1), max)`
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    /// Check the policy is usable
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfiguration` for a zero attempt timeout
    /// or a cap below the base delay.
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_ms == 0 {
            return Err(StoreError::InvalidConfiguration(
                "attempt_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(StoreError::InvalidConfiguration(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Object store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Target chunk size in bytes
    pub chunk_size: usize,
    /// Maximum chunk transfers in flight across the store
    pub workers: usize,
    /// Reaction to a terminal chunk failure
    pub failure_policy: FailurePolicy,
    /// Digest algorithm for objects and chunks
    pub hash_algorithm: HashAlgorithm,
    /// Per-chunk retry behavior
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: num_cpus::get().max(1),
            failure_policy: FailurePolicy::default(),
            hash_algorithm: HashAlgorithm::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Set the target chunk size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the failure policy
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the digest algorithm
    #[must_use]
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfiguration` if the chunk size or worker
    /// count is zero, or the retry policy is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(StoreError::InvalidConfiguration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.workers == 0 {
            return Err(StoreError::InvalidConfiguration(
                "workers must be greater than zero".into(),
            ));
        }
        self.retry.validate()
    }
}
