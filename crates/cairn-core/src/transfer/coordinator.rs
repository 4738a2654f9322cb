//! Transfer coordination for chunked uploads and downloads
//!
//! A coordinator drives all chunk transfers of one logical operation:
//!
//! ```text
//! Planning ──> InFlight ──┬──> Completed        every chunk succeeded
//!                         ├──> PartiallyFailed  failures, ContinueOnError
//!                         └──> Aborted          failure under FailFast, or cancelled
//! ```
//!
//! Tasks are submitted through the shared [`TaskScheduler`], so the number
//! of transfers in flight is bounded store-wide. Under fail-fast, a task
//! that fails raises the abort before it gives up its scheduler slot, so no
//! queued task can start in its place. Tasks that already started run to
//! completion and their results are discarded. Results are collected by
//! chunk index regardless of completion order.

use crate::config::FailurePolicy;
use crate::error::{PartialFailure, Result, StoreError};
use crate::manifest::{Chunk, ObjectManifest};
use crate::transfer::scheduler::{AbortSignal, Scheduled, TaskScheduler};
use crate::transfer::sink::ChunkSink;
use crate::transfer::source::ChunkSource;
use crate::transfer::task::{ChunkFailure, FailureKind, TransferResult, TransferTask};
use crate::transfer::worker::TransferWorker;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::{JoinError, JoinSet};

/// Lifecycle of one coordinated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Tasks are being prepared
    Planning,
    /// Tasks have been submitted
    InFlight,
    /// Every chunk succeeded
    Completed,
    /// Some chunks failed and the rest were still transferred
    PartiallyFailed,
    /// Scheduling stopped early after a failure or cancellation
    Aborted,
}

impl TransferState {
    /// Whether the operation has finished
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Aborted
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::InFlight => "in flight",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Caller-held handle for cancelling a transfer
///
/// Cancelling stops queued chunks from starting; chunks already in flight
/// finish. The operation then fails with [`StoreError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct TransferHandle {
    signal: AbortSignal,
}

impl TransferHandle {
    /// New, uncancelled handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.signal.abort();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_aborted()
    }

    pub(crate) fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}

/// Progress after one chunk completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Chunk that just completed
    pub index: u64,
    /// Chunks completed so far
    pub completed: u64,
    /// Chunks in the operation, when known up front
    pub total: Option<u64>,
    /// Bytes transferred so far
    pub bytes: u64,
}

/// Receives a callback for every successfully transferred chunk
pub trait ProgressObserver: Send + Sync {
    /// Called once per completed chunk, from the coordinating task
    fn on_chunk_complete(&self, progress: &TransferProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn on_chunk_complete(&self, progress: &TransferProgress) {
        self(progress);
    }
}

/// Accumulates results as joined tasks come back
struct Collector {
    policy: FailurePolicy,
    abort: AbortSignal,
    observer: Option<Arc<dyn ProgressObserver>>,
    lengths: BTreeMap<u64, u64>,
    total: Option<u64>,
    results: BTreeMap<u64, TransferResult>,
    failures: Vec<ChunkFailure>,
    skipped: BTreeSet<u64>,
    lost: usize,
    bytes: u64,
}

impl Collector {
    fn record(&mut self, joined: std::result::Result<(u64, Scheduled<TransferResult>), JoinError>) {
        match joined {
            Ok((_, Scheduled::Completed(result))) => {
                if let Some(failure) = result.failure() {
                    // The task itself already raised the abort
                    if self.policy == FailurePolicy::FailFast && self.failures.is_empty() {
                        tracing::warn!(
                            "Chunk {} failed, aborting remaining transfers",
                            failure.index
                        );
                    }
                    self.failures.push(failure);
                } else {
                    self.bytes += self.lengths.get(&result.index).copied().unwrap_or(0);
                    let progress = TransferProgress {
                        index: result.index,
                        completed: self.results.len() as u64 + 1,
                        total: self.total,
                        bytes: self.bytes,
                    };
                    if let Some(observer) = &self.observer {
                        observer.on_chunk_complete(&progress);
                    }
                    self.results.insert(result.index, result);
                }
            }
            Ok((index, Scheduled::Skipped)) => {
                self.skipped.insert(index);
            }
            Err(e) => {
                tracing::error!("Transfer task did not complete: {}", e);
                self.lost += 1;
                if self.policy == FailurePolicy::FailFast {
                    self.abort.abort();
                }
            }
        }
    }
}

/// Tasks pulled by the coordinator loop
trait TaskFeed: Send {
    fn next_task(&mut self) -> impl Future<Output = Option<Result<TransferTask>>> + Send;

    fn len_hint(&self) -> Option<u64>;
}

struct Uploads<'a, S>(&'a mut S);

impl<S: ChunkSource> TaskFeed for Uploads<'_, S> {
    fn next_task(&mut self) -> impl Future<Output = Option<Result<TransferTask>>> + Send {
        async move {
            let next = self.0.next_chunk().await?;
            Some(next.map(|c| TransferTask::upload(c.chunk, c.data)))
        }
    }

    fn len_hint(&self) -> Option<u64> {
        self.0.len_hint()
    }
}

struct Downloads(std::vec::IntoIter<TransferTask>);

impl TaskFeed for Downloads {
    fn next_task(&mut self) -> impl Future<Output = Option<Result<TransferTask>>> + Send {
        std::future::ready(self.0.next().map(Ok))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}

/// Drives the chunk transfers of one put or get
pub struct TransferCoordinator {
    scheduler: Arc<TaskScheduler>,
    worker: Arc<TransferWorker>,
    policy: FailurePolicy,
    handle: TransferHandle,
    observer: Option<Arc<dyn ProgressObserver>>,
    state: Mutex<TransferState>,
    bytes_transferred: AtomicU64,
}

impl TransferCoordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Shared scheduler bounding concurrency
    /// * `worker` - Worker executing each chunk
    /// * `policy` - Reaction to a terminal chunk failure
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        worker: Arc<TransferWorker>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            scheduler,
            worker,
            policy,
            handle: TransferHandle::new(),
            observer: None,
            state: Mutex::new(TransferState::Planning),
            bytes_transferred: AtomicU64::new(0),
        }
    }

    /// Use `handle` for cancellation
    #[must_use]
    pub fn with_handle(mut self, handle: TransferHandle) -> Self {
        self.handle = handle;
        self
    }

    /// Report per-chunk progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Failure policy in use
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Bytes of the chunks that transferred successfully in the last run,
    /// whether or not the run as a whole succeeded
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: TransferState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Upload chunks and return them ordered by index.
    ///
    /// `source` is pulled lazily, at most a window of chunks ahead of the
    /// transfers, so a streaming source is read as the transfer proceeds. A
    /// source error stops scheduling and is returned once in-flight chunks
    /// have finished.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PartialFailure` if any chunk failed,
    /// `StoreError::Cancelled` if the handle was cancelled, or the source's
    /// own error.
    pub async fn upload<S: ChunkSource>(&self, source: &mut S) -> Result<Vec<Chunk>> {
        self.run(Uploads(source)).await
    }

    /// Download every chunk of `manifest` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PartialFailure` if any chunk failed or
    /// `StoreError::Cancelled` if the handle was cancelled.
    pub async fn download(
        &self,
        manifest: &ObjectManifest,
        sink: Arc<dyn ChunkSink>,
    ) -> Result<()> {
        let tasks: Vec<TransferTask> = manifest
            .chunks
            .iter()
            .map(|c| TransferTask::download(c.clone(), Arc::clone(&sink)))
            .collect();
        self.run(Downloads(tasks.into_iter())).await.map(|_| ())
    }

    async fn run<F: TaskFeed>(&self, mut feed: F) -> Result<Vec<Chunk>> {
        self.set_state(TransferState::Planning);
        self.bytes_transferred.store(0, Ordering::Relaxed);
        let known_total = feed.len_hint();
        let fail_fast = self.policy == FailurePolicy::FailFast;

        let abort = self.handle.signal().child();
        let mut collector = Collector {
            policy: self.policy,
            abort: abort.clone(),
            observer: self.observer.clone(),
            lengths: BTreeMap::new(),
            total: known_total,
            results: BTreeMap::new(),
            failures: Vec::new(),
            skipped: BTreeSet::new(),
            lost: 0,
            bytes: 0,
        };

        // Bounded read-ahead keeps streaming sources from being buffered whole
        let window = self.scheduler.workers().saturating_mul(2).max(1);
        let mut set: JoinSet<(u64, Scheduled<TransferResult>)> = JoinSet::new();
        let mut submitted: Vec<Chunk> = Vec::new();
        let mut source_error = None;

        self.set_state(TransferState::InFlight);
        loop {
            while set.len() >= window {
                match set.join_next().await {
                    Some(joined) => collector.record(joined),
                    None => break,
                }
            }
            if abort.is_aborted() {
                break;
            }

            let task = match feed.next_task().await {
                None => break,
                Some(Ok(task)) => task,
                Some(Err(e)) => {
                    tracing::error!("Chunk source failed: {}", e);
                    abort.abort();
                    source_error = Some(e);
                    break;
                }
            };

            let index = task.chunk.index;
            collector.lengths.insert(index, task.chunk.length);
            submitted.push(task.chunk.clone());

            let worker = Arc::clone(&self.worker);
            let job_abort = abort.clone();
            let job = self.scheduler.schedule(abort.clone(), async move {
                let result = worker.execute(task).await;
                // Raised while this task still holds its permit
                if fail_fast && !result.is_success() {
                    job_abort.abort();
                }
                result
            });
            set.spawn(async move { (index, job.await) });
        }

        while let Some(joined) = set.join_next().await {
            collector.record(joined);
        }
        self.bytes_transferred
            .store(collector.bytes, Ordering::Relaxed);

        let total = known_total.map_or(submitted.len(), |t| t as usize);
        self.conclude(collector, submitted, total, source_error)
    }

    fn conclude(
        &self,
        mut collector: Collector,
        mut submitted: Vec<Chunk>,
        total: usize,
        source_error: Option<StoreError>,
    ) -> Result<Vec<Chunk>> {
        if collector.lost > 0 {
            for chunk in &submitted {
                let index = chunk.index;
                let reported = collector.results.contains_key(&index)
                    || collector.skipped.contains(&index)
                    || collector.failures.iter().any(|f| f.index == index);
                if !reported {
                    collector.failures.push(ChunkFailure {
                        index,
                        kind: FailureKind::Permanent,
                        attempts: 0,
                        error: "transfer task terminated unexpectedly".into(),
                    });
                }
            }
        }

        if self.handle.is_cancelled() {
            self.set_state(TransferState::Aborted);
            tracing::info!(
                "Transfer cancelled after {} of {} chunks",
                collector.results.len(),
                total
            );
            return Err(StoreError::Cancelled);
        }

        if let Some(e) = source_error {
            self.set_state(TransferState::Aborted);
            return Err(e);
        }

        if !collector.failures.is_empty() {
            let state = match self.policy {
                FailurePolicy::FailFast => TransferState::Aborted,
                FailurePolicy::ContinueOnError => TransferState::PartiallyFailed,
            };
            self.set_state(state);
            collector.failures.sort_by_key(|f| f.index);
            tracing::error!(
                "Transfer {}: {} of {} chunks failed, {} skipped",
                state,
                collector.failures.len(),
                total,
                collector.skipped.len()
            );
            return Err(StoreError::PartialFailure(PartialFailure {
                failed: collector.failures,
                total,
                state,
            }));
        }

        if collector.results.len() != total {
            self.set_state(TransferState::Aborted);
            return Err(StoreError::Manifest(format!(
                "{} of {} chunk results collected",
                collector.results.len(),
                total
            )));
        }

        self.set_state(TransferState::Completed);
        submitted.sort_by_key(|c| c.index);
        Ok(submitted)
    }
}
