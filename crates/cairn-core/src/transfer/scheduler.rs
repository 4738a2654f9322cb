//! Bounded-concurrency task scheduler.
//!
//! One scheduler is created per store and shared through `Arc` by every
//! coordinator, so the worker limit holds across concurrent operations.
//! Jobs queue on a semaphore; a job that obtains its permit after its
//! operation was aborted is skipped instead of run.

use crate::error::{Result, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Shared stop flag for the jobs of one operation.
///
/// A signal created with [`AbortSignal::child`] also reports aborted when
/// its parent is, but aborting the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl AbortSignal {
    /// New signal, not aborted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that is aborted when either it or `self` is
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    /// Stop jobs that have not started yet
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether this signal or its parent was aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }
}

/// What happened to a scheduled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled<T> {
    /// The job ran to completion
    Completed(T),
    /// The operation was aborted before the job started
    Skipped,
}

/// Counts a running job for as long as it lives
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Long-lived executor limiting how many jobs run at once
#[derive(Debug)]
pub struct TaskScheduler {
    permits: Arc<Semaphore>,
    workers: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl TaskScheduler {
    /// Create a scheduler running at most `workers` jobs at once
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfiguration` if `workers` is zero.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(StoreError::InvalidConfiguration(
                "scheduler needs at least one worker".into(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Scheduler sized to the number of CPUs
    #[must_use]
    pub fn with_default_workers() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Concurrency limit
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs running right now
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of jobs seen running at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Wrap `job` so it waits for a permit before running.
    ///
    /// The returned future is meant to be spawned. It checks `abort` once
    /// the permit is held and resolves to [`Scheduled::Skipped`] without
    /// polling `job` if the operation was aborted while it queued.
    pub fn schedule<F>(
        &self,
        abort: AbortSignal,
        job: F,
    ) -> impl Future<Output = Scheduled<F::Output>> + Send + use<F>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak_in_flight);

        async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Scheduled::Skipped;
            };
            if abort.is_aborted() {
                return Scheduled::Skipped;
            }
            let _guard = InFlightGuard::enter(in_flight, &peak);
            Scheduled::Completed(job.await)
        }
    }
}
