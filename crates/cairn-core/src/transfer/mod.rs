//! Concurrent chunk transfer engine.
//!
//! - [`worker`]: one chunk, retry with exponential backoff
//! - [`scheduler`]: store-wide concurrency bound
//! - [`coordinator`]: fan-out, result collection, failure policy
//! - [`sink`]: destinations for downloaded chunks
//! - [`source`]: upload chunk sources, with reads kept off the runtime

pub mod coordinator;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod task;
pub mod worker;

pub use coordinator::{
    ProgressObserver, TransferCoordinator, TransferHandle, TransferProgress, TransferState,
};
pub use scheduler::{AbortSignal, Scheduled, TaskScheduler};
pub use sink::{ChunkSink, ReassemblySink};
pub use source::{BlockingReader, ChunkSource, IterSource};
pub use task::{
    ChunkFailure, Direction, FailureKind, TaskPayload, TransferOutcome, TransferResult,
    TransferTask, UploadChunk,
};
pub use worker::TransferWorker;
