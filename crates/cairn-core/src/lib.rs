//! # Cairn Core
//!
//! Transfer engine and content-addressed object store.
//!
//! This crate provides:
//! - `ObjectStore`: put/get/exists/delete keyed by whole-object digest, with
//!   dedup and atomic manifest registration
//! - `TransferCoordinator`: bounded fan-out of chunk transfers with
//!   fail-fast or continue-on-error policies
//! - `TransferWorker`: per-chunk retry with exponential backoff
//! - `TaskScheduler`: store-wide concurrency bound
//! - `ManifestCatalog`: in-memory and JSON-file manifest persistence
//!
//! ## Example
//!
//! ```no_run
//! use cairn_core::{ObjectStore, StoreConfig};
//! use cairn_transport::MemoryTransport;
//! use std::sync::Arc;
//!
//! # async fn example() -> cairn_core::Result<()> {
//! let store = ObjectStore::builder()
//!     .config(StoreConfig::default().with_chunk_size(64 * 1024))
//!     .transport(Arc::new(MemoryTransport::new()))
//!     .build()?;
//!
//! let digest = store.put_bytes(&b"hello cairn"[..]).await?;
//! assert!(store.exists(&digest)?);
//! assert_eq!(&store.get(&digest).await?[..], b"hello cairn");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod manifest;
pub mod store;
pub mod transfer;

pub use catalog::{FileCatalog, InsertOutcome, ManifestCatalog, MemoryCatalog};
pub use config::{FailurePolicy, RetryPolicy, StoreConfig};
pub use error::{PartialFailure, Result, StoreError};
pub use manifest::{Chunk, ObjectManifest};
pub use store::{ObjectStore, ObjectStoreBuilder, StoreStats};
pub use transfer::{
    ChunkFailure, ChunkSource, FailureKind, ProgressObserver, TaskScheduler, TransferCoordinator,
    TransferHandle, TransferProgress, TransferState, TransferWorker,
};
