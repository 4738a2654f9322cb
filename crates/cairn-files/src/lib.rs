//! # Cairn Files
//!
//! Byte-level engine for the Cairn object store.
//!
//! This crate provides:
//! - Content digests with an algorithm tag (BLAKE3, SHA-256)
//! - Incremental hashing with streaming equivalence
//! - Chunk planning for known and unknown length sources
//! - Out-of-order reassembly into memory or a pre-sized file

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod digest;
pub mod error;
pub mod hasher;
pub mod reassembly;

pub use chunker::{ChunkPlanner, ChunkRange, FileChunker, PlannedChunk, StreamChunker};
pub use digest::{ContentDigest, DigestParseError, HashAlgorithm};
pub use error::{FilesError, Result};
pub use hasher::{Hasher, HashingReader};
pub use reassembly::{OffsetSink, Reassembler};

/// Default chunk size (8 MiB).
///
/// Matches the common multipart part size of object stores, so a chunk maps
/// onto a single backend PUT without further splitting.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Smallest chunk size accepted by configuration loaders (4 KiB).
///
/// `ChunkPlanner` itself accepts any non-zero size; tests rely on tiny chunks.
pub const MIN_RECOMMENDED_CHUNK_SIZE: usize = 4 * 1024;
