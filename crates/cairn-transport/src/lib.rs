//! # Cairn Transport
//!
//! Chunk transport layer for the Cairn object store.
//!
//! This crate provides:
//! - `ChunkTransport` trait: PUT bytes at a location, GET bytes from a location
//! - Error taxonomy separating transient failures from permanent ones
//! - In-memory backend for tests and embedding
//! - Local filesystem backend with atomic writes
//! - HTTP backend for S3-like blob endpoints
//! - Fault-injecting wrapper for failure testing
//! - Location resolution and configuration-based construction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod factory;
pub mod fault;
pub mod http;
pub mod localfs;
pub mod locator;
pub mod memory;
pub mod transport;

pub use factory::{TransportFactory, TransportFactoryConfig, TransportType};
pub use fault::{Fault, FaultyTransport};
pub use http::HttpTransport;
pub use localfs::LocalFsTransport;
pub use locator::{ChunkLocator, ContentAddressedLocator};
pub use memory::MemoryTransport;
pub use transport::{
    ChunkLocation, ChunkTransport, StatsCounters, TransportError, TransportResult, TransportStats,
};
