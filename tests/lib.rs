//! Shared fixtures for the Cairn integration tests.

use cairn_core::{ObjectStore, RetryPolicy, StoreConfig};
use cairn_files::{ContentDigest, HashAlgorithm};
use cairn_transport::{ChunkLocation, ChunkLocator, ContentAddressedLocator, FaultyTransport, MemoryTransport};
use std::sync::Arc;

/// Chunk size used by most fixtures
pub const CHUNK: usize = 64;

/// Store config with small chunks and millisecond backoff
pub fn fast_config(workers: usize) -> StoreConfig {
    StoreConfig::default()
        .with_chunk_size(CHUNK)
        .with_workers(workers)
        .with_retry(RetryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 20,
            ..RetryPolicy::default()
        })
}

/// Deterministic, non-repeating payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 131 + i / 251) % 256) as u8).collect()
}

/// Where the default locator puts a chunk with these bytes
pub fn location_of(data: &[u8]) -> ChunkLocation {
    ContentAddressedLocator::default().locate(&ContentDigest::of(HashAlgorithm::Blake3, data), 0)
}

/// Memory-backed store behind a fault injector
pub fn faulty_store(config: StoreConfig) -> (ObjectStore, Arc<FaultyTransport>, Arc<MemoryTransport>) {
    let memory = Arc::new(MemoryTransport::new());
    let faulty = Arc::new(FaultyTransport::new(memory.clone()));
    let store = ObjectStore::builder()
        .config(config)
        .transport(faulty.clone())
        .build()
        .expect("valid store config");
    (store, faulty, memory)
}
