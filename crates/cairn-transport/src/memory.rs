//! In-memory transport backend.
//!
//! Blobs live in a concurrent map keyed by location. Besides embedding, this
//! backend is what tests run against: `tamper` rewrites a stored blob in
//! place to simulate corruption at rest.

use crate::factory::TransportType;
use crate::transport::{
    ChunkLocation, ChunkTransport, StatsCounters, TransportError, TransportResult, TransportStats,
};
use async_trait::async_trait;
use bytes::Bytes;
use cairn_files::{ContentDigest, HashAlgorithm};
use dashmap::DashMap;

/// Transport backed by a concurrent in-memory map
#[derive(Debug, Default)]
pub struct MemoryTransport {
    blobs: DashMap<ChunkLocation, Bytes>,
    stats: StatsCounters,
}

impl MemoryTransport {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether no blobs are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Whether a blob exists at `location`
    #[must_use]
    pub fn contains(&self, location: &ChunkLocation) -> bool {
        self.blobs.contains_key(location)
    }

    /// Replace the stored bytes at `location` without going through the
    /// transport API. Returns `false` if nothing was stored there.
    pub fn tamper(&self, location: &ChunkLocation, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.blobs.get_mut(location) {
            Some(mut entry) => {
                let mut bytes = entry.to_vec();
                f(&mut bytes);
                *entry = Bytes::from(bytes);
                true
            }
            None => false,
        }
    }

    /// Stored locations, sorted
    #[must_use]
    pub fn locations(&self) -> Vec<ChunkLocation> {
        let mut locations: Vec<_> = self.blobs.iter().map(|e| e.key().clone()).collect();
        locations.sort();
        locations
    }
}

#[async_trait]
impl ChunkTransport for MemoryTransport {
    async fn put_bytes(&self, location: &ChunkLocation, data: Bytes) -> TransportResult<String> {
        let len = data.len();
        let etag = ContentDigest::of(HashAlgorithm::Blake3, &data).to_hex();
        self.blobs.insert(location.clone(), data);

        let result = Ok(etag);
        self.stats.record_put(len, &result);
        result
    }

    async fn get_bytes(&self, location: &ChunkLocation) -> TransportResult<Bytes> {
        let result = self
            .blobs
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::NotFound(location.to_string()));
        self.stats.record_get(&result);
        result
    }

    async fn delete_bytes(&self, location: &ChunkLocation) -> TransportResult<()> {
        self.blobs.remove(location);
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
