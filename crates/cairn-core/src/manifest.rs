//! Object manifests.
//!
//! A manifest maps an object digest to the ordered chunks that hold its
//! bytes. The object digest is computed over the full byte stream, never
//! derived from the chunk digests, so a reassembled object can be verified
//! without knowing how it was chunked.

use crate::error::{Result, StoreError};
use cairn_files::{ChunkRange, ContentDigest};
use cairn_transport::ChunkLocation;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One stored chunk of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position within the object
    pub index: u64,
    /// Byte offset within the object
    pub offset: u64,
    /// Length in bytes (always > 0)
    pub length: u64,
    /// Digest of this chunk's bytes
    pub digest: ContentDigest,
    /// Where the chunk's bytes are stored
    pub location: ChunkLocation,
}

impl Chunk {
    /// Byte range covered by the chunk
    #[must_use]
    pub fn range(&self) -> ChunkRange {
        ChunkRange {
            index: self.index,
            offset: self.offset,
            length: self.length,
        }
    }
}

/// Record of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectManifest {
    /// Digest of the full object bytes
    pub object_digest: ContentDigest,
    /// Sum of chunk lengths
    pub total_size: u64,
    /// Chunks ordered by index
    pub chunks: Vec<Chunk>,
    /// When the manifest was assembled
    pub created_at: SystemTime,
}

impl ObjectManifest {
    /// Assemble a manifest, sorting chunks by index and validating them
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Manifest` if the chunks have gaps, overlap or
    /// contain an empty chunk.
    pub fn new(object_digest: ContentDigest, mut chunks: Vec<Chunk>) -> Result<Self> {
        chunks.sort_by_key(|c| c.index);
        let total_size = chunks.iter().map(|c| c.length).sum();
        let manifest = Self {
            object_digest,
            total_size,
            chunks,
            created_at: SystemTime::now(),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the chunk invariants.
    ///
    /// Indices run 0..n without gaps, each offset equals the sum of the
    /// lengths before it, no chunk is empty and the lengths add up to
    /// `total_size`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Manifest` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut offset = 0u64;
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position as u64 {
                return Err(StoreError::Manifest(format!(
                    "{}: expected chunk {position}, found {}",
                    self.object_digest.short(),
                    chunk.index
                )));
            }
            if chunk.length == 0 {
                return Err(StoreError::Manifest(format!(
                    "{}: chunk {} is empty",
                    self.object_digest.short(),
                    chunk.index
                )));
            }
            if chunk.offset != offset {
                return Err(StoreError::Manifest(format!(
                    "{}: chunk {} starts at {}, expected {offset}",
                    self.object_digest.short(),
                    chunk.index,
                    chunk.offset
                )));
            }
            offset += chunk.length;
        }

        if offset != self.total_size {
            return Err(StoreError::Manifest(format!(
                "{}: chunks cover {offset} bytes, total_size is {}",
                self.object_digest.short(),
                self.total_size
            )));
        }
        Ok(())
    }

    /// Number of chunks
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Byte ranges of all chunks, in index order
    #[must_use]
    pub fn ranges(&self) -> Vec<ChunkRange> {
        self.chunks.iter().map(Chunk::range).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_files::HashAlgorithm;

    fn chunk(index: u64, offset: u64, length: u64) -> Chunk {
        let digest = ContentDigest::of(HashAlgorithm::Blake3, &index.to_le_bytes());
        Chunk {
            index,
            offset,
            length,
            digest,
            location: ChunkLocation::new(format!("chunks/{index}")),
        }
    }

    fn object() -> ContentDigest {
        ContentDigest::of(HashAlgorithm::Blake3, b"object")
    }

    #[test]
    fn test_new_sorts_and_sums() {
        let manifest =
            ObjectManifest::new(object(), vec![chunk(2, 20, 5), chunk(0, 0, 10), chunk(1, 10, 10)])
                .unwrap();
        assert_eq!(manifest.total_size, 25);
        assert_eq!(
            manifest.chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(manifest.ranges()[2].end(), 25);
    }

    #[test]
    fn test_rejects_gaps_and_overlaps() {
        assert!(ObjectManifest::new(object(), vec![chunk(0, 0, 10), chunk(2, 10, 10)]).is_err());
        assert!(ObjectManifest::new(object(), vec![chunk(0, 0, 10), chunk(1, 5, 10)]).is_err());
        assert!(ObjectManifest::new(object(), vec![chunk(0, 0, 0)]).is_err());
    }

    #[test]
    fn test_total_size_mismatch() {
        let mut manifest = ObjectManifest::new(object(), vec![chunk(0, 0, 10)]).unwrap();
        manifest.total_size = 11;
        assert!(matches!(manifest.validate(), Err(StoreError::Manifest(_))));
    }

    #[test]
    fn test_empty_manifest_is_valid() {
        let manifest = ObjectManifest::new(object(), Vec::new()).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.num_chunks(), 0);
        assert_eq!(manifest.total_size, 0);
    }

    #[test]
    fn test_json_roundtrip() {
        let manifest = ObjectManifest::new(object(), vec![chunk(0, 0, 3)]).unwrap();
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"chunks/0\""));
        let back: ObjectManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
