//! Chunk location resolution.
//!
//! The store never builds storage keys itself; it asks a [`ChunkLocator`].
//! The default locator is content addressed, so identical chunk bytes from
//! different objects share one blob.

use crate::transport::ChunkLocation;
use cairn_files::ContentDigest;

/// Maps a chunk to the opaque location its bytes are stored at
pub trait ChunkLocator: Send + Sync {
    /// Location for the chunk with `digest` at position `index` of its object
    fn locate(&self, digest: &ContentDigest, index: u64) -> ChunkLocation;
}

/// Locator producing `<prefix>/<algorithm>/<first byte hex>/<digest hex>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAddressedLocator {
    prefix: String,
}

impl ContentAddressedLocator {
    /// Create a locator with the given key prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Key prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for ContentAddressedLocator {
    fn default() -> Self {
        Self::new("chunks")
    }
}

impl ChunkLocator for ContentAddressedLocator {
    fn locate(&self, digest: &ContentDigest, _index: u64) -> ChunkLocation {
        let hex = digest.to_hex();
        let fanout = &hex[..2];
        if self.prefix.is_empty() {
            ChunkLocation::new(format!("{}/{fanout}/{hex}", digest.algorithm()))
        } else {
            ChunkLocation::new(format!(
                "{}/{}/{fanout}/{hex}",
                self.prefix,
                digest.algorithm()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_files::HashAlgorithm;

    #[test]
    fn test_layout() {
        let digest = ContentDigest::of(HashAlgorithm::Blake3, b"chunk");
        let hex = digest.to_hex();
        let loc = ContentAddressedLocator::default().locate(&digest, 7);
        assert_eq!(
            loc.as_str(),
            format!("chunks/blake3/{}/{}", &hex[..2], hex)
        );
    }

    #[test]
    fn test_same_bytes_same_location() {
        let locator = ContentAddressedLocator::new("/objects/");
        assert_eq!(locator.prefix(), "objects");

        let digest = ContentDigest::of(HashAlgorithm::Sha256, b"dup");
        assert_eq!(locator.locate(&digest, 0), locator.locate(&digest, 9));
        assert!(locator.locate(&digest, 0).as_str().starts_with("objects/sha256/"));
    }

    #[test]
    fn test_empty_prefix() {
        let digest = ContentDigest::of(HashAlgorithm::Blake3, b"x");
        let loc = ContentAddressedLocator::new("").locate(&digest, 0);
        assert!(loc.as_str().starts_with("blake3/"));
    }
}
