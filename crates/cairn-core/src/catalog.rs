//! Manifest persistence.
//!
//! The store only needs a durable digest -> manifest map with an atomic
//! insert-if-absent. Two implementations are provided: an in-memory map and
//! a directory of JSON files.

use crate::error::{Result, StoreError};
use crate::manifest::ObjectManifest;
use cairn_files::ContentDigest;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Result of registering a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This call registered the manifest
    Inserted,
    /// A manifest for the digest was already registered; nothing changed
    AlreadyPresent,
}

/// Durable mapping from object digest to manifest
pub trait ManifestCatalog: Send + Sync {
    /// Register `manifest` unless its digest is already present.
    ///
    /// Of several concurrent calls for one digest exactly one observes
    /// `Inserted`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be persisted.
    fn insert_if_absent(&self, manifest: ObjectManifest) -> Result<InsertOutcome>;

    /// Manifest registered for `digest`
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or is invalid.
    fn get(&self, digest: &ContentDigest) -> Result<Option<ObjectManifest>>;

    /// Whether a manifest is registered for `digest`
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    fn contains(&self, digest: &ContentDigest) -> Result<bool>;

    /// Unregister `digest`; returns whether it was present
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be removed.
    fn remove(&self, digest: &ContentDigest) -> Result<bool>;

    /// Number of registered manifests
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    fn len(&self) -> Result<usize>;

    /// Whether no manifest is registered
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Registered digests, sorted
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    fn digests(&self) -> Result<Vec<ContentDigest>>;
}

/// In-memory catalog
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    manifests: DashMap<ContentDigest, Arc<ObjectManifest>>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManifestCatalog for MemoryCatalog {
    fn insert_if_absent(&self, manifest: ObjectManifest) -> Result<InsertOutcome> {
        manifest.validate()?;
        match self.manifests.entry(manifest.object_digest) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyPresent),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(manifest));
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn get(&self, digest: &ContentDigest) -> Result<Option<ObjectManifest>> {
        Ok(self.manifests.get(digest).map(|m| m.as_ref().clone()))
    }

    fn contains(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.manifests.contains_key(digest))
    }

    fn remove(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.manifests.remove(digest).is_some())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.manifests.len())
    }

    fn digests(&self) -> Result<Vec<ContentDigest>> {
        let mut digests: Vec<_> = self.manifests.iter().map(|e| *e.key()).collect();
        digests.sort_unstable();
        Ok(digests)
    }
}

/// Catalog storing one JSON file per manifest in a directory.
///
/// Files are named `<algorithm>-<hex>.json`. A manifest is written to a
/// temp file and published with a hard link, which fails when the target
/// exists, so insert-if-absent stays atomic across processes.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    dir: PathBuf,
}

impl FileCatalog {
    /// Open (creating if needed) a catalog directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Catalog directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, digest: &ContentDigest) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", digest.algorithm(), digest.to_hex()))
    }

    fn parse_file_name(name: &str) -> Option<ContentDigest> {
        let stem = name.strip_suffix(".json")?;
        let (algorithm, hex) = stem.split_once('-')?;
        format!("{algorithm}:{hex}").parse().ok()
    }
}

impl ManifestCatalog for FileCatalog {
    fn insert_if_absent(&self, manifest: ObjectManifest) -> Result<InsertOutcome> {
        manifest.validate()?;
        let target = self.path_for(&manifest.object_digest);
        if target.exists() {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StoreError::Catalog(format!("failed to encode manifest: {e}")))?;
        let temp = self.dir.join(format!(".tmp.{}", Uuid::new_v4()));

        let published = (|| -> io::Result<InsertOutcome> {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            match fs::hard_link(&temp, &target) {
                Ok(()) => Ok(InsertOutcome::Inserted),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Ok(InsertOutcome::AlreadyPresent)
                }
                Err(e) => Err(e),
            }
        })();

        let _ = fs::remove_file(&temp);
        Ok(published?)
    }

    fn get(&self, digest: &ContentDigest) -> Result<Option<ObjectManifest>> {
        let bytes = match fs::read(self.path_for(digest)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: ObjectManifest = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Catalog(format!("failed to decode manifest {}: {e}", digest.short()))
        })?;
        if manifest.object_digest != *digest {
            return Err(StoreError::Manifest(format!(
                "file for {} holds manifest of {}",
                digest,
                manifest.object_digest
            )));
        }
        manifest.validate()?;
        Ok(Some(manifest))
    }

    fn contains(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.path_for(digest).try_exists()?)
    }

    fn remove(&self, digest: &ContentDigest) -> Result<bool> {
        match fs::remove_file(self.path_for(digest)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.digests()?.len())
    }

    fn digests(&self) -> Result<Vec<ContentDigest>> {
        let mut digests = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(digest) = entry.file_name().to_str().and_then(Self::parse_file_name) {
                digests.push(digest);
            }
        }
        digests.sort_unstable();
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Chunk;
    use cairn_files::HashAlgorithm;
    use cairn_transport::ChunkLocation;
    use std::thread;
    use tempfile::TempDir;

    fn manifest(content: &[u8]) -> ObjectManifest {
        let digest = ContentDigest::of(HashAlgorithm::Blake3, content);
        ObjectManifest::new(
            digest,
            vec![Chunk {
                index: 0,
                offset: 0,
                length: content.len() as u64,
                digest,
                location: ChunkLocation::new(format!("chunks/{}", digest.to_hex())),
            }],
        )
        .unwrap()
    }

    fn exercise(catalog: &dyn ManifestCatalog) {
        let a = manifest(b"alpha");
        let b = manifest(b"beta");

        assert!(catalog.is_empty().unwrap());
        assert_eq!(
            catalog.insert_if_absent(a.clone()).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            catalog.insert_if_absent(a.clone()).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        catalog.insert_if_absent(b.clone()).unwrap();

        assert!(catalog.contains(&a.object_digest).unwrap());
        assert_eq!(catalog.get(&a.object_digest).unwrap().unwrap(), a);
        assert_eq!(catalog.len().unwrap(), 2);

        let mut expected = vec![a.object_digest, b.object_digest];
        expected.sort_unstable();
        assert_eq!(catalog.digests().unwrap(), expected);

        assert!(catalog.remove(&a.object_digest).unwrap());
        assert!(!catalog.remove(&a.object_digest).unwrap());
        assert!(!catalog.contains(&a.object_digest).unwrap());
        assert!(catalog.get(&a.object_digest).unwrap().is_none());
    }

    #[test]
    fn test_memory_catalog() {
        exercise(&MemoryCatalog::new());
    }

    #[test]
    fn test_file_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = FileCatalog::open(dir.path()).unwrap();
        exercise(&catalog);

        // Temp files never linger
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_file_catalog_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let m = manifest(b"persisted");
        FileCatalog::open(dir.path())
            .unwrap()
            .insert_if_absent(m.clone())
            .unwrap();

        let reopened = FileCatalog::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&m.object_digest).unwrap().unwrap(), m);
    }

    #[test]
    fn test_file_catalog_rejects_mismatched_file() {
        let dir = TempDir::new().unwrap();
        let catalog = FileCatalog::open(dir.path()).unwrap();
        let a = manifest(b"a");
        let b = manifest(b"b");
        catalog.insert_if_absent(a.clone()).unwrap();
        fs::copy(catalog.path_for(&a.object_digest), catalog.path_for(&b.object_digest)).unwrap();

        assert!(matches!(
            catalog.get(&b.object_digest),
            Err(StoreError::Manifest(_))
        ));
    }

    #[test]
    fn test_invalid_manifest_not_inserted() {
        let catalog = MemoryCatalog::new();
        let mut m = manifest(b"broken");
        m.total_size += 1;
        assert!(catalog.insert_if_absent(m).is_err());
        assert_eq!(catalog.len().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_inserts_single_winner() {
        let dir = TempDir::new().unwrap();
        let catalogs: Vec<Arc<dyn ManifestCatalog>> = vec![
            Arc::new(MemoryCatalog::new()),
            Arc::new(FileCatalog::open(dir.path()).unwrap()),
        ];

        for catalog in catalogs {
            let m = manifest(b"raced");
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let catalog = Arc::clone(&catalog);
                    let m = m.clone();
                    thread::spawn(move || catalog.insert_if_absent(m).unwrap())
                })
                .collect();

            let inserted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|o| *o == InsertOutcome::Inserted)
                .count();
            assert_eq!(inserted, 1);
            assert_eq!(catalog.len().unwrap(), 1);
        }
    }
}
