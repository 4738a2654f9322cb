//! Local filesystem transport backend.
//!
//! Each location maps to a file below a root directory. Writes land in a
//! uniquely named temp file that is synced and then renamed over the target,
//! so readers never observe a partially written blob.

use crate::factory::TransportType;
use crate::transport::{
    ChunkLocation, ChunkTransport, StatsCounters, TransportError, TransportResult, TransportStats,
};
use async_trait::async_trait;
use bytes::Bytes;
use cairn_files::{ContentDigest, HashAlgorithm};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Transport storing one file per chunk location
#[derive(Debug)]
pub struct LocalFsTransport {
    root: PathBuf,
    stats: StatsCounters,
}

impl LocalFsTransport {
    /// Create a transport rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub async fn new(root: impl AsRef<Path>) -> TransportResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stats: StatsCounters::default(),
        })
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location to a path below the root.
    ///
    /// Only plain relative components are accepted.
    fn location_path(&self, location: &ChunkLocation) -> TransportResult<PathBuf> {
        let key = location.as_str();
        if key.is_empty() || key.contains('\\') {
            return Err(TransportError::InvalidLocation(key.to_string()));
        }

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(TransportError::InvalidLocation(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> TransportResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| TransportError::InvalidLocation(path.display().to_string()))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".tmp.{}", Uuid::new_v4()));
        let written: io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkTransport for LocalFsTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    async fn put_bytes(&self, location: &ChunkLocation, data: Bytes) -> TransportResult<String> {
        let len = data.len();
        let result: TransportResult<String> = async {
            let path = self.location_path(location)?;
            self.write_atomic(&path, &data).await?;
            Ok(ContentDigest::of(HashAlgorithm::Blake3, &data).to_hex())
        }
        .await;

        self.stats.record_put(len, &result);
        result
    }

    #[instrument(level = "trace", skip(self))]
    async fn get_bytes(&self, location: &ChunkLocation) -> TransportResult<Bytes> {
        let result: TransportResult<Bytes> = async {
            let path = self.location_path(location)?;
            match fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(TransportError::NotFound(location.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        }
        .await;

        self.stats.record_get(&result);
        result
    }

    async fn delete_bytes(&self, location: &ChunkLocation) -> TransportResult<()> {
        let path = self.location_path(location)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::LocalFs
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let transport = LocalFsTransport::new(dir.path()).await.unwrap();
        let loc = ChunkLocation::from("chunks/ab/abcdef");

        transport
            .put_bytes(&loc, Bytes::from_static(b"on disk"))
            .await
            .unwrap();

        assert!(dir.path().join("chunks/ab/abcdef").exists());
        assert_eq!(&transport.get_bytes(&loc).await.unwrap()[..], b"on disk");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let transport = LocalFsTransport::new(dir.path()).await.unwrap();
        let loc = ChunkLocation::from("blob");

        transport
            .put_bytes(&loc, Bytes::from_static(b"one"))
            .await
            .unwrap();
        transport
            .put_bytes(&loc, Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(&transport.get_bytes(&loc).await.unwrap()[..], b"two");
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("blob")]);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let transport = LocalFsTransport::new(dir.path()).await.unwrap();
        let result = transport.get_bytes(&ChunkLocation::from("nope")).await;
        assert!(matches!(result, Err(TransportError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let transport = LocalFsTransport::new(dir.path()).await.unwrap();

        for key in ["../escape", "/etc/passwd", "a/../../b", "", "a\\b", "./a"] {
            let result = transport
                .put_bytes(&ChunkLocation::from(key), Bytes::from_static(b"x"))
                .await;
            assert!(
                matches!(result, Err(TransportError::InvalidLocation(_))),
                "key {key:?} should be rejected"
            );
        }
        assert_eq!(transport.stats().put_errors, 6);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let transport = LocalFsTransport::new(dir.path()).await.unwrap();
        let loc = ChunkLocation::from("x/y");
        transport
            .put_bytes(&loc, Bytes::from_static(b"z"))
            .await
            .unwrap();

        transport.delete_bytes(&loc).await.unwrap();
        transport.delete_bytes(&loc).await.unwrap();
        assert!(transport.get_bytes(&loc).await.is_err());
    }
}
