//! Content-addressed object store
//!
//! `ObjectStore` is the public put/get/exists/delete surface. It chunks and
//! hashes input, hands chunk transfers to a [`TransferCoordinator`] and only
//! registers a manifest once every chunk has been stored.
//!
//! # Put Flow
//!
//! ```text
//! source ──> HashingReader ──> StreamChunker ──> chunk digest + locate
//!                 │                                      │
//!                 │                              TransferCoordinator
//!                 ▼                                      │
//!           object digest ──────> insert_if_absent <── chunks (by index)
//! ```
//!
//! Known-size sources (`put_bytes`, `put_file`) are hashed first, so an
//! object that is already registered costs no chunk transfers at all.
//! Reader and file input is read on the blocking pool one chunk at a time,
//! and so are writes into a downloaded file.

use crate::catalog::{InsertOutcome, ManifestCatalog, MemoryCatalog};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::manifest::{Chunk, ObjectManifest};
use crate::transfer::{
    BlockingReader, ChunkSink, ChunkSource, IterSource, ProgressObserver, ReassemblySink,
    TaskScheduler, TransferCoordinator, TransferHandle, TransferWorker, UploadChunk,
};
use bytes::Bytes;
use cairn_files::{
    ChunkPlanner, ChunkRange, ContentDigest, FileChunker, Hasher, HashingReader, PlannedChunk,
    Reassembler, StreamChunker,
};
use cairn_transport::{ChunkLocator, ChunkTransport, ContentAddressedLocator};
use std::fs::File;
use std::future::Future;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Objects newly registered
    pub puts: u64,
    /// Puts that found their object already registered
    pub dedup_hits: u64,
    /// Successful gets
    pub gets: u64,
    /// Manifests removed
    pub deletes: u64,
    /// Bytes of chunks the transport accepted, counted per chunk and
    /// including puts that later failed or lost a registration race
    pub bytes_uploaded: u64,
    /// Object bytes returned by gets
    pub bytes_downloaded: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    puts: AtomicU64,
    dedup_hits: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl StoreCounters {
    fn snapshot(&self) -> StoreStats {
        StoreStats {
            puts: self.puts.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

/// Chunks of a byte stream, hashed as they are read
struct StreamSource<'a, R> {
    store: &'a ObjectStore,
    reader: BlockingReader<StreamChunker<HashingReader<R>>>,
}

impl<R: Read + Send + 'static> ChunkSource for StreamSource<'_, R> {
    fn next_chunk(&mut self) -> impl Future<Output = Option<Result<UploadChunk>>> + Send {
        async move {
            match self.reader.read(StreamChunker::next_chunk).await {
                Ok(Some(planned)) => Some(Ok(self.store.prepare(planned))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        }
    }
}

/// Chunks of a file read at their offsets, re-hashed to catch changes
struct FileSource<'a> {
    store: &'a ObjectStore,
    reader: BlockingReader<(FileChunker, Hasher)>,
    next: u64,
    total: u64,
}

impl ChunkSource for FileSource<'_> {
    fn next_chunk(&mut self) -> impl Future<Output = Option<Result<UploadChunk>>> + Send {
        async move {
            if self.next >= self.total {
                return None;
            }
            let index = self.next;
            self.next += 1;
            let read = self
                .reader
                .read(move |(chunker, rehash)| -> cairn_files::Result<PlannedChunk> {
                    let planned = chunker.read_chunk_at(index)?;
                    rehash.update(&planned.data);
                    Ok(planned)
                })
                .await;
            Some(read.map(|planned| self.store.prepare(planned)))
        }
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// Builder for [`ObjectStore`]
#[derive(Default)]
pub struct ObjectStoreBuilder {
    config: StoreConfig,
    transport: Option<Arc<dyn ChunkTransport>>,
    locator: Option<Arc<dyn ChunkLocator>>,
    catalog: Option<Arc<dyn ManifestCatalog>>,
    scheduler: Option<Arc<TaskScheduler>>,
}

impl ObjectStoreBuilder {
    /// Store configuration (defaults otherwise)
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend chunk bytes are stored in (required)
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn ChunkTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Chunk location scheme (content addressed under `chunks/` otherwise)
    #[must_use]
    pub fn locator(mut self, locator: Arc<dyn ChunkLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Manifest catalog (in-memory otherwise)
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ManifestCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Scheduler shared with other stores (one sized by `config.workers`
    /// otherwise)
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the store
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfiguration` if the configuration is
    /// invalid or no transport was set.
    pub fn build(self) -> Result<ObjectStore> {
        self.config.validate()?;
        let transport = self.transport.ok_or_else(|| {
            StoreError::InvalidConfiguration("object store needs a transport".into())
        })?;
        let planner = ChunkPlanner::new(self.config.chunk_size)
            .map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TaskScheduler::new(self.config.workers)?),
        };
        let worker = Arc::new(TransferWorker::new(
            Arc::clone(&transport),
            self.config.retry.clone(),
        ));

        tracing::debug!(
            "Object store: {} transport, chunk_size={}, workers={}, {:?}",
            transport.transport_type(),
            self.config.chunk_size,
            scheduler.workers(),
            self.config.failure_policy
        );

        Ok(ObjectStore {
            config: self.config,
            planner,
            transport,
            locator: self
                .locator
                .unwrap_or_else(|| Arc::new(ContentAddressedLocator::default())),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(MemoryCatalog::new())),
            scheduler,
            worker,
            counters: StoreCounters::default(),
        })
    }
}

/// Content-addressed object store
pub struct ObjectStore {
    config: StoreConfig,
    planner: ChunkPlanner,
    transport: Arc<dyn ChunkTransport>,
    locator: Arc<dyn ChunkLocator>,
    catalog: Arc<dyn ManifestCatalog>,
    scheduler: Arc<TaskScheduler>,
    worker: Arc<TransferWorker>,
    counters: StoreCounters,
}

impl ObjectStore {
    /// Start building a store
    #[must_use]
    pub fn builder() -> ObjectStoreBuilder {
        ObjectStoreBuilder::default()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared scheduler
    #[must_use]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Chunk transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ChunkTransport> {
        &self.transport
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    fn coordinator(
        &self,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> TransferCoordinator {
        let coordinator = TransferCoordinator::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.worker),
            self.config.failure_policy,
        )
        .with_handle(handle.clone());
        match observer {
            Some(observer) => coordinator.with_observer(observer),
            None => coordinator,
        }
    }

    /// Digest the chunk, resolve its location and pair it with its bytes
    fn prepare_chunk(&self, range: ChunkRange, data: Bytes) -> UploadChunk {
        let digest = ContentDigest::of(self.config.hash_algorithm, &data);
        UploadChunk {
            chunk: Chunk {
                index: range.index,
                offset: range.offset,
                length: range.length,
                digest,
                location: self.locator.locate(&digest, range.index),
            },
            data,
        }
    }

    fn prepare(&self, planned: PlannedChunk) -> UploadChunk {
        self.prepare_chunk(planned.range, planned.data.into())
    }

    /// Upload through a fresh coordinator and count what it moved
    async fn upload<S: ChunkSource>(
        &self,
        source: &mut S,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<Vec<Chunk>> {
        let coordinator = self.coordinator(handle, observer);
        let uploaded = coordinator.upload(source).await;
        self.counters
            .bytes_uploaded
            .fetch_add(coordinator.bytes_transferred(), Ordering::Relaxed);
        uploaded
    }

    fn dedup_hit(&self, digest: &ContentDigest) {
        self.counters.dedup_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Object {} already stored, skipping upload", digest.short());
    }

    /// Register a fully uploaded object
    fn register(&self, manifest: ObjectManifest) -> Result<ContentDigest> {
        let digest = manifest.object_digest;
        let size = manifest.total_size;
        let chunks = manifest.num_chunks();

        match self.catalog.insert_if_absent(manifest)? {
            InsertOutcome::Inserted => {
                self.counters.puts.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Stored object {} ({} bytes, {} chunks)",
                    digest.short(),
                    size,
                    chunks
                );
            }
            InsertOutcome::AlreadyPresent => {
                // A concurrent put won; our chunk blobs are simply unreferenced
                self.counters.dedup_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Object {} registered concurrently, keeping existing manifest",
                    digest.short()
                );
            }
        }
        Ok(digest)
    }

    /// Store a byte stream of unknown length
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::put_with`].
    pub async fn put<R: Read + Send + 'static>(&self, reader: R) -> Result<ContentDigest> {
        self.put_with(reader, &TransferHandle::new(), None).await
    }

    /// Store a byte stream, with cancellation and progress reporting.
    ///
    /// The stream is hashed and chunked in one pass on the blocking pool;
    /// chunks upload while later ones are still being read. The manifest is
    /// registered only after every chunk is stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PartialFailure` if chunks failed,
    /// `StoreError::Cancelled` if `handle` was cancelled, or
    /// `StoreError::Io` if reading the source failed.
    pub async fn put_with<R: Read + Send + 'static>(
        &self,
        reader: R,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<ContentDigest> {
        let chunker = self
            .planner
            .stream(HashingReader::new(reader, self.config.hash_algorithm));
        let mut source = StreamSource {
            store: self,
            reader: BlockingReader::new(chunker),
        };
        let chunks = self.upload(&mut source, handle, observer).await?;

        let digest = source.reader.into_inner()?.into_inner().finalize();
        self.register(ObjectManifest::new(digest, chunks)?)
    }

    /// Store an in-memory object
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PartialFailure` if chunks failed.
    pub async fn put_bytes(&self, data: impl Into<Bytes>) -> Result<ContentDigest> {
        let data: Bytes = data.into();
        let digest = ContentDigest::of(self.config.hash_algorithm, &data);
        if self.catalog.contains(&digest)? {
            self.dedup_hit(&digest);
            return Ok(digest);
        }

        let uploads: Vec<Result<UploadChunk>> = self
            .planner
            .plan(data.len() as u64)
            .into_iter()
            .map(|range| {
                let bytes = data.slice(range.offset as usize..range.end() as usize);
                Ok(self.prepare_chunk(range, bytes))
            })
            .collect();

        let chunks = self
            .upload(&mut IterSource::new(uploads), &TransferHandle::new(), None)
            .await?;
        self.register(ObjectManifest::new(digest, chunks)?)
    }

    /// Store a file
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::put_file_with`].
    pub async fn put_file(&self, path: impl AsRef<Path>) -> Result<ContentDigest> {
        self.put_file_with(path, &TransferHandle::new(), None).await
    }

    /// Store a file, with cancellation and progress reporting.
    ///
    /// The file is hashed before any chunk is planned, so an already stored
    /// file is not uploaded again. Chunks are then read at their offsets on
    /// the blocking pool while uploading.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read or changed while
    /// it was uploaded, `StoreError::PartialFailure` if chunks failed, or
    /// `StoreError::Cancelled`.
    pub async fn put_file_with(
        &self,
        path: impl AsRef<Path>,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<ContentDigest> {
        let path = path.as_ref().to_path_buf();
        let algorithm = self.config.hash_algorithm;
        let digest = hash_file(path.clone(), algorithm).await?;
        if self.catalog.contains(&digest)? {
            self.dedup_hit(&digest);
            return Ok(digest);
        }

        let file_chunker = FileChunker::open(&path, self.planner)?;
        let mut source = FileSource {
            store: self,
            total: file_chunker.num_chunks(),
            reader: BlockingReader::new((file_chunker, Hasher::new(algorithm))),
            next: 0,
        };
        let chunks = self.upload(&mut source, handle, observer).await?;

        let (_, rehash) = source.reader.into_inner()?;
        let reread = rehash.finalize();
        if reread != digest {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} changed while it was being stored", path.display()),
            )));
        }
        self.register(ObjectManifest::new(digest, chunks)?)
    }

    /// Fetch and verify an object
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::get_with`].
    pub async fn get(&self, digest: &ContentDigest) -> Result<Bytes> {
        self.get_with(digest, &TransferHandle::new(), None).await
    }

    /// Fetch an object into memory, with cancellation and progress reporting.
    ///
    /// Chunks are downloaded concurrently and written at their offsets. The
    /// reassembled bytes are hashed and compared to `digest` before they are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no manifest is registered,
    /// `StoreError::DataCorruption` if a chunk or the reassembled object
    /// fails verification, `StoreError::PartialFailure` if chunks could not
    /// be fetched, or `StoreError::Cancelled`.
    pub async fn get_with(
        &self,
        digest: &ContentDigest,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<Bytes> {
        let manifest = self.manifest(digest)?;
        let sink = Arc::new(ReassemblySink::new(Reassembler::in_memory(
            manifest.ranges(),
        )?));
        self.download(&manifest, sink.clone(), handle, observer)
            .await?;

        let data = sink.finish()?;
        let actual = ContentDigest::of(digest.algorithm(), &data);
        verify(digest, actual)?;

        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_downloaded
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(Bytes::from(data))
    }

    /// Fetch and verify an object into a file; returns its size
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::get_to_file_with`].
    pub async fn get_to_file(&self, digest: &ContentDigest, path: impl AsRef<Path>) -> Result<u64> {
        self.get_to_file_with(digest, path, &TransferHandle::new(), None)
            .await
    }

    /// Fetch an object into a file at `path`.
    ///
    /// The file is pre-sized and chunks are written at their offsets as they
    /// arrive. The finished file is re-read and verified; on any failure it
    /// is removed.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::get_with`], plus `StoreError::Io` for file
    /// errors.
    pub async fn get_to_file_with(
        &self,
        digest: &ContentDigest,
        path: impl AsRef<Path>,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<u64> {
        let path = path.as_ref().to_path_buf();
        let manifest = self.manifest(digest)?;
        let sink = Arc::new(ReassemblySink::new(Reassembler::create_file(
            &path,
            manifest.ranges(),
        )?));

        let fetched: Result<()> = async {
            self.download(&manifest, sink.clone(), handle, observer)
                .await?;
            let finishing = Arc::clone(&sink);
            tokio::task::spawn_blocking(move || finishing.finish().map(drop))
                .await
                .map_err(|e| StoreError::Io(io::Error::other(e)))??;
            let actual = hash_file(path.clone(), digest.algorithm()).await?;
            verify(digest, actual)
        }
        .await;

        if let Err(e) = fetched {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_downloaded
            .fetch_add(manifest.total_size, Ordering::Relaxed);
        Ok(manifest.total_size)
    }

    async fn download(
        &self,
        manifest: &ObjectManifest,
        sink: Arc<dyn ChunkSink>,
        handle: &TransferHandle,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<()> {
        match self
            .coordinator(handle, observer)
            .download(manifest, sink)
            .await
        {
            Err(StoreError::PartialFailure(failure)) => match failure.corruption() {
                Some(corrupt) => {
                    tracing::error!(
                        "Object {} chunk {} failed verification",
                        manifest.object_digest.short(),
                        corrupt.index
                    );
                    Err(corrupt.to_error())
                }
                None => Err(StoreError::PartialFailure(failure)),
            },
            other => other,
        }
    }

    /// Whether an object is registered; no chunk is touched
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    pub fn exists(&self, digest: &ContentDigest) -> Result<bool> {
        self.catalog.contains(digest)
    }

    /// Unregister an object; returns whether it was registered.
    ///
    /// Chunk blobs are left in place for a separate garbage collector.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be updated.
    pub fn delete(&self, digest: &ContentDigest) -> Result<bool> {
        let removed = self.catalog.remove(digest)?;
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Deleted object {}", digest.short());
        }
        Ok(removed)
    }

    /// Manifest registered for `digest`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if none is registered.
    pub fn manifest(&self, digest: &ContentDigest) -> Result<ObjectManifest> {
        self.catalog
            .get(digest)?
            .ok_or(StoreError::NotFound(*digest))
    }

    /// Digests of all registered objects, sorted
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    pub fn list(&self) -> Result<Vec<ContentDigest>> {
        self.catalog.digests()
    }
}

fn verify(expected: &ContentDigest, actual: ContentDigest) -> Result<()> {
    if actual != *expected {
        tracing::error!(
            "Object {} reassembled to {}; refusing corrupted data",
            expected.short(),
            actual.short()
        );
        return Err(StoreError::DataCorruption {
            expected: *expected,
            actual,
            chunk: None,
        });
    }
    Ok(())
}

async fn hash_file(path: PathBuf, algorithm: cairn_files::HashAlgorithm) -> Result<ContentDigest> {
    tokio::task::spawn_blocking(move || -> Result<ContentDigest> {
        let mut reader = HashingReader::new(File::open(&path)?, algorithm);
        io::copy(&mut reader, &mut io::sink())?;
        Ok(reader.finalize())
    })
    .await
    .map_err(|e| StoreError::Io(io::Error::other(e)))?
}
