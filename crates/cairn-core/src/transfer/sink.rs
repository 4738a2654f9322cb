//! Destinations for downloaded chunks.

use crate::error::{Result, StoreError};
use crate::manifest::Chunk;
use cairn_files::{OffsetSink, Reassembler};
use std::sync::{Mutex, PoisonError};

/// Accepts downloaded chunk bytes, in any order, from concurrent workers
pub trait ChunkSink: Send + Sync {
    /// Write `data` as the bytes of `chunk`
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk does not fit the sink or the write fails.
    fn write_chunk(&self, chunk: &Chunk, data: &[u8]) -> Result<()>;
}

/// Shares a [`Reassembler`] between download workers
pub struct ReassemblySink<S> {
    inner: Mutex<Option<Reassembler<S>>>,
}

impl<S: OffsetSink + Send> ReassemblySink<S> {
    /// Wrap a reassembler
    pub fn new(reassembler: Reassembler<S>) -> Self {
        Self {
            inner: Mutex::new(Some(reassembler)),
        }
    }

    /// Chunks written so far
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Reassembler::received_count)
    }

    /// Take the reassembled output once every chunk has arrived
    ///
    /// # Errors
    ///
    /// Returns an error if chunks are missing or the sink was already
    /// finished.
    pub fn finish(&self) -> Result<S> {
        let reassembler = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| StoreError::Manifest("reassembly already finished".into()))?;
        Ok(reassembler.finish()?)
    }
}

impl<S: OffsetSink + Send> ChunkSink for ReassemblySink<S> {
    fn write_chunk(&self, chunk: &Chunk, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let reassembler = guard
            .as_mut()
            .ok_or_else(|| StoreError::Manifest("reassembly already finished".into()))?;
        reassembler.write_chunk(chunk.index, data)?;
        Ok(())
    }
}
