//! Upload sources pulled by the coordinator as a transfer proceeds.
//!
//! Sources backed by files or readers do their I/O on tokio's blocking
//! pool through [`BlockingReader`], so a slow disk or pipe never stalls the
//! runtime threads that drive chunk transfers.

use crate::error::{Result, StoreError};
use crate::transfer::task::UploadChunk;
use std::future::Future;
use std::io;

/// Yields upload chunks in index order
pub trait ChunkSource: Send {
    /// Next chunk, or `None` once the source is exhausted
    fn next_chunk(&mut self) -> impl Future<Output = Option<Result<UploadChunk>>> + Send;

    /// Number of chunks this source yields, when known up front
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// Source over chunks that are already in memory
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<UploadChunk>> + Send,
{
    /// Wrap anything iterable over prepared chunks
    pub fn new<T>(items: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<I> ChunkSource for IterSource<I>
where
    I: Iterator<Item = Result<UploadChunk>> + Send,
{
    fn next_chunk(&mut self) -> impl Future<Output = Option<Result<UploadChunk>>> + Send {
        std::future::ready(self.iter.next())
    }

    fn len_hint(&self) -> Option<u64> {
        match self.iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(upper as u64),
            _ => None,
        }
    }
}

/// Runs reads against owned reader state on the blocking pool.
///
/// The state moves into the blocking task for each read and comes back with
/// the result. A read whose task panicked leaves the reader empty and every
/// later read fails.
pub struct BlockingReader<S> {
    state: Option<S>,
}

impl<S: Send + 'static> BlockingReader<S> {
    /// Take ownership of the reader state
    pub fn new(state: S) -> Self {
        Self { state: Some(state) }
    }

    /// Run `read` against the state on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns the error `read` produced, or `StoreError::Io` if the reader
    /// was lost to an earlier panic.
    pub async fn read<T, E, F>(&mut self, read: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<StoreError> + Send + 'static,
    {
        let mut state = self.state.take().ok_or_else(reader_lost)?;
        let (state, out) = tokio::task::spawn_blocking(move || {
            let out = read(&mut state);
            (state, out)
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?;
        self.state = Some(state);
        out.map_err(Into::into)
    }

    /// Give the state back
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the reader was lost to a panicked read.
    pub fn into_inner(self) -> Result<S> {
        self.state.ok_or_else(reader_lost)
    }
}

fn reader_lost() -> StoreError {
    StoreError::Io(io::Error::other("chunk reader lost after a failed read"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_iter_source_reports_exact_length() {
        let mut source = IterSource::new(Vec::<Result<UploadChunk>>::new());
        assert_eq!(source.len_hint(), Some(0));
        assert!(source.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_blocking_read_leaves_runtime_free() {
        // Current-thread runtime: the sender only runs if the read is elsewhere
        let (tx, rx) = mpsc::channel::<()>();
        tokio::spawn(async move {
            let _ = tx.send(());
        });

        let mut reader = BlockingReader::new(io::Cursor::new(b"gated".to_vec()));
        let text = reader
            .read(move |cursor| -> io::Result<String> {
                rx.recv_timeout(Duration::from_secs(5))
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "runtime was blocked"))?;
                let mut text = String::new();
                cursor.read_to_string(&mut text)?;
                Ok(text)
            })
            .await
            .unwrap();

        assert_eq!(text, "gated");
        assert_eq!(reader.into_inner().unwrap().position(), 5);
    }

    #[tokio::test]
    async fn test_panicked_read_loses_reader() {
        let mut reader = BlockingReader::new(0u32);
        let panicked = reader
            .read(|_| -> io::Result<()> { panic!("reader exploded") })
            .await;
        assert!(matches!(panicked, Err(StoreError::Io(_))));
        assert!(matches!(
            reader.read(|n| -> io::Result<u32> { Ok(*n) }).await,
            Err(StoreError::Io(_))
        ));
        assert!(reader.into_inner().is_err());
    }
}
