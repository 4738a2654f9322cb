//! Chunk planning for known and unknown length sources.
//!
//! Every chunk has exactly the target size except possibly the last, whose
//! length is in `(0, target]`. A zero-length chunk is never produced, so an
//! empty source plans to an empty chunk list.

use crate::DEFAULT_CHUNK_SIZE;
use crate::error::{FilesError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Byte range of one chunk within its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// 0-based position, contiguous with no gaps
    pub index: u64,
    /// Byte offset in the source
    pub offset: u64,
    /// Length in bytes (always > 0)
    pub length: u64,
}

impl ChunkRange {
    /// Offset one past the last byte of this range
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A planned range together with the bytes it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    /// Position of the bytes in the source
    pub range: ChunkRange,
    /// The chunk's bytes
    pub data: Vec<u8>,
}

/// Decides chunk boundaries for a fixed target chunk size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    chunk_size: usize,
}

impl ChunkPlanner {
    /// Create a planner
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidChunkSize` if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FilesError::InvalidChunkSize(chunk_size));
        }
        Ok(Self { chunk_size })
    }

    /// Target chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks a source of `total_size` bytes plans to
    #[must_use]
    pub fn num_chunks(&self, total_size: u64) -> u64 {
        total_size.div_ceil(self.chunk_size as u64)
    }

    /// Plan contiguous ranges covering `[0, total_size)`
    #[must_use]
    pub fn plan(&self, total_size: u64) -> Vec<ChunkRange> {
        let step = self.chunk_size as u64;
        (0..self.num_chunks(total_size))
            .map(|index| {
                let offset = index * step;
                ChunkRange {
                    index,
                    offset,
                    length: step.min(total_size - offset),
                }
            })
            .collect()
    }

    /// Range of chunk `index` within a source of `total_size` bytes
    ///
    /// # Errors
    ///
    /// Returns `FilesError::ChunkOutOfBounds` if the source has no such chunk.
    pub fn range_at(&self, total_size: u64, index: u64) -> Result<ChunkRange> {
        let total = self.num_chunks(total_size);
        if index >= total {
            return Err(FilesError::ChunkOutOfBounds { index, total });
        }
        let offset = index * self.chunk_size as u64;
        Ok(ChunkRange {
            index,
            offset,
            length: (self.chunk_size as u64).min(total_size - offset),
        })
    }

    /// Incremental chunker over a source of unknown length
    pub fn stream<R: Read>(&self, reader: R) -> StreamChunker<R> {
        StreamChunker {
            reader,
            chunk_size: self.chunk_size,
            next_index: 0,
            next_offset: 0,
            eof: false,
        }
    }
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Incremental chunker for streaming sources.
///
/// Each call to [`StreamChunker::next_chunk`] reads up to the target size,
/// looping over short reads so only the final chunk can be shorter.
pub struct StreamChunker<R> {
    reader: R,
    chunk_size: usize,
    next_index: u64,
    next_offset: u64,
    eof: bool,
}

impl<R: Read> StreamChunker<R> {
    /// Read the next chunk, or `None` at end of stream
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the source fails. Interrupted reads
    /// are retried.
    pub fn next_chunk(&mut self) -> io::Result<Option<PlannedChunk>> {
        if self.eof {
            return Ok(None);
        }

        let mut data = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let range = ChunkRange {
            index: self.next_index,
            offset: self.next_offset,
            length: filled as u64,
        };
        self.next_index += 1;
        self.next_offset += filled as u64;

        Ok(Some(PlannedChunk { range, data }))
    }

    /// Bytes consumed from the source so far
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.next_offset
    }

    /// Recover the wrapped reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for StreamChunker<R> {
    type Item = io::Result<PlannedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Seekable file source of known size
pub struct FileChunker {
    file: File,
    planner: ChunkPlanner,
    total_size: u64,
}

impl FileChunker {
    /// Open `path` for chunking
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata cannot be
    /// read.
    pub fn open<P: AsRef<Path>>(path: P, planner: ChunkPlanner) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();
        tracing::debug!(
            "Planning {}: {} bytes in {} chunks",
            path.display(),
            total_size,
            planner.num_chunks(total_size)
        );
        Ok(Self {
            file,
            planner,
            total_size,
        })
    }

    /// Total file size
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks in the file
    #[must_use]
    pub fn num_chunks(&self) -> u64 {
        self.planner.num_chunks(self.total_size)
    }

    /// Planned ranges for the whole file
    #[must_use]
    pub fn plan(&self) -> Vec<ChunkRange> {
        self.planner.plan(self.total_size)
    }

    /// Read the bytes of chunk `index`
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the read fails.
    pub fn read_chunk_at(&mut self, index: u64) -> Result<PlannedChunk> {
        let range = self.planner.range_at(self.total_size, index)?;
        self.file.seek(SeekFrom::Start(range.offset))?;

        let mut data = vec![0u8; range.length as usize];
        self.file.read_exact(&mut data)?;

        Ok(PlannedChunk { range, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn assert_covers(ranges: &[ChunkRange], total_size: u64, chunk_size: u64) {
        let mut expected_offset = 0;
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(r.index, i as u64);
            assert_eq!(r.offset, expected_offset);
            assert!(r.length > 0 && r.length <= chunk_size);
            if i + 1 < ranges.len() {
                assert_eq!(r.length, chunk_size);
            }
            expected_offset = r.end();
        }
        assert_eq!(expected_offset, total_size);
        assert_eq!(ranges.iter().map(|r| r.length).sum::<u64>(), total_size);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkPlanner::new(0),
            Err(FilesError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_empty_source_plans_nothing() {
        let planner = ChunkPlanner::new(16).unwrap();
        assert!(planner.plan(0).is_empty());
        assert_eq!(planner.num_chunks(0), 0);
        assert!(planner.stream(&[][..]).next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_exact_multiple_has_full_last_chunk() {
        let planner = ChunkPlanner::new(10).unwrap();
        let ranges = planner.plan(30);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].length, 10);
        assert_covers(&ranges, 30, 10);
    }

    #[test]
    fn test_short_last_chunk() {
        let planner = ChunkPlanner::new(10).unwrap();
        let ranges = planner.plan(25);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].offset, 20);
        assert_eq!(ranges[2].length, 5);
    }

    #[test]
    fn test_range_at_out_of_bounds() {
        let planner = ChunkPlanner::new(10).unwrap();
        assert_eq!(planner.range_at(25, 2).unwrap().length, 5);
        assert!(matches!(
            planner.range_at(25, 3),
            Err(FilesError::ChunkOutOfBounds { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_stream_chunker_fills_across_short_reads() {
        let data: Vec<u8> = (0..100u8).collect();
        let planner = ChunkPlanner::new(32).unwrap();
        let chunks: Vec<_> = planner
            .stream(Trickle {
                data: &data,
                step: 7,
            })
            .collect::<io::Result<_>>()
            .unwrap();

        let ranges: Vec<_> = chunks.iter().map(|c| c.range).collect();
        assert_eq!(ranges, planner.plan(100));

        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_stream_chunker_stops_after_eof() {
        let planner = ChunkPlanner::new(4).unwrap();
        let mut chunker = planner.stream(&b"abcdef"[..]);
        assert_eq!(chunker.next_chunk().unwrap().unwrap().data, b"abcd");
        assert_eq!(chunker.next_chunk().unwrap().unwrap().data, b"ef");
        assert!(chunker.next_chunk().unwrap().is_none());
        assert!(chunker.next_chunk().unwrap().is_none());
        assert_eq!(chunker.bytes_consumed(), 6);
    }

    #[test]
    fn test_file_chunker_reads_ranges() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let planner = ChunkPlanner::new(1024).unwrap();
        let mut chunker = FileChunker::open(temp_file.path(), planner).unwrap();
        assert_eq!(chunker.total_size(), 2500);
        assert_eq!(chunker.num_chunks(), 3);

        // Out of order reads seek correctly
        let last = chunker.read_chunk_at(2).unwrap();
        assert_eq!(last.range.offset, 2048);
        assert_eq!(last.data, &data[2048..]);

        let first = chunker.read_chunk_at(0).unwrap();
        assert_eq!(first.data, &data[..1024]);

        assert!(chunker.read_chunk_at(3).is_err());
    }

    proptest! {
        #[test]
        fn prop_plan_covers_source(total_size in 0u64..100_000, chunk_size in 1usize..5000) {
            let planner = ChunkPlanner::new(chunk_size).unwrap();
            let ranges = planner.plan(total_size);
            prop_assert_eq!(ranges.len() as u64, planner.num_chunks(total_size));
            assert_covers(&ranges, total_size, chunk_size as u64);
        }
    }
}
