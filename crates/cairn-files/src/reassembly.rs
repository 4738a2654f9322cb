//! Out-of-order reassembly of chunked objects.
//!
//! Chunks may arrive in any order; each is written at its planned offset.
//! Received chunks are tracked in a bitmap so completion checks are O(1) and
//! missing-chunk queries cost O(missing).

use crate::chunker::ChunkRange;
use crate::error::{FilesError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// Destination that accepts writes at absolute offsets
pub trait OffsetSink {
    /// Write `data` starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Flush written data to durable storage
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OffsetSink for Vec<u8> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start + data.len();
        if end > self.len() {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(data);
        Ok(())
    }
}

impl OffsetSink for File {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Reassembles planned chunks into a sink
pub struct Reassembler<S> {
    sink: S,
    ranges: Vec<ChunkRange>,
    total_size: u64,
    /// Bit set per received chunk: bitmap[idx / 64] & (1 << (idx % 64))
    chunk_bitmap: Vec<u64>,
    received_count: u64,
}

impl Reassembler<Vec<u8>> {
    /// Reassemble into a zeroed in-memory buffer
    ///
    /// # Errors
    ///
    /// Returns an error if `ranges` are not contiguous from offset 0.
    pub fn in_memory(ranges: Vec<ChunkRange>) -> Result<Self> {
        let total_size = validate_ranges(&ranges)?;
        let len = usize::try_from(total_size).map_err(|_| {
            FilesError::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "object too large for an in-memory buffer",
            ))
        })?;
        Ok(Self::with_sink(vec![0u8; len], ranges, total_size))
    }
}

impl Reassembler<File> {
    /// Reassemble into a file at `path`, truncated and pre-sized
    ///
    /// # Errors
    ///
    /// Returns an error if the ranges are invalid or the file cannot be
    /// created.
    pub fn create_file<P: AsRef<Path>>(path: P, ranges: Vec<ChunkRange>) -> Result<Self> {
        let total_size = validate_ranges(&ranges)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_size)?;
        Ok(Self::with_sink(file, ranges, total_size))
    }
}

impl<S: OffsetSink> Reassembler<S> {
    fn with_sink(sink: S, ranges: Vec<ChunkRange>, total_size: u64) -> Self {
        let bitmap_words = (ranges.len() as u64).div_ceil(64) as usize;
        Self {
            sink,
            ranges,
            total_size,
            chunk_bitmap: vec![0u64; bitmap_words],
            received_count: 0,
        }
    }

    /// Total object size
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks expected
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.ranges.len() as u64
    }

    /// Write chunk `index` at its planned offset
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unknown or already received, the
    /// length does not match the plan, or the write fails. A rejected chunk
    /// leaves the sink untouched.
    pub fn write_chunk(&mut self, index: u64, data: &[u8]) -> Result<()> {
        let range = *self
            .ranges
            .get(index as usize)
            .ok_or(FilesError::ChunkOutOfBounds {
                index,
                total: self.total_chunks(),
            })?;

        if data.len() as u64 != range.length {
            return Err(FilesError::ChunkLengthMismatch {
                index,
                expected: range.length,
                actual: data.len() as u64,
            });
        }
        if bitmap_test(&self.chunk_bitmap, index) {
            return Err(FilesError::DuplicateChunk { index });
        }

        self.sink.write_at(range.offset, data)?;
        bitmap_set(&mut self.chunk_bitmap, index);
        self.received_count += 1;
        Ok(())
    }

    /// Whether chunk `index` has been written
    #[must_use]
    pub fn has_chunk(&self, index: u64) -> bool {
        index < self.total_chunks() && bitmap_test(&self.chunk_bitmap, index)
    }

    /// Indices not yet written, ascending
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u64> {
        let total = self.total_chunks();
        let mut missing = Vec::with_capacity((total - self.received_count) as usize);

        for (word_idx, &word) in self.chunk_bitmap.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let mut unset = !word;
            while unset != 0 {
                let idx = (word_idx as u64) * 64 + u64::from(unset.trailing_zeros());
                if idx < total {
                    missing.push(idx);
                }
                unset &= unset - 1;
            }
        }
        missing
    }

    /// Chunks written so far
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Fraction of chunks written (1.0 for an empty object)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.ranges.is_empty() {
            1.0
        } else {
            self.received_count as f64 / self.ranges.len() as f64
        }
    }

    /// Whether every chunk has been written
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks()
    }

    /// Sync and return the sink
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Incomplete` if chunks are missing, or an I/O
    /// error if syncing fails.
    pub fn finish(mut self) -> Result<S> {
        if !self.is_complete() {
            return Err(FilesError::Incomplete {
                received: self.received_count,
                total: self.total_chunks(),
            });
        }
        self.sink.sync()?;
        Ok(self.sink)
    }
}

fn validate_ranges(ranges: &[ChunkRange]) -> Result<u64> {
    let mut offset = 0u64;
    for (i, r) in ranges.iter().enumerate() {
        if r.index != i as u64 || r.offset != offset || r.length == 0 {
            return Err(FilesError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk ranges are not contiguous at index {i}"),
            )));
        }
        offset += r.length;
    }
    Ok(offset)
}

fn bitmap_set(bitmap: &mut [u64], idx: u64) {
    bitmap[(idx / 64) as usize] |= 1u64 << (idx % 64);
}

fn bitmap_test(bitmap: &[u64], idx: u64) -> bool {
    (bitmap[(idx / 64) as usize] >> (idx % 64)) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkPlanner;
    use tempfile::NamedTempFile;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn test_out_of_order_in_memory() {
        let data = sample(1000);
        let ranges = ChunkPlanner::new(128).unwrap().plan(1000);
        let mut reassembler = Reassembler::in_memory(ranges.clone()).unwrap();

        for r in ranges.iter().rev() {
            let slice = &data[r.offset as usize..r.end() as usize];
            reassembler.write_chunk(r.index, slice).unwrap();
        }

        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 1.0);
        assert_eq!(reassembler.finish().unwrap(), data);
    }

    #[test]
    fn test_file_target() {
        let data = sample(5000);
        let ranges = ChunkPlanner::new(2048).unwrap().plan(5000);
        let output = NamedTempFile::new().unwrap();
        let mut reassembler = Reassembler::create_file(output.path(), ranges.clone()).unwrap();

        for r in [ranges[1], ranges[2], ranges[0]] {
            let slice = &data[r.offset as usize..r.end() as usize];
            reassembler.write_chunk(r.index, slice).unwrap();
        }
        reassembler.finish().unwrap();

        assert_eq!(std::fs::read(output.path()).unwrap(), data);
    }

    #[test]
    fn test_missing_chunks_and_incomplete_finish() {
        let ranges = ChunkPlanner::new(10).unwrap().plan(100);
        let mut reassembler = Reassembler::in_memory(ranges).unwrap();

        reassembler.write_chunk(0, &[1u8; 10]).unwrap();
        reassembler.write_chunk(2, &[1u8; 10]).unwrap();

        assert_eq!(reassembler.received_count(), 2);
        assert!(reassembler.has_chunk(2));
        assert!(!reassembler.has_chunk(1));
        assert_eq!(reassembler.missing_chunks(), vec![1, 3, 4, 5, 6, 7, 8, 9]);
        assert!(matches!(
            reassembler.finish(),
            Err(FilesError::Incomplete {
                received: 2,
                total: 10
            })
        ));
    }

    #[test]
    fn test_rejects_wrong_length_and_index() {
        let ranges = ChunkPlanner::new(10).unwrap().plan(15);
        let mut reassembler = Reassembler::in_memory(ranges).unwrap();

        assert!(matches!(
            reassembler.write_chunk(1, &[0u8; 10]),
            Err(FilesError::ChunkLengthMismatch {
                index: 1,
                expected: 5,
                actual: 10
            })
        ));
        assert!(matches!(
            reassembler.write_chunk(2, &[0u8; 5]),
            Err(FilesError::ChunkOutOfBounds { index: 2, total: 2 })
        ));
    }

    #[test]
    fn test_duplicate_chunk_rejected() {
        let ranges = ChunkPlanner::new(4).unwrap().plan(8);
        let mut reassembler = Reassembler::in_memory(ranges).unwrap();

        reassembler.write_chunk(1, b"efgh").unwrap();
        assert!(matches!(
            reassembler.write_chunk(1, b"XXXX"),
            Err(FilesError::DuplicateChunk { index: 1 })
        ));
        assert_eq!(reassembler.received_count(), 1);

        reassembler.write_chunk(0, b"abcd").unwrap();
        // The first delivery of chunk 1 is what was kept
        assert_eq!(reassembler.finish().unwrap(), b"abcdefgh".to_vec());
    }

    #[test]
    fn test_empty_object_is_complete() {
        let reassembler = Reassembler::in_memory(Vec::new()).unwrap();
        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 1.0);
        assert!(reassembler.finish().unwrap().is_empty());
    }

    #[test]
    fn test_non_contiguous_ranges_rejected() {
        let ranges = vec![
            ChunkRange {
                index: 0,
                offset: 0,
                length: 4,
            },
            ChunkRange {
                index: 1,
                offset: 8,
                length: 4,
            },
        ];
        assert!(Reassembler::in_memory(ranges).is_err());
    }

    #[test]
    fn test_bitmap_spans_multiple_words() {
        let ranges = ChunkPlanner::new(1).unwrap().plan(130);
        let mut reassembler = Reassembler::in_memory(ranges).unwrap();
        for idx in (0..130).filter(|i| *i != 64 && *i != 129) {
            reassembler.write_chunk(idx, &[0xAA]).unwrap();
        }
        assert_eq!(reassembler.missing_chunks(), vec![64, 129]);
    }
}
