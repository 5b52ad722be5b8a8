//! `StreamReader`: a lazy, finite sequence of chunks (spec.md §4.F).

use crate::error::StreamError;

/// Back-pressure caps from spec.md §5: 67 KiB message envelope minus 3 KiB
/// overhead for blob writes, 1 MiB for file/blob reads.
pub const MAX_WRITE_CHUNK: usize = 64 * 1024;
pub const MAX_READ_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Result,
    Eof,
    NotAllowed,
    NotAvailable,
    Error,
    Unrecoverable,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub status: ChunkStatus,
    pub data: Vec<u8>,
    pub pos: u64,
    pub size: Option<u64>,
    pub error: Option<String>,
}

impl Chunk {
    fn result(data: Vec<u8>, pos: u64, size: Option<u64>) -> Self {
        Self { status: ChunkStatus::Result, data, pos, size, error: None }
    }

    fn eof(pos: u64, size: Option<u64>) -> Self {
        Self { status: ChunkStatus::Eof, data: Vec::new(), pos, size, error: None }
    }
}

/// A lazy, finite, seekable, resumable sequence of chunks.
///
/// `seek` clears any internal buffer and resumes from a new offset; `reinit`
/// is only valid once the reader has been `close`d.
pub trait StreamReader: Send {
    fn next(&mut self, chunk_size: Option<usize>) -> Result<Chunk, StreamError>;
    fn seek(&mut self, pos: u64);
    fn close(&mut self);
    fn reinit(&mut self) -> Result<(), StreamError>;
    fn pos(&self) -> u64;
    fn size(&self) -> Option<u64>;
}

/// In-memory reader backing this crate's unit tests and usable as a fixture
/// by higher-level crates' tests.
pub struct InMemoryReader {
    data: Vec<u8>,
    pos: u64,
    closed: bool,
    /// When set, every `next` call after this many served bytes returns
    /// `NotAvailable` once, simulating a flaky source for retry tests.
    fail_after: Option<u64>,
    failed_once: bool,
}

impl InMemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0, closed: false, fail_after: None, failed_once: false }
    }

    pub fn flaky(data: Vec<u8>, fail_after: u64) -> Self {
        Self { data, pos: 0, closed: false, fail_after: Some(fail_after), failed_once: false }
    }
}

impl StreamReader for InMemoryReader {
    fn next(&mut self, chunk_size: Option<usize>) -> Result<Chunk, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let requested = chunk_size.unwrap_or(MAX_READ_CHUNK);
        if requested > MAX_READ_CHUNK {
            return Ok(Chunk {
                status: ChunkStatus::Unrecoverable,
                data: Vec::new(),
                pos: self.pos,
                size: Some(self.data.len() as u64),
                error: Some(format!("chunk size {requested} exceeds cap {MAX_READ_CHUNK}")),
            });
        }

        if let Some(threshold) = self.fail_after {
            if !self.failed_once && self.pos >= threshold {
                self.failed_once = true;
                return Ok(Chunk {
                    status: ChunkStatus::NotAvailable,
                    data: Vec::new(),
                    pos: self.pos,
                    size: Some(self.data.len() as u64),
                    error: None,
                });
            }
        }

        let total = self.data.len() as u64;
        if self.pos >= total {
            return Ok(Chunk::eof(self.pos, Some(total)));
        }
        let start = self.pos as usize;
        let end = (start + requested).min(self.data.len());
        let slice = self.data[start..end].to_vec();
        self.pos = end as u64;
        Ok(Chunk::result(slice, self.pos, Some(total)))
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos.min(self.data.len() as u64);
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn reinit(&mut self) -> Result<(), StreamError> {
        if !self.closed {
            return Err(StreamError::NotClosed);
        }
        self.closed = false;
        self.pos = 0;
        self.failed_once = false;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_to_eof_in_chunks() {
        let mut reader = InMemoryReader::new(vec![1, 2, 3, 4, 5]);
        let c1 = reader.next(Some(2)).unwrap();
        assert_eq!(c1.data, vec![1, 2]);
        assert_eq!(c1.status, ChunkStatus::Result);
        let c2 = reader.next(Some(2)).unwrap();
        assert_eq!(c2.data, vec![3, 4]);
        let c3 = reader.next(Some(2)).unwrap();
        assert_eq!(c3.data, vec![5]);
        let c4 = reader.next(Some(2)).unwrap();
        assert_eq!(c4.status, ChunkStatus::Eof);
    }

    #[test]
    fn seek_clears_position_and_resumes() {
        let mut reader = InMemoryReader::new(vec![1, 2, 3, 4, 5]);
        reader.seek(3);
        let chunk = reader.next(Some(10)).unwrap();
        assert_eq!(chunk.data, vec![4, 5]);
    }

    #[test]
    fn reinit_only_allowed_after_close() {
        let mut reader = InMemoryReader::new(vec![1, 2, 3]);
        assert!(matches!(reader.reinit(), Err(StreamError::NotClosed)));
        reader.close();
        assert!(reader.reinit().is_ok());
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn oversized_chunk_request_is_unrecoverable() {
        let mut reader = InMemoryReader::new(vec![0; 10]);
        let chunk = reader.next(Some(MAX_READ_CHUNK + 1)).unwrap();
        assert_eq!(chunk.status, ChunkStatus::Unrecoverable);
    }

    #[test]
    fn next_after_close_errors() {
        let mut reader = InMemoryReader::new(vec![1]);
        reader.close();
        assert!(matches!(reader.next(None), Err(StreamError::Closed)));
    }
}
