//! Resumable, back-pressured stream reader/writer (spec.md §4.F, §5).
//!
//! [`reader::StreamReader`] produces a lazy, finite sequence of chunks
//! capped at [`reader::MAX_READ_CHUNK`]; [`writer::StreamWriter`] drives one
//! into a [`writer::StreamSink`] capped at [`reader::MAX_WRITE_CHUNK`],
//! retrying `NotAvailable` pauses with doubling backoff and tracking
//! cumulative [`writer::Stats`].

pub mod error;
pub mod reader;
pub mod writer;

pub use error::StreamError;
pub use reader::{Chunk, ChunkStatus, InMemoryReader, StreamReader, MAX_READ_CHUNK, MAX_WRITE_CHUNK};
pub use writer::{InMemorySink, Stats, StreamSink, StreamWriter, StreamWriterHandle, WriteOutcome};
