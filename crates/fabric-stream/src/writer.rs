//! `StreamWriter`: drives a [`StreamReader`] into a sink, with resumable
//! retry/backoff and cumulative stats (spec.md §4.F).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::reader::{ChunkStatus, StreamReader};

/// Backoff doubles every 10 seconds of accumulated pause time when
/// `retryTimeout < 0` (spec.md §4.F).
const BACKOFF_DOUBLING_PERIOD: Duration = Duration::from_secs(10);

pub struct WriteOutcome {
    pub status: ChunkStatus,
    pub error: Option<String>,
    /// When set, the reader is seeked here and the current chunk discarded
    /// (resume semantics).
    pub fseek: Option<u64>,
}

/// The sink a [`StreamWriter`] drives each chunk into.
pub trait StreamSink: Send {
    fn write(&mut self, data: &[u8]) -> Result<WriteOutcome, StreamError>;
}

/// In-memory sink backing this crate's tests.
pub struct InMemorySink {
    pub written: Vec<u8>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self { written: Vec::new() }
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for InMemorySink {
    fn write(&mut self, data: &[u8]) -> Result<WriteOutcome, StreamError> {
        self.written.extend_from_slice(data);
        Ok(WriteOutcome { status: ChunkStatus::Result, error: None, fseek: None })
    }
}

/// Cumulative progress of a writer's `run` loop (spec.md §4.F).
#[derive(Debug, Clone)]
pub struct Stats {
    pub written: u64,
    pub pos: u64,
    pub size: Option<u64>,
    pub throughput: f64,
    pub start_time: Instant,
    pub paused_duration: Duration,
    pub duration: Duration,
    pub is_paused: bool,
    pub error: Option<String>,
    pub finish_time: Option<Instant>,
}

impl Stats {
    fn new() -> Self {
        Self {
            written: 0,
            pos: 0,
            size: None,
            throughput: 0.0,
            start_time: Instant::now(),
            paused_duration: Duration::ZERO,
            duration: Duration::ZERO,
            is_paused: false,
            error: None,
            finish_time: None,
        }
    }

    fn update(&mut self) {
        self.duration = self.start_time.elapsed();
        let active = self.duration.saturating_sub(self.paused_duration);
        self.throughput = if active.as_secs_f64() > 0.0 {
            self.written as f64 / active.as_secs_f64()
        } else {
            0.0
        };
    }
}

/// Clone of the cancellation signal, usable to `close` a writer from outside
/// the task running `run`.
#[derive(Clone)]
pub struct StreamWriterHandle {
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StreamWriterHandle {
    /// Interrupts a paused or blocked `run` loop; the writer surfaces a
    /// terminal `"Closed while streaming"` error and closes its reader.
    pub fn close(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

pub struct StreamWriter<R, S> {
    reader: R,
    sink: S,
    stats: Stats,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl<R: StreamReader, S: StreamSink> StreamWriter<R, S> {
    pub fn new(reader: R, sink: S) -> Self {
        Self {
            reader,
            sink,
            stats: Stats::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> StreamWriterHandle {
        StreamWriterHandle { cancel: self.cancel.clone(), notify: self.notify.clone() }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn is_closed(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn close_with(&mut self, message: &str) -> StreamError {
        self.stats.error = Some(message.to_string());
        self.stats.finish_time = Some(Instant::now());
        self.stats.update();
        self.reader.close();
        StreamError::Closed
    }

    /// Loop until EOF or a terminal error. `retry_timeout < 0` retries
    /// `NotAvailable` indefinitely, doubling `retry_delay` every 10 seconds
    /// of accumulated pause time; `retry_timeout >= 0` gives up once total
    /// paused time exceeds it.
    pub async fn run(
        &mut self,
        retry_timeout: i64,
        retry_delay: Duration,
    ) -> Result<(), StreamError> {
        let mut current_delay = retry_delay;
        let mut since_last_doubling = Duration::ZERO;

        loop {
            if self.is_closed() {
                return Err(self.close_with("Closed while streaming"));
            }

            let chunk = match self.reader.next(None) {
                Ok(chunk) => chunk,
                Err(StreamError::Closed) => return Err(self.close_with("Closed while streaming")),
                Err(err) => {
                    self.stats.error = Some(err.to_string());
                    self.stats.finish_time = Some(Instant::now());
                    self.stats.update();
                    return Err(err);
                }
            };

            match chunk.status {
                ChunkStatus::Eof => {
                    self.stats.finish_time = Some(Instant::now());
                    self.stats.update();
                    debug!(written = self.stats.written, "stream writer reached EOF");
                    return Ok(());
                }
                ChunkStatus::Result => {
                    let outcome = self.sink.write(&chunk.data)?;
                    match outcome.status {
                        ChunkStatus::Result => {
                            self.stats.written += chunk.data.len() as u64;
                            self.stats.pos = chunk.pos;
                            self.stats.size = chunk.size;
                            self.stats.update();
                            if let Some(seek) = outcome.fseek {
                                self.reader.seek(seek);
                            }
                        }
                        terminal => {
                            self.stats.error = outcome.error.clone();
                            self.stats.finish_time = Some(Instant::now());
                            self.stats.update();
                            return Err(status_to_error(terminal, outcome.error));
                        }
                    }
                }
                ChunkStatus::NotAvailable => {
                    if retry_timeout >= 0
                        && self.stats.paused_duration >= Duration::from_secs(retry_timeout as u64)
                    {
                        return Err(self.close_with("retry timeout exceeded"));
                    }

                    self.stats.is_paused = true;
                    let paused_at = Instant::now();
                    tokio::select! {
                        _ = tokio::time::sleep(current_delay) => {}
                        _ = self.notify.notified() => {
                            self.stats.is_paused = false;
                            self.stats.paused_duration += paused_at.elapsed();
                            return Err(self.close_with("Closed while streaming"));
                        }
                    }
                    let waited = paused_at.elapsed();
                    self.stats.is_paused = false;
                    self.stats.paused_duration += waited;
                    self.stats.update();

                    if retry_timeout < 0 {
                        since_last_doubling += waited;
                        while since_last_doubling >= BACKOFF_DOUBLING_PERIOD {
                            current_delay *= 2;
                            since_last_doubling -= BACKOFF_DOUBLING_PERIOD;
                        }
                    }
                }
                other => {
                    let message = chunk.error.clone();
                    self.stats.error = message.clone();
                    self.stats.finish_time = Some(Instant::now());
                    self.stats.update();
                    warn!(?other, "stream writer terminated on reader status");
                    return Err(status_to_error(other, message));
                }
            }
        }
    }
}

fn status_to_error(status: ChunkStatus, message: Option<String>) -> StreamError {
    match status {
        ChunkStatus::NotAllowed => StreamError::NotAllowed,
        ChunkStatus::NotAvailable => StreamError::NotAvailable,
        ChunkStatus::Unrecoverable => {
            StreamError::Unrecoverable(message.unwrap_or_else(|| "unrecoverable".to_string()))
        }
        ChunkStatus::Error | ChunkStatus::Eof | ChunkStatus::Result => {
            StreamError::Unrecoverable(message.unwrap_or_else(|| "stream error".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::InMemoryReader;

    #[tokio::test]
    async fn run_drains_reader_into_sink() {
        let reader = InMemoryReader::new(vec![1, 2, 3, 4, 5]);
        let sink = InMemorySink::new();
        let mut writer = StreamWriter::new(reader, sink);
        writer.run(0, Duration::from_millis(1)).await.unwrap();
        assert_eq!(writer.sink.written, vec![1, 2, 3, 4, 5]);
        assert_eq!(writer.stats().written, 5);
        assert!(writer.stats().finish_time.is_some());
    }

    #[tokio::test]
    async fn run_retries_past_a_not_available_pause() {
        let reader = InMemoryReader::flaky(vec![1, 2, 3], 0);
        let sink = InMemorySink::new();
        let mut writer = StreamWriter::new(reader, sink);
        writer.run(-1, Duration::from_millis(1)).await.unwrap();
        assert_eq!(writer.sink.written, vec![1, 2, 3]);
        assert!(writer.stats().paused_duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn close_interrupts_a_paused_run_loop() {
        let reader = InMemoryReader::flaky(vec![1, 2, 3], 0);
        let sink = InMemorySink::new();
        let mut writer = StreamWriter::new(reader, sink);
        let handle = writer.handle();
        handle.close();
        let err = writer.run(-1, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StreamError::Closed));
        assert_eq!(writer.stats().error.as_deref(), Some("Closed while streaming"));
    }
}
