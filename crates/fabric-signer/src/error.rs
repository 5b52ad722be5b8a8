use thiserror::Error;

/// Errors surfaced by the offloader's public contract (spec.md §4.B).
#[derive(Debug, Error)]
pub enum OffloaderError {
    /// A coordinator-worker round trip failed: the channel to a worker was
    /// closed, or the worker task panicked.
    #[error("worker {worker} unreachable: {reason}")]
    ThreadingFailure { worker: usize, reason: String },

    /// `sign`/`verify`/`addKeyPair` called after `close()`.
    #[error("signature offloader is closed")]
    Closed,

    /// A record failed validation before being dispatched to a worker.
    #[error("record rejected: {0}")]
    Invalid(#[from] fabric_record::RecordError),

    /// `sign` was asked to sign with a key that is not eligible for one of
    /// the records in the batch.
    #[error("public key is not eligible to sign record at index {index}")]
    KeyNotEligible { index: usize },

    /// A worker returned fewer results than it was given work for; per
    /// spec.md §4.B this fails the whole batch with no partial mutation.
    #[error("worker {worker} returned {got} results for {expected} inputs")]
    ShortWorkerResult {
        worker: usize,
        got: usize,
        expected: usize,
    },
}
