use thiserror::Error;

/// Terminal failures a reader or writer can report (spec.md §4.F, §5).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream reader is not allowed to serve this range")]
    NotAllowed,
    #[error("stream source is temporarily not available")]
    NotAvailable,
    #[error("stream chunk exceeds the per-chunk cap: {0}")]
    Unrecoverable(String),
    #[error("stream is closed")]
    Closed,
    #[error("reinit is only allowed after close")]
    NotClosed,
}
