use thiserror::Error;

/// Top-level failures a session or router call can raise (spec.md §7).
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("clock skew {diff}s exceeds the configured maximum {max}s")]
    ClockSkew { diff: i64, max: i64 },
    #[error("negotiated serialization format {0} has expired")]
    ExpiredFormat(u32),
    #[error("malformed filter expression: {0}")]
    MalformedFilter(String),
    #[error("session is closed")]
    Closed,
    #[error("record error: {0}")]
    Record(#[from] fabric_record::RecordError),
    #[error("crdt error: {0}")]
    Crdt(#[from] fabric_crdt::CrdtError),
}

/// Wire-level outcome of a single request (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Result,
    Error,
    NotAllowed,
    NotAvailable,
    Malformed,
    Mismatch,
    TryAgain,
    MissingCursor,
    DroppedTrigger,
    Eof,
    Exists,
    FetchFailed,
    Unrecoverable,
}
