use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error(transparent)]
    Record(#[from] fabric_record::RecordError),

    #[error("ordering algorithm instance is closed")]
    Closed,

    #[error("delta version tag {0} is not supported")]
    UnsupportedDeltaVersion(u8),

    #[error("delta patch malformed: {0}")]
    MalformedPatch(&'static str),

    #[error("annotation payload exceeds maximum size even after halving")]
    AnnotationOverflow,
}
