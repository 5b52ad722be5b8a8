use thiserror::Error;

/// Errors raised while parsing a packed record image or extracting its
/// signatures, per the abstract error kinds of spec.md §7.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("packed record truncated at byte {at}")]
    Truncated { at: usize },

    #[error("field index {index} out of order (after {prev})")]
    OutOfOrderField { index: u8, prev: u8 },

    #[error("malformed record: {0}")]
    Malformed(&'static str),

    #[error("malformed signature: {0}")]
    MalformedSignature(MalformedSignatureReason),
}

/// Sub-reasons for `RecordError::MalformedSignature`, matching the failure
/// cases enumerated in spec.md §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedSignatureReason {
    /// A signature slot was present with no predecessor slot filled.
    Gap { slot: u8 },
    /// The slot's declared key index does not exist in the eligible-keys
    /// array.
    KeyIndexOutOfRange { slot: u8, key_index: u8 },
    /// More signature slots are filled than `multisigThreshold` allows.
    TooManySignatures { found: u8, threshold: u8 },
    /// Fewer signatures than `multisigThreshold` and `allowUnsigned` is
    /// false.
    NotFullySigned { found: u8, threshold: u8 },
    /// An embedded cert or sub-record was not fully signed.
    EmbeddedNotFullySigned,
    /// The signature slot payload could not be parsed.
    Truncated,
    /// Declared algorithm type is not one this crate understands.
    UnknownAlgorithm(u8),
}

impl std::fmt::Display for MalformedSignatureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedSignatureReason::Gap { slot } => {
                write!(f, "signature slot {slot} present without predecessor")
            }
            MalformedSignatureReason::KeyIndexOutOfRange { slot, key_index } => {
                write!(f, "slot {slot} key index {key_index} out of range")
            }
            MalformedSignatureReason::TooManySignatures { found, threshold } => {
                write!(f, "{found} signatures exceed threshold {threshold}")
            }
            MalformedSignatureReason::NotFullySigned { found, threshold } => {
                write!(f, "{found} of {threshold} required signatures present")
            }
            MalformedSignatureReason::EmbeddedNotFullySigned => {
                write!(f, "embedded cert or sub-record is not fully signed")
            }
            MalformedSignatureReason::Truncated => write!(f, "signature slot payload truncated"),
            MalformedSignatureReason::UnknownAlgorithm(algo) => {
                write!(f, "unknown signature algorithm id {algo}")
            }
        }
    }
}
