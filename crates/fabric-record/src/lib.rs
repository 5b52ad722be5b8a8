//! Packed-record parsing, canonical hashing, and signature extraction.
//!
//! A record is a sparse sequence of `(fieldIndex, fieldType, length, bytes)`
//! entries kept in ascending-index order. [`field::PackedRecord`] parses that
//! wire image into an arena of offset+length ranges without copying payload
//! bytes out; [`hash`] derives the canonical blake2b-256 digest used both as
//! a record's identity and as the message signed into each signature slot;
//! [`signature`] walks the slots spec.md §4.A describes, recursing into
//! embedded certs and sub-records.

pub mod error;
pub mod field;
pub mod hash;
pub mod signature;

pub use error::{MalformedSignatureReason, RecordError};
pub use field::{indexes, encode_field, PackedRecord};
pub use hash::{hash, hash_concat, hash_list, HashOutput, Hasher};
pub use signature::{
    encode_signature_slot, eligible_signing_keys, extract_signatures,
    extract_signatures_recursive, AlgoType, ExtractedSignature, SignCert,
};
