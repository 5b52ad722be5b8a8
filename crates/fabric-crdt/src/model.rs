//! The CRDT model entry (`NodeValues`, spec.md §3) and the identifiers it is
//! keyed by.

use fabric_record::{indexes, HashOutput, PackedRecord};
use serde::{Deserialize, Serialize};

use crate::error::CrdtError;

/// A record's `id1`: the content hash of its fully signed packed image.
pub type Id1 = HashOutput;

/// One entry an ordering algorithm instance owns, derived from a record once
/// it has been added. Lives until the instance is closed or the record is
/// deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeValues {
    pub id1: Id1,
    pub id2: Option<Vec<u8>>,
    pub owner: Vec<u8>,
    pub transient_hash: HashOutput,
    /// 48-bit milliseconds, per spec.md §3.
    pub creation_time: u64,
    pub transient_storage_time: u64,
    pub ref_id: Option<Id1>,
    /// Opaque annotation aggregate image maintained by the annotation CRDT
    /// (spec.md §4.G); `None` until the first annotation targets this node.
    pub annotations: Option<serde_json::Value>,
}

impl NodeValues {
    pub fn id1_hex(&self) -> String {
        self.id1.to_hex()
    }
}

/// `(creationTime, id1)` — the single fixed tie-break used by every ordering
/// algorithm (spec.md §9: do not mirror the source's per-algorithm
/// divergence here).
pub fn sort_key(entry: &NodeValues) -> (u64, [u8; 32]) {
    (entry.creation_time, *entry.id1.as_bytes())
}

/// `(transientStorageTime, creationTime, id1)`, used by `AlgoSorted` when
/// configured with `orderByStorageTime`.
pub fn storage_sort_key(entry: &NodeValues) -> (u64, u64, [u8; 32]) {
    (entry.transient_storage_time, entry.creation_time, *entry.id1.as_bytes())
}

/// Derive a `NodeValues` model entry from a fully signed packed record. The
/// record schema packer itself is out of scope (spec.md §1); numeric fields
/// are read as big-endian integers of whatever width the packer wrote, which
/// is how the teacher's own wire-format readers treat packer-owned integer
/// fields it doesn't define the byte width of upstream.
pub fn node_values_from_record(record: &PackedRecord) -> Result<NodeValues, CrdtError> {
    let id1_bytes = record
        .field_payload(indexes::ID1)
        .ok_or(CrdtError::Record(fabric_record::RecordError::Malformed(
            "record has no id1; it must be fully signed before joining a CRDT view",
        )))?;
    let id1 = HashOutput::new(
        id1_bytes
            .try_into()
            .map_err(|_| CrdtError::Record(fabric_record::RecordError::Malformed("id1 must be 32 bytes")))?,
    );
    let owner = record
        .field_payload(indexes::OWNER)
        .ok_or(CrdtError::Record(fabric_record::RecordError::Malformed("record has no owner")))?
        .to_vec();
    let creation_time = record
        .field_payload(indexes::CREATION_TIME)
        .map(read_be_uint)
        .unwrap_or(0);
    let transient_storage_time = record
        .field_payload(indexes::TRANSIENT_STORAGE_TIME)
        .map(read_be_uint)
        .unwrap_or(0);
    let transient_hash = record
        .field_payload(indexes::TRANSIENT_HASH)
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .map(HashOutput::new)
        .unwrap_or_default();
    let id2 = record.field_payload(indexes::ID2).map(|b| b.to_vec());
    let ref_id = record
        .field_payload(indexes::REF_ID)
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .map(HashOutput::new);

    Ok(NodeValues {
        id1,
        id2,
        owner,
        transient_hash,
        creation_time,
        transient_storage_time,
        ref_id,
        annotations: None,
    })
}

fn read_be_uint(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for &byte in bytes.iter().take(8) {
        value = (value << 8) | u64::from(byte);
    }
    value
}
