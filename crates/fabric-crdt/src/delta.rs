//! A deterministic copy/insert list-diff over sequences of 32-byte `id1`s,
//! in the spirit of a Fossil delta (spec.md §4.D). No crate on crates.io
//! implements Fossil's exact byte format, so this is hand-written: a
//! Myers-diff-derived list of copy/insert ops serialized as the JSON
//! `{patch: [...]}` envelope the wire format calls for.

use serde::{Deserialize, Serialize};

/// One operation in a patch, applied in order against the old element list
/// to produce the new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Copy `count` elements starting at `old_index` in the old list.
    Copy { old_index: usize, count: usize },
    /// Insert these literal elements (hex-encoded 32-byte ids).
    Insert { elements: Vec<String> },
}

/// The JSON envelope carried after the `0x00` delta-type tag byte.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patch {
    pub patch: Vec<PatchOp>,
}

/// Version tag prefixing every delta; receivers must reject any other value.
pub const DELTA_VERSION_TAG: u8 = 0x00;

/// Diff two ordered lists of 32-byte ids and produce a copy/insert patch
/// that reconstructs `new` from `old`. Uses a classic Myers/LCS table; fine
/// for the list sizes a single CRDT view holds.
pub fn diff(old: &[[u8; 32]], new: &[[u8; 32]]) -> Patch {
    let m = old.len();
    let n = new.len();
    // lcs[i][j] = length of the longest common subsequence of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let mut i = 0;
    let mut j = 0;
    let mut pending_copy_start: Option<usize> = None;
    let mut pending_insert: Vec<String> = Vec::new();

    let flush_copy = |ops: &mut Vec<PatchOp>, start: &mut Option<usize>, end: usize| {
        if let Some(old_index) = start.take() {
            ops.push(PatchOp::Copy {
                old_index,
                count: end - old_index,
            });
        }
    };
    let flush_insert = |ops: &mut Vec<PatchOp>, pending: &mut Vec<String>| {
        if !pending.is_empty() {
            ops.push(PatchOp::Insert {
                elements: std::mem::take(pending),
            });
        }
    };

    while i < m && j < n {
        if old[i] == new[j] {
            if !pending_insert.is_empty() {
                flush_insert(&mut ops, &mut pending_insert);
            }
            if pending_copy_start.is_none() {
                pending_copy_start = Some(i);
            }
            i += 1;
            j += 1;
        } else {
            flush_copy(&mut ops, &mut pending_copy_start, i);
            if lcs[i + 1][j] >= lcs[i][j + 1] {
                i += 1;
            } else {
                pending_insert.push(hex::encode(new[j]));
                j += 1;
            }
        }
    }
    flush_copy(&mut ops, &mut pending_copy_start, i);
    while j < n {
        pending_insert.push(hex::encode(new[j]));
        j += 1;
    }
    flush_insert(&mut ops, &mut pending_insert);

    Patch { patch: ops }
}

/// Reconstruct the new list by applying `patch` against `old`.
pub fn apply(old: &[[u8; 32]], patch: &Patch) -> Result<Vec<[u8; 32]>, &'static str> {
    let mut out = Vec::new();
    for op in &patch.patch {
        match op {
            PatchOp::Copy { old_index, count } => {
                let end = old_index
                    .checked_add(*count)
                    .ok_or("copy op overflows")?;
                if end > old.len() {
                    return Err("copy op reads past end of old list");
                }
                out.extend_from_slice(&old[*old_index..end]);
            }
            PatchOp::Insert { elements } => {
                for hex_id in elements {
                    let bytes = hex::decode(hex_id).map_err(|_| "insert element is not hex")?;
                    let array: [u8; 32] = bytes
                        .try_into()
                        .map_err(|_| "insert element is not 32 bytes")?;
                    out.push(array);
                }
            }
        }
    }
    Ok(out)
}

/// Encode a full delta frame: the `0x00` version tag followed by the
/// JSON-encoded patch envelope.
pub fn encode_frame(patch: &Patch) -> Vec<u8> {
    let mut out = vec![DELTA_VERSION_TAG];
    out.extend(serde_json::to_vec(patch).expect("patch serializes"));
    out
}

pub fn decode_frame(bytes: &[u8]) -> Result<Patch, crate::error::CrdtError> {
    let (tag, body) = bytes
        .split_first()
        .ok_or(crate::error::CrdtError::MalformedPatch("empty delta frame"))?;
    if *tag != DELTA_VERSION_TAG {
        return Err(crate::error::CrdtError::UnsupportedDeltaVersion(*tag));
    }
    serde_json::from_slice(body)
        .map_err(|_| crate::error::CrdtError::MalformedPatch("patch is not valid JSON"))
}
