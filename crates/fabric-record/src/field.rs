//! Sparse packed-record parsing: `(fieldIndex: u8, fieldType: u8, length:
//! varint, bytes)` entries in ascending-index order (spec.md §6).
//!
//! The packed bytes are the arena: [`PackedRecord`] never copies field
//! payloads out of the backing buffer, only records offset+length ranges
//! into it (spec.md §9's "copy on serialize, never on query" note).

use std::ops::Range;

use crate::error::RecordError;

/// Field-index ranges fixed by spec.md §6.
pub mod indexes {
    pub const BASE_FIELDS_END: u8 = 100;
    pub const SUBCLASS_FIELDS_END: u8 = 200;
    pub const EMBEDDED_RECORDS_START: u8 = 200;
    pub const EMBEDDED_RECORDS_END: u8 = 240;
    pub const TRANSIENT_FIELDS_START: u8 = 240;

    pub const MODEL_TYPE: u8 = 0;
    pub const OWNER: u8 = 1;
    pub const CREATION_TIME: u8 = 2;
    pub const SIGNATURE_1: u8 = 3;
    pub const SIGNATURE_2: u8 = 4;
    pub const SIGNATURE_3: u8 = 5;
    pub const SIGN_CERT: u8 = 6;
    pub const EXPIRE_TIME: u8 = 7;
    pub const ID1: u8 = 8;
    pub const ID2: u8 = 9;
    pub const REF_ID: u8 = 10;
    pub const PARENT_ID: u8 = 11;

    /// Subclass field, present only on cert-shaped sub-records embedded at
    /// [`SIGN_CERT`], carrying the encoded `SignCert` body (target public
    /// keys + multisig threshold).
    pub const CERT_BODY: u8 = 100;

    /// Subclass field carrying an annotation record's own payload (edit
    /// body text, reaction kind string) when the owning CRDT instance is
    /// running in annotation mode.
    pub const ANNOTATION_BODY: u8 = 101;

    pub const TRANSIENT_STORAGE_TIME: u8 = 240;
    pub const TRANSIENT_HASH: u8 = 241;

    /// `id1` is the hash of fields `[0, ID1_HASH_END)` of the fully signed
    /// packed image (spec.md §3): base and subclass fields, but none of the
    /// transient ones above it.
    pub const ID1_HASH_END: u8 = 128;

    /// Field index of the `k`-th signature slot, `k` in `1..=3`.
    pub fn signature_slot_index(k: u8) -> u8 {
        debug_assert!((1..=3).contains(&k));
        SIGNATURE_1 + (k - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FieldEntry {
    index: u8,
    field_type: u8,
    /// Byte range of the whole entry (header + payload) within the buffer.
    entry_range: Range<usize>,
    /// Byte range of just the payload within the buffer.
    payload_range: Range<usize>,
}

/// An arena-backed view over one packed record image.
#[derive(Clone, Debug)]
pub struct PackedRecord {
    bytes: Vec<u8>,
    fields: Vec<FieldEntry>,
}

impl PackedRecord {
    /// Parse a packed record image. Fields must be sorted by ascending index
    /// per spec.md §6; a decreasing index is `Malformed`.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut fields = Vec::new();
        let mut offset = 0usize;
        let mut last_index: Option<u8> = None;
        while offset < bytes.len() {
            let entry_start = offset;
            let index = *bytes
                .get(offset)
                .ok_or(RecordError::Truncated { at: offset })?;
            offset += 1;
            let field_type = *bytes
                .get(offset)
                .ok_or(RecordError::Truncated { at: offset })?;
            offset += 1;
            let (length, varint_len) = read_varint(bytes, offset)?;
            offset += varint_len;
            let payload_start = offset;
            let payload_end = payload_start
                .checked_add(length as usize)
                .ok_or(RecordError::Truncated { at: payload_start })?;
            if payload_end > bytes.len() {
                return Err(RecordError::Truncated { at: payload_start });
            }
            if let Some(prev) = last_index {
                if index <= prev {
                    return Err(RecordError::OutOfOrderField { index, prev });
                }
            }
            last_index = Some(index);
            fields.push(FieldEntry {
                index,
                field_type,
                entry_range: entry_start..payload_end,
                payload_range: payload_start..payload_end,
            });
            offset = payload_end;
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            fields,
        })
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload bytes for `index`, if the field is present.
    pub fn field_payload(&self, index: u8) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.index == index)
            .map(|f| &self.bytes[f.payload_range.clone()])
    }

    pub fn field_type(&self, index: u8) -> Option<u8> {
        self.fields.iter().find(|f| f.index == index).map(|f| f.field_type)
    }

    pub fn has_field(&self, index: u8) -> bool {
        self.fields.iter().any(|f| f.index == index)
    }

    /// Indexes of every field whose index falls in `[start, end)`, ascending.
    pub fn fields_in_range(&self, start: u8, end: u8) -> impl Iterator<Item = u8> + '_ {
        self.fields
            .iter()
            .filter(move |f| f.index >= start && f.index < end)
            .map(|f| f.index)
    }

    /// blake2b-256 over the raw concatenation of field *images* (full
    /// header+payload entries, in packed order) whose index lies in
    /// `[from_index, to_index)`. Spec.md §4.A: "hash(packed, fromIndex,
    /// toIndex)".
    pub fn hash_range(&self, from_index: u8, to_index: u8) -> crate::hash::HashOutput {
        let mut hasher = crate::hash::Hasher::new();
        for field in self
            .fields
            .iter()
            .filter(|f| f.index >= from_index && f.index < to_index)
        {
            hasher.update(&self.bytes[field.entry_range.clone()]);
        }
        hasher.finalize()
    }

    /// Every field index present, ascending.
    pub fn field_indexes(&self) -> impl Iterator<Item = u8> + '_ {
        self.fields.iter().map(|f| f.index)
    }

    /// Re-serialize this record with `overrides` merged in by index: an
    /// override replaces an existing field at that index or inserts a new
    /// one, all other fields pass through unchanged. Used by callers that
    /// need to attach a signature or recompute `id1` without hand-rolling
    /// the packed wire format themselves.
    pub fn rebuild_with(&self, overrides: &[(u8, u8, Vec<u8>)]) -> Vec<u8> {
        let mut merged: std::collections::BTreeMap<u8, (u8, Vec<u8>)> =
            std::collections::BTreeMap::new();
        for field in &self.fields {
            merged.insert(
                field.index,
                (field.field_type, self.bytes[field.payload_range.clone()].to_vec()),
            );
        }
        for (index, field_type, payload) in overrides {
            merged.insert(*index, (*field_type, payload.clone()));
        }
        let mut out = Vec::new();
        for (index, (field_type, payload)) in merged {
            out.extend(encode_field(index, field_type, &payload));
        }
        out
    }
}

fn read_varint(bytes: &[u8], start: usize) -> Result<(u64, usize), RecordError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut consumed = 0usize;
    loop {
        let byte = *bytes
            .get(start + consumed)
            .ok_or(RecordError::Truncated { at: start + consumed })?;
        consumed += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(RecordError::Malformed("varint overflow"));
        }
    }
    Ok((value, consumed))
}

/// Encode a `(index, type, payload)` field entry in the packed wire format,
/// used by tests and by callers constructing fixtures.
pub fn encode_field(index: u8, field_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 10 + payload.len());
    out.push(index);
    out.push(field_type);
    write_varint(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    out
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"typ"));
        buf.extend(encode_field(indexes::OWNER, 0, b"owner-key-bytes-here"));
        buf.extend(encode_field(indexes::SIGNATURE_1, 0, b"sig1-payload"));
        buf
    }

    #[test]
    fn parses_fields_in_order() {
        let record = PackedRecord::parse(&sample()).unwrap();
        assert_eq!(record.field_payload(indexes::MODEL_TYPE), Some(&b"typ"[..]));
        assert_eq!(
            record.field_payload(indexes::OWNER),
            Some(&b"owner-key-bytes-here"[..])
        );
        assert!(record.has_field(indexes::SIGNATURE_1));
        assert!(!record.has_field(indexes::SIGNATURE_2));
    }

    #[test]
    fn rejects_out_of_order_fields() {
        let mut buf = encode_field(5, 0, b"x");
        buf.extend(encode_field(3, 0, b"y"));
        let err = PackedRecord::parse(&buf).unwrap_err();
        assert!(matches!(err, RecordError::OutOfOrderField { .. }));
    }

    #[test]
    fn hash_range_excludes_signature_slot() {
        let record = PackedRecord::parse(&sample()).unwrap();
        let manifest = record.hash_range(0, indexes::SIGNATURE_1);
        let with_sig = record.hash_range(0, indexes::SIGNATURE_1 + 1);
        assert_ne!(manifest, with_sig);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut buf = encode_field(indexes::OWNER, 0, b"hello");
        buf.truncate(buf.len() - 1);
        assert!(PackedRecord::parse(&buf).is_err());
    }

    #[test]
    fn rebuild_with_overrides_and_preserves_others() {
        let record = PackedRecord::parse(&sample()).unwrap();
        let rebuilt_bytes = record.rebuild_with(&[(
            indexes::SIGNATURE_2,
            0,
            b"sig2-payload".to_vec(),
        )]);
        let rebuilt = PackedRecord::parse(&rebuilt_bytes).unwrap();
        assert_eq!(rebuilt.field_payload(indexes::MODEL_TYPE), Some(&b"typ"[..]));
        assert_eq!(
            rebuilt.field_payload(indexes::SIGNATURE_2),
            Some(&b"sig2-payload"[..])
        );
        assert_eq!(
            rebuilt.field_indexes().collect::<Vec<_>>(),
            vec![
                indexes::MODEL_TYPE,
                indexes::OWNER,
                indexes::SIGNATURE_1,
                indexes::SIGNATURE_2
            ]
        );
    }
}
