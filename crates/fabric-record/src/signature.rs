//! Signature-slot parsing, `eligibleSigningKeys`, and recursive signature
//! extraction (spec.md §4.A).

use crate::error::{MalformedSignatureReason, RecordError};
use crate::field::{encode_field, indexes, PackedRecord};
use crate::hash::HashOutput;

/// Signature algorithm carried in a signature slot's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgoType {
    Ed25519,
    Secp256k1,
}

impl AlgoType {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(AlgoType::Ed25519),
            1 => Some(AlgoType::Secp256k1),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            AlgoType::Ed25519 => 0,
            AlgoType::Secp256k1 => 1,
        }
    }
}

/// A parsed, not-yet-verified signature extracted from one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedSignature {
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub message: HashOutput,
    pub algo_type: AlgoType,
}

struct SlotPayload {
    key_index: u8,
    algorithm_byte: u8,
    signature: Vec<u8>,
}

fn parse_slot_payload(bytes: &[u8]) -> Result<SlotPayload, RecordError> {
    if bytes.len() < 2 {
        return Err(RecordError::MalformedSignature(
            MalformedSignatureReason::Truncated,
        ));
    }
    let key_index = bytes[0];
    let algorithm_byte = bytes[1];
    let signature = bytes[2..].to_vec();
    Ok(SlotPayload {
        key_index,
        algorithm_byte,
        signature,
    })
}

/// Encode a signature-slot payload, used by tests and by callers signing a
/// record in place.
pub fn encode_signature_slot(key_index: u8, algorithm: AlgoType, signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + signature.len());
    out.push(key_index);
    out.push(algorithm.to_wire());
    out.extend_from_slice(signature);
    out
}

/// An embedded certificate: a record granting one or more target public keys
/// the authority to sign as another owner (spec.md glossary: SignCert).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignCert {
    pub target_public_keys: Vec<Vec<u8>>,
    pub multisig_threshold: u8,
}

impl SignCert {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.target_public_keys.len() as u8);
        for key in &self.target_public_keys {
            out.push(key.len() as u8);
            out.extend_from_slice(key);
        }
        out.push(self.multisig_threshold);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut offset = 0usize;
        let count = *bytes
            .first()
            .ok_or(RecordError::Malformed("empty signCert"))?;
        offset += 1;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = *bytes
                .get(offset)
                .ok_or(RecordError::Malformed("truncated signCert key length"))?;
            offset += 1;
            let end = offset + len as usize;
            let key = bytes
                .get(offset..end)
                .ok_or(RecordError::Malformed("truncated signCert key bytes"))?
                .to_vec();
            offset = end;
            keys.push(key);
        }
        let threshold = *bytes
            .get(offset)
            .ok_or(RecordError::Malformed("missing multisig threshold"))?;
        Ok(SignCert {
            target_public_keys: keys,
            multisig_threshold: threshold,
        })
    }

    /// Build the packed bytes of a cert *sub-record* embedding this body at
    /// [`indexes::CERT_BODY`], signed by `issuer` under `signatures` (already
    /// encoded signature-slot payloads, in slot order). The resulting bytes
    /// are what goes into the parent record's [`indexes::SIGN_CERT`] field,
    /// so the cert's own issuance can be recursively verified (spec.md
    /// §4.A: "recursing into embedded certs/records").
    pub fn as_embedded_record(&self, issuer: &[u8], signatures: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"cert"));
        buf.extend(encode_field(indexes::OWNER, 0, issuer));
        buf.extend(encode_field(indexes::CERT_BODY, 0, &self.encode()));
        for (slot_offset, sig_payload) in signatures.iter().enumerate() {
            let field_index = indexes::signature_slot_index(slot_offset as u8 + 1);
            buf.extend(encode_field(field_index, 0, sig_payload));
        }
        buf
    }
}

fn decode_embedded_cert(record: &PackedRecord) -> Result<SignCert, RecordError> {
    let body = record
        .field_payload(indexes::CERT_BODY)
        .ok_or(RecordError::Malformed("cert sub-record missing body"))?;
    SignCert::decode(body)
}

/// `eligibleSigningKeys(packed)`: `signCert.targetPublicKeys` if a signCert
/// is present, else `[owner]`.
pub fn eligible_signing_keys(record: &PackedRecord) -> Result<Vec<Vec<u8>>, RecordError> {
    if let Some(cert_bytes) = record.field_payload(indexes::SIGN_CERT) {
        let cert_record = PackedRecord::parse(cert_bytes)?;
        let cert = decode_embedded_cert(&cert_record)?;
        Ok(cert.target_public_keys)
    } else {
        let owner = record
            .field_payload(indexes::OWNER)
            .ok_or(RecordError::Malformed("record has no owner"))?;
        Ok(vec![owner.to_vec()])
    }
}

fn multisig_threshold(record: &PackedRecord, eligible: &[Vec<u8>]) -> Result<u8, RecordError> {
    if let Some(cert_bytes) = record.field_payload(indexes::SIGN_CERT) {
        let cert_record = PackedRecord::parse(cert_bytes)?;
        let cert = decode_embedded_cert(&cert_record)?;
        if !(1..=3).contains(&cert.multisig_threshold) {
            return Err(RecordError::Malformed("multisig threshold out of range"));
        }
        Ok(cert.multisig_threshold)
    } else {
        debug_assert_eq!(eligible.len(), 1);
        Ok(1)
    }
}

/// `extractSignatures(packed, allowUnsigned)`: slots 1..=3, in order, with no
/// gaps; fails `MalformedSignature` on out-of-range indices or a count
/// exceeding the multisig threshold; when `allow_unsigned` is false, also
/// fails if the count is below the threshold.
pub fn extract_signatures(
    record: &PackedRecord,
    allow_unsigned: bool,
) -> Result<Vec<ExtractedSignature>, RecordError> {
    let eligible = eligible_signing_keys(record)?;
    let threshold = multisig_threshold(record, &eligible)?;

    let mut out = Vec::new();
    let mut seen_gap = false;
    for slot in 1u8..=3 {
        let field_index = indexes::signature_slot_index(slot);
        match record.field_payload(field_index) {
            Some(payload) => {
                if seen_gap {
                    return Err(RecordError::MalformedSignature(
                        MalformedSignatureReason::Gap { slot },
                    ));
                }
                let parsed = parse_slot_payload(payload)?;
                let algo_type = AlgoType::from_wire(parsed.algorithm_byte).ok_or(
                    RecordError::MalformedSignature(MalformedSignatureReason::UnknownAlgorithm(
                        parsed.algorithm_byte,
                    )),
                )?;
                let public_key = eligible
                    .get(parsed.key_index as usize)
                    .ok_or(RecordError::MalformedSignature(
                        MalformedSignatureReason::KeyIndexOutOfRange {
                            slot,
                            key_index: parsed.key_index,
                        },
                    ))?
                    .clone();
                let message = record.hash_range(0, field_index);
                out.push(ExtractedSignature {
                    signature: parsed.signature,
                    public_key,
                    message,
                    algo_type,
                });
            }
            None => seen_gap = true,
        }
    }

    if out.len() as u8 > threshold {
        return Err(RecordError::MalformedSignature(
            MalformedSignatureReason::TooManySignatures {
                found: out.len() as u8,
                threshold,
            },
        ));
    }
    if !allow_unsigned && (out.len() as u8) < threshold {
        return Err(RecordError::MalformedSignature(
            MalformedSignatureReason::NotFullySigned {
                found: out.len() as u8,
                threshold,
            },
        ));
    }
    Ok(out)
}

/// `extractSignaturesRecursive`: appends signatures from any embedded cert
/// and embedded sub-records (index range 200..240). `allow_unsigned` applies
/// only to the root; embedded records must be fully signed.
pub fn extract_signatures_recursive(
    record: &PackedRecord,
    allow_unsigned: bool,
) -> Result<Vec<ExtractedSignature>, RecordError> {
    let mut out = extract_signatures(record, allow_unsigned)?;

    if let Some(cert_bytes) = record.field_payload(indexes::SIGN_CERT) {
        let cert_record = PackedRecord::parse(cert_bytes)?;
        let sigs = extract_signatures_recursive(&cert_record, false).map_err(|_| {
            RecordError::MalformedSignature(MalformedSignatureReason::EmbeddedNotFullySigned)
        })?;
        out.extend(sigs);
    }

    for idx in
        record.fields_in_range(indexes::EMBEDDED_RECORDS_START, indexes::EMBEDDED_RECORDS_END)
    {
        let sub_bytes = record
            .field_payload(idx)
            .expect("index came from fields_in_range");
        let sub_record = PackedRecord::parse(sub_bytes)?;
        let sigs = extract_signatures_recursive(&sub_record, false).map_err(|_| {
            RecordError::MalformedSignature(MalformedSignatureReason::EmbeddedNotFullySigned)
        })?;
        out.extend(sigs);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::encode_field;

    fn owner_record(owner: &[u8], sig1: Option<&[u8]>) -> PackedRecord {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"dat"));
        buf.extend(encode_field(indexes::OWNER, 0, owner));
        if let Some(sig) = sig1 {
            buf.extend(encode_field(indexes::SIGNATURE_1, 0, sig));
        }
        PackedRecord::parse(&buf).unwrap()
    }

    #[test]
    fn unsigned_record_requires_allow_unsigned() {
        let record = owner_record(b"owner-key", None);
        assert!(extract_signatures(&record, false).is_err());
        assert!(extract_signatures(&record, true).unwrap().is_empty());
    }

    #[test]
    fn single_signature_resolves_owner_key() {
        let payload = encode_signature_slot(0, AlgoType::Ed25519, b"sig-bytes");
        let record = owner_record(b"owner-key", Some(&payload));
        let sigs = extract_signatures(&record, false).unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].public_key, b"owner-key");
        assert_eq!(sigs[0].algo_type, AlgoType::Ed25519);
    }

    #[test]
    fn gap_between_slots_is_malformed() {
        let sig = encode_signature_slot(0, AlgoType::Ed25519, b"sig");
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"dat"));
        buf.extend(encode_field(indexes::OWNER, 0, b"owner"));
        buf.extend(encode_field(indexes::SIGNATURE_2, 0, &sig));
        let record = PackedRecord::parse(&buf).unwrap();
        let err = extract_signatures(&record, true).unwrap_err();
        assert!(matches!(
            err,
            RecordError::MalformedSignature(MalformedSignatureReason::Gap { slot: 1 })
        ));
    }

    #[test]
    fn out_of_range_key_index_is_malformed() {
        let payload = encode_signature_slot(5, AlgoType::Ed25519, b"sig");
        let record = owner_record(b"owner", Some(&payload));
        let err = extract_signatures(&record, false).unwrap_err();
        assert!(matches!(
            err,
            RecordError::MalformedSignature(MalformedSignatureReason::KeyIndexOutOfRange {
                ..
            })
        ));
    }

    #[test]
    fn multisig_threshold_gates_completeness() {
        let cert = SignCert {
            target_public_keys: vec![b"k1a".to_vec(), b"k1b".to_vec(), b"k1c".to_vec()],
            multisig_threshold: 2,
        };
        let cert_record_bytes = cert.as_embedded_record(b"issuer-key", &[]);
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"dat"));
        buf.extend(encode_field(indexes::OWNER, 0, b"issuer"));
        buf.extend(encode_field(
            indexes::SIGN_CERT,
            0,
            &cert_record_bytes,
        ));
        let sig1 = encode_signature_slot(0, AlgoType::Ed25519, b"s0");
        buf.extend(encode_field(indexes::SIGNATURE_1, 0, &sig1));
        let record = PackedRecord::parse(&buf).unwrap();
        assert!(extract_signatures(&record, false).is_err());

        let mut buf2 = buf.clone();
        let sig2 = encode_signature_slot(1, AlgoType::Ed25519, b"s1");
        buf2.extend(encode_field(indexes::SIGNATURE_2, 0, &sig2));
        let record2 = PackedRecord::parse(&buf2).unwrap();
        assert_eq!(extract_signatures(&record2, false).unwrap().len(), 2);

        let mut buf3 = buf2.clone();
        let sig3 = encode_signature_slot(2, AlgoType::Ed25519, b"s2");
        buf3.extend(encode_field(indexes::SIGNATURE_3, 0, &sig3));
        let record3 = PackedRecord::parse(&buf3).unwrap();
        let err = extract_signatures(&record3, false).unwrap_err();
        assert!(matches!(
            err,
            RecordError::MalformedSignature(MalformedSignatureReason::TooManySignatures { .. })
        ));
    }

    #[test]
    fn recursive_extraction_requires_cert_to_be_fully_signed() {
        let cert = SignCert {
            target_public_keys: vec![b"target".to_vec()],
            multisig_threshold: 1,
        };
        let unsigned_cert_bytes = cert.as_embedded_record(b"issuer-key", &[]);
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"dat"));
        buf.extend(encode_field(indexes::OWNER, 0, b"issuer-key"));
        buf.extend(encode_field(indexes::SIGN_CERT, 0, &unsigned_cert_bytes));
        let target_sig = encode_signature_slot(0, AlgoType::Ed25519, b"sig-by-target");
        buf.extend(encode_field(indexes::SIGNATURE_1, 0, &target_sig));
        let record = PackedRecord::parse(&buf).unwrap();

        // The outer record is fully signed by its sole target, but the cert
        // granting that target authority was never signed by its issuer.
        assert!(extract_signatures(&record, false).is_ok());
        let err = extract_signatures_recursive(&record, false).unwrap_err();
        assert!(matches!(
            err,
            RecordError::MalformedSignature(MalformedSignatureReason::EmbeddedNotFullySigned)
        ));

        let issuer_sig = encode_signature_slot(0, AlgoType::Ed25519, b"sig-by-issuer");
        let signed_cert_bytes = cert.as_embedded_record(b"issuer-key", &[issuer_sig]);
        let mut buf2 = Vec::new();
        buf2.extend(encode_field(indexes::MODEL_TYPE, 0, b"dat"));
        buf2.extend(encode_field(indexes::OWNER, 0, b"issuer-key"));
        buf2.extend(encode_field(indexes::SIGN_CERT, 0, &signed_cert_bytes));
        buf2.extend(encode_field(indexes::SIGNATURE_1, 0, &target_sig));
        let record2 = PackedRecord::parse(&buf2).unwrap();
        let sigs = extract_signatures_recursive(&record2, false).unwrap();
        assert_eq!(sigs.len(), 2);
    }
}
