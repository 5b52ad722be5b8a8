//! Filter expressions (spec.md §6), compiled once into a typed AST rather
//! than re-parsed per record (spec.md §9).

use crate::error::P2pError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// An optional transform applied to a field's raw bytes before comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    /// Compare against a blake2b-256 prefix of the field instead of the raw
    /// bytes (`"hash"`).
    Hash,
    /// `":start[,length]"`; a negative `start` means "from end".
    ByteSlice { start: i64, length: Option<usize> },
    /// `"<op> <uint>"`, 32-bit operands only.
    Bitwise { op: BitOp, operand: u32 },
}

impl Operator {
    /// Parse the textual operator grammar from spec.md §6.
    pub fn parse(text: &str) -> Result<Self, P2pError> {
        let text = text.trim();
        if text == "hash" {
            return Ok(Operator::Hash);
        }
        if let Some(rest) = text.strip_prefix(':') {
            let mut parts = rest.splitn(2, ',');
            let start: i64 = parts
                .next()
                .ok_or_else(|| P2pError::MalformedFilter("byte-slice operator missing start".into()))?
                .parse()
                .map_err(|_| P2pError::MalformedFilter("byte-slice start is not an integer".into()))?;
            let length = match parts.next() {
                Some(text) => Some(
                    text.parse::<usize>()
                        .map_err(|_| P2pError::MalformedFilter("byte-slice length is not an integer".into()))?,
                ),
                None => None,
            };
            return Ok(Operator::ByteSlice { start, length });
        }
        let mut parts = text.splitn(2, char::is_whitespace);
        let op_text = parts.next().unwrap_or_default();
        let operand_text = parts.next().unwrap_or_default().trim();
        let op = match op_text {
            "&" => BitOp::And,
            "|" => BitOp::Or,
            "^" => BitOp::Xor,
            "<<" => BitOp::Shl,
            ">>" => BitOp::Shr,
            _ => return Err(P2pError::MalformedFilter(format!("unknown operator `{text}`"))),
        };
        let operand: u32 = operand_text
            .parse()
            .map_err(|_| P2pError::MalformedFilter(format!("operand `{operand_text}` is not a u32")))?;
        Ok(Operator::Bitwise { op, operand })
    }

    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Operator::Hash => fabric_record::hash(bytes).to_vec(),
            Operator::ByteSlice { start, length } => {
                let len = bytes.len() as i64;
                let start = if *start < 0 { (len + start).max(0) } else { (*start).min(len) } as usize;
                let end = match length {
                    Some(l) => (start + l).min(bytes.len()),
                    None => bytes.len(),
                };
                if start >= end {
                    Vec::new()
                } else {
                    bytes[start..end].to_vec()
                }
            }
            Operator::Bitwise { op, operand } => {
                let mut word = [0u8; 4];
                let n = bytes.len().min(4);
                word[4 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
                let value = u32::from_be_bytes(word);
                let result = match op {
                    BitOp::And => value & operand,
                    BitOp::Or => value | operand,
                    BitOp::Xor => value ^ operand,
                    BitOp::Shl => value.wrapping_shl(*operand),
                    BitOp::Shr => value.wrapping_shr(*operand),
                };
                result.to_be_bytes().to_vec()
            }
        }
    }
}

/// One compiled filter clause: `field`, `cmp`, the comparison `value`, and an
/// optional pre-comparison `operator`.
#[derive(Debug, Clone)]
pub struct FilterExpr {
    pub field: u8,
    pub cmp: Cmp,
    pub value: Vec<u8>,
    pub operator: Option<Operator>,
}

impl FilterExpr {
    pub fn new(field: u8, cmp: Cmp, value: Vec<u8>, operator: Option<Operator>) -> Self {
        Self { field, cmp, value, operator }
    }

    /// Evaluate against a record, returning whether it passes the clause.
    pub fn matches(&self, record: &fabric_record::PackedRecord) -> bool {
        let raw = record.field_payload(self.field);
        if self.cmp == Cmp::IsNull {
            return raw.is_none();
        }
        let Some(raw) = raw else { return false };
        let effective = match &self.operator {
            Some(operator) => operator.apply(raw),
            None => raw.to_vec(),
        };
        match self.cmp {
            Cmp::Eq => effective == self.value,
            Cmp::Ne => effective != self.value,
            Cmp::Lt => effective < self.value,
            Cmp::Le => effective <= self.value,
            Cmp::Gt => effective > self.value,
            Cmp::Ge => effective >= self.value,
            Cmp::IsNull => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_record::{encode_field, PackedRecord};

    #[test]
    fn byte_slice_operator_handles_negative_start() {
        let operator = Operator::parse(":-2").unwrap();
        assert_eq!(operator, Operator::ByteSlice { start: -2, length: None });
        assert_eq!(operator.apply(b"hello"), b"lo".to_vec());
    }

    #[test]
    fn bitwise_operator_parses_and_applies() {
        let operator = Operator::parse("& 255").unwrap();
        assert_eq!(operator.apply(&[0x01, 0x23]), 0x23u32.to_be_bytes().to_vec());
    }

    #[test]
    fn is_null_matches_absent_field() {
        let buf = Vec::new();
        let record = PackedRecord::parse(&buf).unwrap();
        let expr = FilterExpr::new(fabric_record::indexes::OWNER, Cmp::IsNull, Vec::new(), None);
        assert!(expr.matches(&record));
    }

    #[test]
    fn eq_matches_raw_field_bytes() {
        let mut buf = Vec::new();
        buf.extend(encode_field(fabric_record::indexes::OWNER, 0, b"abc"));
        let record = PackedRecord::parse(&buf).unwrap();
        let expr = FilterExpr::new(fabric_record::indexes::OWNER, Cmp::Eq, b"abc".to_vec(), None);
        assert!(expr.matches(&record));
        let expr = FilterExpr::new(fabric_record::indexes::OWNER, Cmp::Eq, b"xyz".to_vec(), None);
        assert!(!expr.matches(&record));
    }
}
