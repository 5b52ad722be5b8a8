//! blake2b-256 hashing, mirroring the wrapper shape of the teacher's
//! `crypto_suite::hashing::blake3` (a `HashEngine` trait plus a free `hash`
//! function), swapped to the hash function spec.md §6 fixes: blake2b-256.

use blake2::Blake2b;
use digest::consts::U32;
use digest::Digest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type Blake2b256 = Blake2b<U32>;

/// 32-byte digest produced by every hashing entry point in this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashOutput([u8; 32]);

impl HashOutput {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for HashOutput {
    fn default() -> Self {
        Self([0u8; 32])
    }
}

impl From<[u8; 32]> for HashOutput {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<HashOutput> for [u8; 32] {
    fn from(value: HashOutput) -> Self {
        value.0
    }
}

impl std::fmt::Debug for HashOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HashOutput").field(&self.to_hex()).finish()
    }
}

impl std::fmt::Display for HashOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for HashOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("hash must be 32 bytes"))?;
        Ok(HashOutput(array))
    }
}

/// Incremental hashing engine, usable when a caller wants to stream bytes in
/// rather than build a single concatenated buffer first.
pub struct Hasher(Blake2b256);

impl Hasher {
    pub fn new() -> Self {
        Self(Blake2b256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> HashOutput {
        let digest = self.0.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        HashOutput(out)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot blake2b-256 over a single buffer.
pub fn hash(data: &[u8]) -> HashOutput {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// blake2b-256 over the concatenation of several buffers.
pub fn hash_concat(parts: &[&[u8]]) -> HashOutput {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// The `HashList` convention from spec.md's glossary: start fresh; for each
/// buffer, if present, fold it in; if it is `None`, finalize the hasher built
/// so far, reset, and seed the new hasher with the just-finalized digest.
/// This binds a composite key over a sequence of optional components without
/// ambiguity between "field absent" and "field present but empty".
pub fn hash_list(parts: &[Option<&[u8]>]) -> HashOutput {
    let mut hasher = Hasher::new();
    for part in parts {
        match part {
            Some(bytes) => hasher.update(bytes),
            None => {
                let digest = std::mem::replace(&mut hasher, Hasher::new()).finalize();
                hasher.update(digest.as_bytes());
            }
        }
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"abc"), hash(b"abc"));
        assert_ne!(hash(b"abc"), hash(b"abd"));
    }

    #[test]
    fn hash_concat_matches_single_buffer() {
        let concatenated = hash(b"helloworld");
        let split = hash_concat(&[b"hello", b"world"]);
        assert_eq!(concatenated, split);
    }

    #[test]
    fn hash_list_distinguishes_absent_from_empty() {
        let with_none = hash_list(&[Some(b"a"), None, Some(b"b")]);
        let without_none = hash_list(&[Some(b"a"), Some(b"b")]);
        assert_ne!(with_none, without_none);
    }
}
