//! Per-algorithm sign/verify backends, mirroring the shape of the teacher's
//! `crypto_suite::signatures::ed25519` wrapper around `ed25519-dalek`, with a
//! secp256k1 backend added over `k256` for the optional Ethereum-style keys
//! spec.md §4.B allows.

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use fabric_record::{AlgoType, HashOutput};
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::ecdsa::{Signature as K256Signature, SigningKey as K256SigningKey, VerifyingKey as K256VerifyingKey};

/// One keypair a worker knows how to sign with, keyed by its public key
/// bytes so `sign()` can look up the right backend for a caller-supplied
/// `publicKey`.
#[derive(Clone)]
pub enum KeyPair {
    Ed25519(Box<SigningKey>),
    Secp256k1(Box<K256SigningKey>),
}

impl KeyPair {
    pub fn algo_type(&self) -> AlgoType {
        match self {
            KeyPair::Ed25519(_) => AlgoType::Ed25519,
            KeyPair::Secp256k1(_) => AlgoType::Secp256k1,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
            KeyPair::Secp256k1(sk) => sk.verifying_key().to_sec1_bytes().to_vec(),
        }
    }

    pub fn sign(&self, message: &HashOutput) -> Vec<u8> {
        match self {
            KeyPair::Ed25519(sk) => sk.sign(message.as_bytes()).to_bytes().to_vec(),
            KeyPair::Secp256k1(sk) => {
                let sig: K256Signature = sk.sign(message.as_bytes());
                sig.to_der().as_bytes().to_vec()
            }
        }
    }
}

/// Verify one extracted signature against its declared algorithm. Unknown
/// key encodings or signature encodings verify as `false` rather than
/// erroring, since the caller is expected to treat "not valid" uniformly
/// whether the cause is a bad key or a bad signature.
pub fn verify(algo: AlgoType, public_key: &[u8], message: &HashOutput, signature: &[u8]) -> bool {
    match algo {
        AlgoType::Ed25519 => {
            let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
                return false;
            };
            let Ok(vk) = VerifyingKey::from_bytes(&key_bytes) else {
                return false;
            };
            let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
                return false;
            };
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            vk.verify(message.as_bytes(), &sig).is_ok()
        }
        AlgoType::Secp256k1 => {
            let Ok(vk) = K256VerifyingKey::from_sec1_bytes(public_key) else {
                return false;
            };
            let Ok(sig) = K256Signature::from_der(signature) else {
                return false;
            };
            vk.verify(message.as_bytes(), &sig).is_ok()
        }
    }
}
