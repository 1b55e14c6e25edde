//! SHA-256 helpers.
//!
//! Every digest in the protocol is SHA-256: manifest content hashes,
//! deterministic edge RIDs, and the suffix binding a node RID to its
//! public key.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the SHA-256 digest of a string and returns lowercase hex.
///
/// This is the form embedded in RIDs and manifests. The input is hashed
/// as its UTF-8 bytes — for public keys that means the base64 DER string
/// itself, not the decoded DER.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(sha256(input.as_bytes()))
}
