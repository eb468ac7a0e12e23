// SPDX-License-Identifier: Apache-2.0
//! Crypto port: SHA-256, HMAC-SHA-256, and timing-safe comparison.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Cryptographic primitives consumed by the engine and the sync layer.
///
/// Implementations must be deterministic and side-effect free; the engine
/// hashes canonical bytes and compares authentication tags through this
/// trait only.
pub trait CryptoPort: Send + Sync {
    /// SHA-256 of `bytes`, lowercase hex.
    fn sha256_hex(&self, bytes: &[u8]) -> String;

    /// HMAC-SHA-256 of `bytes` under `key`, raw tag bytes.
    fn hmac_sha256(&self, key: &[u8], bytes: &[u8]) -> Vec<u8>;

    /// Constant-time equality over equal-length buffers.
    ///
    /// A length mismatch returns `false` immediately — the length of a tag is
    /// not secret.
    fn timing_safe_eq(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Default [`CryptoPort`] backed by the `sha2` and `hmac` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdCrypto;

impl StdCrypto {
    /// Creates the default crypto port.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CryptoPort for StdCrypto {
    fn sha256_hex(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn hmac_sha256(&self, key: &[u8], bytes: &[u8]) -> Vec<u8> {
        let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(key) else {
            // HMAC accepts keys of any length; InvalidLength cannot occur.
            unreachable!("HMAC-SHA-256 rejected a key");
        };
        mac.update(bytes);
        mac.finalize().into_bytes().to_vec()
    }

    fn timing_safe_eq(&self, a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let crypto = StdCrypto::new();
        // SHA-256("abc")
        assert_eq!(
            crypto.sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_known_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let crypto = StdCrypto::new();
        let tag = crypto.hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn timing_safe_eq_semantics() {
        let crypto = StdCrypto::new();
        assert!(crypto.timing_safe_eq(b"same", b"same"));
        assert!(!crypto.timing_safe_eq(b"same", b"sane"));
        assert!(!crypto.timing_safe_eq(b"short", b"longer"));
        assert!(crypto.timing_safe_eq(b"", b""));
    }

    #[test]
    fn hmac_accepts_empty_key() {
        let crypto = StdCrypto::new();
        let tag = crypto.hmac_sha256(b"", b"payload");
        assert_eq!(tag.len(), 32);
    }
}
