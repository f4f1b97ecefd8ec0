//! PII handling interface.
//!
//! Encryption itself lives outside this service (KMS-backed, ciphertexts
//! laid out as `iv:tag:ciphertext`); this module defines the narrow contract
//! the workflows consume plus the deterministic blind index used for
//! equality lookups without decryption.

use crate::errors::{EscrowEngineError, Result};
use sha2::{Digest, Sha256};

pub trait PiiCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;

    /// Deterministic one-way hash for lookup columns. Never stores plaintext.
    fn hash_for_lookup(&self, value: &str) -> String {
        blind_index("escrow-engine", value)
    }
}

/// Salted SHA-256 blind index, hex encoded.
pub fn blind_index(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Stand-in cipher for development and tests. Marks values clearly as
/// unencrypted; the production cipher is injected by the host process.
pub struct PlainTextCipher;

impl PiiCipher for PlainTextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(format!("plain::{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        ciphertext
            .strip_prefix("plain::")
            .map(|s| s.to_string())
            .ok_or_else(|| EscrowEngineError::Crypto("not a plain-text ciphertext".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blind_index_is_deterministic() {
        let a = blind_index("salt", "+254700000001");
        let b = blind_index("salt", "+254700000001");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_blind_index_differs_by_salt_and_value() {
        assert_ne!(blind_index("a", "x"), blind_index("b", "x"));
        assert_ne!(blind_index("a", "x"), blind_index("a", "y"));
    }

    #[test]
    fn test_plain_text_cipher_round_trip() {
        let cipher = PlainTextCipher;
        let ct = cipher.encrypt("+254700000001").unwrap();
        assert_ne!(ct, "+254700000001");
        assert_eq!(cipher.decrypt(&ct).unwrap(), "+254700000001");
    }
}
