//! Node credential primitives.
//!
//! A node token exists in three forms: the cleartext handed to the operator
//! exactly once, a bcrypt hash used for verification, and an AEAD-wrapped
//! escrow copy under the process master key for operator recovery.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;

use crate::envelope::{self, CodecError};

const TOKEN_LEN: usize = 32;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a 32-character random token from a CSPRNG.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hashes a token with bcrypt at the default cost.
pub fn hash_token(token: &str) -> anyhow::Result<String> {
    bcrypt::hash(token, bcrypt::DEFAULT_COST)
        .map_err(|err| anyhow::anyhow!("failed to hash token: {err}"))
}

/// Verifies a token against a stored bcrypt hash. Malformed hashes count
/// as a mismatch rather than an error.
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    bcrypt::verify(token, stored_hash).unwrap_or(false)
}

/// AES-256-GCM wrapper around the process-wide master key.
///
/// The key is read-only after construction; rotation restarts the process.
#[derive(Debug, Clone)]
pub struct MasterCipher {
    key: String,
}

impl MasterCipher {
    /// Builds a cipher over the configured master key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Encrypts a cleartext token for escrow storage; output is
    /// Base64(Base64(nonce ‖ ciphertext ‖ tag)) matching the column framing.
    pub fn seal(&self, token: &str) -> Result<String, CodecError> {
        let sealed = envelope::encrypt(token.as_bytes(), &self.key)?;
        Ok(BASE64.encode(sealed))
    }

    /// Recovers the cleartext token from its escrow column value.
    pub fn open(&self, stored: &str) -> Result<String, CodecError> {
        let framed = BASE64
            .decode(stored)
            .map_err(|err| CodecError::Invalid(format!("base64 decode failed: {err}")))?;
        let plaintext = envelope::decrypt(&framed, &self.key)?;
        String::from_utf8(plaintext)
            .map_err(|_| CodecError::Invalid("recovered token is not utf-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_distinct_and_sized() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hash_verifies_only_the_original_token() {
        let token = generate_token();
        let hash = hash_token(&token).expect("hash");
        assert!(verify_token(&token, &hash));
        assert!(!verify_token("some-other-token", &hash));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_token("token", "not-a-bcrypt-hash"));
    }

    #[test]
    fn escrow_roundtrip_recovers_the_token() {
        let cipher = MasterCipher::new("master-key");
        let token = generate_token();
        let sealed = cipher.seal(&token).expect("seal");
        assert_eq!(cipher.open(&sealed).expect("open"), token);
    }

    #[test]
    fn escrow_fails_under_a_different_master_key() {
        let sealed = MasterCipher::new("key-one").seal("tok").expect("seal");
        assert!(MasterCipher::new("key-two").open(&sealed).is_err());
    }
}
