//! Transport framing for metric payloads.
//!
//! Egress order is serialize → gzip → AES-256-GCM; ingress inverts it.
//! Encrypting the compressed bytes keeps known-plaintext structure out of
//! the ciphertext and avoids compressing incompressible output.

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;

/// Header carrying the node identity on metric posts.
pub const NODE_ID_HEADER: &str = "X-Node-ID";
/// Header identifying the forwarding aggregator (provenance only).
pub const AGGREGATOR_ID_HEADER: &str = "X-Aggregator-ID";
/// Header marking an encrypted body; value is always `true`.
pub const ENCRYPTED_HEADER: &str = "X-Encrypted";
/// Header marking a compressed body; value is always `gzip`.
pub const COMPRESSED_HEADER: &str = "X-Compressed";

const GZIP_DEFAULT_LEVEL: u32 = 6;
const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Which transformations a frame carries, as described by its headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeFlags {
    /// Body is AES-256-GCM encrypted and Base64 framed.
    pub encrypted: bool,
    /// Body (or plaintext, when also encrypted) is a gzip stream.
    pub compressed: bool,
}

impl EnvelopeFlags {
    /// Content type to send with a frame carrying these flags.
    pub fn content_type(&self) -> &'static str {
        if self.encrypted || self.compressed {
            "application/octet-stream"
        } else {
            "application/json"
        }
    }
}

/// Security settings shared by every tier's config surface.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// AEAD settings for payload bodies.
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Compression settings for payload bodies.
    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

/// AEAD configuration. Only `aes-256-gcm` is supported.
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionConfig {
    /// Whether bodies are encrypted on egress / expected on ingress.
    #[serde(default)]
    pub enabled: bool,
    /// Algorithm name; recorded for the wire, not negotiated.
    #[serde(default = "default_encryption_algorithm")]
    pub algorithm: String,
    /// Shared key material; padded or truncated to 32 bytes.
    #[serde(default)]
    pub key: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: default_encryption_algorithm(),
            key: String::new(),
        }
    }
}

/// Gzip configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Whether bodies are compressed on egress.
    #[serde(default)]
    pub enabled: bool,
    /// Algorithm name; only `gzip` is supported.
    #[serde(default = "default_compression_algorithm")]
    pub algorithm: String,
    /// Gzip level; values outside 1..=9 are coerced to 6.
    #[serde(default = "default_compression_level")]
    pub level: i64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: default_compression_algorithm(),
            level: default_compression_level(),
        }
    }
}

fn default_encryption_algorithm() -> String {
    "aes-256-gcm".to_string()
}

fn default_compression_algorithm() -> String {
    "gzip".to_string()
}

fn default_compression_level() -> i64 {
    GZIP_DEFAULT_LEVEL as i64
}

/// Failures while framing or unframing a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame could not be decoded: bad Base64, short ciphertext,
    /// authentication failure, or a corrupt gzip stream.
    #[error("failed to process data: {0}")]
    Invalid(String),
    /// The receiver is not configured for a transformation the frame
    /// declares (e.g. encrypted body but no key configured).
    #[error("unsupported frame: {0}")]
    Unsupported(String),
}

/// Bidirectional payload framer driven by a [`SecurityConfig`].
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    security: SecurityConfig,
}

impl EnvelopeCodec {
    /// Builds a codec from the tier's security settings.
    pub fn new(security: SecurityConfig) -> Self {
        Self { security }
    }

    /// Codec that passes bodies through untouched.
    pub fn plaintext() -> Self {
        Self::new(SecurityConfig::default())
    }

    /// Frames an outgoing payload, returning the body and its flags.
    pub fn encode(&self, payload: &[u8]) -> Result<(Vec<u8>, EnvelopeFlags), CodecError> {
        let mut body = payload.to_vec();
        let mut flags = EnvelopeFlags::default();

        if self.security.compression.enabled {
            body = compress(&body, self.security.compression.level)?;
            flags.compressed = true;
        }

        if self.security.encryption.enabled {
            body = encrypt(&body, &self.security.encryption.key)?;
            flags.encrypted = true;
        }

        Ok((body, flags))
    }

    /// Unframes an incoming body according to the flags its headers carried.
    pub fn decode(&self, body: &[u8], flags: EnvelopeFlags) -> Result<Vec<u8>, CodecError> {
        let mut payload = body.to_vec();

        if flags.encrypted {
            if !self.security.encryption.enabled {
                return Err(CodecError::Unsupported(
                    "received encrypted data but decryption is not configured".into(),
                ));
            }
            payload = decrypt(&payload, &self.security.encryption.key)?;
        }

        if flags.compressed {
            payload = decompress(&payload)?;
        }

        Ok(payload)
    }
}

fn compress(data: &[u8], level: i64) -> Result<Vec<u8>, CodecError> {
    let level = if (1..=9).contains(&level) {
        level as u32
    } else {
        GZIP_DEFAULT_LEVEL
    };

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| CodecError::Invalid(format!("gzip compression failed: {err}")))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| CodecError::Invalid(format!("gzip decompression failed: {err}")))?;
    Ok(out)
}

/// Pads short keys with zeros and truncates long ones to 32 bytes.
pub fn normalize_key(key: &str) -> [u8; AES_KEY_LEN] {
    let mut out = [0u8; AES_KEY_LEN];
    let bytes = key.as_bytes();
    let len = bytes.len().min(AES_KEY_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Encrypts `data` under `key`, returning Base64(nonce ‖ ciphertext ‖ tag).
pub fn encrypt(data: &[u8], key: &str) -> Result<Vec<u8>, CodecError> {
    let key_bytes = normalize_key(key);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|_| CodecError::Invalid("encryption failed".into()))?;

    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(nonce.as_slice());
    framed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(framed).into_bytes())
}

/// Inverts [`encrypt`]; any decoding or authentication failure is `Invalid`.
pub fn decrypt(data: &[u8], key: &str) -> Result<Vec<u8>, CodecError> {
    let framed = BASE64
        .decode(data)
        .map_err(|err| CodecError::Invalid(format!("base64 decode failed: {err}")))?;

    if framed.len() < NONCE_LEN {
        return Err(CodecError::Invalid("ciphertext too short".into()));
    }

    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
    let key_bytes = normalize_key(key);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CodecError::Invalid("decryption failed".into()))
}
