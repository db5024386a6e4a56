// Backup file encoding: gzip, then ChaCha20-Poly1305, then SHA-256 over the
// stored bytes.
//
// Encrypted layout: MAGIC (8) || nonce (12) || ciphertext+tag

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

const MAGIC: &[u8; 8] = b"NVBKENC1";
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),
    #[error("decompression failed: {0}")]
    Decompression(#[source] std::io::Error),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed (wrong key or tampered file)")]
    DecryptionFailed,
    #[error("not an encrypted backup")]
    InvalidFormat,
    #[error("backup is encrypted but no encryption key is configured")]
    MissingKey,
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Lowercase hex SHA-256
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompression)?;
    Ok(out)
}

pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CodecError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CodecError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CodecError> {
    let body = data.strip_prefix(MAGIC).ok_or(CodecError::InvalidFormat)?;
    if body.len() < NONCE_LEN {
        return Err(CodecError::InvalidFormat);
    }
    let (nonce_bytes, ciphertext) = body.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CodecError::DecryptionFailed)
}

/// Database image -> stored bytes
pub fn encode(image: Vec<u8>, compress_image: bool, key: Option<&[u8; 32]>) -> Result<Vec<u8>, CodecError> {
    let data = if compress_image { compress(&image)? } else { image };
    match key {
        Some(key) => encrypt(&data, key),
        None => Ok(data),
    }
}

/// Stored bytes -> database image
pub fn decode(
    stored: Vec<u8>,
    compressed: bool,
    encrypted: bool,
    key: Option<&[u8; 32]>,
) -> Result<Vec<u8>, CodecError> {
    let data = if encrypted {
        decrypt(&stored, key.ok_or(CodecError::MissingKey)?)?
    } else {
        stored
    };
    if compressed {
        decompress(&data)
    } else {
        Ok(data)
    }
}

/// Decode a base64 (standard alphabet) 32-byte key
pub fn parse_key(encoded: &str) -> Result<[u8; 32], CodecError> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
        .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| CodecError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Fresh random key, base64-encoded for NOTEVAULT_BACKUP_ENCRYPTION_KEY
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key)
}
