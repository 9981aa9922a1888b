//! Cryptographic helper functions
//!
//! Common utilities for cipher initialization, nonce and key generation,
//! and one-shot AEAD operations used for encrypted metadata.

// Allow deprecated warnings for Nonce::from_slice() which is the correct API for aes-gcm 0.10.x
#![allow(deprecated)]

use crate::types::{Nonce96, PayloadKey};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Cipher initialization failed")]
    CipherInitFailed,

    #[error("AEAD operation failed")]
    AeadFailed,
}

/// Create an AES-256-GCM cipher from a payload key
pub fn create_aes_cipher(key: &PayloadKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::InvalidKeyLength)
}

/// Generate a random 96-bit nonce for AES-GCM
pub fn generate_nonce() -> Nonce96 {
    let mut nonce = Nonce96::default();
    OsRng.fill_bytes(nonce.as_mut_slice());
    nonce
}

/// Generate a random 32-byte key
pub fn generate_key_32() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// One-shot AES-256-GCM encryption under a fresh random IV
///
/// Returns the IV, the ciphertext body and the 16-byte authentication tag
/// separately, the layout encrypted-metadata bundles use.
pub fn aead_encrypt(
    key: &PayloadKey,
    plaintext: &[u8],
) -> Result<(Nonce96, Vec<u8>, Vec<u8>), CryptoError> {
    let cipher = create_aes_cipher(key)?;
    let iv = generate_nonce();
    let nonce = Nonce::from_slice(iv.as_slice());

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::AeadFailed)?;
    let tag = ciphertext.split_off(ciphertext.len() - 16);

    Ok((iv, ciphertext, tag))
}

/// One-shot AES-256-GCM decryption of a split `{ciphertext, iv, tag}` bundle
pub fn aead_decrypt(
    key: &PayloadKey,
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != 12 {
        return Err(CryptoError::AeadFailed);
    }
    let cipher = create_aes_cipher(key)?;
    let nonce = Nonce::from_slice(iv);

    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|_| CryptoError::AeadFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_cipher() {
        let key = PayloadKey::generate();
        assert!(create_aes_cipher(&key).is_ok());
    }

    #[test]
    fn test_generate_nonce() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();
        // Different with overwhelming probability
        assert_ne!(nonce1.as_slice(), nonce2.as_slice());
    }

    #[test]
    fn test_generate_key() {
        let key1 = generate_key_32();
        let key2 = generate_key_32();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_aead_roundtrip() {
        let key = PayloadKey::generate();
        let (iv, ciphertext, tag) = aead_encrypt(&key, b"metadata json").unwrap();

        assert_eq!(iv.as_slice().len(), 12);
        assert_eq!(tag.len(), 16);
        assert_eq!(ciphertext.len(), b"metadata json".len());

        let plaintext = aead_decrypt(&key, iv.as_slice(), &ciphertext, &tag).unwrap();
        assert_eq!(plaintext, b"metadata json");
    }

    #[test]
    fn test_aead_rejects_tampered_tag() {
        let key = PayloadKey::generate();
        let (iv, ciphertext, mut tag) = aead_encrypt(&key, b"metadata json").unwrap();
        tag[0] ^= 1;
        assert!(aead_decrypt(&key, iv.as_slice(), &ciphertext, &tag).is_err());
    }
}
