//! Segment encryption for the TDF3 container format
//!
//! Each plaintext segment is encrypted independently with AES-256-GCM under
//! a fresh random 96-bit IV and stored as `IV(12) || ciphertext || tag(16)`.
//! Every stored segment carries an integrity tag: either the GCM
//! authentication tag itself (GMAC) or HMAC-SHA256 over the stored bytes
//! (HS256), selected per manifest.

// Allow deprecated warnings for Nonce::from_slice() which is the correct API for aes-gcm 0.10.x
#![allow(deprecated)]

use crate::helpers::generate_nonce;
use crate::hmac::{calculate_hmac, HmacError};
use crate::types::PayloadKey;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// AES-GCM IV length prepended to each stored segment
pub const GCM_IV_SIZE: usize = 12;

/// AES-GCM authentication tag length trailing each stored segment
pub const GCM_TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("AEAD operation failed: {0}")]
    AeadError(aes_gcm::Error),

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Segment too short: {got} bytes")]
    SegmentTooShort { got: usize },

    #[error("Segment hash mismatch")]
    HashMismatch,

    #[error("MAC error: {0}")]
    MacError(#[from] HmacError),
}

/// Per-segment integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentHashAlg {
    /// GCM authentication tag of the segment (last 16 bytes of the stored
    /// ciphertext)
    #[default]
    Gmac,

    /// HMAC-SHA256 over the full stored segment bytes, keyed by the payload
    /// key
    Hs256,
}

impl SegmentHashAlg {
    /// Wire name used in the manifest's `segmentHashAlg` field
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentHashAlg::Gmac => "GMAC",
            SegmentHashAlg::Hs256 => "HS256",
        }
    }

    /// Parse a manifest `segmentHashAlg` value
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GMAC" => Some(SegmentHashAlg::Gmac),
            "HS256" => Some(SegmentHashAlg::Hs256),
            _ => None,
        }
    }
}

/// An encrypted segment ready for the payload stream
#[derive(Debug)]
pub struct EncryptedSegment {
    /// Stored bytes: `IV(12) || ciphertext || tag(16)`
    pub data: Vec<u8>,

    /// Raw integrity tag over `data` (GMAC or HS256 per cipher config)
    pub hash: Vec<u8>,
}

/// Stateless segment cipher bound to one payload key
///
/// One instance serves a whole encrypt or decrypt operation; it owns its
/// copy of the payload key so the key material is zeroized when the
/// operation completes.
pub struct SegmentCipher {
    cipher: Aes256Gcm,
    key: PayloadKey,
    hash_alg: SegmentHashAlg,
}

impl SegmentCipher {
    pub fn new(key: PayloadKey, hash_alg: SegmentHashAlg) -> Result<Self, EncryptionError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        Ok(Self {
            cipher,
            key,
            hash_alg,
        })
    }

    pub fn hash_alg(&self) -> SegmentHashAlg {
        self.hash_alg
    }

    /// Encrypt one plaintext segment under a fresh random IV
    pub fn encrypt_segment(&self, plaintext: &[u8]) -> Result<EncryptedSegment, EncryptionError> {
        let iv = generate_nonce();
        let nonce = Nonce::from_slice(iv.as_slice());

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(EncryptionError::AeadError)?;

        let mut data = Vec::with_capacity(GCM_IV_SIZE + ciphertext.len());
        data.extend_from_slice(iv.as_slice());
        data.extend_from_slice(&ciphertext);

        let hash = self.segment_hash(&data)?;
        Ok(EncryptedSegment { data, hash })
    }

    /// Decrypt one stored segment (`IV || ciphertext || tag`)
    pub fn decrypt_segment(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < GCM_IV_SIZE + GCM_TAG_SIZE {
            return Err(EncryptionError::SegmentTooShort { got: data.len() });
        }

        let nonce = Nonce::from_slice(&data[..GCM_IV_SIZE]);
        self.cipher
            .decrypt(nonce, &data[GCM_IV_SIZE..])
            .map_err(EncryptionError::AeadError)
    }

    /// Compute the raw integrity tag for a stored segment
    pub fn segment_hash(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        match self.hash_alg {
            SegmentHashAlg::Gmac => {
                if data.len() < GCM_IV_SIZE + GCM_TAG_SIZE {
                    return Err(EncryptionError::SegmentTooShort { got: data.len() });
                }
                Ok(data[data.len() - GCM_TAG_SIZE..].to_vec())
            }
            SegmentHashAlg::Hs256 => Ok(calculate_hmac(self.key.as_slice(), data)?),
        }
    }

    /// Verify a stored segment against its manifest hash in constant time
    pub fn verify_segment_hash(
        &self,
        data: &[u8],
        expected_hash: &[u8],
    ) -> Result<(), EncryptionError> {
        let calculated = self.segment_hash(data)?;
        if calculated.ct_eq(expected_hash).into() {
            Ok(())
        } else {
            Err(EncryptionError::HashMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(alg: SegmentHashAlg) -> SegmentCipher {
        SegmentCipher::new(PayloadKey::generate(), alg).unwrap()
    }

    #[test]
    fn test_segment_roundtrip_gmac() {
        let cipher = cipher(SegmentHashAlg::Gmac);
        let plaintext = b"segment plaintext";

        let segment = cipher.encrypt_segment(plaintext).unwrap();
        assert_eq!(
            segment.data.len(),
            GCM_IV_SIZE + plaintext.len() + GCM_TAG_SIZE
        );
        assert_eq!(segment.hash.len(), GCM_TAG_SIZE);

        let decrypted = cipher.decrypt_segment(&segment.data).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_segment_roundtrip_hs256() {
        let cipher = cipher(SegmentHashAlg::Hs256);
        let plaintext = vec![0x5Au8; 4096];

        let segment = cipher.encrypt_segment(&plaintext).unwrap();
        assert_eq!(segment.hash.len(), 32);
        assert!(cipher
            .verify_segment_hash(&segment.data, &segment.hash)
            .is_ok());

        let decrypted = cipher.decrypt_segment(&segment.data).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_iv_per_segment() {
        let cipher = cipher(SegmentHashAlg::Gmac);
        let a = cipher.encrypt_segment(b"same input").unwrap();
        let b = cipher.encrypt_segment(b"same input").unwrap();
        assert_ne!(a.data[..GCM_IV_SIZE], b.data[..GCM_IV_SIZE]);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_tampered_segment_fails_decrypt() {
        let cipher = cipher(SegmentHashAlg::Gmac);
        let mut segment = cipher.encrypt_segment(b"protect me").unwrap();
        segment.data[GCM_IV_SIZE] ^= 1;
        assert!(cipher.decrypt_segment(&segment.data).is_err());
    }

    #[test]
    fn test_tampered_segment_fails_hash_check() {
        for alg in [SegmentHashAlg::Gmac, SegmentHashAlg::Hs256] {
            let cipher = cipher(alg);
            let segment = cipher.encrypt_segment(b"protect me").unwrap();

            let mut tampered = segment.data.clone();
            *tampered.last_mut().unwrap() ^= 1;
            assert!(matches!(
                cipher.verify_segment_hash(&tampered, &segment.hash),
                Err(EncryptionError::HashMismatch)
            ));
        }
    }

    #[test]
    fn test_short_segment_rejected() {
        let cipher = cipher(SegmentHashAlg::Gmac);
        let err = cipher.decrypt_segment(&[0u8; 20]).unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::SegmentTooShort { got: 20 }
        ));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(SegmentHashAlg::Gmac.as_str(), "GMAC");
        assert_eq!(SegmentHashAlg::Hs256.as_str(), "HS256");
        assert_eq!(
            SegmentHashAlg::from_name("HS256"),
            Some(SegmentHashAlg::Hs256)
        );
        assert_eq!(SegmentHashAlg::from_name("SHA1"), None);
    }
}
