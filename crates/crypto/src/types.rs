//! Zeroizing cryptographic key types
//!
//! Secure wrappers for key material that clear memory on drop. Payload keys
//! exist only for the duration of a single encrypt or decrypt operation.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric payload key (32 bytes) that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PayloadKey(pub(crate) [u8; 32]);

impl PayloadKey {
    /// Create a payload key from a 32-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidLength {
                expected: 32,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(PayloadKey(key))
    }

    /// Generate a fresh random payload key
    pub fn generate() -> Self {
        PayloadKey(crate::helpers::generate_key_32())
    }

    /// Get a reference to the key bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never reach log output
        f.write_str("PayloadKey(..)")
    }
}

/// 96-bit nonce (12 bytes) that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop, Default)]
pub struct Nonce96(pub(crate) [u8; 12]);

impl Nonce96 {
    /// Create a nonce from a 12-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 12 {
            return Err(KeyError::InvalidLength {
                expected: 12,
                got: bytes.len(),
            });
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(bytes);
        Ok(Nonce96(nonce))
    }

    /// Get a reference to the nonce bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Get a mutable reference to the nonce bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Key-related errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Key generation failed")]
    GenerationFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_key_length_check() {
        assert!(PayloadKey::from_slice(&[0u8; 32]).is_ok());
        let err = PayloadKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            KeyError::InvalidLength {
                expected: 32,
                got: 16
            }
        ));
    }

    #[test]
    fn test_generate_is_random() {
        let a = PayloadKey::generate();
        let b = PayloadKey::generate();
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_debug_redacts_key_bytes() {
        let key = PayloadKey::from_slice(&[0xAA; 32]).unwrap();
        let rendered = format!("{:?}", key);
        assert_eq!(rendered, "PayloadKey(..)");
    }
}
