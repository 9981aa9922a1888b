//! Key Encapsulation Mechanisms (KEM)
//!
//! Abstractions for wrapping payload keys against a Key Access Server's
//! public key and unwrapping server responses under the client session key.

use thiserror::Error;

pub mod rsa;

/// KEM-related errors
#[derive(Debug, Error)]
pub enum KemError {
    #[error("Key wrapping failed: {0}")]
    WrapError(String),

    #[error("Key unwrapping failed: {0}")]
    UnwrapError(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Trait for key encapsulation mechanisms
pub trait KeyEncapsulation {
    /// Public key type
    type PublicKey;

    /// Private key type
    type PrivateKey;

    /// Wrapped key type (ciphertext)
    type WrappedKey;

    /// Wrap a symmetric key with a public key
    fn wrap(&self, key: &[u8], public_key: &Self::PublicKey) -> Result<Self::WrappedKey, KemError>;

    /// Unwrap a symmetric key with a private key
    fn unwrap(
        &self,
        wrapped: &Self::WrappedKey,
        private_key: &Self::PrivateKey,
    ) -> Result<Vec<u8>, KemError>;
}
