//! Session signing keys for the KAS request protocol
//!
//! Each client instance holds an RSA-2048 session keypair. The private half
//! signs rewrap request tokens (RSASSA-PKCS1-v1_5 with SHA-256) and unwraps
//! entity-wrapped keys returned by KAS; the public half travels in the
//! request so KAS can wrap against it.

use crate::kem::KemError;
use pkcs8::LineEnding;
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("PEM encoding failed: {0}")]
    PemEncoding(String),

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// RSA-2048 session keypair held for the lifetime of a client
pub struct SessionKeyPair {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl SessionKeyPair {
    /// Generate a fresh RSA-2048 session keypair
    pub fn generate() -> Result<Self, SignError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| SignError::KeyGeneration(e.to_string()))?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SignError::PemEncoding(e.to_string()))?;

        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// PEM-encoded session public key
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign a message with RSASSA-PKCS1-v1_5 / SHA-256
    pub fn sign_rs256(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        signing_key.sign(message).to_vec()
    }

    /// Unwrap an entity-wrapped key returned by KAS
    ///
    /// KAS wraps the payload key under this session's public key with
    /// RSA-OAEP (SHA-1, the interop default).
    pub fn unwrap_entity_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KemError> {
        self.private_key
            .decrypt(Oaep::new::<Sha1>(), wrapped)
            .map_err(|e| KemError::UnwrapError(format!("RSA-OAEP decryption failed: {}", e)))
    }
}

impl std::fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeyPair(..)")
    }
}

/// Verify an RS256 signature against a PEM public key
pub fn verify_rs256(public_key_pem: &str, message: &[u8], signature: &[u8]) -> Result<(), SignError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SignError::InvalidKey(e.to_string()))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature =
        Signature::try_from(signature).map_err(|_| SignError::VerificationFailed)?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| SignError::VerificationFailed)
}
