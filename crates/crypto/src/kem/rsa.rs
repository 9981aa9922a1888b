//! RSA-OAEP key wrapping
//!
//! Payload keys are wrapped against a KAS public key with RSA-OAEP. SHA-1
//! with MGF1-SHA1 is the wire default for KAS interoperability; SHA-256 is
//! available for deployments that have confirmed server support.

use super::{KemError, KeyEncapsulation};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

/// OAEP hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OaepHash {
    /// SHA-1 with MGF1-SHA1, the KAS interop default
    #[default]
    Sha1,

    /// SHA-256, for servers known to accept it
    Sha256,
}

/// RSA-OAEP key encapsulation over PEM-encoded keys
pub struct RsaOaepKem {
    pub hash: OaepHash,
}

impl Default for RsaOaepKem {
    fn default() -> Self {
        RsaOaepKem {
            hash: OaepHash::Sha1,
        }
    }
}

impl RsaOaepKem {
    pub fn new(hash: OaepHash) -> Self {
        RsaOaepKem { hash }
    }

    fn padding(&self) -> Oaep {
        match self.hash {
            OaepHash::Sha1 => Oaep::new::<Sha1>(),
            OaepHash::Sha256 => Oaep::new::<Sha256>(),
        }
    }
}

impl KeyEncapsulation for RsaOaepKem {
    type PublicKey = String; // PEM-encoded public key
    type PrivateKey = String; // PEM-encoded PKCS#8 private key
    type WrappedKey = String; // Base64-encoded ciphertext

    fn wrap(&self, key: &[u8], public_key_pem: &Self::PublicKey) -> Result<String, KemError> {
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| KemError::InvalidKey(format!("Failed to parse RSA public key: {}", e)))?;

        let wrapped = public_key
            .encrypt(&mut OsRng, self.padding(), key)
            .map_err(|e| KemError::WrapError(format!("RSA-OAEP encryption failed: {}", e)))?;

        Ok(BASE64.encode(&wrapped))
    }

    fn unwrap(
        &self,
        wrapped_b64: &Self::WrappedKey,
        private_key_pem: &Self::PrivateKey,
    ) -> Result<Vec<u8>, KemError> {
        let wrapped = BASE64
            .decode(wrapped_b64)
            .map_err(|e| KemError::EncodingError(format!("Base64 decode failed: {}", e)))?;

        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| KemError::InvalidKey(format!("Failed to parse RSA private key: {}", e)))?;

        private_key
            .decrypt(self.padding(), &wrapped)
            .map_err(|e| KemError::UnwrapError(format!("RSA-OAEP decryption failed: {}", e)))
    }
}

/// Wrap a payload key for a KAS target with the interop default padding
pub fn wrap_payload_key(payload_key: &[u8], kas_public_key_pem: &str) -> Result<String, KemError> {
    RsaOaepKem::default().wrap(payload_key, &kas_public_key_pem.to_string())
}
