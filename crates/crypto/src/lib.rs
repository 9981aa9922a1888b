//! TDF3 Cryptographic Operations
//!
//! This crate provides the cryptographic primitives for the TDF3 container
//! engine with security hardening:
//! - Zeroizing key types that automatically clear memory
//! - Constant-time MAC verification for segment hashes, root signatures and
//!   policy bindings
//! - AES-256-GCM segment encryption (`IV || ciphertext || tag` layout)
//! - RSA-OAEP key wrapping against KAS public keys
//! - RS256 session signing for the rewrap request protocol
//!
//! # Example
//!
//! ```
//! use tdf3_crypto::{PayloadKey, SegmentCipher, SegmentHashAlg};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = SegmentCipher::new(PayloadKey::generate(), SegmentHashAlg::Gmac)?;
//!
//! let segment = cipher.encrypt_segment(b"sensitive information")?;
//! cipher.verify_segment_hash(&segment.data, &segment.hash)?;
//!
//! let plaintext = cipher.decrypt_segment(&segment.data)?;
//! assert_eq!(plaintext, b"sensitive information");
//! # Ok(())
//! # }
//! ```

pub mod helpers;
pub mod hmac;
pub mod kem;
pub mod segment;
pub mod sign;
pub mod types;

// Re-export commonly used types
pub use helpers::{
    aead_decrypt, aead_encrypt, create_aes_cipher, generate_key_32, generate_nonce, CryptoError,
};
pub use hmac::{
    calculate_hmac, calculate_policy_binding, calculate_root_signature, verify_policy_binding,
    verify_root_signature, HmacError,
};
pub use kem::rsa::{wrap_payload_key, OaepHash, RsaOaepKem};
pub use kem::{KemError, KeyEncapsulation};
pub use segment::{
    EncryptedSegment, EncryptionError, SegmentCipher, SegmentHashAlg, GCM_IV_SIZE, GCM_TAG_SIZE,
};
pub use sign::{verify_rs256, SessionKeyPair, SignError};
pub use types::{KeyError, Nonce96, PayloadKey};
