//! HMAC operations with constant-time verification
//!
//! HMAC-SHA256 backs three integrity mechanisms of the container format:
//! per-segment HS256 hashes, the root signature over the ordered segment
//! hashes, and the policy binding that ties a key-access object to the
//! manifest's policy. All verifications compare in constant time.

use crate::types::PayloadKey;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum HmacError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("HMAC verification failed")]
    VerificationFailed,

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// Calculate HMAC-SHA256 over data
///
/// Low-level building block; the container operations below are the
/// intended entry points.
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, HmacError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HmacError::InitFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Calculate the root signature over the ordered segment hashes
///
/// The root signature is
/// `Base64(HMAC-SHA256(payload_key, concat(hash_1, hash_2, ...)))` where
/// each `hash_i` is the raw (base64-decoded) per-segment integrity tag in
/// committed order.
pub fn calculate_root_signature(
    segment_hashes: &[Vec<u8>],
    payload_key: &PayloadKey,
) -> Result<String, HmacError> {
    let mut aggregate = Vec::new();
    for hash in segment_hashes {
        aggregate.extend_from_slice(hash);
    }

    let mac = calculate_hmac(payload_key.as_slice(), &aggregate)?;
    Ok(BASE64.encode(mac))
}

/// Verify the root signature against the ordered segment hashes
///
/// Recomputes HMAC-SHA256 over the concatenated raw segment hashes and
/// compares against the stored signature in constant time.
pub fn verify_root_signature(
    segment_hashes: &[Vec<u8>],
    payload_key: &PayloadKey,
    expected_sig_b64: &str,
) -> Result<(), HmacError> {
    let mut aggregate = Vec::new();
    for hash in segment_hashes {
        aggregate.extend_from_slice(hash);
    }

    let calculated = calculate_hmac(payload_key.as_slice(), &aggregate)?;
    let expected = BASE64.decode(expected_sig_b64)?;

    if calculated.ct_eq(&expected).into() {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}

/// Calculate the policy binding for a key-access object
///
/// `Base64(HMAC-SHA256(payload_key, policy_b64))` where `policy_b64` is the
/// literal base64 policy text exactly as stored in the manifest. The caller
/// must not re-encode or re-canonicalize the policy before binding.
pub fn calculate_policy_binding(
    policy_b64: &str,
    payload_key: &PayloadKey,
) -> Result<String, HmacError> {
    let mac = calculate_hmac(payload_key.as_slice(), policy_b64.as_bytes())?;
    Ok(BASE64.encode(mac))
}

/// Verify a key-access object's policy binding in constant time
pub fn verify_policy_binding(
    policy_b64: &str,
    payload_key: &PayloadKey,
    expected_binding_b64: &str,
) -> Result<(), HmacError> {
    let calculated = calculate_hmac(payload_key.as_slice(), policy_b64.as_bytes())?;
    let expected = BASE64.decode(expected_binding_b64)?;

    if calculated.ct_eq(&expected).into() {
        Ok(())
    } else {
        Err(HmacError::VerificationFailed)
    }
}
