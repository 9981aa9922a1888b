//! Policy binder and key-access builder
//!
//! Produces the manifest's key access array for one or more KAS targets.
//! Every object carries the same policy binding (the policy and payload
//! key are fixed for the operation); `wrapped` targets embed the RSA-OAEP
//! wrapped key inline, `remote` targets upsert it to KAS and omit it from
//! the manifest. Optional plaintext metadata is AES-256-GCM encrypted
//! under the payload key and bundled as base64 JSON.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use tracing::debug;

use crate::error::TdfError;
use crate::kas::KasClient;
use tdf3_crypto::{aead_decrypt, aead_encrypt, calculate_policy_binding, wrap_payload_key, PayloadKey};
use tdf3_protocol::{KeyAccess, ManifestError};

/// How a target's key material is delivered to KAS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaoMode {
    /// Wrapped key embedded in the manifest (offline path)
    Wrapped,
    /// Wrapped key upserted to KAS, manifest defers to server storage
    Remote,
}

/// One KAS a payload key is bound to
#[derive(Debug, Clone)]
pub struct KasTarget {
    pub url: String,
    /// KAS public key; fetched (and cached) from the server when absent
    pub public_key_pem: Option<String>,
    pub mode: KaoMode,
    pub kid: Option<String>,
}

impl KasTarget {
    /// Offline-capable target embedding the wrapped key in the manifest
    pub fn wrapped(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            public_key_pem: None,
            mode: KaoMode::Wrapped,
            kid: None,
        }
    }

    /// Target deferring key storage to KAS via upsert
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            public_key_pem: None,
            mode: KaoMode::Remote,
            kid: None,
        }
    }

    /// Supply the KAS public key directly instead of fetching it
    pub fn with_public_key(mut self, pem: impl Into<String>) -> Self {
        self.public_key_pem = Some(pem.into());
        self
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }
}

/// Build the key access array for a payload key and policy
///
/// `kas` may be `None` only when every target supplies its public key and
/// none is `remote`; that is the fully offline path.
pub async fn build_key_access(
    kas: Option<&KasClient>,
    targets: &[KasTarget],
    payload_key: &PayloadKey,
    policy_b64: &str,
    metadata: Option<&str>,
) -> Result<Vec<KeyAccess>, TdfError> {
    if targets.is_empty() {
        return Err(TdfError::config("at least one KAS target is required"));
    }

    // One policy, one payload key: the binding is identical across targets
    let binding = calculate_policy_binding(policy_b64, payload_key).map_err(TdfError::crypto)?;
    let encrypted_metadata = metadata
        .map(|m| encrypt_metadata(payload_key, m))
        .transpose()?;

    let mut key_access = Vec::with_capacity(targets.len());
    for target in targets {
        let wrapped = wrap_for_target(kas, target, payload_key).await?;

        let mut kao = KeyAccess::new(target.url.clone());
        kao.policy_binding = binding.clone();
        kao.encrypted_metadata = encrypted_metadata.clone();
        kao.kid = target.kid.clone();

        match target.mode {
            KaoMode::Wrapped => {
                kao.wrapped_key = Some(wrapped);
            }
            KaoMode::Remote => {
                kao.access_type = "remote".to_string();
                let kas = kas.ok_or_else(|| {
                    TdfError::config("remote key access requires a KAS client")
                })?;
                // The upsert carries the wrapped key; the manifest omits it
                let mut upsert_kao = kao.clone();
                upsert_kao.wrapped_key = Some(wrapped);
                kas.upsert(&upsert_kao, policy_b64).await?;
                debug!(kas = %target.url, "Upserted remote key access");
            }
        }

        key_access.push(kao);
    }

    Ok(key_access)
}

/// Wrap the payload key for one target, refetching a cached KAS key once
/// if wrapping fails against it
async fn wrap_for_target(
    kas: Option<&KasClient>,
    target: &KasTarget,
    payload_key: &PayloadKey,
) -> Result<String, TdfError> {
    if let Some(pem) = &target.public_key_pem {
        return wrap_payload_key(payload_key.as_slice(), pem).map_err(TdfError::crypto);
    }

    let kas = kas.ok_or_else(|| {
        TdfError::config(format!(
            "KAS target {} has no public key and no KAS client was supplied",
            target.url
        ))
    })?;

    let pem = kas.public_key(&target.url).await?;
    match wrap_payload_key(payload_key.as_slice(), &pem) {
        Ok(wrapped) => Ok(wrapped),
        Err(_) => {
            kas.invalidate_public_key(&target.url);
            let fresh = kas.public_key(&target.url).await?;
            wrap_payload_key(payload_key.as_slice(), &fresh).map_err(TdfError::crypto)
        }
    }
}

/// Encrypt plaintext metadata into the `encryptedMetadata` bundle
///
/// The bundle is `base64(JSON {ciphertext, iv, tag})`, each member base64
/// of its raw bytes.
pub fn encrypt_metadata(payload_key: &PayloadKey, metadata: &str) -> Result<String, TdfError> {
    let (iv, ciphertext, tag) =
        aead_encrypt(payload_key, metadata.as_bytes()).map_err(TdfError::crypto)?;

    let bundle = json!({
        "ciphertext": BASE64.encode(&ciphertext),
        "iv": BASE64.encode(iv.as_slice()),
        "tag": BASE64.encode(&tag),
    });
    Ok(BASE64.encode(bundle.to_string()))
}

/// Decrypt an `encryptedMetadata` bundle back to the metadata text
pub fn decrypt_metadata(
    payload_key: &PayloadKey,
    encrypted_metadata: &str,
) -> Result<String, TdfError> {
    let bundle_bytes = BASE64
        .decode(encrypted_metadata)
        .map_err(|e| TdfError::Manifest(ManifestError::Base64Error(e)))?;
    let bundle: serde_json::Value = serde_json::from_slice(&bundle_bytes)
        .map_err(|e| TdfError::Manifest(ManifestError::Schema(e.to_string())))?;

    let field = |name: &'static str| -> Result<Vec<u8>, TdfError> {
        let text = bundle
            .get(name)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                TdfError::Manifest(ManifestError::Schema(format!("missing field `{name}`")))
            })?;
        BASE64
            .decode(text)
            .map_err(|e| TdfError::Manifest(ManifestError::Base64Error(e)))
    };

    let ciphertext = field("ciphertext")?;
    let iv = field("iv")?;
    let tag = field("tag")?;

    let plaintext =
        aead_decrypt(payload_key, &iv, &ciphertext, &tag).map_err(TdfError::crypto)?;
    String::from_utf8(plaintext).map_err(|_| {
        TdfError::Manifest(ManifestError::Schema(
            "decrypted metadata is not UTF-8".to_string(),
        ))
    })
}
