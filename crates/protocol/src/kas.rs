//! KAS (Key Access Server) wire types
//!
//! Request and response bodies for the KAS v2 surface: `kas_public_key`,
//! `rewrap` and `upsert`. The rewrap and upsert requests share one body
//! shape, carried as a JSON string inside a signed request token.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::KeyAccess;

/// KAS client errors
#[derive(Debug, Error)]
pub enum KasError {
    /// Transport failure or 5xx; the only retryable class
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 401
    #[error("Authentication failed")]
    Unauthorized,

    /// HTTP 403, policy denied
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// HTTP 404
    #[error("KAS endpoint not found: {0}")]
    NotFound(String),

    /// Schema or base64 failure in either direction, or HTTP 400
    #[error("Malformed KAS exchange: {0}")]
    Malformed(String),

    /// Entity key unwrap failed
    #[error("Key unwrapping failed: {0}")]
    CryptoFailure(String),
}

impl KasError {
    /// Transport-class errors may be retried; policy and schema failures
    /// are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KasError::Network(_))
    }
}

/// Body of a rewrap or upsert request, serialized to a JSON string and
/// carried as the `requestBody` claim of the signed request token
#[derive(Debug, Serialize, Deserialize)]
pub struct KasRequestBody {
    pub algorithm: String,
    #[serde(rename = "keyAccess")]
    pub key_access: KeyAccess,
    /// Base64 policy exactly as stored in the manifest
    pub policy: String,
    #[serde(rename = "clientPublicKey")]
    pub client_public_key: String,
}

/// POST body wrapping the signed request token
#[derive(Debug, Serialize, Deserialize)]
pub struct SignedRequest {
    #[serde(rename = "signedRequestToken")]
    pub signed_request_token: String,
}

/// Response from `POST /v2/rewrap`
#[derive(Debug, Serialize, Deserialize)]
pub struct RewrapResponse {
    /// Payload key, RSA-OAEP wrapped under the client session public key
    #[serde(rename = "entityWrappedKey")]
    pub entity_wrapped_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Response from `GET /v2/kas_public_key`
///
/// Servers answer either this JSON shape or a raw PEM body; callers fall
/// back to the raw text when JSON parsing fails.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}
