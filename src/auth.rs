//! Auth provider contract
//!
//! Authentication flows (OIDC refresh tokens, external JWT exchange, DPoP
//! proofs) live outside this crate. The engine consumes two capabilities:
//! decorating outbound KAS requests with credentials, and rebinding the
//! auth token to the client session public key once at construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Credential error: {0}")]
    Credential(String),
}

/// Capability that attaches credentials to outbound KAS requests
///
/// `with_creds` receives the fully built request and must add an
/// `Authorization` header; DPoP-capable providers additionally attach a
/// `DPoP` proof bound to the request's method and URL and signed by the
/// session signing key. `update_client_public_key` is invoked once per
/// client to rebind the auth token to the session public key.
pub trait AuthProvider: Send + Sync {
    fn with_creds(&self, request: &mut reqwest::Request) -> Result<(), AuthError>;

    fn update_client_public_key(&self, _public_key_pem: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Static bearer-token provider
///
/// The simplest concrete provider: attaches a fixed OAuth bearer token.
/// Token acquisition and refresh are the caller's concern.
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthProvider for BearerAuth {
    fn with_creds(&self, request: &mut reqwest::Request) -> Result<(), AuthError> {
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| AuthError::Credential(e.to_string()))?;
        request
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, value);
        Ok(())
    }
}
