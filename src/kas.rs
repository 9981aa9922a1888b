//! KAS (Key Access Server) client for the v2 rewrap protocol
//!
//! The client holds an RSA-2048 session keypair for the lifetime of the
//! instance. Rewrap requests are signed request tokens: a JWT-shaped
//! `header.claims.signature` triple where the claims carry the request body
//! as a JSON string and the signature is RS256 under the session key. KAS
//! answers with the payload key wrapped to the session public key.
//!
//! # Protocol flow
//!
//! 1. Build the request body (key access object, base64 policy, session
//!    public key)
//! 2. Sign it into a request token (RS256)
//! 3. `POST {kas}/v2/rewrap` with `{signedRequestToken}` and the auth
//!    provider's credentials attached
//! 4. Unwrap `entityWrappedKey` with the session private key (RSA-OAEP)
//!
//! Transport failures and 5xx responses are retried with exponential
//! backoff; rewrap is not idempotent at the policy layer, so policy denials
//! and malformed requests are never retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine as _;
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use tdf3_crypto::{PayloadKey, SessionKeyPair};
use tdf3_protocol::{KasError, KasRequestBody, KeyAccess, PublicKeyResponse, RewrapResponse, SignedRequest};

/// Attempts per KAS call (transport and 5xx failures only)
const KAS_ATTEMPTS: u32 = 3;

/// Initial backoff between attempts; doubles per retry
const KAS_BACKOFF: Duration = Duration::from_millis(500);

/// Result of a successful rewrap
pub struct RewrapResult {
    /// The unwrapped payload key
    pub payload_key: PayloadKey,
    /// Optional metadata attached by KAS (decrypted separately)
    pub metadata: Option<serde_json::Value>,
}

/// KAS client bound to one session keypair and one auth provider
pub struct KasClient {
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    session_keys: SessionKeyPair,
    public_keys: Mutex<HashMap<String, String>>,
}

impl KasClient {
    /// Create a client: generates the session keypair and rebinds the auth
    /// provider to its public key
    pub fn new(auth: Arc<dyn AuthProvider>) -> Result<Self, KasError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KasError::Network(e.to_string()))?;

        let session_keys =
            SessionKeyPair::generate().map_err(|e| KasError::CryptoFailure(e.to_string()))?;
        auth.update_client_public_key(session_keys.public_key_pem())
            .map_err(|_| KasError::Unauthorized)?;

        Ok(Self {
            http,
            auth,
            session_keys,
            public_keys: Mutex::new(HashMap::new()),
        })
    }

    /// PEM of the session public key KAS wraps against
    pub fn session_public_key(&self) -> &str {
        self.session_keys.public_key_pem()
    }

    /// Fetch (and cache) a KAS public key
    ///
    /// Cached entries never expire within a process; a key gone stale on
    /// the server surfaces as a wrap failure and callers refetch after
    /// [`KasClient::invalidate_public_key`].
    pub async fn public_key(&self, kas_url: &str) -> Result<String, KasError> {
        if let Some(pem) = self.public_keys.lock().unwrap().get(kas_url) {
            return Ok(pem.clone());
        }

        let endpoint = format!(
            "{}/v2/kas_public_key?algorithm=rsa:2048",
            kas_url.trim_end_matches('/')
        );
        let text = self.get_with_retry(&endpoint).await?;

        // Servers answer {publicKey, kid?} or a raw PEM body
        let pem = match serde_json::from_str::<PublicKeyResponse>(&text) {
            Ok(resp) => resp.public_key,
            Err(_) if text.contains("BEGIN PUBLIC KEY") => text,
            Err(_) => {
                return Err(KasError::Malformed(
                    "public key response is neither JSON nor PEM".to_string(),
                ))
            }
        };

        debug!(kas = %kas_url, "Cached KAS public key");
        self.public_keys
            .lock()
            .unwrap()
            .insert(kas_url.to_string(), pem.clone());
        Ok(pem)
    }

    /// Drop a cached public key so the next use refetches it
    pub fn invalidate_public_key(&self, kas_url: &str) {
        self.public_keys.lock().unwrap().remove(kas_url);
    }

    /// Rewrap the payload key bound to `key_access` for this session
    pub async fn rewrap(
        &self,
        key_access: &KeyAccess,
        policy_b64: &str,
    ) -> Result<RewrapResult, KasError> {
        let token = self.signed_request_token(key_access, policy_b64)?;
        let endpoint = format!("{}/v2/rewrap", key_access.url.trim_end_matches('/'));

        let response = self.post_signed(&endpoint, token).await?;
        let parsed: RewrapResponse = serde_json::from_str(&response)
            .map_err(|e| KasError::Malformed(format!("rewrap response: {e}")))?;

        let wrapped = BASE64
            .decode(&parsed.entity_wrapped_key)
            .map_err(|e| KasError::Malformed(format!("entityWrappedKey: {e}")))?;
        let key_bytes = self
            .session_keys
            .unwrap_entity_key(&wrapped)
            .map_err(|e| KasError::CryptoFailure(e.to_string()))?;
        let payload_key = PayloadKey::from_slice(&key_bytes)
            .map_err(|e| KasError::CryptoFailure(e.to_string()))?;

        debug!(kas = %key_access.url, "Rewrap succeeded");
        Ok(RewrapResult {
            payload_key,
            metadata: parsed.metadata,
        })
    }

    /// Upsert a wrapped key to KAS for a `remote` key access object
    ///
    /// The response is an opaque ack; only a non-2xx status fails.
    pub async fn upsert(
        &self,
        key_access: &KeyAccess,
        policy_b64: &str,
    ) -> Result<(), KasError> {
        let token = self.signed_request_token(key_access, policy_b64)?;
        let endpoint = format!("{}/v2/upsert", key_access.url.trim_end_matches('/'));
        self.post_signed(&endpoint, token).await?;
        debug!(kas = %key_access.url, "Upsert acknowledged");
        Ok(())
    }

    /// Assemble and sign the request token
    fn signed_request_token(
        &self,
        key_access: &KeyAccess,
        policy_b64: &str,
    ) -> Result<String, KasError> {
        let body = KasRequestBody {
            algorithm: "RS256".to_string(),
            key_access: key_access.clone(),
            policy: policy_b64.to_string(),
            client_public_key: self.session_keys.public_key_pem().to_string(),
        };
        // The requestBody claim is the JSON text, not a nested object
        let request_body = serde_json::to_string(&body)
            .map_err(|e| KasError::Malformed(e.to_string()))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| KasError::Malformed(e.to_string()))?
            .as_secs();

        let header = json!({ "alg": "RS256" });
        let claims = json!({
            "requestBody": request_body,
            "iat": now,
            "exp": now + 60,
        });

        let signing_input = format!(
            "{}.{}",
            BASE64_URL.encode(
                serde_json::to_vec(&header).map_err(|e| KasError::Malformed(e.to_string()))?
            ),
            BASE64_URL.encode(
                serde_json::to_vec(&claims).map_err(|e| KasError::Malformed(e.to_string()))?
            ),
        );
        let signature = self.session_keys.sign_rs256(signing_input.as_bytes());

        Ok(format!("{}.{}", signing_input, BASE64_URL.encode(signature)))
    }

    /// POST a signed request token with transport retries
    async fn post_signed(&self, endpoint: &str, token: String) -> Result<String, KasError> {
        let payload = SignedRequest {
            signed_request_token: token,
        };
        let mut backoff = KAS_BACKOFF;

        for attempt in 1..=KAS_ATTEMPTS {
            let mut request = self
                .http
                .post(endpoint)
                .json(&payload)
                .build()
                .map_err(|e| KasError::Network(e.to_string()))?;
            self.auth
                .with_creds(&mut request)
                .map_err(|_| KasError::Unauthorized)?;

            match self.http.execute(request).await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .text()
                            .await
                            .map_err(|e| KasError::Network(e.to_string()));
                    }
                    if !status.is_server_error() || attempt == KAS_ATTEMPTS {
                        return Err(map_status(status, endpoint));
                    }
                    warn!(%endpoint, %status, attempt, "Retrying KAS request");
                }
                Err(e) => {
                    if attempt == KAS_ATTEMPTS {
                        return Err(KasError::Network(e.to_string()));
                    }
                    warn!(%endpoint, error = %e, attempt, "Retrying KAS request");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        unreachable!("retry loop returns on final attempt")
    }

    /// GET with the same retry policy; used for the public key endpoint
    async fn get_with_retry(&self, endpoint: &str) -> Result<String, KasError> {
        let mut backoff = KAS_BACKOFF;

        for attempt in 1..=KAS_ATTEMPTS {
            match self.http.get(endpoint).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .text()
                            .await
                            .map_err(|e| KasError::Network(e.to_string()));
                    }
                    if !status.is_server_error() || attempt == KAS_ATTEMPTS {
                        return Err(map_status(status, endpoint));
                    }
                    warn!(%endpoint, %status, attempt, "Retrying KAS public key fetch");
                }
                Err(e) => {
                    if attempt == KAS_ATTEMPTS {
                        return Err(KasError::Network(e.to_string()));
                    }
                    warn!(%endpoint, error = %e, attempt, "Retrying KAS public key fetch");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        unreachable!("retry loop returns on final attempt")
    }
}

/// Map a terminal HTTP status to its error class
///
/// Response bodies stay out of error messages.
fn map_status(status: reqwest::StatusCode, endpoint: &str) -> KasError {
    match status.as_u16() {
        401 => KasError::Unauthorized,
        403 => KasError::Forbidden("policy denied".to_string()),
        404 => KasError::NotFound(endpoint.to_string()),
        400 => KasError::Malformed("request rejected (HTTP 400)".to_string()),
        s if status.is_server_error() => KasError::Network(format!("HTTP {s}")),
        s => KasError::Malformed(format!("unexpected status {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BearerAuth;
    use tdf3_crypto::verify_rs256;

    fn test_client() -> KasClient {
        KasClient::new(Arc::new(BearerAuth::new("test-token"))).unwrap()
    }

    #[test]
    fn test_signed_token_structure() {
        let client = test_client();
        let mut kao = KeyAccess::new("http://kas.example.com".to_string());
        kao.wrapped_key = Some(BASE64.encode(b"wrapped"));
        kao.policy_binding = BASE64.encode(b"binding");

        let token = client
            .signed_request_token(&kao, "cG9saWN5")
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&BASE64_URL.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS256");

        let claims: serde_json::Value =
            serde_json::from_slice(&BASE64_URL.decode(parts[1]).unwrap()).unwrap();
        let request_body = claims["requestBody"]
            .as_str()
            .expect("requestBody must be a JSON string claim");
        let body: KasRequestBody = serde_json::from_str(request_body).unwrap();
        assert_eq!(body.algorithm, "RS256");
        assert_eq!(body.policy, "cG9saWN5");
        assert_eq!(body.key_access.url, "http://kas.example.com");
        assert!(body.client_public_key.contains("BEGIN PUBLIC KEY"));

        assert!(claims["exp"].as_u64().unwrap() > claims["iat"].as_u64().unwrap());
    }

    #[test]
    fn test_signed_token_verifies_under_session_key() {
        let client = test_client();
        let kao = KeyAccess::new("http://kas.example.com".to_string());
        let token = client.signed_request_token(&kao, "cG9saWN5").unwrap();

        let (signing_input, signature_b64) = token.rsplit_once('.').unwrap();
        let signature = BASE64_URL.decode(signature_b64).unwrap();
        assert!(verify_rs256(
            client.session_public_key(),
            signing_input.as_bytes(),
            &signature
        )
        .is_ok());
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "e"),
            KasError::Unauthorized
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "e"),
            KasError::Forbidden(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "e"),
            KasError::NotFound(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "e"),
            KasError::Malformed(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "e"),
            KasError::Network(_)
        ));
    }
}
