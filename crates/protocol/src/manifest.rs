//! TDF manifest structures
//!
//! Typed model of the `0.manifest.json` entry: payload reference,
//! encryption information, key access objects and integrity information
//! (segments and root signature). Decoding is strict: unknown top-level
//! keys are rejected and missing required fields fail with a typed error
//! naming the field.
//!
//! The base64 policy text in `encryptionInformation.policy` is the
//! canonical form for all HMAC computations; it is carried verbatim and
//! never re-encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Manifest parse and validation errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Structural JSON failure; the message names the offending field
    /// ("missing field `policy`", "unknown field `foo`", ...)
    #[error("Manifest schema error: {0}")]
    Schema(String),

    #[error("Invalid manifest field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// TDF manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TdfManifest {
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
}

/// Payload reference in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            payload_type: "reference".to_string(),
            url: "0.payload".to_string(),
            protocol: "zip".to_string(),
            is_encrypted: true,
            mime_type: Some("application/octet-stream".to_string()),
        }
    }
}

/// Encryption information in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
    /// Base64 of the policy JSON; canonical bytes for policy bindings
    pub policy: String,
}

/// Key access object binding the wrapped payload key to one KAS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAccess {
    /// `"wrapped"` (key inline) or `"remote"` (key upserted to KAS)
    #[serde(rename = "type")]
    pub access_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "wrappedKey", skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
    /// Base64 of HMAC-SHA256(payload_key, base64_policy_text)
    #[serde(rename = "policyBinding")]
    pub policy_binding: String,
    #[serde(rename = "encryptedMetadata", skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl KeyAccess {
    /// Create a wrapped-mode key access object with empty key material
    pub fn new(url: String) -> Self {
        KeyAccess {
            access_type: "wrapped".to_string(),
            url,
            protocol: "kas".to_string(),
            wrapped_key: None,
            policy_binding: String::new(),
            encrypted_metadata: None,
            kid: None,
        }
    }
}

/// Encryption method configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMethod {
    pub algorithm: String,
    pub iv: String,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self {
            algorithm: "AES-256-GCM".to_string(),
            iv: String::new(),
        }
    }
}

/// Integrity information: root signature plus per-segment records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    /// `"GMAC"` or `"HS256"`
    #[serde(rename = "segmentHashAlg")]
    pub segment_hash_alg: String,
    pub segments: Vec<Segment>,
    #[serde(rename = "segmentSizeDefault")]
    pub segment_size_default: u64,
    #[serde(rename = "encryptedSegmentSizeDefault")]
    pub encrypted_segment_size_default: u64,
}

/// Root signature over the ordered raw segment hashes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

impl Default for RootSignature {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            sig: String::new(),
        }
    }
}

/// One encrypted segment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Base64 integrity tag over the stored segment bytes
    pub hash: String,
    #[serde(rename = "segmentSize", skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u64>,
    #[serde(
        rename = "encryptedSegmentSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_segment_size: Option<u64>,
}

impl TdfManifest {
    /// Create a manifest skeleton for one KAS
    pub fn new(payload_url: String, kas_url: String) -> Self {
        TdfManifest {
            payload: Payload {
                url: payload_url,
                ..Payload::default()
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access: vec![KeyAccess::new(kas_url)],
                method: EncryptionMethod::default(),
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature::default(),
                    segment_hash_alg: "GMAC".to_string(),
                    segments: Vec::new(),
                    segment_size_default: 1_000_000,
                    encrypted_segment_size_default: 1_000_000 + 28, // +IV+tag
                },
                policy: String::new(),
            },
        }
    }

    /// Store the policy JSON, base64-encoded
    pub fn set_policy_raw(&mut self, policy_json: &str) {
        self.encryption_information.policy = BASE64.encode(policy_json);
    }

    /// Decode the stored policy back to its JSON text
    pub fn get_policy_raw(&self) -> Result<String, ManifestError> {
        let bytes = BASE64.decode(&self.encryption_information.policy)?;
        String::from_utf8(bytes).map_err(|_| ManifestError::InvalidField {
            field: "encryptionInformation.policy",
            reason: "decoded policy is not UTF-8".to_string(),
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(self).map_err(|e| ManifestError::Schema(e.to_string()))
    }

    /// Parse and validate a manifest
    ///
    /// Unknown top-level keys and missing required fields are rejected with
    /// the field name in the error; semantic checks cover the encryption
    /// type, key access presence and the segment hash algorithm.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: TdfManifest =
            serde_json::from_str(json).map_err(|e| ManifestError::Schema(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let enc = &self.encryption_information;

        if enc.encryption_type != "split" {
            return Err(ManifestError::InvalidField {
                field: "encryptionInformation.type",
                reason: format!("unsupported type {:?}", enc.encryption_type),
            });
        }
        if enc.key_access.is_empty() {
            return Err(ManifestError::InvalidField {
                field: "encryptionInformation.keyAccess",
                reason: "at least one key access object is required".to_string(),
            });
        }
        for kao in &enc.key_access {
            match kao.access_type.as_str() {
                "wrapped" => {
                    if kao.wrapped_key.is_none() {
                        return Err(ManifestError::InvalidField {
                            field: "encryptionInformation.keyAccess.wrappedKey",
                            reason: "wrapped key access requires wrappedKey".to_string(),
                        });
                    }
                }
                "remote" => {}
                other => {
                    return Err(ManifestError::InvalidField {
                        field: "encryptionInformation.keyAccess.type",
                        reason: format!("unsupported type {:?}", other),
                    });
                }
            }
        }
        match enc.integrity_information.segment_hash_alg.as_str() {
            "GMAC" | "HS256" => {}
            other => {
                return Err(ManifestError::InvalidField {
                    field: "encryptionInformation.integrityInformation.segmentHashAlg",
                    reason: format!("unsupported algorithm {:?}", other),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> TdfManifest {
        let mut manifest = TdfManifest::new(
            "0.payload".to_string(),
            "http://kas.example.com:4000".to_string(),
        );
        manifest.encryption_information.key_access[0].wrapped_key =
            Some(BASE64.encode(b"wrapped"));
        manifest.encryption_information.key_access[0].policy_binding =
            BASE64.encode(b"binding");
        manifest.set_policy_raw(r#"{"uuid":"test","body":{"dataAttributes":[],"dissem":[]}}"#);
        manifest
    }

    #[test]
    fn test_manifest_serialization_roundtrip() {
        let manifest = sample_manifest();

        let json = manifest.to_json().unwrap();
        let deserialized = TdfManifest::from_json(&json).unwrap();

        assert_eq!(manifest.payload.url, deserialized.payload.url);
        assert_eq!(
            manifest.encryption_information.key_access[0].url,
            deserialized.encryption_information.key_access[0].url
        );
        assert_eq!(
            manifest.encryption_information.policy,
            deserialized.encryption_information.policy
        );
    }

    #[test]
    fn test_wire_field_names() {
        let json = sample_manifest().to_json().unwrap();
        assert!(json.contains("\"encryptionInformation\""));
        assert!(json.contains("\"keyAccess\""));
        assert!(json.contains("\"wrappedKey\""));
        assert!(json.contains("\"policyBinding\""));
        assert!(json.contains("\"rootSignature\""));
        assert!(json.contains("\"segmentHashAlg\""));
        assert!(json.contains("\"isEncrypted\""));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_manifest().to_json().unwrap()).unwrap();
        value["sneaky"] = serde_json::json!(true);

        let err = TdfManifest::from_json(&value.to_string()).unwrap_err();
        match err {
            ManifestError::Schema(msg) => assert!(msg.contains("sneaky"), "{}", msg),
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_named_in_error() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_manifest().to_json().unwrap()).unwrap();
        value["encryptionInformation"]
            .as_object_mut()
            .unwrap()
            .remove("policy");

        let err = TdfManifest::from_json(&value.to_string()).unwrap_err();
        match err {
            ManifestError::Schema(msg) => assert!(msg.contains("policy"), "{}", msg),
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrapped_kao_requires_key() {
        let mut manifest = sample_manifest();
        manifest.encryption_information.key_access[0].wrapped_key = None;

        let err = TdfManifest::from_json(&manifest.to_json().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::InvalidField {
                field: "encryptionInformation.keyAccess.wrappedKey",
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_hash_alg_rejected() {
        let mut manifest = sample_manifest();
        manifest
            .encryption_information
            .integrity_information
            .segment_hash_alg = "MD5".to_string();

        let err = TdfManifest::from_json(&manifest.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { .. }));
    }

    #[test]
    fn test_policy_raw_roundtrip() {
        let manifest = sample_manifest();
        let decoded = manifest.get_policy_raw().unwrap();
        assert_eq!(
            decoded,
            r#"{"uuid":"test","body":{"dataAttributes":[],"dissem":[]}}"#
        );
    }
}
