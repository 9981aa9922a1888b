//! Policy objects embedded in TDF manifests
//!
//! A policy names the data attributes and dissemination identities a KAS
//! evaluates before releasing a payload key. The client never evaluates
//! policies itself; it serializes them into the manifest and binds them to
//! the payload key via HMAC. Policies are immutable once encrypted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single data attribute, identified by its fully qualified URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute: String,
}

impl Attribute {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            attribute: uri.into(),
        }
    }
}

/// Policy body: attributes plus dissemination list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBody {
    #[serde(rename = "dataAttributes")]
    pub data_attributes: Vec<Attribute>,
    pub dissem: Vec<String>,
}

/// The policy object serialized (base64) into the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyObject {
    pub uuid: String,
    pub body: PolicyBody,
}

impl PolicyObject {
    /// New policy with a generated UUID
    pub fn new(data_attributes: Vec<Attribute>, dissem: Vec<String>) -> Self {
        Self::with_uuid(Uuid::new_v4().to_string(), data_attributes, dissem)
    }

    /// New policy with a caller-chosen UUID
    pub fn with_uuid(
        uuid: impl Into<String>,
        data_attributes: Vec<Attribute>,
        dissem: Vec<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            body: PolicyBody {
                data_attributes,
                dissem,
            },
        }
    }

    /// Serialize to the JSON form that gets base64-encoded into the
    /// manifest
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a policy from its JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
