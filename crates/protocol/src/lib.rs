//! TDF3 protocol types
//!
//! Data structures shared between the container engine and the KAS client:
//! the typed manifest model with strict (de)serialization, and the wire
//! bodies of the KAS v2 rewrap/upsert protocol. Cryptographic operations
//! live in `tdf3-crypto`; this crate is shape only.

pub mod kas;
pub mod manifest;

pub use kas::{
    KasError, KasRequestBody, PublicKeyResponse, RewrapResponse, SignedRequest,
};
pub use manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, ManifestError,
    Payload, RootSignature, Segment, TdfManifest,
};
