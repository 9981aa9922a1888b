//! TDF3 client engine
//!
//! Produces and consumes Trusted Data Format objects: self-contained,
//! encrypted, policy-bound data envelopes. A TDF binds a symmetric payload
//! key to a policy via a Key Access Server (KAS) — the payload is encrypted
//! locally as segmented AES-256-GCM, while the key material is wrapped
//! against KAS so that decryption requires KAS to evaluate the policy and
//! rewrap the key to the caller's session.
//!
//! # Encrypting
//!
//! ```no_run
//! use tdf3::{Chunker, EncryptOptions, KasTarget, PolicyObject, TdfWriter};
//!
//! # async fn example() -> Result<(), tdf3::TdfError> {
//! let writer = TdfWriter::new(EncryptOptions::default().freeze()?);
//! let policy = PolicyObject::new(vec![], vec!["alice@example.com".to_string()]);
//! let source = Chunker::buffer(b"sensitive data".to_vec());
//!
//! let targets = vec![KasTarget::wrapped("https://kas.example.com")
//!     .with_public_key("-----BEGIN PUBLIC KEY-----\n...")];
//! writer
//!     .encrypt_to_file(&source, &policy, None, &targets, "out.tdf".as_ref())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Decrypting
//!
//! ```no_run
//! use std::sync::Arc;
//! use tdf3::{BearerAuth, Chunker, KasClient, TdfReader};
//!
//! # async fn example() -> Result<(), tdf3::TdfError> {
//! let kas = KasClient::new(Arc::new(BearerAuth::new("oauth-token")))?;
//! let source = Chunker::file("out.tdf").await?;
//!
//! let mut reader = TdfReader::open(source).await?;
//! reader.unwrap_key(&kas).await?;
//! let plaintext = reader.read_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod auth;
pub mod chunker;
pub mod error;
pub mod kas;
pub mod key_access;
pub mod policy;
pub mod prelude;
pub mod read;
pub mod write;

pub use archive::{ContainerError, TdfArchiveReader, TdfArchiveWriter, MANIFEST_ENTRY, PAYLOAD_ENTRY};
pub use auth::{AuthError, AuthProvider, BearerAuth};
pub use chunker::{Chunker, DataSource, SourceError};
pub use error::{ErrorKind, TdfError};
pub use kas::{KasClient, RewrapResult};
pub use key_access::{build_key_access, decrypt_metadata, encrypt_metadata, KaoMode, KasTarget};
pub use policy::{Attribute, PolicyBody, PolicyObject};
pub use read::TdfReader;
pub use write::{
    EncryptConfig, EncryptOptions, ProgressSink, TdfWriter, DEFAULT_SEGMENT_SIZE,
    HTML_BYTE_LIMIT, MAX_SEGMENT_COUNT, MAX_SEGMENT_SIZE, MIN_SEGMENT_SIZE, ZIP_BYTE_LIMIT,
};

// Re-export the protocol and crypto surfaces consumers touch directly
pub use tdf3_crypto::{PayloadKey, SegmentHashAlg};
pub use tdf3_protocol::{KasError, ManifestError, TdfManifest};
