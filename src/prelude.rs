//! Convenience re-exports of the common surface
//!
//! ```
//! use tdf3::prelude::*;
//! ```

pub use crate::archive::{TdfArchiveReader, TdfArchiveWriter};
pub use crate::auth::{AuthProvider, BearerAuth};
pub use crate::chunker::{Chunker, DataSource};
pub use crate::error::{ErrorKind, TdfError};
pub use crate::kas::KasClient;
pub use crate::key_access::{KaoMode, KasTarget};
pub use crate::policy::{Attribute, PolicyObject};
pub use crate::read::TdfReader;
pub use crate::write::{EncryptOptions, ProgressSink, TdfWriter};

pub use tdf3_crypto::{PayloadKey, SegmentHashAlg};
pub use tdf3_protocol::{KasError, TdfManifest};
