//! Unified error type for the TDF3 public API
//!
//! Internal modules keep their domain-specific errors for precise handling;
//! this type consolidates them for SDK consumers. Every error maps to a
//! stable machine-readable code for programmatic handling. Messages never
//! contain payload keys, wrapped key material or full KAS response bodies.

use thiserror::Error;

use crate::archive::ContainerError;
use crate::chunker::SourceError;
use tdf3_protocol::{KasError, ManifestError};

/// Unified error type for all TDF3 operations
#[derive(Debug, Error)]
pub enum TdfError {
    /// Invalid or missing configuration (segment size, byte limit, KAS
    /// endpoint, ...)
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Chunk source I/O or range error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Container structure error (ZIP layout, missing entry)
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Manifest schema or encoding error
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Cryptographic failure, with the segment index when one applies
    #[error("Cryptographic failure{}: {source}", segment_suffix(.segment))]
    Crypto {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        segment: Option<usize>,
    },

    /// Policy binding mismatch
    #[error("Policy error: {reason}")]
    Policy { reason: String },

    /// Key Access Server error
    #[error("KAS error: {0}")]
    Kas(#[from] KasError),

    /// Operation cancelled
    #[error("Operation aborted")]
    Aborted,
}

fn segment_suffix(segment: &Option<usize>) -> String {
    match segment {
        Some(index) => format!(" in segment {index}"),
        None => String::new(),
    }
}

/// Error category for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Source,
    Container,
    Manifest,
    Crypto,
    Policy,
    Kas,
    Aborted,
}

impl TdfError {
    /// Build a config error
    pub fn config(reason: impl Into<String>) -> Self {
        TdfError::Config {
            reason: reason.into(),
        }
    }

    /// Build a crypto error without segment attribution
    pub fn crypto(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        TdfError::Crypto {
            source: Box::new(source),
            segment: None,
        }
    }

    /// Build a crypto error attributed to one segment
    pub fn crypto_at(
        segment: usize,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TdfError::Crypto {
            source: Box::new(source),
            segment: Some(segment),
        }
    }

    /// Build a policy binding error
    pub fn policy(reason: impl Into<String>) -> Self {
        TdfError::Policy {
            reason: reason.into(),
        }
    }

    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            TdfError::Config { .. } => ErrorKind::Config,
            TdfError::Source(_) => ErrorKind::Source,
            TdfError::Container(_) => ErrorKind::Container,
            TdfError::Manifest(_) => ErrorKind::Manifest,
            TdfError::Crypto { .. } => ErrorKind::Crypto,
            TdfError::Policy { .. } => ErrorKind::Policy,
            TdfError::Kas(_) => ErrorKind::Kas,
            TdfError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            TdfError::Config { .. } => "TDF3_E_CONFIG",
            TdfError::Source(_) => "TDF3_E_SOURCE",
            TdfError::Container(_) => "TDF3_E_CONTAINER",
            TdfError::Manifest(_) => "TDF3_E_MANIFEST",
            TdfError::Crypto { .. } => "TDF3_E_CRYPTO",
            TdfError::Policy { .. } => "TDF3_E_POLICY",
            TdfError::Kas(e) => match e {
                KasError::Network(_) => "TDF3_E_KAS_NETWORK",
                KasError::Unauthorized => "TDF3_E_KAS_UNAUTHORIZED",
                KasError::Forbidden(_) => "TDF3_E_KAS_FORBIDDEN",
                KasError::NotFound(_) => "TDF3_E_KAS_NOT_FOUND",
                KasError::Malformed(_) => "TDF3_E_KAS_MALFORMED",
                KasError::CryptoFailure(_) => "TDF3_E_KAS_CRYPTO",
            },
            TdfError::Aborted => "TDF3_E_ABORTED",
        }
    }

    /// The segment a crypto failure was attributed to, if any
    pub fn segment(&self) -> Option<usize> {
        match self {
            TdfError::Crypto { segment, .. } => *segment,
            _ => None,
        }
    }

    /// True if the error might clear on retry (transient KAS transport)
    pub fn is_retryable(&self) -> bool {
        matches!(self, TdfError::Kas(e) if e.is_retryable())
    }
}
