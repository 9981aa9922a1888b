//! Segmented AEAD writer
//!
//! Splits plaintext into fixed-size segments, encrypts each under the
//! payload key with a fresh IV, accumulates per-segment integrity tags and
//! the root signature, and assembles the manifest. Output is committed
//! atomically: file writes go through a temporary in the destination
//! directory and nothing partial reaches the final path.
//!
//! Configuration is an explicit options record validated by
//! [`EncryptOptions::freeze`]; there is no fluent builder and no mutable
//! process-wide state.

use std::io::{Seek, Write};
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::{ContainerError, TdfArchiveWriter, PAYLOAD_ENTRY};
use crate::chunker::Chunker;
use crate::error::TdfError;
use crate::kas::KasClient;
use crate::key_access::{build_key_access, KasTarget};
use crate::policy::PolicyObject;
use tdf3_crypto::{
    calculate_root_signature, PayloadKey, SegmentCipher, SegmentHashAlg, GCM_IV_SIZE,
    GCM_TAG_SIZE,
};
use tdf3_protocol::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, Payload, RootSignature,
    Segment, TdfManifest,
};

/// Smallest allowed segment size
pub const MIN_SEGMENT_SIZE: u64 = 16 * 1024;

/// Largest allowed segment size
pub const MAX_SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Default segment size
pub const DEFAULT_SEGMENT_SIZE: u64 = 1_000_000;

/// Hard cap on segments per container
pub const MAX_SEGMENT_COUNT: u64 = 10_000;

/// Default plaintext byte limit for ZIP containers
pub const ZIP_BYTE_LIMIT: u64 = 64_000_000_000;

/// Plaintext byte limit for HTML-wrapped containers
pub const HTML_BYTE_LIMIT: u64 = 100_000_000;

/// Per-segment ciphertext overhead: IV plus GCM tag
const SEGMENT_OVERHEAD: u64 = (GCM_IV_SIZE + GCM_TAG_SIZE) as u64;

/// Consumer of cumulative plaintext-bytes-processed updates
///
/// Invoked synchronously after each committed segment; reported counts are
/// monotonically non-decreasing.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, bytes_processed: u64);
}

impl<F: Fn(u64) + Send + Sync> ProgressSink for F {
    fn on_progress(&self, bytes_processed: u64) {
        self(bytes_processed)
    }
}

/// Encrypt configuration record with explicit optional fields
pub struct EncryptOptions {
    /// Plaintext bytes per segment (last segment may be shorter)
    pub segment_size: u64,
    /// Per-segment integrity algorithm recorded in the manifest
    pub segment_hash_alg: SegmentHashAlg,
    /// Payload MIME type; defaults to `application/octet-stream`
    pub mime_type: Option<String>,
    /// Plaintext metadata, encrypted into every key access object
    pub metadata: Option<String>,
    /// Externally supplied payload key; generated fresh when absent
    pub payload_key: Option<PayloadKey>,
    /// Maximum plaintext size accepted by this encrypt call
    pub byte_limit: u64,
    /// Encrypted segments buffered before a flush to the container
    pub queue_size: usize,
    /// Cancellation handle observed at every suspension point
    pub cancel: Option<CancellationToken>,
    /// Progress sink for cumulative byte counts
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_hash_alg: SegmentHashAlg::Gmac,
            mime_type: None,
            metadata: None,
            payload_key: None,
            byte_limit: ZIP_BYTE_LIMIT,
            queue_size: 4,
            cancel: None,
            progress: None,
        }
    }
}

impl EncryptOptions {
    /// Validate the record into an immutable [`EncryptConfig`]
    pub fn freeze(self) -> Result<EncryptConfig, TdfError> {
        if self.segment_size < MIN_SEGMENT_SIZE || self.segment_size > MAX_SEGMENT_SIZE {
            return Err(TdfError::config(format!(
                "segment size {} outside [{MIN_SEGMENT_SIZE}, {MAX_SEGMENT_SIZE}]",
                self.segment_size
            )));
        }
        if self.queue_size == 0 {
            return Err(TdfError::config("queue size must be at least 1"));
        }
        if self.byte_limit == 0 {
            return Err(TdfError::config("byte limit must be positive"));
        }

        Ok(EncryptConfig {
            segment_size: self.segment_size,
            segment_hash_alg: self.segment_hash_alg,
            mime_type: self.mime_type,
            metadata: self.metadata,
            payload_key: self.payload_key,
            byte_limit: self.byte_limit,
            queue_size: self.queue_size,
            cancel: self.cancel.unwrap_or_default(),
            progress: self.progress,
        })
    }
}

/// Validated, immutable encrypt configuration
pub struct EncryptConfig {
    segment_size: u64,
    segment_hash_alg: SegmentHashAlg,
    mime_type: Option<String>,
    metadata: Option<String>,
    payload_key: Option<PayloadKey>,
    byte_limit: u64,
    queue_size: usize,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for EncryptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptConfig")
            .field("segment_size", &self.segment_size)
            .field("segment_hash_alg", &self.segment_hash_alg)
            .field("mime_type", &self.mime_type)
            .field("metadata", &self.metadata)
            .field("payload_key", &self.payload_key.as_ref().map(|_| "<redacted>"))
            .field("byte_limit", &self.byte_limit)
            .field("queue_size", &self.queue_size)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.as_ref().map(|_| "<progress sink>"))
            .finish()
    }
}

/// Segmented AEAD writer
pub struct TdfWriter {
    config: EncryptConfig,
}

impl TdfWriter {
    pub fn new(config: EncryptConfig) -> Self {
        Self { config }
    }

    /// Encrypt a source into a container file
    ///
    /// The container is assembled in a temporary file beside `dest` and
    /// renamed into place on success only.
    pub async fn encrypt_to_file(
        &self,
        source: &Chunker,
        policy: &PolicyObject,
        kas: Option<&KasClient>,
        targets: &[KasTarget],
        dest: &Path,
    ) -> Result<TdfManifest, TdfError> {
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| TdfError::Container(ContainerError::Io(e)))?;
        let file = temp
            .reopen()
            .map_err(|e| TdfError::Container(ContainerError::Io(e)))?;

        let (_, manifest) = self
            .encrypt_to_sink(source, policy, kas, targets, file)
            .await?;

        temp.persist(dest)
            .map_err(|e| TdfError::Container(ContainerError::Io(e.error)))?;
        Ok(manifest)
    }

    /// Encrypt a source into an in-memory container
    pub async fn encrypt_to_vec(
        &self,
        source: &Chunker,
        policy: &PolicyObject,
        kas: Option<&KasClient>,
        targets: &[KasTarget],
    ) -> Result<(Vec<u8>, TdfManifest), TdfError> {
        let cursor = std::io::Cursor::new(Vec::new());
        let (cursor, manifest) = self
            .encrypt_to_sink(source, policy, kas, targets, cursor)
            .await?;
        Ok((cursor.into_inner(), manifest))
    }

    async fn encrypt_to_sink<W: Write + Seek>(
        &self,
        source: &Chunker,
        policy: &PolicyObject,
        kas: Option<&KasClient>,
        targets: &[KasTarget],
        sink: W,
    ) -> Result<(W, TdfManifest), TdfError> {
        let cfg = &self.config;

        let total = source.size();
        if total > cfg.byte_limit {
            return Err(TdfError::config(format!(
                "payload of {total} bytes exceeds the {} byte limit",
                cfg.byte_limit
            )));
        }
        let segment_count = total.div_ceil(cfg.segment_size);
        if segment_count > MAX_SEGMENT_COUNT {
            return Err(TdfError::config(format!(
                "payload requires {segment_count} segments at size {}, limit is {MAX_SEGMENT_COUNT}",
                cfg.segment_size
            )));
        }

        let payload_key = cfg
            .payload_key
            .clone()
            .unwrap_or_else(PayloadKey::generate);

        let policy_json = policy
            .to_json()
            .map_err(|e| TdfError::policy(format!("policy serialization failed: {e}")))?;
        let policy_b64 = BASE64.encode(&policy_json);

        if cfg.cancel.is_cancelled() {
            return Err(TdfError::Aborted);
        }
        let key_access = tokio::select! {
            _ = cfg.cancel.cancelled() => return Err(TdfError::Aborted),
            result = build_key_access(
                kas,
                targets,
                &payload_key,
                &policy_b64,
                cfg.metadata.as_deref(),
            ) => result?,
        };

        let cipher = SegmentCipher::new(payload_key.clone(), cfg.segment_hash_alg)
            .map_err(TdfError::crypto)?;

        let mut archive = TdfArchiveWriter::new(sink);
        archive.start_payload().map_err(TdfError::Container)?;

        let mut segments: Vec<Segment> = Vec::with_capacity(segment_count as usize);
        let mut segment_hashes: Vec<Vec<u8>> = Vec::with_capacity(segment_count as usize);
        // At most queue_size encrypted segments live here before a flush
        let mut pending: Vec<(Vec<u8>, u64)> = Vec::with_capacity(cfg.queue_size);
        let mut processed: u64 = 0;

        let mut offset: u64 = 0;
        let mut index: usize = 0;
        while offset < total {
            if cfg.cancel.is_cancelled() {
                return Err(TdfError::Aborted);
            }
            let end = (offset + cfg.segment_size).min(total);
            let chunk = tokio::select! {
                _ = cfg.cancel.cancelled() => return Err(TdfError::Aborted),
                result = source.read(Some(offset as i64), Some(end as i64)) => result?,
            };

            let encrypted = cipher
                .encrypt_segment(&chunk)
                .map_err(|e| TdfError::crypto_at(index, e))?;

            segments.push(Segment {
                hash: BASE64.encode(&encrypted.hash),
                segment_size: Some(chunk.len() as u64),
                encrypted_segment_size: Some(encrypted.data.len() as u64),
            });
            segment_hashes.push(encrypted.hash);
            pending.push((encrypted.data, chunk.len() as u64));

            if pending.len() >= cfg.queue_size {
                flush_pending(&mut archive, &mut pending, &mut processed, cfg)?;
            }

            offset = end;
            index += 1;
        }
        flush_pending(&mut archive, &mut pending, &mut processed, cfg)?;

        if cfg.cancel.is_cancelled() {
            return Err(TdfError::Aborted);
        }

        let root_sig =
            calculate_root_signature(&segment_hashes, &payload_key).map_err(TdfError::crypto)?;

        let manifest = TdfManifest {
            payload: Payload {
                payload_type: "reference".to_string(),
                url: PAYLOAD_ENTRY.to_string(),
                protocol: "zip".to_string(),
                is_encrypted: true,
                mime_type: Some(
                    cfg.mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                ),
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access,
                method: EncryptionMethod::default(),
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature {
                        alg: "HS256".to_string(),
                        sig: root_sig,
                    },
                    segment_hash_alg: cfg.segment_hash_alg.as_str().to_string(),
                    segments,
                    segment_size_default: cfg.segment_size,
                    encrypted_segment_size_default: cfg.segment_size + SEGMENT_OVERHEAD,
                },
                policy: policy_b64,
            },
        };

        let manifest_json = manifest.to_json()?;
        let sink = archive.finish(&manifest_json).map_err(TdfError::Container)?;

        debug!(
            segments = index,
            plaintext_bytes = total,
            "Encrypt complete"
        );
        Ok((sink, manifest))
    }
}

/// Commit buffered segments in ascending plaintext-offset order
fn flush_pending<W: Write + Seek>(
    archive: &mut TdfArchiveWriter<W>,
    pending: &mut Vec<(Vec<u8>, u64)>,
    processed: &mut u64,
    cfg: &EncryptConfig,
) -> Result<(), TdfError> {
    for (data, plaintext_len) in pending.drain(..) {
        archive.append_segment(&data).map_err(TdfError::Container)?;
        *processed += plaintext_len;
        if let Some(sink) = cfg.progress.as_deref() {
            sink.on_progress(*processed);
        }
    }
    Ok(())
}
