//! Segmented AEAD reader
//!
//! Mirror of the writer: opens the container, strict-parses the manifest,
//! recovers the payload key (KAS rewrap, or injected for offline use),
//! verifies every policy binding and the root signature before releasing
//! any plaintext, then decrypts segments on demand. Random-access reads
//! verify only the touched segments; streaming decryption walks segments
//! in order with one segment in flight, so plaintext reaches the sink in
//! strictly increasing offset order.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::TdfArchiveReader;
use crate::chunker::Chunker;
use crate::error::TdfError;
use crate::kas::KasClient;
use crate::key_access::decrypt_metadata;
use tdf3_crypto::{
    verify_policy_binding, verify_root_signature, PayloadKey, SegmentCipher, SegmentHashAlg,
};
use tdf3_protocol::{ManifestError, TdfManifest};

/// Index entry mapping one segment between plaintext and payload offsets
#[derive(Debug)]
struct SegmentEntry {
    plaintext_start: u64,
    plaintext_len: u64,
    ciphertext_start: u64,
    ciphertext_len: u64,
    /// Raw (base64-decoded) integrity tag from the manifest
    hash: Vec<u8>,
}

/// Segmented AEAD reader over an opened container
pub struct TdfReader {
    archive: TdfArchiveReader,
    manifest: TdfManifest,
    index: Vec<SegmentEntry>,
    total_plaintext: u64,
    hash_alg: SegmentHashAlg,
    cipher: Option<SegmentCipher>,
    payload_key: Option<PayloadKey>,
    kas_metadata: Option<serde_json::Value>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TdfReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdfReader")
            .field("archive", &self.archive)
            .field("manifest", &self.manifest)
            .field("index", &self.index)
            .field("total_plaintext", &self.total_plaintext)
            .field("hash_alg", &self.hash_alg)
            .field("cipher", &self.cipher.as_ref().map(|_| "<redacted>"))
            .field("payload_key", &self.payload_key.as_ref().map(|_| "<redacted>"))
            .field("kas_metadata", &self.kas_metadata)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl TdfReader {
    /// Open a container and parse its manifest
    ///
    /// The payload key is not yet available; call [`TdfReader::unwrap_key`]
    /// or [`TdfReader::use_payload_key`] before reading plaintext.
    pub async fn open(chunker: Chunker) -> Result<Self, TdfError> {
        let archive = TdfArchiveReader::open(chunker).await?;
        let manifest = TdfManifest::from_json(archive.manifest_json())?;

        let integrity = &manifest.encryption_information.integrity_information;
        let hash_alg = SegmentHashAlg::from_name(&integrity.segment_hash_alg).ok_or(
            ManifestError::InvalidField {
                field: "encryptionInformation.integrityInformation.segmentHashAlg",
                reason: format!("unsupported algorithm {:?}", integrity.segment_hash_alg),
            },
        )?;

        let mut index = Vec::with_capacity(integrity.segments.len());
        let mut plaintext_offset = 0u64;
        let mut ciphertext_offset = 0u64;
        for segment in &integrity.segments {
            let plaintext_len = segment
                .segment_size
                .unwrap_or(integrity.segment_size_default);
            let ciphertext_len = segment
                .encrypted_segment_size
                .unwrap_or(integrity.encrypted_segment_size_default);
            let hash = BASE64.decode(&segment.hash).map_err(ManifestError::from)?;

            index.push(SegmentEntry {
                plaintext_start: plaintext_offset,
                plaintext_len,
                ciphertext_start: ciphertext_offset,
                ciphertext_len,
                hash,
            });
            plaintext_offset += plaintext_len;
            ciphertext_offset += ciphertext_len;
        }

        // The segment records must cover the payload entry exactly once
        if ciphertext_offset != archive.payload_size() {
            return Err(ManifestError::InvalidField {
                field: "encryptionInformation.integrityInformation.segments",
                reason: format!(
                    "segments cover {ciphertext_offset} bytes, payload entry has {}",
                    archive.payload_size()
                ),
            }
            .into());
        }

        debug!(
            segments = index.len(),
            plaintext_bytes = plaintext_offset,
            "Opened TDF"
        );
        Ok(Self {
            archive,
            manifest,
            index,
            total_plaintext: plaintext_offset,
            hash_alg,
            cipher: None,
            payload_key: None,
            kas_metadata: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Observe a cancellation token during reads
    pub fn set_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// The parsed manifest
    pub fn manifest(&self) -> &TdfManifest {
        &self.manifest
    }

    /// Total plaintext length in bytes
    pub fn plaintext_size(&self) -> u64 {
        self.total_plaintext
    }

    /// Metadata returned by KAS on rewrap, if any
    pub fn kas_metadata(&self) -> Option<&serde_json::Value> {
        self.kas_metadata.as_ref()
    }

    /// Recover the payload key via the first key access object
    pub async fn unwrap_key(&mut self, kas: &KasClient) -> Result<(), TdfError> {
        let kao = self.manifest.encryption_information.key_access[0].clone();
        self.rewrap_and_install(kas, kao).await
    }

    /// Recover the payload key via the key access object for `kas_url`
    pub async fn unwrap_key_from(
        &mut self,
        kas: &KasClient,
        kas_url: &str,
    ) -> Result<(), TdfError> {
        let kao = self
            .manifest
            .encryption_information
            .key_access
            .iter()
            .find(|kao| kao.url == kas_url)
            .cloned()
            .ok_or_else(|| {
                TdfError::config(format!("no key access object for KAS {kas_url}"))
            })?;
        self.rewrap_and_install(kas, kao).await
    }

    async fn rewrap_and_install(
        &mut self,
        kas: &KasClient,
        kao: tdf3_protocol::KeyAccess,
    ) -> Result<(), TdfError> {
        let policy_b64 = self.manifest.encryption_information.policy.clone();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TdfError::Aborted),
            result = kas.rewrap(&kao, &policy_b64) => result?,
        };
        self.kas_metadata = result.metadata.clone();
        self.install_key(result.payload_key)
    }

    /// Inject an already-unwrapped payload key (offline containers)
    ///
    /// The key still has to pass every policy binding and the root
    /// signature before any plaintext is released.
    pub fn use_payload_key(&mut self, key_bytes: &[u8]) -> Result<(), TdfError> {
        let key = PayloadKey::from_slice(key_bytes).map_err(TdfError::crypto)?;
        self.install_key(key)
    }

    /// Verify bindings and the root signature, then arm the segment cipher
    fn install_key(&mut self, key: PayloadKey) -> Result<(), TdfError> {
        let enc = &self.manifest.encryption_information;

        for kao in &enc.key_access {
            verify_policy_binding(&enc.policy, &key, &kao.policy_binding)
                .map_err(|_| TdfError::policy(format!("policy binding mismatch for {}", kao.url)))?;
        }

        let hashes: Vec<Vec<u8>> = self.index.iter().map(|s| s.hash.clone()).collect();
        verify_root_signature(&hashes, &key, &enc.integrity_information.root_signature.sig)
            .map_err(TdfError::crypto)?;

        let cipher =
            SegmentCipher::new(key.clone(), self.hash_alg).map_err(TdfError::crypto)?;
        self.cipher = Some(cipher);
        self.payload_key = Some(key);
        debug!("Payload key verified against policy bindings and root signature");
        Ok(())
    }

    fn cipher(&self) -> Result<&SegmentCipher, TdfError> {
        self.cipher
            .as_ref()
            .ok_or_else(|| TdfError::config("payload key not unwrapped"))
    }

    /// Decrypt the first key access object's encrypted metadata, if present
    pub fn encrypted_metadata(&self) -> Result<Option<String>, TdfError> {
        let key = self
            .payload_key
            .as_ref()
            .ok_or_else(|| TdfError::config("payload key not unwrapped"))?;
        self.manifest.encryption_information.key_access[0]
            .encrypted_metadata
            .as_deref()
            .map(|bundle| decrypt_metadata(key, bundle))
            .transpose()
    }

    /// Fetch, verify and decrypt one segment
    async fn decrypt_segment(&self, index: usize) -> Result<Vec<u8>, TdfError> {
        let cipher = self.cipher()?;
        let entry = &self.index[index];

        let ciphertext = self
            .archive
            .read_payload(
                entry.ciphertext_start,
                entry.ciphertext_start + entry.ciphertext_len,
            )
            .await?;

        cipher
            .verify_segment_hash(&ciphertext, &entry.hash)
            .map_err(|e| TdfError::crypto_at(index, e))?;
        cipher
            .decrypt_segment(&ciphertext)
            .map_err(|e| TdfError::crypto_at(index, e))
    }

    /// Random-access read of the plaintext window `[start, end)`
    ///
    /// Bounds are clamped to the plaintext length. Only the touched
    /// segments are fetched, verified and decrypted.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, TdfError> {
        self.cipher()?;
        let start = start.min(self.total_plaintext);
        let end = end.min(self.total_plaintext);
        if start >= end {
            return Ok(Vec::new());
        }

        // First segment whose end lies past the window start
        let first = self
            .index
            .partition_point(|s| s.plaintext_start + s.plaintext_len <= start);

        let mut out = Vec::with_capacity((end - start) as usize);
        for (i, entry) in self.index.iter().enumerate().skip(first) {
            if entry.plaintext_start >= end {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(TdfError::Aborted);
            }

            let plaintext = self.decrypt_segment(i).await?;
            let hi = ((end - entry.plaintext_start) as usize).min(plaintext.len());
            let lo = (start.saturating_sub(entry.plaintext_start) as usize).min(hi);
            out.extend_from_slice(&plaintext[lo..hi]);
        }
        Ok(out)
    }

    /// Stream the full plaintext to a sink, one segment in flight
    ///
    /// Bytes are emitted in strictly increasing offset order. Any segment
    /// failure aborts the stream with an error; bytes already written must
    /// be treated as poisoned by the consumer.
    pub async fn decrypt_to(&self, sink: &mut dyn std::io::Write) -> Result<u64, TdfError> {
        self.cipher()?;
        let mut written = 0u64;

        for i in 0..self.index.len() {
            if self.cancel.is_cancelled() {
                return Err(TdfError::Aborted);
            }
            let plaintext = self.decrypt_segment(i).await?;
            sink.write_all(&plaintext)
                .map_err(|e| TdfError::Source(e.into()))?;
            written += plaintext.len() as u64;
        }
        Ok(written)
    }

    /// Decrypt the whole payload into memory
    pub async fn read_all(&self) -> Result<Vec<u8>, TdfError> {
        let mut out = Vec::with_capacity(self.total_plaintext as usize);
        self.decrypt_to(&mut out).await?;
        Ok(out)
    }
}
