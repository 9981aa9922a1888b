//! TDF container I/O
//!
//! The container is a ZIP archive with exactly two entries, written in this
//! order: `0.payload` (concatenated segment ciphertexts) and
//! `0.manifest.json` (UTF-8 JSON). Entries are STORED; the payload entry is
//! written in ZIP64 format so containers past 4 GiB stay valid.
//!
//! The writer drives the `zip` crate over any `Write + Seek` sink. The
//! reader instead works through a [`Chunker`] with ranged reads only — it
//! scans the end-of-central-directory record from the tail, walks the
//! central directory to locate both entries by name, and never needs the
//! payload to find the manifest.

use std::io::{Seek, Write};

use thiserror::Error;
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::chunker::{Chunker, SourceError};

/// Name of the ciphertext entry
pub const PAYLOAD_ENTRY: &str = "0.payload";

/// Name of the manifest entry
pub const MANIFEST_ENTRY: &str = "0.manifest.json";

const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;

const EOCD_MIN: u64 = 22;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_MIN: u64 = 56;
// EOCD + max comment + zip64 locator
const MAX_TAIL_SCAN: u64 = EOCD_MIN + 65_535 + ZIP64_LOCATOR_LEN as u64;

/// Container structure errors
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid container structure: {0}")]
    Structure(String),

    #[error("Missing container entry: {name}")]
    EntryMissing { name: &'static str },
}

/// Writer for the two-entry TDF container
pub struct TdfArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    payload_bytes: u64,
}

impl<W: Write + Seek> TdfArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            zip: ZipWriter::new(sink),
            payload_bytes: 0,
        }
    }

    /// Open the `0.payload` entry; segments are appended afterwards
    pub fn start_payload(&mut self) -> Result<(), ContainerError> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);
        self.zip.start_file(PAYLOAD_ENTRY, options)?;
        Ok(())
    }

    /// Append one encrypted segment to the payload entry
    pub fn append_segment(&mut self, data: &[u8]) -> Result<(), ContainerError> {
        self.zip.write_all(data)?;
        self.payload_bytes += data.len() as u64;
        Ok(())
    }

    /// Total payload bytes written so far
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Write the manifest entry and close the archive, returning the sink
    pub fn finish(mut self, manifest_json: &str) -> Result<W, ContainerError> {
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        self.zip.start_file(MANIFEST_ENTRY, options)?;
        self.zip.write_all(manifest_json.as_bytes())?;
        let sink = self.zip.finish()?;
        debug!(payload_bytes = self.payload_bytes, "Finished container");
        Ok(sink)
    }
}

#[derive(Debug, Clone, Copy)]
struct EntryLocation {
    data_offset: u64,
    size: u64,
}

/// Reader for the two-entry TDF container over a random-access chunker
#[derive(Debug)]
pub struct TdfArchiveReader {
    chunker: Chunker,
    manifest_json: String,
    payload: EntryLocation,
}

impl TdfArchiveReader {
    /// Locate both entries from the central directory and load the manifest
    pub async fn open(chunker: Chunker) -> Result<Self, ContainerError> {
        let size = chunker.size();
        if size < EOCD_MIN {
            return Err(ContainerError::Structure(
                "container smaller than an empty archive".to_string(),
            ));
        }

        let tail_len = size.min(MAX_TAIL_SCAN);
        let tail_start = size - tail_len;
        let tail = chunker.read_exact_range(tail_start, size).await?;

        let eocd_pos = find_eocd(&tail).ok_or_else(|| {
            ContainerError::Structure("end of central directory not found".to_string())
        })?;
        let eocd = &tail[eocd_pos..];

        let mut total_entries = read_u16(eocd, 10)? as u64;
        let mut cd_size = read_u32(eocd, 12)? as u64;
        let mut cd_offset = read_u32(eocd, 16)? as u64;

        if total_entries == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF {
            let locator_pos = eocd_pos.checked_sub(ZIP64_LOCATOR_LEN).ok_or_else(|| {
                ContainerError::Structure("ZIP64 locator missing".to_string())
            })?;
            let locator = &tail[locator_pos..eocd_pos];
            if read_u32(locator, 0)? != ZIP64_LOCATOR_SIG {
                return Err(ContainerError::Structure(
                    "ZIP64 locator signature mismatch".to_string(),
                ));
            }
            let zip64_eocd_offset = read_u64(locator, 8)?;
            if zip64_eocd_offset + ZIP64_EOCD_MIN > size {
                return Err(ContainerError::Structure(
                    "ZIP64 end of central directory out of bounds".to_string(),
                ));
            }

            let zip64_eocd = chunker
                .read_exact_range(zip64_eocd_offset, zip64_eocd_offset + ZIP64_EOCD_MIN)
                .await?;
            if read_u32(&zip64_eocd, 0)? != ZIP64_EOCD_SIG {
                return Err(ContainerError::Structure(
                    "ZIP64 end of central directory signature mismatch".to_string(),
                ));
            }
            total_entries = read_u64(&zip64_eocd, 32)?;
            cd_size = read_u64(&zip64_eocd, 40)?;
            cd_offset = read_u64(&zip64_eocd, 48)?;
        }

        if cd_offset + cd_size > size {
            return Err(ContainerError::Structure(
                "central directory out of bounds".to_string(),
            ));
        }
        let cd = chunker.read_exact_range(cd_offset, cd_offset + cd_size).await?;

        let mut payload_entry: Option<(u64, u64)> = None; // (header_offset, size)
        let mut manifest_entry: Option<(u64, u64)> = None;

        let mut pos = 0usize;
        for _ in 0..total_entries {
            if read_u32(&cd, pos)? != CENTRAL_HEADER_SIG {
                return Err(ContainerError::Structure(
                    "central directory header signature mismatch".to_string(),
                ));
            }
            let method = read_u16(&cd, pos + 10)?;
            let mut compressed = read_u32(&cd, pos + 20)? as u64;
            let uncompressed = read_u32(&cd, pos + 24)? as u64;
            let name_len = read_u16(&cd, pos + 28)? as usize;
            let extra_len = read_u16(&cd, pos + 30)? as usize;
            let comment_len = read_u16(&cd, pos + 32)? as usize;
            let mut header_offset = read_u32(&cd, pos + 42)? as u64;

            let name = cd
                .get(pos + 46..pos + 46 + name_len)
                .ok_or_else(|| ContainerError::Structure("truncated entry name".to_string()))?;

            if compressed == 0xFFFF_FFFF
                || uncompressed == 0xFFFF_FFFF
                || header_offset == 0xFFFF_FFFF
            {
                let extra = cd
                    .get(pos + 46 + name_len..pos + 46 + name_len + extra_len)
                    .ok_or_else(|| {
                        ContainerError::Structure("truncated extra field".to_string())
                    })?;
                let (zip64_compressed, zip64_offset) =
                    parse_zip64_extra(extra, uncompressed, compressed, header_offset)?;
                if let Some(c) = zip64_compressed {
                    compressed = c;
                }
                if let Some(o) = zip64_offset {
                    header_offset = o;
                }
            }

            let is_payload = name == PAYLOAD_ENTRY.as_bytes();
            let is_manifest = name == MANIFEST_ENTRY.as_bytes();
            if (is_payload || is_manifest) && method != 0 {
                return Err(ContainerError::Structure(format!(
                    "entry {} is not STORED",
                    String::from_utf8_lossy(name)
                )));
            }
            if is_payload {
                payload_entry = Some((header_offset, compressed));
            } else if is_manifest {
                manifest_entry = Some((header_offset, compressed));
            }

            pos += 46 + name_len + extra_len + comment_len;
        }

        let (payload_header, payload_size) = payload_entry.ok_or(ContainerError::EntryMissing {
            name: PAYLOAD_ENTRY,
        })?;
        let (manifest_header, manifest_size) =
            manifest_entry.ok_or(ContainerError::EntryMissing {
                name: MANIFEST_ENTRY,
            })?;

        let payload = EntryLocation {
            data_offset: resolve_data_offset(&chunker, payload_header).await?,
            size: payload_size,
        };
        let manifest_offset = resolve_data_offset(&chunker, manifest_header).await?;
        let manifest_bytes = chunker
            .read_exact_range(manifest_offset, manifest_offset + manifest_size)
            .await?;
        let manifest_json = String::from_utf8(manifest_bytes).map_err(|_| {
            ContainerError::Structure("manifest entry is not UTF-8".to_string())
        })?;

        debug!(
            payload_size = payload.size,
            manifest_size, "Opened container"
        );
        Ok(Self {
            chunker,
            manifest_json,
            payload,
        })
    }

    /// Manifest entry contents
    pub fn manifest_json(&self) -> &str {
        &self.manifest_json
    }

    /// Size of the payload entry in bytes
    pub fn payload_size(&self) -> u64 {
        self.payload.size
    }

    /// Read `[start, end)` of the payload entry
    pub async fn read_payload(&self, start: u64, end: u64) -> Result<Vec<u8>, ContainerError> {
        if start > end || end > self.payload.size {
            return Err(ContainerError::Structure(format!(
                "payload range {start}..{end} out of bounds ({} bytes)",
                self.payload.size
            )));
        }
        if start == end {
            return Ok(Vec::new());
        }
        Ok(self
            .chunker
            .read_exact_range(
                self.payload.data_offset + start,
                self.payload.data_offset + end,
            )
            .await?)
    }
}

/// Skip a local file header to the start of the entry's data
async fn resolve_data_offset(
    chunker: &Chunker,
    header_offset: u64,
) -> Result<u64, ContainerError> {
    let header = chunker
        .read_exact_range(header_offset, header_offset + 30)
        .await?;
    if read_u32(&header, 0)? != LOCAL_HEADER_SIG {
        return Err(ContainerError::Structure(
            "local file header signature mismatch".to_string(),
        ));
    }
    let name_len = read_u16(&header, 26)? as u64;
    let extra_len = read_u16(&header, 28)? as u64;
    Ok(header_offset + 30 + name_len + extra_len)
}

/// ZIP64 extended information: sizes and offset appear only for fields that
/// are saturated in the 32-bit record, in this order: uncompressed size,
/// compressed size, local header offset
fn parse_zip64_extra(
    extra: &[u8],
    uncompressed32: u64,
    compressed32: u64,
    offset32: u64,
) -> Result<(Option<u64>, Option<u64>), ContainerError> {
    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let id = read_u16(extra, pos)?;
        let len = read_u16(extra, pos + 2)? as usize;
        if id == 0x0001 {
            let mut field = pos + 4;
            let mut compressed = None;
            let mut offset = None;
            if uncompressed32 == 0xFFFF_FFFF {
                field += 8;
            }
            if compressed32 == 0xFFFF_FFFF {
                compressed = Some(read_u64(extra, field)?);
                field += 8;
            }
            if offset32 == 0xFFFF_FFFF {
                offset = Some(read_u64(extra, field)?);
            }
            return Ok((compressed, offset));
        }
        pos += 4 + len;
    }
    Err(ContainerError::Structure(
        "ZIP64 extra field missing".to_string(),
    ))
}

fn find_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < EOCD_MIN as usize {
        return None;
    }
    (0..=tail.len() - EOCD_MIN as usize)
        .rev()
        .find(|&i| read_u32(tail, i).map(|sig| sig == EOCD_SIG).unwrap_or(false))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, ContainerError> {
    buf.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| ContainerError::Structure("truncated record".to_string()))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, ContainerError> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ContainerError::Structure("truncated record".to_string()))
}

fn read_u64(buf: &[u8], pos: usize) -> Result<u64, ContainerError> {
    buf.get(pos..pos + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| ContainerError::Structure("truncated record".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_container(segments: &[&[u8]], manifest: &str) -> Vec<u8> {
        let mut writer = TdfArchiveWriter::new(Cursor::new(Vec::new()));
        writer.start_payload().unwrap();
        for segment in segments {
            writer.append_segment(segment).unwrap();
        }
        writer.finish(manifest).unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_container_roundtrip() {
        let manifest = r#"{"marker":"manifest"}"#;
        let bytes = build_container(&[b"first ", b"second"], manifest);

        let reader = TdfArchiveReader::open(Chunker::buffer(bytes)).await.unwrap();
        assert_eq!(reader.manifest_json(), manifest);
        assert_eq!(reader.payload_size(), 12);
        assert_eq!(reader.read_payload(0, 12).await.unwrap(), b"first second");
        assert_eq!(reader.read_payload(6, 12).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_payload_entry_precedes_manifest() {
        let bytes = build_container(&[b"payload-bytes"], "{}");
        let payload_pos = bytes
            .windows(PAYLOAD_ENTRY.len())
            .position(|w| w == PAYLOAD_ENTRY.as_bytes())
            .unwrap();
        let manifest_pos = bytes
            .windows(MANIFEST_ENTRY.len())
            .position(|w| w == MANIFEST_ENTRY.as_bytes())
            .unwrap();
        assert!(payload_pos < manifest_pos);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let bytes = build_container(&[], "{}");
        let reader = TdfArchiveReader::open(Chunker::buffer(bytes)).await.unwrap();
        assert_eq!(reader.payload_size(), 0);
        assert!(reader.read_payload(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_bounds_payload_range() {
        let bytes = build_container(&[b"abc"], "{}");
        let reader = TdfArchiveReader::open(Chunker::buffer(bytes)).await.unwrap();
        assert!(reader.read_payload(0, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_payload_entry() {
        // Archive with only a manifest entry
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(MANIFEST_ENTRY, options).unwrap();
        zip.write_all(b"{}").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let err = TdfArchiveReader::open(Chunker::buffer(bytes)).await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::EntryMissing {
                name: PAYLOAD_ENTRY
            }
        ));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let err = TdfArchiveReader::open(Chunker::buffer(vec![0u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Structure(_)));

        let err = TdfArchiveReader::open(Chunker::buffer(vec![0u8; 4]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Structure(_)));
    }

    #[tokio::test]
    async fn test_deflated_entries_rejected() {
        // DEFLATE is outside the constrained layout even when the names match
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(PAYLOAD_ENTRY, stored).unwrap();
        zip.write_all(b"data").unwrap();
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(MANIFEST_ENTRY, deflated).unwrap();
        zip.write_all(b"{}").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let err = TdfArchiveReader::open(Chunker::buffer(bytes)).await.unwrap_err();
        assert!(matches!(err, ContainerError::Structure(_)));
    }
}
