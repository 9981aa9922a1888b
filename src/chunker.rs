//! Uniform random-access byte sources
//!
//! A [`Chunker`] exposes one operation, `read(byte_start, byte_end)`, over
//! interchangeable backends: an in-memory buffer, a seekable local file or
//! a remote HTTP resource fetched with `Range` requests. One-shot streams
//! are materialized into a buffer at construction. All backends answer
//! identical bytes for equivalent ranges.
//!
//! Bounds follow slice semantics: missing bounds cover the whole source, a
//! negative start counts back from the end, a positive end is exclusive. A
//! negative end is resolved locally but unsupported for remote sources.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Attempts per remote range request
const REMOTE_ATTEMPTS: u32 = 3;

/// Initial backoff between remote attempts; doubles per retry
const REMOTE_BACKOFF: Duration = Duration::from_millis(200);

/// Chunk source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error{}: {message}", status_suffix(.status))]
    Http { status: Option<u16>, message: String },

    #[error("Unsupported range: {reason}")]
    UnsupportedRange { reason: String },

    #[error("Remote source did not report a length: {url}")]
    MissingLength { url: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

/// Input variants accepted by [`Chunker::open`]
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Bytes already in memory
    Buffer(Vec<u8>),
    /// Seekable local file
    File(PathBuf),
    /// Remote resource supporting HTTP range requests
    Remote(String),
}

#[derive(Debug)]
enum Backend {
    Buffer(Vec<u8>),
    File { path: PathBuf },
    Remote { client: reqwest::Client, url: String },
}

/// Random-access byte source with uniform range semantics
#[derive(Debug)]
pub struct Chunker {
    backend: Backend,
    size: u64,
}

impl Chunker {
    /// Open any [`DataSource`] variant
    pub async fn open(source: DataSource) -> Result<Self, SourceError> {
        match source {
            DataSource::Buffer(bytes) => Ok(Self::buffer(bytes)),
            DataSource::File(path) => Self::file(path).await,
            DataSource::Remote(url) => Self::remote(url).await,
        }
    }

    /// Source backed by an in-memory buffer
    pub fn buffer(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            backend: Backend::Buffer(bytes),
            size,
        }
    }

    /// Source backed by a seekable local file
    pub async fn file(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            backend: Backend::File { path },
            size,
        })
    }

    /// Source backed by a remote resource; the length is probed once at
    /// construction
    pub async fn remote(url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Http {
                status: None,
                message: e.to_string(),
            })?;
        Self::remote_with_client(client, url).await
    }

    /// Remote source reusing an existing HTTP client
    pub async fn remote_with_client(
        client: reqwest::Client,
        url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let url = url.into();
        let size = probe_remote_length(&client, &url).await?;
        debug!(url = %url, size, "Probed remote source");
        Ok(Self {
            backend: Backend::Remote { client, url },
            size,
        })
    }

    /// Materialize a one-shot stream into a buffer-backed source
    pub async fn from_stream(
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Self, SourceError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        Ok(Self::buffer(bytes))
    }

    /// Total source length in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the byte window `[byte_start, byte_end)`
    ///
    /// Absent bounds cover the whole source; a negative start resolves to
    /// `max(0, size + start)`; a positive end is exclusive and clamped to
    /// the source length. A negative end is resolved for local backends and
    /// fails with [`SourceError::UnsupportedRange`] for remote ones.
    pub async fn read(
        &self,
        byte_start: Option<i64>,
        byte_end: Option<i64>,
    ) -> Result<Vec<u8>, SourceError> {
        let size = self.size;

        let start = match byte_start {
            None => 0,
            Some(s) if s < 0 => size.saturating_sub(s.unsigned_abs()),
            Some(s) => (s as u64).min(size),
        };
        let end = match byte_end {
            None => size,
            Some(e) if e < 0 => {
                if matches!(self.backend, Backend::Remote { .. }) {
                    return Err(SourceError::UnsupportedRange {
                        reason: "negative byte_end is not supported for remote sources"
                            .to_string(),
                    });
                }
                size.saturating_sub(e.unsigned_abs())
            }
            Some(e) => (e as u64).min(size),
        };

        if start >= end {
            return Ok(Vec::new());
        }
        self.read_exact_range(start, end).await
    }

    /// Read the resolved absolute window `[start, end)`, `end <= size`
    pub(crate) async fn read_exact_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, SourceError> {
        match &self.backend {
            Backend::Buffer(bytes) => Ok(bytes[start as usize..end as usize].to_vec()),
            Backend::File { path } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(start)).await?;
                let mut out = vec![0u8; (end - start) as usize];
                file.read_exact(&mut out).await?;
                Ok(out)
            }
            Backend::Remote { client, url } => {
                fetch_remote_range(client, url, start, end).await
            }
        }
    }
}

/// Probe a remote resource's length via HEAD, falling back to a one-byte
/// range GET when HEAD is not answered with a length
async fn probe_remote_length(client: &reqwest::Client, url: &str) -> Result<u64, SourceError> {
    // The header, not Response::content_length(): a HEAD response has no
    // body for the latter to measure
    fn header_length(resp: &reqwest::Response) -> Option<u64> {
        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    if let Ok(resp) = client.head(url).send().await {
        if resp.status().is_success() {
            if let Some(len) = header_length(&resp) {
                return Ok(len);
            }
        }
    }

    let resp = client
        .get(url)
        .header(reqwest::header::RANGE, "bytes=0-0")
        .send()
        .await
        .map_err(|e| SourceError::Http {
            status: None,
            message: e.to_string(),
        })?;

    // "bytes 0-0/12345"
    if let Some(range) = resp
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(total) = range.rsplit('/').next().and_then(|t| t.parse::<u64>().ok()) {
            return Ok(total);
        }
    }
    if resp.status().is_success() {
        if let Some(len) = header_length(&resp) {
            return Ok(len);
        }
    }

    Err(SourceError::MissingLength {
        url: url.to_string(),
    })
}

/// Ranged GET with exponential backoff on transport errors and 5xx
async fn fetch_remote_range(
    client: &reqwest::Client,
    url: &str,
    start: u64,
    end: u64,
) -> Result<Vec<u8>, SourceError> {
    let range = format!("bytes={}-{}", start, end - 1);
    let mut backoff = REMOTE_BACKOFF;

    for attempt in 1..=REMOTE_ATTEMPTS {
        let result = client
            .get(url)
            .header(reqwest::header::RANGE, &range)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let body = resp.bytes().await.map_err(|e| SourceError::Http {
                        status: None,
                        message: e.to_string(),
                    })?;
                    // 206 answers exactly the window; a server that ignores
                    // Range answers 200 with the full body
                    let bytes = if status == reqwest::StatusCode::PARTIAL_CONTENT {
                        body.to_vec()
                    } else {
                        let lo = (start as usize).min(body.len());
                        let hi = (end as usize).min(body.len());
                        body[lo..hi].to_vec()
                    };
                    if bytes.len() != (end - start) as usize {
                        return Err(SourceError::Http {
                            status: Some(status.as_u16()),
                            message: format!(
                                "short range response: {} of {} bytes",
                                bytes.len(),
                                end - start
                            ),
                        });
                    }
                    return Ok(bytes);
                }
                if !status.is_server_error() || attempt == REMOTE_ATTEMPTS {
                    return Err(SourceError::Http {
                        status: Some(status.as_u16()),
                        message: format!("range request failed for {url}"),
                    });
                }
                warn!(url = %url, %status, attempt, "Retrying ranged read");
            }
            Err(e) => {
                if attempt == REMOTE_ATTEMPTS {
                    return Err(SourceError::Http {
                        status: None,
                        message: e.to_string(),
                    });
                }
                warn!(url = %url, error = %e, attempt, "Retrying ranged read");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    unreachable!("retry loop returns on final attempt")
}
