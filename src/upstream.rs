//! Execute fetch API client.
//!
//! Documents are pulled with `GET /fetch/document/?limit=&since=[&calc=true]`.
//! The body is newline-delimited JSON; the next cursor and the truncation flag
//! travel in the `X-Sync-Highwater-Mark` and `X-Sync-Truncated` headers.
//! Bodies are read incrementally so a page never has to fit in memory.

use crate::config::UpstreamConfig;
use crate::cursor::SyncCursor;
use crate::error::{Error, Result};
use crate::schema::RootSchema;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Header carrying the cursor to resume from.
pub const HIGHWATER_HEADER: &str = "X-Sync-Highwater-Mark";
/// Header telling whether more pages remain.
pub const TRUNCATED_HEADER: &str = "X-Sync-Truncated";

const DOCUMENT_PATH: &str = "fetch/document/";
const SCHEMA_PATH: &str = "fetch/document/schema";

/// Lines handed to the warehouse per upload call, bounded by their total size.
pub const UPLOAD_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// One page of the document feed, read from the network as it is consumed.
#[derive(Debug)]
pub struct Page {
    response: Option<reqwest::Response>,
    buffer: LineBuffer,
    bytes_read: usize,
    /// Cursor to resume from after this page
    pub next_cursor: SyncCursor,
    /// Whether more pages remain for this iteration
    pub truncated: bool,
}

impl Page {
    fn new(response: reqwest::Response, next_cursor: SyncCursor, truncated: bool) -> Self {
        Self {
            response: Some(response),
            buffer: LineBuffer::default(),
            bytes_read: 0,
            next_cursor,
            truncated,
        }
    }

    /// Next non-empty NDJSON line, or `None` once the body is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(self.buffer.finish());
            };
            match response
                .chunk()
                .await
                .map_err(|e| Error::upstream_http("Failed to read page body", e))?
            {
                Some(bytes) => {
                    self.bytes_read += bytes.len();
                    self.buffer.push(&bytes);
                }
                None => self.response = None,
            }
        }
    }

    /// Next group of lines totalling at least `max_bytes` (or the rest of the
    /// body). Empty once the body is exhausted.
    pub async fn next_batch(&mut self, max_bytes: usize) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut size = 0;
        while size < max_bytes {
            match self.next_line().await? {
                Some(line) => {
                    size += line.len();
                    lines.push(line);
                }
                None => break,
            }
        }
        Ok(lines)
    }

    /// Body bytes received so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode(&raw) {
                return Some(line);
            }
        }
        None
    }

    /// Whatever follows the last newline.
    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode(&raw)
    }
}

fn decode(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// HTTP client for the Execute fetch API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base: Url,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a client from configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| Error::config(format!("Invalid Execute URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("execute-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::upstream_http("Failed to build HTTP client", e))?;

        Ok(Self { http, base, config })
    }

    /// URL of the document feed.
    pub fn document_url(&self) -> Result<Url> {
        self.endpoint(DOCUMENT_PATH)
    }

    /// URL of the schema endpoint.
    pub fn schema_url(&self) -> Result<Url> {
        self.endpoint(SCHEMA_PATH)
    }

    /// Fetch the next page of documents changed since `since`.
    #[instrument(skip(self), fields(since = %since, limit = self.config.max_documents))]
    pub async fn fetch_page(&self, since: &SyncCursor) -> Result<Page> {
        let mut url = self.document_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.config.max_documents.to_string());
            query.append_pair("since", since.as_str());
            if self.config.include_calcs {
                query.append_pair("calc", "true");
            }
        }

        debug!("Pulling batch from Execute");
        let response = self.get(url).await?;
        let (next_cursor, truncated) = page_headers(response.headers())?;

        debug!(next = %next_cursor, truncated, "Fetched page headers");
        Ok(Page::new(response, next_cursor, truncated))
    }

    /// Fetch the full document schema.
    #[instrument(skip(self))]
    pub async fn fetch_schema(&self) -> Result<RootSchema> {
        let mut url = self.schema_url()?;
        if self.config.include_calcs {
            url.query_pairs_mut().append_pair("calc", "true");
        }

        debug!("Pulling schema from Execute");
        let response = self.get(url.clone()).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::upstream_http(format!("Failed to read body from {}", url), e))?;

        let schema = RootSchema::from_json(&body)?;
        info!(types = schema.len(), "Fetched document schema");
        Ok(schema)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url.clone())
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await
            .map_err(|e| Error::upstream_http(format!("Request to {} failed", url), e))?;

        if !response.status().is_success() {
            return Err(Error::upstream_status(response.status().as_u16(), url));
        }
        Ok(response)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::config(format!("Invalid Execute URL: {}", e)))
    }
}

/// Read the cursor and truncation flag from response headers.
///
/// A missing high-water mark is an error: advancing to an empty cursor would
/// rewind the next run to the beginning. A missing truncation flag ends the
/// iteration.
fn page_headers(headers: &HeaderMap) -> Result<(SyncCursor, bool)> {
    let next = headers
        .get(HIGHWATER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::upstream(format!("Response is missing the {HIGHWATER_HEADER} header")))?;

    let truncated = headers
        .get(TRUNCATED_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(false);

    Ok((SyncCursor::new(next), truncated))
}
