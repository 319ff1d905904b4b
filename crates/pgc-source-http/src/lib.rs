//! Live watch transport over HTTP.
//!
//! Opens a long-poll GET against a watch endpoint that answers with
//! newline-delimited JSON, one notification per line, and positions the
//! stream with the cursor as the `resourceVersion` query parameter. The
//! driver owns retries; this crate only classifies failures into the
//! [`SourceError`] taxonomy.

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use pgc_config::WatchConfig;
use pgc_schemas::RawWatchEvent;
use pgc_watch::{Cursor, EventSource, EventStream, SourceError};
use std::pin::Pin;
use tracing::debug;

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SourceError>> + Send>>;

/// Classify an HTTP status into the source-error taxonomy.
///
/// 401/403 and 404 are terminal (misconfiguration, not transient);
/// everything else non-success is a resumable interruption.
fn classify_status(status: reqwest::StatusCode, url: &str) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        401 | 403 => Err(SourceError::Unauthorized(format!("{status} from {url}"))),
        404 => Err(SourceError::NotRegistered(format!("{status} from {url}"))),
        _ => Err(SourceError::Interrupted(format!("{status} from {url}"))),
    }
}

/// Pop one `\n`-terminated line from `buffer`, stripping the terminator and
/// any trailing `\r`. Returns `None` when no full line is buffered yet.
fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let nl = buffer.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=nl).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

fn decode_line(line: &[u8]) -> Result<RawWatchEvent, SourceError> {
    serde_json::from_slice(line).map_err(|err| {
        SourceError::Protocol(format!(
            "undecodable watch frame ({} bytes): {err}",
            line.len()
        ))
    })
}

/// One open watch response body, split into JSON lines.
struct HttpWatchStream {
    chunks: ChunkStream,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl HttpWatchStream {
    fn new(chunks: ChunkStream) -> Self {
        HttpWatchStream {
            chunks,
            buffer: Vec::new(),
            exhausted: false,
        }
    }
}

#[async_trait]
impl EventStream for HttpWatchStream {
    async fn next_event(&mut self) -> Result<Option<RawWatchEvent>, SourceError> {
        loop {
            if let Some(line) = take_line(&mut self.buffer) {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return decode_line(&line).map(Some);
            }

            if self.exhausted {
                // Flush a final unterminated line, if the server sent one.
                let rest = std::mem::take(&mut self.buffer);
                if rest.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return decode_line(&rest).map(Some);
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(err),
                None => self.exhausted = true,
            }
        }
    }
}

/// The live event source.
pub struct HttpWatchSource {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpWatchSource {
    pub fn new(config: &WatchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let url = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            config.resource_path
        );
        Ok(HttpWatchSource {
            client,
            url,
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl EventSource for HttpWatchSource {
    async fn open(&mut self, cursor: &Cursor) -> Result<Box<dyn EventStream>, SourceError> {
        let mut request = self.client.get(&self.url).query(&[("watch", "true")]);
        if !cursor.is_start() {
            request = request.query(&[("resourceVersion", cursor.as_str())]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| SourceError::Interrupted(err.to_string()))?;
        classify_status(response.status(), &self.url)?;
        debug!(url = %self.url, cursor = %cursor, "watch stream opened");

        let chunks: ChunkStream = Box::pin(response.bytes_stream().map(|result| {
            result
                .map(|bytes| bytes.to_vec())
                .map_err(|err| SourceError::Interrupted(err.to_string()))
        }));
        Ok(Box::new(HttpWatchStream::new(chunks)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
