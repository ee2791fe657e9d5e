use std::env;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{ChunkEmitter, Provider, ProviderError};

/// Upper bound on how much of an error response body is kept for diagnostics.
pub const ERROR_BODY_LIMIT: usize = 4096;

/// Longest incremental record accepted before the stream is abandoned.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HttpProviderConfig {
    pub endpoint: String,
    pub model: Option<String>,
    /// Name of the environment variable holding the bearer credential.
    pub api_key_env: Option<String>,
    /// Line-delimited incremental framing instead of a single response body.
    pub streaming: bool,
}

/// How each line of an incremental response body is turned into a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Plain,
    OllamaJson,
}

impl HttpProviderConfig {
    pub fn record_format(&self) -> RecordFormat {
        let endpoint = self.endpoint.to_ascii_lowercase();
        if endpoint.contains("ollama") || endpoint.contains("11434") {
            RecordFormat::OllamaJson
        } else {
            RecordFormat::Plain
        }
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.endpoint.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "http provider: endpoint is empty".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, config: HttpProviderConfig) -> Result<Self, ProviderError> {
        // No client timeout: the caller's cancellation scope bounds the request.
        let client = reqwest::Client::builder().build().map_err(|error| {
            ProviderError::Configuration(format!("failed to build HTTP client: {error}"))
        })?;

        Ok(Self {
            name: name.into(),
            client,
            config,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({ "prompt": prompt });
        if let Some(model) = self.config.model.as_deref().filter(|model| !model.is_empty()) {
            body["model"] = json!(model);
        }
        if self.config.streaming {
            body["stream"] = json!(true);
        }
        body
    }

    fn bearer_token(&self) -> Option<String> {
        let name = self.config.api_key_env.as_deref()?;
        env::var(name).ok().filter(|value| !value.is_empty())
    }

    async fn emit_whole_body(
        &self,
        scope: &CancellationToken,
        response: Response,
        emit: &mut dyn ChunkEmitter,
    ) -> Result<(), ProviderError> {
        let body = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(ProviderError::Cancelled),
            body = response.text() => body.map_err(|error| ProviderError::Transport(error.to_string()))?,
        };

        if scope.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if !body.is_empty() {
            emit.emit(body).await;
        }
        if scope.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(())
    }

    async fn emit_records(
        &self,
        scope: &CancellationToken,
        response: Response,
        emit: &mut dyn ChunkEmitter,
    ) -> Result<(), ProviderError> {
        let format = self.config.record_format();
        let records = body_records(response.bytes_stream(), MAX_RECORD_BYTES);
        tokio::pin!(records);
        let mut emitted = 0usize;

        loop {
            if scope.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(ProviderError::Cancelled),
                next = records.next() => next,
            };
            let Some(record) = next else {
                break;
            };
            let record = record.inspect_err(|error| {
                warn!(provider = %self.name, error = %error, "stream read error");
            })?;

            let record = record.trim();
            if record.is_empty() {
                continue;
            }

            let chunk = match format {
                RecordFormat::Plain => Some(record.to_owned()),
                RecordFormat::OllamaJson => parse_ollama_record(record),
            };
            if let Some(chunk) = chunk {
                emit.emit(chunk).await;
                emitted += 1;
            }
        }

        // The final chunk's write may have cancelled the scope after the last check.
        if scope.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        debug!(provider = %self.name, chunks = emitted, "upstream stream finished");
        Ok(())
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        scope: &CancellationToken,
        prompt: &str,
        emit: &mut dyn ChunkEmitter,
    ) -> Result<(), ProviderError> {
        self.config.validate()?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&self.request_body(prompt));
        if let Some(token) = self.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(ProviderError::Cancelled),
            sent = request.send() => sent.map_err(|error| ProviderError::Transport(error.to_string()))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(ProviderError::Cancelled),
                body = read_snippet(response, ERROR_BODY_LIMIT) => body,
            };
            return Err(ProviderError::UpstreamStatus { status, body });
        }

        if self.config.streaming {
            self.emit_records(scope, response, emit).await
        } else {
            self.emit_whole_body(scope, response, emit).await
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaRecord {
    #[serde(default)]
    response: String,
}

fn parse_ollama_record(record: &str) -> Option<String> {
    match serde_json::from_str::<OllamaRecord>(record) {
        Ok(parsed) if !parsed.response.is_empty() => Some(parsed.response),
        Ok(_) => None,
        Err(error) => {
            warn!(error = %error, "skipping malformed stream record");
            None
        }
    }
}

/// Splits a byte stream into newline-terminated records. A trailing record
/// without a final newline is still yielded at end of body. A record longer
/// than `max_record_bytes` ends the stream with an error.
fn body_records<S, B, E>(
    upstream: S,
    max_record_bytes: usize,
) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut upstream = std::pin::pin!(upstream);
        let mut pending: Vec<u8> = Vec::new();
        // Bytes of `pending` already known to hold no newline.
        let mut scanned = 0usize;

        while let Some(next) = upstream.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(error) => {
                    yield Err(ProviderError::Transport(error.to_string()));
                    return;
                }
            };

            pending.extend_from_slice(bytes.as_ref());
            while let Some(offset) = pending[scanned..].iter().position(|byte| *byte == b'\n') {
                let line = pending.drain(..=scanned + offset).collect::<Vec<u8>>();
                scanned = 0;
                yield Ok(String::from_utf8_lossy(&line).into_owned());
            }
            scanned = pending.len();

            if pending.len() > max_record_bytes {
                yield Err(ProviderError::Transport(format!(
                    "stream record exceeds {max_record_bytes} bytes"
                )));
                return;
            }
        }

        if !pending.is_empty() {
            yield Ok(String::from_utf8_lossy(&pending).into_owned());
        }
    }
}

/// Reads at most `limit` bytes of a response body for error reporting.
pub(crate) async fn read_snippet(response: Response, limit: usize) -> String {
    let mut body = Vec::new();
    let mut upstream = response.bytes_stream();
    while let Some(next) = upstream.next().await {
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(error = %error, read = body.len(), "error body truncated by read failure");
                break;
            }
        };
        let remaining = limit.saturating_sub(body.len());
        body.extend_from_slice(&bytes[..bytes.len().min(remaining)]);
        if body.len() >= limit {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
