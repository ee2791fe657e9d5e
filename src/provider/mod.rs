pub mod http;
pub mod mock;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Receives generated text one fragment at a time, in generation order.
#[async_trait]
pub trait ChunkEmitter: Send {
    async fn emit(&mut self, chunk: String);
}

/// Collects chunks in memory. Handy for one-shot callers and tests.
#[async_trait]
impl ChunkEmitter for Vec<String> {
    async fn emit(&mut self, chunk: String) {
        self.push(chunk);
    }
}

/// A text-generation backend that streams its answer through a [`ChunkEmitter`].
///
/// Implementations must check `scope` before every emission and stop emitting
/// once it is cancelled, returning [`ProviderError::Cancelled`]. Neither the
/// scope nor the emitter may be retained past the call.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn stream(
        &self,
        scope: &CancellationToken,
        prompt: &str,
        emit: &mut dyn ChunkEmitter,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider misconfigured: {0}")]
    Configuration(String),
    #[error("empty prompt")]
    EmptyPrompt,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },
    #[error("stream cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::EmptyPrompt => "empty_prompt",
            Self::Transport(_) => "transport",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::Cancelled => "cancelled",
        }
    }
}
