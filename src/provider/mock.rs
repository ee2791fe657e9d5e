use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{ChunkEmitter, Provider, ProviderError};

pub const CANNED_REPLY: [&str; 3] = [
    "Hello,",
    "this is a mock AI reply.",
    "Replace with a real provider.",
];

const WINDOW_WORDS: usize = 6;

#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    reply_delay: Duration,
    window_delay: Duration,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            name: "mock".to_owned(),
            reply_delay: Duration::from_millis(250),
            window_delay: Duration::from_millis(200),
        }
    }
}

impl MockProvider {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_delays(mut self, reply_delay: Duration, window_delay: Duration) -> Self {
        self.reply_delay = reply_delay;
        self.window_delay = window_delay;
        self
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        scope: &CancellationToken,
        prompt: &str,
        emit: &mut dyn ChunkEmitter,
    ) -> Result<(), ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::EmptyPrompt);
        }

        let words = prompt.split_whitespace().collect::<Vec<_>>();
        let (chunks, delay) = if words.len() < WINDOW_WORDS {
            let canned = CANNED_REPLY
                .iter()
                .map(|reply| (*reply).to_owned())
                .collect::<Vec<_>>();
            (canned, self.reply_delay)
        } else {
            (split_into_windows(&words), self.window_delay)
        };

        debug!(provider = %self.name, chunks = chunks.len(), "mock stream prepared");
        for chunk in chunks {
            if scope.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            emit.emit(chunk).await;
            sleep(delay).await;
        }

        // A failed write of the last chunk cancels the scope after the final check.
        if scope.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(())
    }
}

fn split_into_windows(words: &[&str]) -> Vec<String> {
    words
        .chunks(WINDOW_WORDS)
        .map(|window| window.join(" "))
        .collect()
}
