//! Per-connection relay loop.
//!
//! Each session reads one prompt at a time, streams it through the session's
//! provider and forwards every chunk to the client as it arrives. A cycle
//! always ends with [`END_MARKER`], preceded by an [`ERROR_PREFIX`] message
//! when the provider failed. Only connection failures end the session.

use std::time::Instant;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::ConnectionError,
    provider::ChunkEmitter,
    speech::SpeechSink,
    state::AppState,
};

pub const END_MARKER: &str = "__end__";
pub const ERROR_PREFIX: &str = "__error__: ";

/// The client side of a session: a source of prompts and a sink for text.
#[async_trait]
pub trait RelayTransport: Send {
    /// Next prompt from the client, or `None` once the client has closed.
    async fn next_prompt(&mut self) -> Option<Result<String, ConnectionError>>;
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;
}

#[async_trait]
impl RelayTransport for WebSocket {
    async fn next_prompt(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            let message = match self.recv().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(ConnectionError::Read(error.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.send(Message::Text(text))
            .await
            .map_err(|error| ConnectionError::Write(error.to_string()))
    }
}

/// Runs prompt cycles until the client closes (`Ok`) or the connection fails.
pub async fn run_session<T: RelayTransport>(
    transport: &mut T,
    provider_name: &str,
    state: &AppState,
) -> Result<(), ConnectionError> {
    let session_id = Uuid::new_v4();
    let _session = state.metrics.session_guard();
    info!(%session_id, provider = provider_name, "relay session opened");

    loop {
        let prompt = match transport.next_prompt().await {
            Some(Ok(prompt)) => prompt,
            Some(Err(error)) => {
                warn!(%session_id, error = %error, "relay session read failed");
                return Err(error);
            }
            None => {
                info!(%session_id, "relay session closed by client");
                return Ok(());
            }
        };

        run_cycle(transport, provider_name, &prompt, state, session_id).await?;
    }
}

async fn run_cycle<T: RelayTransport>(
    transport: &mut T,
    provider_name: &str,
    prompt: &str,
    state: &AppState,
    session_id: Uuid,
) -> Result<(), ConnectionError> {
    let started = Instant::now();
    let scope = CancellationToken::new();
    let provider = state.providers.resolve(provider_name);
    debug!(
        %session_id,
        provider = provider.name(),
        prompt_bytes = prompt.len(),
        "prompt received"
    );

    let mut emitter = ForwardingEmitter {
        transport: &mut *transport,
        scope: scope.clone(),
        speech: state.speech.as_ref(),
        session_id,
        forwarded: 0,
        write_failed: false,
    };
    let outcome = provider.stream(&scope, prompt, &mut emitter).await;
    let forwarded = emitter.forwarded;
    state.metrics.observe_chunks(provider.name(), forwarded);

    match outcome {
        Ok(()) => {
            state
                .metrics
                .observe_cycle(provider.name(), "ok", started.elapsed());
            debug!(%session_id, provider = provider.name(), chunks = forwarded, "prompt cycle completed");
        }
        Err(error) => {
            state
                .metrics
                .observe_cycle(provider.name(), error.kind(), started.elapsed());
            warn!(
                %session_id,
                provider = provider.name(),
                chunks = forwarded,
                error = %error,
                "provider stream failed"
            );
            if let Err(write_error) = transport.send_text(format!("{ERROR_PREFIX}{error}")).await {
                warn!(%session_id, error = %write_error, "error sentinel write failed");
            }
            scope.cancel();
        }
    }

    transport
        .send_text(END_MARKER.to_owned())
        .await
        .inspect_err(|error| warn!(%session_id, error = %error, "end marker write failed"))
}

/// Writes each chunk to the client and cancels the cycle on the first failed write.
struct ForwardingEmitter<'a, T> {
    transport: &'a mut T,
    scope: CancellationToken,
    speech: &'a dyn SpeechSink,
    session_id: Uuid,
    forwarded: usize,
    write_failed: bool,
}

#[async_trait]
impl<'a, T: RelayTransport> ChunkEmitter for ForwardingEmitter<'a, T> {
    async fn emit(&mut self, chunk: String) {
        if self.write_failed || self.scope.is_cancelled() {
            return;
        }

        match self.transport.send_text(chunk.clone()).await {
            Ok(()) => {
                self.forwarded += 1;
                self.speech.speak(&chunk);
            }
            Err(error) => {
                warn!(session_id = %self.session_id, error = %error, "chunk write failed, cancelling stream");
                self.write_failed = true;
                self.scope.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{run_session, RelayTransport, END_MARKER};
    use crate::{
        errors::ConnectionError,
        metrics::RelayMetrics,
        provider::{
            mock::{MockProvider, CANNED_REPLY},
            ChunkEmitter, Provider, ProviderError,
        },
        registry::ProviderRegistry,
        search::SearchRegistry,
        speech::SpeechSink,
        state::AppState,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        inbound: VecDeque<Result<String, ConnectionError>>,
        sent: Vec<String>,
        attempts: usize,
        failing_writes: Vec<usize>,
    }

    impl ScriptedTransport {
        fn with_prompts(prompts: &[&str]) -> Self {
            Self {
                inbound: prompts.iter().map(|prompt| Ok((*prompt).to_owned())).collect(),
                ..Self::default()
            }
        }

        fn failing_on(mut self, attempts: &[usize]) -> Self {
            self.failing_writes = attempts.to_vec();
            self
        }
    }

    #[async_trait]
    impl RelayTransport for ScriptedTransport {
        async fn next_prompt(&mut self) -> Option<Result<String, ConnectionError>> {
            self.inbound.pop_front()
        }

        async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.failing_writes.contains(&attempt) {
                return Err(ConnectionError::Write("broken pipe".to_owned()));
            }
            self.sent.push(text);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSpeaker {
        spoken: Mutex<Vec<String>>,
    }

    impl SpeechSink for RecordingSpeaker {
        fn speak(&self, text: &str) {
            self.spoken
                .lock()
                .expect("speaker lock")
                .push(text.to_owned());
        }
    }

    /// Emits one chunk, then fails like a dropped upstream connection.
    struct FlakyProvider;

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn stream(
            &self,
            _scope: &CancellationToken,
            _prompt: &str,
            emit: &mut dyn ChunkEmitter,
        ) -> Result<(), ProviderError> {
            emit.emit("partial".to_owned()).await;
            Err(ProviderError::Transport("connection reset".to_owned()))
        }
    }

    fn test_state() -> AppState {
        let fast = MockProvider::default().with_delays(Duration::ZERO, Duration::ZERO);
        let registry = ProviderRegistry::with_fallback(Arc::new(fast));
        registry.register("flaky", Arc::new(FlakyProvider));
        AppState::new_for_tests(Arc::new(registry))
    }

    fn canned_cycle() -> Vec<String> {
        CANNED_REPLY
            .iter()
            .map(|reply| (*reply).to_owned())
            .chain([END_MARKER.to_owned()])
            .collect()
    }

    #[tokio::test]
    async fn each_prompt_cycle_ends_with_end_marker() {
        let state = test_state();
        let mut transport = ScriptedTransport::with_prompts(&["hello there friend", "again"]);

        run_session(&mut transport, "", &state)
            .await
            .expect("session should close cleanly");

        let expected = [canned_cycle(), canned_cycle()].concat();
        assert_eq!(transport.sent, expected);
    }

    #[tokio::test]
    async fn provider_failure_reports_error_then_end_marker() {
        let state = test_state();
        let mut transport = ScriptedTransport::with_prompts(&["   ", "hello"]);

        run_session(&mut transport, "mock", &state)
            .await
            .expect("provider failure must not end the session");

        let mut expected = vec!["__error__: empty prompt".to_owned(), END_MARKER.to_owned()];
        expected.extend(canned_cycle());
        assert_eq!(transport.sent, expected);
    }

    #[tokio::test]
    async fn upstream_failure_keeps_chunks_already_sent() {
        let state = test_state();
        let mut transport = ScriptedTransport::with_prompts(&["anything"]);

        run_session(&mut transport, "flaky", &state)
            .await
            .expect("session should close cleanly");

        assert_eq!(
            transport.sent,
            vec![
                "partial",
                "__error__: upstream transport error: connection reset",
                END_MARKER,
            ]
        );
    }

    #[tokio::test]
    async fn chunk_write_failure_cancels_the_cycle() {
        let state = test_state();
        let prompt = "one two three four five six seven eight nine ten eleven twelve thirteen";
        let mut transport = ScriptedTransport::with_prompts(&[prompt]).failing_on(&[1]);

        run_session(&mut transport, "", &state)
            .await
            .expect("a failed chunk write is reported, not fatal");

        assert_eq!(
            transport.sent,
            vec![
                "one two three four five six",
                "__error__: stream cancelled",
                END_MARKER,
            ]
        );
    }

    #[tokio::test]
    async fn last_chunk_write_failure_reports_cancellation() {
        let state = test_state();
        let mut transport = ScriptedTransport::with_prompts(&["hi"]).failing_on(&[2]);

        run_session(&mut transport, "", &state)
            .await
            .expect("a failed chunk write is reported, not fatal");

        assert_eq!(
            transport.sent,
            vec![
                CANNED_REPLY[0],
                CANNED_REPLY[1],
                "__error__: stream cancelled",
                END_MARKER,
            ]
        );
        let rendered = state.metrics.render().expect("metrics should render");
        assert!(rendered.contains(r#"outcome="cancelled""#));
        assert!(!rendered.contains(r#"outcome="ok""#));
    }

    #[tokio::test]
    async fn end_marker_write_failure_closes_the_session() {
        let state = test_state();
        let mut transport =
            ScriptedTransport::with_prompts(&["hello", "never served"]).failing_on(&[3]);

        let error = run_session(&mut transport, "", &state)
            .await
            .expect_err("end marker failure should end the session");

        assert!(matches!(error, ConnectionError::Write(_)));
        assert_eq!(transport.sent, CANNED_REPLY);
        assert_eq!(transport.inbound.len(), 1);
    }

    #[tokio::test]
    async fn read_failure_ends_the_session() {
        let state = test_state();
        let mut transport = ScriptedTransport::default();
        transport
            .inbound
            .push_back(Err(ConnectionError::Read("reset by peer".to_owned())));

        let error = run_session(&mut transport, "", &state)
            .await
            .expect_err("read failure should end the session");

        assert!(matches!(error, ConnectionError::Read(_)));
        assert!(transport.sent.is_empty());
        assert_eq!(state.metrics.active_sessions(), 0);
    }

    #[tokio::test]
    async fn forwarded_chunks_are_spoken() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let fast = MockProvider::default().with_delays(Duration::ZERO, Duration::ZERO);
        let state = AppState {
            providers: Arc::new(ProviderRegistry::with_fallback(Arc::new(fast))),
            searchers: Arc::new(SearchRegistry::default()),
            speech: speaker.clone(),
            metrics: Arc::new(RelayMetrics::new()),
        };
        let mut transport = ScriptedTransport::with_prompts(&["hi"]).failing_on(&[1]);

        run_session(&mut transport, "", &state)
            .await
            .expect("session should close cleanly");

        let spoken = speaker.spoken.lock().expect("speaker lock").clone();
        assert_eq!(spoken, vec![CANNED_REPLY[0]]);
    }
}
