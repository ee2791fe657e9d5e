use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SpeechConfig;

/// Best-effort local playback of relayed text.
///
/// `speak` must return immediately; any work happens on a detached task and
/// its failures never reach the caller.
pub trait SpeechSink: Send + Sync {
    fn speak(&self, text: &str);
}

#[derive(Debug, Clone, Default)]
pub struct SilentSpeaker;

impl SpeechSink for SilentSpeaker {
    fn speak(&self, _text: &str) {}
}

/// Runs `<command> <text>` per chunk, e.g. `espeak`.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    command: String,
}

impl CommandSpeaker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl SpeechSink for CommandSpeaker {
    fn speak(&self, text: &str) {
        let command = self.command.clone();
        let text = text.to_owned();
        tokio::spawn(async move {
            match Command::new(&command).arg(&text).status().await {
                Ok(status) if status.success() => debug!(command = %command, "speech played"),
                Ok(status) => warn!(command = %command, %status, text = %text, "speech command failed"),
                Err(error) => {
                    warn!(command = %command, error = %error, text = %text, "speech command unavailable")
                }
            }
        });
    }
}

pub fn from_config(config: &SpeechConfig) -> Arc<dyn SpeechSink> {
    if config.enabled {
        Arc::new(CommandSpeaker::new(config.command.clone()))
    } else {
        Arc::new(SilentSpeaker)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandSpeaker, SpeechSink};

    #[tokio::test]
    async fn missing_speech_command_is_swallowed() {
        let speaker = CommandSpeaker::new("stream-relay-no-such-speech-binary");
        speaker.speak("hello");
        tokio::task::yield_now().await;
    }
}
