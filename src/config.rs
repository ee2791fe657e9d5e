use std::{env, net::SocketAddr};

use crate::provider::http::HttpProviderConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434/api/generate";
const DEFAULT_OLLAMA_MODEL: &str = "llama3";
const DEFAULT_SEARCH_BASE_URL: &str = "https://api.duckduckgo.com";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub ollama: HttpProviderConfig,
    /// Generic POST backend, registered as `http` only when an endpoint is set.
    pub http: Option<HttpProviderConfig>,
    pub speech: SpeechConfig,
    pub search_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub command: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, String> {
        let bind_addr = read_string("RELAY_BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|error| format!("invalid RELAY_BIND_ADDR {bind_addr:?}: {error}"))?;

        let ollama = HttpProviderConfig {
            endpoint: read_string("OLLAMA_ENDPOINT", DEFAULT_OLLAMA_ENDPOINT),
            model: Some(read_string("OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL)),
            api_key_env: Some("OLLAMA_API_KEY".to_owned()),
            streaming: true,
        };

        let http = read_optional("RELAY_HTTP_ENDPOINT").map(|endpoint| HttpProviderConfig {
            endpoint,
            model: read_optional("RELAY_HTTP_MODEL"),
            api_key_env: read_optional("RELAY_HTTP_API_KEY_ENV"),
            streaming: read_bool("RELAY_HTTP_STREAM", false),
        });

        Ok(Self {
            bind_addr,
            ollama,
            http,
            speech: SpeechConfig {
                enabled: read_bool("RELAY_SPEECH_ENABLED", false),
                command: read_string("RELAY_SPEECH_COMMAND", "espeak"),
            },
            search_base_url: read_string("RELAY_SEARCH_BASE_URL", DEFAULT_SEARCH_BASE_URL)
                .trim_end_matches('/')
                .to_owned(),
        })
    }
}

fn read_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_string(name: &str, default: &str) -> String {
    read_optional(name).unwrap_or_else(|| default.to_owned())
}

fn read_bool(name: &str, default: bool) -> bool {
    match read_optional(name).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::read_bool;

    #[test]
    fn bool_flags_accept_common_spellings() {
        std::env::set_var("STREAM_RELAY_TEST_FLAG", "yes");
        assert!(read_bool("STREAM_RELAY_TEST_FLAG", false));

        std::env::set_var("STREAM_RELAY_TEST_FLAG", "off");
        assert!(!read_bool("STREAM_RELAY_TEST_FLAG", true));

        std::env::set_var("STREAM_RELAY_TEST_FLAG", "maybe");
        assert!(read_bool("STREAM_RELAY_TEST_FLAG", true));
        std::env::remove_var("STREAM_RELAY_TEST_FLAG");
    }
}
