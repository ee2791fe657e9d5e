pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod search;
pub mod speech;
pub mod state;

use std::sync::Arc;

use axum::{routing::get, Router};
use config::RelayConfig;
use provider::http::HttpProvider;
use registry::ProviderRegistry;
use search::{DuckDuckGoSearcher, SearchRegistry};
use tracing::info;

pub fn build_state(config: &RelayConfig) -> Result<state::AppState, std::io::Error> {
    let providers = ProviderRegistry::default();
    let ollama = HttpProvider::new("ollama", config.ollama.clone()).map_err(std::io::Error::other)?;
    providers.register("ollama", Arc::new(ollama));
    if let Some(http_config) = &config.http {
        let http = HttpProvider::new("http", http_config.clone()).map_err(std::io::Error::other)?;
        providers.register("http", Arc::new(http));
    }

    let searchers = SearchRegistry::default();
    let duckduckgo =
        DuckDuckGoSearcher::new(config.search_base_url.clone()).map_err(std::io::Error::other)?;
    searchers.register("duckduckgo", Arc::new(duckduckgo));

    info!(
        providers = %providers.names().join(","),
        ollama_endpoint = %config.ollama.endpoint,
        speech = config.speech.enabled,
        "provider registry configured"
    );
    Ok(state::AppState::new(
        Arc::new(providers),
        Arc::new(searchers),
        speech::from_config(&config.speech),
    ))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/search", get(handlers::search))
        .route("/ws/ai", get(handlers::relay_socket))
        .with_state(state)
}
