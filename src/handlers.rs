use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{errors::AppError, relay, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    /// Provider used for every prompt of the session; empty or unknown means mock.
    #[serde(default)]
    pub provider: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<String>,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn relay_socket(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let provider = params.provider;
    upgrade
        .on_failed_upgrade(|error| warn!(error = %error, "websocket upgrade failed"))
        .on_upgrade(move |mut socket| async move {
            if let Err(error) = relay::run_session(&mut socket, &provider, &state).await {
                debug!(error = %error, "relay session ended with connection error");
            }
        })
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest(
            "query parameter `q` is required".to_owned(),
        ));
    }

    let results = state
        .searchers
        .search(&params.provider, query)
        .await
        .map_err(|error| {
            warn!(provider = %params.provider, error = %error, "web search failed");
            AppError::Upstream(error.to_string())
        })?;

    Ok(Json(SearchResponse { results }))
}
