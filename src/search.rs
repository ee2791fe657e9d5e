use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::http::{read_snippet, ERROR_BODY_LIMIT};

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>, SearchError>;
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search transport error: {0}")]
    Transport(String),
    #[error("search returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("search response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default)]
pub struct MockWebSearcher;

#[async_trait]
impl WebSearcher for MockWebSearcher {
    async fn search(&self, query: &str) -> Result<Vec<String>, SearchError> {
        Ok(vec![format!("This is a mock search result for: {query}")])
    }
}

/// DuckDuckGo Instant Answer API; no key required.
#[derive(Clone)]
pub struct DuckDuckGoSearcher {
    client: reqwest::Client,
    base_url: String,
}

impl DuckDuckGoSearcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| SearchError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

#[async_trait]
impl WebSearcher for DuckDuckGoSearcher {
    async fn search(&self, query: &str) -> Result<Vec<String>, SearchError> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ])
            .send()
            .await
            .map_err(|error| SearchError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_snippet(response, ERROR_BODY_LIMIT).await;
            return Err(SearchError::Status { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|error| SearchError::Transport(error.to_string()))?;

        let answer: InstantAnswer =
            serde_json::from_str(&body).map_err(|error| SearchError::Decode(error.to_string()))?;
        Ok(summarize(answer))
    }
}

fn summarize(answer: InstantAnswer) -> Vec<String> {
    let mut results = Vec::new();
    if !answer.abstract_text.is_empty() {
        results.push(format!("{} ({})", answer.abstract_text, answer.abstract_url));
    }
    results.extend(
        answer
            .related_topics
            .into_iter()
            .filter(|topic| !topic.text.is_empty() && !topic.first_url.is_empty())
            .map(|topic| format!("{} ({})", topic.text, topic.first_url)),
    );
    if results.is_empty() {
        results.push("No results found.".to_owned());
    }
    results
}

/// Named web searchers with the same mock fallback rule as providers.
pub struct SearchRegistry {
    searchers: RwLock<HashMap<String, Arc<dyn WebSearcher>>>,
}

impl Default for SearchRegistry {
    fn default() -> Self {
        let registry = Self {
            searchers: RwLock::new(HashMap::new()),
        };
        registry.register("mock", Arc::new(MockWebSearcher));
        registry
    }
}

impl SearchRegistry {
    pub fn register(&self, name: impl Into<String>, searcher: Arc<dyn WebSearcher>) {
        self.searchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), searcher);
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn WebSearcher> {
        self.searchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(if name.is_empty() { "mock" } else { name })
            .cloned()
            .unwrap_or_else(|| Arc::new(MockWebSearcher))
    }

    pub async fn search(&self, provider: &str, query: &str) -> Result<Vec<String>, SearchError> {
        let searcher = self.resolve(provider);
        searcher.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::{summarize, InstantAnswer, SearchRegistry};

    #[tokio::test]
    async fn unknown_searcher_falls_back_to_mock() {
        let registry = SearchRegistry::default();
        let results = registry
            .search("nonexistent", "rust")
            .await
            .expect("mock search should succeed");

        assert_eq!(results, vec!["This is a mock search result for: rust"]);
    }

    #[test]
    fn instant_answer_lists_abstract_before_topics() {
        let answer: InstantAnswer = serde_json::from_value(serde_json::json!({
            "AbstractText": "Rust is a language",
            "AbstractURL": "https://example.com/rust",
            "RelatedTopics": [
                {"Text": "Cargo", "FirstURL": "https://example.com/cargo"},
                {"Text": "", "FirstURL": "https://example.com/empty"},
                {"Name": "grouped topic without text"}
            ]
        }))
        .expect("fixture should decode");

        assert_eq!(
            summarize(answer),
            vec![
                "Rust is a language (https://example.com/rust)",
                "Cargo (https://example.com/cargo)",
            ]
        );
    }

    #[test]
    fn empty_answer_reports_no_results() {
        let answer: InstantAnswer =
            serde_json::from_str("{}").expect("empty object should decode");
        assert_eq!(summarize(answer), vec!["No results found."]);
    }
}
