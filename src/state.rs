use std::sync::Arc;

use crate::{
    metrics::RelayMetrics,
    registry::ProviderRegistry,
    search::SearchRegistry,
    speech::{SilentSpeaker, SpeechSink},
};

#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<ProviderRegistry>,
    pub searchers: Arc<SearchRegistry>,
    pub speech: Arc<dyn SpeechSink>,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        searchers: Arc<SearchRegistry>,
        speech: Arc<dyn SpeechSink>,
    ) -> Self {
        Self {
            providers,
            searchers,
            speech,
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    pub fn new_for_tests(providers: Arc<ProviderRegistry>) -> Self {
        Self::new(
            providers,
            Arc::new(SearchRegistry::default()),
            Arc::new(SilentSpeaker),
        )
    }
}
