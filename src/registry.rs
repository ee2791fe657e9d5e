use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::debug;

use crate::provider::{mock::MockProvider, Provider};

pub const FALLBACK_PROVIDER: &str = "mock";

/// Maps provider names to shared provider instances.
///
/// Always holds a `mock` entry; resolution of an empty or unknown name lands
/// there, so [`ProviderRegistry::resolve`] never comes back empty-handed.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    fallback: Arc<dyn Provider>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_fallback(Arc::new(MockProvider::default()))
    }
}

impl ProviderRegistry {
    pub fn with_fallback(fallback: Arc<dyn Provider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert(FALLBACK_PROVIDER.to_owned(), fallback.clone());
        Self {
            providers: RwLock::new(providers),
            fallback,
        }
    }

    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        debug!(name = %name, provider = provider.name(), "provider registered");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, provider);
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn Provider> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let name = if name.is_empty() { FALLBACK_PROVIDER } else { name };

        providers
            .get(name)
            .or_else(|| providers.get(FALLBACK_PROVIDER))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
