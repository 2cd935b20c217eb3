//! Current-upstream selection.
//!
//! The proxy resolves its target once per request through `snapshot()`. Mode
//! and provider live behind one lock and are replaced together, so a request
//! sees either the old pair or the new one, never a mix.

use std::sync::{Arc, RwLock};

use super::types::ProxyMode;
use crate::provider::ProviderConfig;

#[derive(Debug, Clone, Default)]
pub struct RouteTarget {
    pub mode: ProxyMode,
    pub provider: Option<Arc<ProviderConfig>>,
}

#[derive(Debug, Default)]
pub struct ProviderRouter {
    current: RwLock<RouteTarget>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RouteTarget {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn set(&self, mode: ProxyMode, provider: Option<Arc<ProviderConfig>>) {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        *current = RouteTarget { mode, provider };
    }

    /// Swaps only the provider, keeping the mode.
    pub(crate) fn set_provider(
        &self,
        provider: Arc<ProviderConfig>,
    ) -> Option<Arc<ProviderConfig>> {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        current.provider.replace(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn provider(id: &str) -> Arc<ProviderConfig> {
        Arc::new(ProviderConfig {
            id: id.into(),
            name: id.into(),
            base_url: format!("https://{id}.example.com"),
            api_key: format!("key-{id}"),
            model_map: IndexMap::new(),
        })
    }

    #[test]
    fn snapshot_taken_before_swap_keeps_old_provider() {
        let router = ProviderRouter::new();
        router.set(ProxyMode::TakeoverActive, Some(provider("a")));

        let before = router.snapshot();
        let previous = router.set_provider(provider("b"));
        let after = router.snapshot();

        assert_eq!(previous.unwrap().id, "a");
        let old = before.provider.unwrap();
        assert_eq!(
            (old.base_url.as_str(), old.api_key.as_str()),
            ("https://a.example.com", "key-a")
        );
        let new = after.provider.unwrap();
        assert_eq!(
            (new.base_url.as_str(), new.api_key.as_str()),
            ("https://b.example.com", "key-b")
        );
        assert_eq!(after.mode, ProxyMode::TakeoverActive);
    }
}
