use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::AppError;

/// An upstream provider the proxy can forward to.
///
/// Records are shared as `Arc<ProviderConfig>` and never mutated in place:
/// an update swaps in a new `Arc`, so a request that already resolved its
/// provider keeps a consistent host/key pair.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// Client-facing model name -> upstream model name.
    #[serde(default)]
    pub model_map: IndexMap<String, String>,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidInput("provider id is empty".into()));
        }
        let url = Url::parse(&self.base_url).map_err(|e| {
            AppError::InvalidInput(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(AppError::InvalidInput(format!(
                "base_url must be an absolute http(s) URL: {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn map_model(&self, model: &str) -> Option<&str> {
        self.model_map.get(model).map(String::as_str)
    }

    /// Host part of `base_url`, safe to log.
    pub fn host(&self) -> String {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("model_map", &self.model_map)
            .finish()
    }
}
