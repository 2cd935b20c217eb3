//! Provider registry.
//!
//! Records are held as `Arc<ProviderConfig>` and never mutated in place:
//! `upsert` swaps in a fresh `Arc`, so a request that already picked up a
//! provider keeps a consistent host/key pair for its whole lifetime.

use indexmap::IndexMap;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::database::Database;
use crate::error::AppError;
use crate::provider::ProviderConfig;
use crate::proxy::ProxyError;

const DEFAULT_PROVIDER_KEY: &str = "default_provider_id";
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub provider_id: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub message: String,
}

pub struct ProviderService {
    db: Arc<Database>,
    providers: RwLock<IndexMap<String, Arc<ProviderConfig>>>,
}

impl ProviderService {
    pub fn new(db: Arc<Database>) -> Result<Self, AppError> {
        let providers = db
            .get_all_providers()?
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();
        Ok(Self {
            db,
            providers: RwLock::new(providers),
        })
    }

    pub fn list(&self) -> Vec<Arc<ProviderConfig>> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProviderConfig>> {
        self.read().get(id).cloned()
    }

    /// Looks up `id` or fails with `UnknownProvider`.
    pub fn require(&self, id: &str) -> Result<Arc<ProviderConfig>, ProxyError> {
        self.get(id)
            .ok_or_else(|| ProxyError::UnknownProvider(id.to_string()))
    }

    pub fn upsert(&self, provider: ProviderConfig) -> Result<Arc<ProviderConfig>, AppError> {
        provider.validate()?;
        self.db.save_provider(&provider)?;

        let provider = Arc::new(provider);
        let mut providers = self.write();
        let created = providers
            .insert(provider.id.clone(), provider.clone())
            .is_none();
        log::info!(
            "[Provider] {} {} ({})",
            if created { "新增" } else { "更新" },
            provider.id,
            provider.host()
        );
        Ok(provider)
    }

    /// Returns whether a provider was removed. Removing the default clears it.
    pub fn remove(&self, id: &str) -> Result<bool, AppError> {
        let removed = self.db.delete_provider(id)?;
        self.write().shift_remove(id);
        if self.default_provider_id()?.as_deref() == Some(id) {
            self.db.set_setting(DEFAULT_PROVIDER_KEY, None)?;
        }
        if removed {
            log::info!("[Provider] 已删除 {id}");
        }
        Ok(removed)
    }

    pub fn default_provider_id(&self) -> Result<Option<String>, AppError> {
        self.db.get_setting(DEFAULT_PROVIDER_KEY)
    }

    /// The persisted default, if it still names a registered provider.
    pub fn default_provider(&self) -> Result<Option<Arc<ProviderConfig>>, AppError> {
        Ok(self.default_provider_id()?.and_then(|id| self.get(&id)))
    }

    pub fn set_default_provider(&self, id: &str) -> Result<(), ProxyError> {
        self.require(id)?;
        self.db.set_setting(DEFAULT_PROVIDER_KEY, Some(id))?;
        log::info!("[Provider] 默认供应商: {id}");
        Ok(())
    }

    /// Sends `GET {base_url}/v1/models` with the provider's key.
    ///
    /// Any 2xx or 4xx answer means the endpoint is reachable (auth and rate
    /// limit errors included); 5xx and transport failures do not.
    pub async fn test_connection(&self, id: &str) -> Result<ConnectionTestResult, ProxyError> {
        let provider = self.require(id)?;
        let client = reqwest::Client::builder()
            .timeout(CONNECTION_TEST_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| AppError::Message(format!("failed to build HTTP client: {e}")))?;

        let base = provider.base_url.trim_end_matches('/');
        let url = if base.ends_with("/v1") {
            format!("{base}/models")
        } else {
            format!("{base}/v1/models")
        };

        let started = Instant::now();
        let response = client
            .get(&url)
            .header("x-api-key", &provider.api_key)
            .header("anthropic-version", "2023-06-01")
            .bearer_auth(&provider.api_key)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match response {
            Ok(resp) => {
                let status = resp.status();
                let reachable = status.is_success() || status.is_client_error();
                ConnectionTestResult {
                    provider_id: provider.id.clone(),
                    reachable,
                    status: Some(status.as_u16()),
                    latency_ms,
                    message: status.to_string(),
                }
            }
            Err(e) => ConnectionTestResult {
                provider_id: provider.id.clone(),
                reachable: false,
                status: None,
                latency_ms,
                message: ProxyError::from_reqwest(e).to_string(),
            },
        };

        if result.reachable {
            log::info!("[Provider] {} 连接测试通过: {}", provider.id, result.message);
        } else {
            log::warn!("[Provider] {} 连接测试失败: {}", provider.id, result.message);
        }
        Ok(result)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<ProviderConfig>>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<ProviderConfig>>> {
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
