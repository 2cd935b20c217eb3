use std::sync::Arc;

use crate::database::Database;
use crate::error::AppError;
use crate::services::{ProviderService, ProxyService, UsageStatsService};
use crate::settings::RelaySettings;

/// Engine state shared by every command handler.
pub struct AppState {
    pub db: Arc<Database>,
    pub settings: RelaySettings,
    pub providers: Arc<ProviderService>,
    pub usage: Arc<UsageStatsService>,
    pub proxy_service: ProxyService,
}

impl AppState {
    /// Opens `<data_dir>/cc-relay.db` and wires the services together.
    pub fn new(settings: RelaySettings) -> Result<Self, AppError> {
        let db = Arc::new(Database::open(&settings.db_path())?);
        Self::with_database(settings, db)
    }

    pub fn with_database(settings: RelaySettings, db: Arc<Database>) -> Result<Self, AppError> {
        let providers = Arc::new(ProviderService::new(db.clone())?);
        let usage = Arc::new(UsageStatsService::new(db.clone())?);
        let proxy_service =
            ProxyService::new(settings.clone(), db.clone(), providers.clone(), usage.clone())?;
        Ok(Self {
            db,
            settings,
            providers,
            usage,
            proxy_service,
        })
    }
}
