use indexmap::IndexMap;
use rusqlite::params;

use super::Database;
use crate::error::AppError;
use crate::provider::ProviderConfig;

impl Database {
    /// All providers in insertion order.
    pub fn get_all_providers(&self) -> Result<Vec<ProviderConfig>, AppError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, base_url, api_key, model_map
             FROM providers ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut providers = Vec::new();
        for row in rows {
            let (id, name, base_url, api_key, model_map) = row?;
            let model_map: IndexMap<String, String> = serde_json::from_str(&model_map)
                .map_err(|e| AppError::Database(format!("provider {id}: bad model_map: {e}")))?;
            providers.push(ProviderConfig {
                id,
                name,
                base_url,
                api_key,
                model_map,
            });
        }
        Ok(providers)
    }

    pub fn save_provider(&self, provider: &ProviderConfig) -> Result<(), AppError> {
        let model_map = serde_json::to_string(&provider.model_map)
            .map_err(|e| AppError::Database(format!("serialize model_map: {e}")))?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO providers (id, name, base_url, api_key, model_map, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                api_key = excluded.api_key,
                model_map = excluded.model_map",
            params![
                provider.id,
                provider.name,
                provider.base_url,
                provider.api_key,
                model_map,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Returns whether a row was deleted.
    pub fn delete_provider(&self, id: &str) -> Result<bool, AppError> {
        let conn = self.lock_conn();
        let n = conn.execute("DELETE FROM providers WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}
