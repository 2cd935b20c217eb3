use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use super::Database;
use crate::app_config::AppType;
use crate::error::AppError;
use crate::live_config::{CapturedFile, LiveConfigSnapshot};

impl Database {
    /// Persists a snapshot before its first takeover write.
    ///
    /// Plain `INSERT`: a leftover backup for the same tool makes this fail
    /// instead of overwriting the only copy of the original config.
    pub fn save_live_backup(&self, snapshot: &LiveConfigSnapshot) -> Result<(), AppError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        for file in &snapshot.files {
            tx.execute(
                "INSERT INTO proxy_live_backup (app_type, file_path, original, captured_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.app.as_str(),
                    file.path.to_string_lossy(),
                    file.original,
                    snapshot.captured_at.timestamp_millis(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_live_backup(&self, app: AppType) -> Result<(), AppError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM proxy_live_backup WHERE app_type = ?1",
            [app.as_str()],
        )?;
        Ok(())
    }

    /// Backups left behind by a session that never restored.
    pub fn load_live_backups(&self) -> Result<Vec<LiveConfigSnapshot>, AppError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT app_type, file_path, original, captured_at
             FROM proxy_live_backup ORDER BY app_type, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut by_app: BTreeMap<AppType, LiveConfigSnapshot> = BTreeMap::new();
        for row in rows {
            let (app, path, original, captured_at) = row?;
            let app = AppType::from_str(&app)?;
            let captured_at: DateTime<Utc> =
                DateTime::from_timestamp_millis(captured_at).unwrap_or_else(Utc::now);
            by_app
                .entry(app)
                .or_insert_with(|| LiveConfigSnapshot {
                    app,
                    files: Vec::new(),
                    captured_at,
                })
                .files
                .push(CapturedFile {
                    path: PathBuf::from(path),
                    original,
                });
        }
        Ok(by_app.into_values().collect())
    }
}
