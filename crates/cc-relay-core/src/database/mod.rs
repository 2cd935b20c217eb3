//! SQLite persistence.
//!
//! One database file holds providers, settings, the request log and the
//! persisted live-config backups. Writes go through a single connection
//! behind a mutex; when the database is file-backed a second read-only
//! connection serves usage queries so they never wait on request logging.

mod live_backup;
mod providers;
pub(crate) mod request_logs;
mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::AppError;

pub struct Database {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::create_tables(&conn)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(std::time::Duration::from_secs(5))?;

        log::info!("数据库已打开: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// In-memory database for tests; reads share the writer connection.
    pub fn memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
        })
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn lock_reader(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            None => self.lock_conn(),
        }
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    pub fn set_setting(&self, key: &str, value: Option<&str>) -> Result<(), AppError> {
        let conn = self.lock_conn();
        match value {
            Some(v) => conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, v],
            )?,
            None => conn.execute("DELETE FROM settings WHERE key = ?1", [key])?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_and_clear() {
        let db = Database::memory().unwrap();
        assert_eq!(db.get_setting("default_provider").unwrap(), None);
        db.set_setting("default_provider", Some("p1")).unwrap();
        db.set_setting("default_provider", Some("p2")).unwrap();
        assert_eq!(db.get_setting("default_provider").unwrap().as_deref(), Some("p2"));
        db.set_setting("default_provider", None).unwrap();
        assert_eq!(db.get_setting("default_provider").unwrap(), None);
    }

    #[test]
    fn file_database_reopens_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cc-relay.db");
        {
            let db = Database::open(&path).unwrap();
            db.set_setting("k", Some("v")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_setting("k").unwrap().as_deref(), Some("v"));
    }
}
