use rusqlite::Connection;

use crate::error::AppError;

pub(super) fn create_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            model_map TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS proxy_request_logs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            provider_id TEXT NOT NULL,
            model TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost TEXT NOT NULL DEFAULT '0',
            latency_ms INTEGER NOT NULL DEFAULT 0,
            status_code INTEGER NOT NULL,
            mode TEXT NOT NULL,
            outcome TEXT NOT NULL,
            is_streaming INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_request_logs_created_at
            ON proxy_request_logs(created_at);

        CREATE TABLE IF NOT EXISTS proxy_live_backup (
            app_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            original BLOB,
            captured_at INTEGER NOT NULL,
            PRIMARY KEY (app_type, file_path)
        );",
    )?;
    Ok(())
}
