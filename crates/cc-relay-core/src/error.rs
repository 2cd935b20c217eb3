use std::path::Path;

use thiserror::Error;

/// Persistence and file-level failures shared by the whole core.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file no longer matches what was captured in its snapshot.
    #[error("config file changed on disk since it was captured: {0}")]
    ConfigChanged(String),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("TOML error in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml_edit::TomlError,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn toml(path: impl AsRef<Path>, source: toml_edit::TomlError) -> Self {
        Self::Toml {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}
