//! Engine settings.
//!
//! Defaults match the desktop build; every field can be overridden through a
//! `CC_RELAY_*` environment variable so the headless service needs no
//! settings file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::AppType;
use crate::error::AppError;

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 15721;

/// Credential written into client configs while takeover is active. The
/// proxy swaps it for the upstream key on every request.
pub const PROXY_MANAGED_TOKEN: &str = "PROXY_MANAGED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    pub listen_address: String,
    pub listen_port: u16,
    /// Where the SQLite database lives.
    pub data_dir: PathBuf,
    /// Home directory holding `.claude`, `.codex` and `.gemini`.
    pub config_home: PathBuf,
    pub connect_timeout_secs: u64,
    /// Max silence between two upstream body chunks. There is no whole-request
    /// timeout so long streaming completions are never cut off.
    pub idle_timeout_secs: u64,
    pub takeover_apps: Vec<AppType>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            data_dir: home.join(".cc-relay"),
            config_home: home,
            connect_timeout_secs: 30,
            idle_timeout_secs: 300,
            takeover_apps: AppType::ALL.to_vec(),
        }
    }
}

impl RelaySettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlays values returned by `lookup` (keyed by env var name).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(addr) = get("CC_RELAY_LISTEN_ADDRESS") {
            self.listen_address = addr;
        }
        if let Some(port) = get("CC_RELAY_LISTEN_PORT") {
            self.listen_port = port
                .parse()
                .map_err(|_| AppError::Config(format!("invalid CC_RELAY_LISTEN_PORT: {port}")))?;
        }
        if let Some(dir) = get("CC_RELAY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(home) = get("CC_RELAY_CONFIG_HOME") {
            self.config_home = PathBuf::from(home);
        }
        if let Some(secs) = get("CC_RELAY_UPSTREAM_TIMEOUT_SECS") {
            self.idle_timeout_secs = secs.parse().map_err(|_| {
                AppError::Config(format!("invalid CC_RELAY_UPSTREAM_TIMEOUT_SECS: {secs}"))
            })?;
        }
        if let Some(apps) = get("CC_RELAY_TAKEOVER_APPS") {
            self.takeover_apps = apps
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(AppType::from_str)
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(self)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("cc-relay.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let env: HashMap<&str, &str> = [
            ("CC_RELAY_LISTEN_PORT", "18000"),
            ("CC_RELAY_TAKEOVER_APPS", "claude, gemini"),
            ("CC_RELAY_DATA_DIR", "/tmp/relay"),
        ]
        .into_iter()
        .collect();

        let settings = RelaySettings::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.listen_port, 18000);
        assert_eq!(settings.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(settings.takeover_apps, vec![AppType::Claude, AppType::Gemini]);
        assert_eq!(settings.db_path(), PathBuf::from("/tmp/relay/cc-relay.db"));
    }

    #[test]
    fn rejects_bad_port() {
        let err = RelaySettings::default()
            .with_overrides(|k| (k == "CC_RELAY_LISTEN_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
