//! Shell variables that override a takeover.
//!
//! Claude Code, Codex and Gemini CLI prefer credentials and base URLs from
//! the environment over their config files, so a leftover
//! `ANTHROPIC_API_KEY` silently routes around the proxy.

use serde::Serialize;
use std::path::Path;

use crate::app_config::AppType;
use crate::live_config::{dotenv, read_optional};

/// Profiles sourced by common login and interactive shells.
const SHELL_PROFILES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".profile",
    ".zshrc",
    ".zshenv",
    ".zprofile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSource {
    Process,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConflict {
    pub var_name: String,
    /// Credentials are masked after their first four characters.
    pub var_value: String,
    pub source_type: EnvSource,
    pub source_path: String,
}

fn watched_prefixes(app: AppType) -> &'static [&'static str] {
    match app {
        AppType::Claude => &["ANTHROPIC_"],
        AppType::Codex => &["OPENAI_"],
        AppType::Gemini => &["GEMINI_", "GOOGLE_GEMINI_", "GOOGLE_API_KEY"],
    }
}

fn display_value(name: &str, value: &str) -> String {
    if !(name.contains("KEY") || name.contains("TOKEN")) {
        return value.to_string();
    }
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Variables in this process's environment and in the shell profiles under
/// `home` that the tool would read instead of its taken-over config.
pub fn check_env_conflicts(app: AppType, home: &Path) -> Vec<EnvConflict> {
    scan(app, home, std::env::vars())
}

fn scan<I>(app: AppType, home: &Path, vars: I) -> Vec<EnvConflict>
where
    I: IntoIterator<Item = (String, String)>,
{
    let prefixes = watched_prefixes(app);
    let watched = |name: &str| prefixes.iter().any(|p| name.starts_with(p));

    let mut found: Vec<EnvConflict> = vars
        .into_iter()
        .filter(|(name, _)| watched(name))
        .map(|(name, value)| EnvConflict {
            var_value: display_value(&name, &value),
            var_name: name,
            source_type: EnvSource::Process,
            source_path: "process environment".to_string(),
        })
        .collect();
    found.sort_by(|a, b| a.var_name.cmp(&b.var_name));

    for profile in SHELL_PROFILES {
        let path = home.join(profile);
        let bytes = match read_optional(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[Env] 无法读取 {}: {e}", path.display());
                continue;
            }
        };
        for (name, value) in dotenv::assignments(&String::from_utf8_lossy(&bytes)) {
            if watched(&name) {
                found.push(EnvConflict {
                    var_value: display_value(&name, &value),
                    var_name: name,
                    source_type: EnvSource::File,
                    source_path: path.display().to_string(),
                });
            }
        }
    }

    if !found.is_empty() {
        log::info!("[Env] {app} 发现 {} 个可能覆盖接管的环境变量", found.len());
    }
    found
}
