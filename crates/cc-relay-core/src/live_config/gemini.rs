//! Gemini CLI: `~/.gemini/.env` in dotenv format.

use std::path::{Path, PathBuf};

use super::dotenv::line_key;
use super::TakeoverTarget;

pub(crate) const BASE_URL_KEY: &str = "GOOGLE_GEMINI_BASE_URL";
pub(crate) const API_KEY_KEY: &str = "GEMINI_API_KEY";

pub(crate) fn config_dir(home: &Path) -> PathBuf {
    home.join(".gemini")
}

pub(crate) fn env_path(home: &Path) -> PathBuf {
    config_dir(home).join(".env")
}

/// Rewrites the two managed keys in place and appends whichever is missing.
/// Comments, ordering and every other line are kept as-is.
pub(crate) fn patch_env(current: Option<&str>, target: &TakeoverTarget<'_>) -> String {
    let updates = [(BASE_URL_KEY, target.base_url), (API_KEY_KEY, target.token)];
    let mut seen = [false; 2];
    let mut lines: Vec<String> = Vec::new();

    for line in current.unwrap_or("").lines() {
        let idx = line_key(line).and_then(|key| updates.iter().position(|(k, _)| *k == key));
        match idx {
            Some(i) => {
                if !seen[i] {
                    lines.push(format!("{}={}", updates[i].0, updates[i].1));
                    seen[i] = true;
                }
            }
            None => lines.push(line.to_string()),
        }
    }
    for (i, (key, value)) in updates.iter().enumerate() {
        if !seen[i] {
            lines.push(format!("{key}={value}"));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_config::dotenv;

    const TARGET: TakeoverTarget<'static> = TakeoverTarget {
        base_url: "http://127.0.0.1:15721",
        token: "PROXY_MANAGED",
    };

    #[test]
    fn replaces_existing_keys_in_place() {
        let current = "# gemini\nGEMINI_API_KEY=abc\nGEMINI_MODEL=gemini-2.5-pro\nexport GOOGLE_GEMINI_BASE_URL=https://x\n";
        let out = patch_env(Some(current), &TARGET);
        assert_eq!(
            out,
            "# gemini\nGEMINI_API_KEY=PROXY_MANAGED\nGEMINI_MODEL=gemini-2.5-pro\nGOOGLE_GEMINI_BASE_URL=http://127.0.0.1:15721\n"
        );
    }

    #[test]
    fn appends_missing_keys() {
        let out = patch_env(Some("GEMINI_MODEL=flash"), &TARGET);
        let pairs = dotenv::assignments(&out);
        let value = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(value(BASE_URL_KEY), Some("http://127.0.0.1:15721"));
        assert_eq!(value(API_KEY_KEY), Some("PROXY_MANAGED"));
        assert_eq!(value("GEMINI_MODEL"), Some("flash"));
    }
}
