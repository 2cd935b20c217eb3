//! Codex CLI: `~/.codex/config.toml` (endpoint) plus `~/.codex/auth.json`
//! (credential).

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use toml_edit::{value, DocumentMut, Item, Table};

use super::TakeoverTarget;
use crate::error::AppError;

/// Provider table written when the user has no `model_provider` of their own.
pub(crate) const RELAY_PROVIDER_NAME: &str = "cc-relay";
pub(crate) const API_KEY_KEY: &str = "OPENAI_API_KEY";

pub(crate) fn config_dir(home: &Path) -> PathBuf {
    home.join(".codex")
}

pub(crate) fn config_path(home: &Path) -> PathBuf {
    config_dir(home).join("config.toml")
}

pub(crate) fn auth_path(home: &Path) -> PathBuf {
    config_dir(home).join("auth.json")
}

/// Codex expects an OpenAI-style base that already ends in `/v1`.
fn codex_base_url(target: &TakeoverTarget<'_>) -> String {
    format!("{}/v1", target.base_url.trim_end_matches('/'))
}

pub(crate) fn patch_config_toml(
    path: &Path,
    current: Option<&str>,
    target: &TakeoverTarget<'_>,
) -> Result<String, AppError> {
    let mut doc: DocumentMut = current
        .unwrap_or("")
        .parse()
        .map_err(|e| AppError::toml(path, e))?;
    let base_url = codex_base_url(target);

    let active = doc
        .get("model_provider")
        .and_then(Item::as_str)
        .map(str::to_string)
        .filter(|name| {
            doc.get("model_providers")
                .and_then(|p| p.get(name.as_str()))
                .and_then(Item::as_table_like)
                .is_some()
        });

    match active {
        Some(name) => {
            let entry = doc
                .get_mut("model_providers")
                .and_then(|p| p.get_mut(name.as_str()))
                .and_then(Item::as_table_like_mut)
                .ok_or_else(|| {
                    AppError::Config(format!("{}: model_providers.{name} vanished", path.display()))
                })?;
            entry.insert("base_url", value(base_url));
        }
        None => {
            doc.insert("model_provider", value(RELAY_PROVIDER_NAME));
            if !doc.contains_key("model_providers") {
                let mut providers = Table::new();
                providers.set_implicit(true);
                doc.insert("model_providers", Item::Table(providers));
            }
            let providers = doc
                .get_mut("model_providers")
                .and_then(Item::as_table_like_mut)
                .ok_or_else(|| {
                    AppError::Config(format!("{}: model_providers is not a table", path.display()))
                })?;

            let mut entry = Table::new();
            entry.insert("name", value(RELAY_PROVIDER_NAME));
            entry.insert("base_url", value(base_url));
            entry.insert("wire_api", value("responses"));
            entry.insert("requires_openai_auth", value(true));
            providers.insert(RELAY_PROVIDER_NAME, Item::Table(entry));
        }
    }

    Ok(doc.to_string())
}

pub(crate) fn patch_auth_json(
    path: &Path,
    current: Option<&str>,
    target: &TakeoverTarget<'_>,
) -> Result<String, AppError> {
    let mut root: Value = match current {
        Some(text) if !text.trim().is_empty() => {
            serde_json::from_str(text).map_err(|e| AppError::json(path, e))?
        }
        _ => json!({}),
    };
    let obj = root
        .as_object_mut()
        .ok_or_else(|| AppError::Config(format!("{} root is not an object", path.display())))?;
    obj.insert(API_KEY_KEY.into(), Value::String(target.token.to_string()));

    let mut out = serde_json::to_string_pretty(&root).map_err(|e| AppError::json(path, e))?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: TakeoverTarget<'static> = TakeoverTarget {
        base_url: "http://127.0.0.1:15721",
        token: "PROXY_MANAGED",
    };

    #[test]
    fn patches_existing_provider_table() {
        let current = "# my codex\nmodel = \"gpt-5\"\nmodel_provider = \"azure\"\n\n[model_providers.azure]\nname = \"Azure\"\nbase_url = \"https://azure.example.com/v1\"\nenv_key = \"AZURE_KEY\"\n";
        let out = patch_config_toml(Path::new("config.toml"), Some(current), &TARGET).unwrap();
        let doc: DocumentMut = out.parse().unwrap();

        assert_eq!(doc["model_provider"].as_str(), Some("azure"));
        assert_eq!(
            doc["model_providers"]["azure"]["base_url"].as_str(),
            Some("http://127.0.0.1:15721/v1")
        );
        assert_eq!(doc["model_providers"]["azure"]["env_key"].as_str(), Some("AZURE_KEY"));
        assert!(out.starts_with("# my codex\n"));
    }

    #[test]
    fn adds_relay_provider_when_none_configured() {
        let current = "model = \"gpt-5\"\n";
        let out = patch_config_toml(Path::new("config.toml"), Some(current), &TARGET).unwrap();
        let doc: DocumentMut = out.parse().unwrap();

        assert_eq!(doc["model"].as_str(), Some("gpt-5"));
        assert_eq!(doc["model_provider"].as_str(), Some(RELAY_PROVIDER_NAME));
        assert_eq!(
            doc["model_providers"][RELAY_PROVIDER_NAME]["base_url"].as_str(),
            Some("http://127.0.0.1:15721/v1")
        );
    }

    #[test]
    fn auth_json_gets_proxy_token() {
        let out = patch_auth_json(
            Path::new("auth.json"),
            Some(r#"{"OPENAI_API_KEY":"sk-real","tokens":null}"#),
            &TARGET,
        )
        .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v[API_KEY_KEY], "PROXY_MANAGED");
        assert!(v["tokens"].is_null());
    }
}
