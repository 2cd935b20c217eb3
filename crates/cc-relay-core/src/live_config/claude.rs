//! Claude Code: `~/.claude/settings.json`, `env` block.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::TakeoverTarget;
use crate::error::AppError;

pub(crate) const BASE_URL_KEY: &str = "ANTHROPIC_BASE_URL";
pub(crate) const AUTH_TOKEN_KEY: &str = "ANTHROPIC_AUTH_TOKEN";
const API_KEY_KEY: &str = "ANTHROPIC_API_KEY";

pub(crate) fn config_dir(home: &Path) -> PathBuf {
    home.join(".claude")
}

pub(crate) fn settings_path(home: &Path) -> PathBuf {
    config_dir(home).join("settings.json")
}

pub(crate) fn patch_settings(
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
    let env = obj
        .entry("env")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| AppError::Config(format!("{}: env is not an object", path.display())))?;

    env.insert(BASE_URL_KEY.into(), Value::String(target.base_url.to_string()));
    env.insert(AUTH_TOKEN_KEY.into(), Value::String(target.token.to_string()));
    // ANTHROPIC_API_KEY 优先级更高，会绕过代理
    env.shift_remove(API_KEY_KEY);

    let mut out =
        serde_json::to_string_pretty(&root).map_err(|e| AppError::json(path, e))?;
    out.push('\n');
    Ok(out)
}
