//! Live config store.
//!
//! Reads, patches and restores the on-disk configuration of each client tool.
//! Every tool has its own schema (see the per-tool modules); the store only
//! touches the base-URL and credential fields when taking over, and restores
//! whole files byte-for-byte from a snapshot.

mod atomic;
pub(crate) mod claude;
pub(crate) mod codex;
pub(crate) mod dotenv;
pub(crate) mod gemini;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::app_config::AppType;
use crate::error::AppError;

pub(crate) use atomic::read_optional;

/// Where a taken-over client should send its traffic.
#[derive(Debug, Clone, Copy)]
pub struct TakeoverTarget<'a> {
    /// Proxy origin, e.g. `http://127.0.0.1:15721`.
    pub base_url: &'a str,
    pub token: &'a str,
}

/// Original bytes of one config file; `None` means the file did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFile {
    pub path: PathBuf,
    #[serde(skip)]
    pub original: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfigSnapshot {
    pub app: AppType,
    pub files: Vec<CapturedFile>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LiveConfigStore {
    home: PathBuf,
}

impl LiveConfigStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn config_dir(&self, app: AppType) -> PathBuf {
        match app {
            AppType::Claude => claude::config_dir(&self.home),
            AppType::Codex => codex::config_dir(&self.home),
            AppType::Gemini => gemini::config_dir(&self.home),
        }
    }

    /// Every file the tool's takeover touches.
    pub fn config_files(&self, app: AppType) -> Vec<PathBuf> {
        match app {
            AppType::Claude => vec![claude::settings_path(&self.home)],
            AppType::Codex => vec![codex::config_path(&self.home), codex::auth_path(&self.home)],
            AppType::Gemini => vec![gemini::env_path(&self.home)],
        }
    }

    /// A tool counts as installed when its config directory exists.
    pub fn is_installed(&self, app: AppType) -> bool {
        self.config_dir(app).is_dir()
    }

    pub fn snapshot(&self, app: AppType) -> Result<LiveConfigSnapshot, AppError> {
        let files = self
            .config_files(app)
            .into_iter()
            .map(|path| {
                let original = read_optional(&path)?;
                Ok(CapturedFile { path, original })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(LiveConfigSnapshot {
            app,
            files,
            captured_at: Utc::now(),
        })
    }

    /// Points the tool at the proxy.
    ///
    /// All patched contents are computed before anything is written, and each
    /// file is re-read and compared with the snapshot right before its rename.
    /// A file edited since the snapshot aborts with `ConfigChanged`.
    pub fn apply_takeover(
        &self,
        snapshot: &LiveConfigSnapshot,
        target: &TakeoverTarget<'_>,
    ) -> Result<(), AppError> {
        let mut planned = Vec::with_capacity(snapshot.files.len());
        for file in &snapshot.files {
            let current = file
                .original
                .as_deref()
                .map(|bytes| {
                    std::str::from_utf8(bytes).map_err(|e| {
                        AppError::Config(format!("{} is not UTF-8: {e}", file.path.display()))
                    })
                })
                .transpose()?;
            let patched = self.patch_file(snapshot.app, &file.path, current, target)?;
            planned.push((file, patched));
        }

        let mut written: Vec<&CapturedFile> = Vec::with_capacity(planned.len());
        for (file, patched) in planned {
            let result = ensure_unchanged(file)
                .and_then(|()| atomic::atomic_write(&file.path, patched.as_bytes()));
            if let Err(e) = result {
                // Only files written by this call are put back.
                for done in written {
                    if let Err(re) = restore_file(done) {
                        log::error!("[Takeover] 回滚 {} 失败: {re}", done.path.display());
                    }
                }
                return Err(e);
            }
            written.push(file);
        }

        log::info!(
            "[Takeover] {} 配置已指向代理 {}",
            snapshot.app,
            target.base_url
        );
        Ok(())
    }

    /// Puts every captured file back exactly as it was. Files that already
    /// match are not rewritten, so restoring twice is harmless.
    pub fn restore(&self, snapshot: &LiveConfigSnapshot) -> Result<(), AppError> {
        let mut first_err = None;
        for file in &snapshot.files {
            if let Err(e) = restore_file(file) {
                log::error!("[Takeover] 恢复 {} 失败: {e}", file.path.display());
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                log::info!("[Takeover] {} 配置已恢复", snapshot.app);
                Ok(())
            }
        }
    }

    fn patch_file(
        &self,
        app: AppType,
        path: &Path,
        current: Option<&str>,
        target: &TakeoverTarget<'_>,
    ) -> Result<String, AppError> {
        match app {
            AppType::Claude => claude::patch_settings(path, current, target),
            AppType::Codex if path == codex::auth_path(&self.home) => {
                codex::patch_auth_json(path, current, target)
            }
            AppType::Codex => codex::patch_config_toml(path, current, target),
            AppType::Gemini => Ok(gemini::patch_env(current, target)),
        }
    }
}

fn ensure_unchanged(file: &CapturedFile) -> Result<(), AppError> {
    let on_disk = read_optional(&file.path)?;
    if on_disk != file.original {
        return Err(AppError::ConfigChanged(file.path.display().to_string()));
    }
    Ok(())
}

fn restore_file(file: &CapturedFile) -> Result<(), AppError> {
    let on_disk = read_optional(&file.path)?;
    if on_disk == file.original {
        return Ok(());
    }
    match &file.original {
        Some(bytes) => atomic::atomic_write(&file.path, bytes),
        None => atomic::remove_if_exists(&file.path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TARGET: TakeoverTarget<'static> = TakeoverTarget {
        base_url: "http://127.0.0.1:15721",
        token: "PROXY_MANAGED",
    };

    fn seeded_home() -> tempfile::TempDir {
        let home = tempfile::tempdir().unwrap();
        let claude = home.path().join(".claude");
        fs::create_dir_all(&claude).unwrap();
        fs::write(
            claude.join("settings.json"),
            "{\n  \"env\": {\"ANTHROPIC_AUTH_TOKEN\": \"sk-ant\"},\n  \"model\":   \"opus\"\n}",
        )
        .unwrap();
        fs::create_dir_all(home.path().join(".codex")).unwrap();
        fs::write(home.path().join(".codex/config.toml"), "model = \"gpt-5\"  # keep\n").unwrap();
        home
    }

    #[test]
    fn takeover_then_restore_is_byte_identical() {
        let home = seeded_home();
        let store = LiveConfigStore::new(home.path());

        for app in [AppType::Claude, AppType::Codex] {
            let before: Vec<_> = store
                .config_files(app)
                .iter()
                .map(|p| read_optional(p).unwrap())
                .collect();
            let snap = store.snapshot(app).unwrap();
            store.apply_takeover(&snap, &TARGET).unwrap();
            store.restore(&snap).unwrap();
            let after: Vec<_> = store
                .config_files(app)
                .iter()
                .map(|p| read_optional(p).unwrap())
                .collect();
            assert_eq!(before, after, "{app} not restored exactly");
        }
        // auth.json did not exist before takeover and must be gone again
        assert!(!home.path().join(".codex/auth.json").exists());
    }

    #[test]
    fn takeover_refuses_when_file_changed_after_snapshot() {
        let home = seeded_home();
        let store = LiveConfigStore::new(home.path());
        let snap = store.snapshot(AppType::Claude).unwrap();

        let path = home.path().join(".claude/settings.json");
        fs::write(&path, "{\"edited\": true}").unwrap();

        let err = store.apply_takeover(&snap, &TARGET).unwrap_err();
        assert!(matches!(err, AppError::ConfigChanged(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"edited\": true}");
    }

    #[test]
    fn failed_second_file_rolls_back_first() {
        let home = seeded_home();
        let store = LiveConfigStore::new(home.path());
        let snap = store.snapshot(AppType::Codex).unwrap();

        // auth.json appears after the snapshot captured it as absent
        let auth = home.path().join(".codex/auth.json");
        fs::write(&auth, "{}").unwrap();

        let err = store.apply_takeover(&snap, &TARGET).unwrap_err();
        assert!(matches!(err, AppError::ConfigChanged(_)));
        assert_eq!(
            fs::read_to_string(home.path().join(".codex/config.toml")).unwrap(),
            "model = \"gpt-5\"  # keep\n"
        );
        assert_eq!(fs::read_to_string(&auth).unwrap(), "{}");
    }

    #[test]
    fn unparsable_config_is_left_untouched() {
        let home = seeded_home();
        let path = home.path().join(".claude/settings.json");
        fs::write(&path, "{ not json").unwrap();
        let store = LiveConfigStore::new(home.path());

        let snap = store.snapshot(AppType::Claude).unwrap();
        assert!(store.apply_takeover(&snap, &TARGET).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn installed_means_config_dir_exists() {
        let home = seeded_home();
        let store = LiveConfigStore::new(home.path());
        assert!(store.is_installed(AppType::Claude));
        assert!(!store.is_installed(AppType::Gemini));
    }
}
