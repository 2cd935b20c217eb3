//! Mode controller.
//!
//! Owns the proxy listener and the live-config snapshots. Every transition
//! runs under one control lock; request handling only ever touches the
//! `ProviderRouter`, which is updated at the end of a transition. Config
//! file and backup I/O runs on the blocking pool.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app_config::AppType;
use crate::database::Database;
use crate::error::AppError;
use crate::live_config::{LiveConfigSnapshot, LiveConfigStore, TakeoverTarget};
use crate::provider::ProviderConfig;
use crate::proxy::{
    Forwarder, ProviderRouter, ProxyConfig, ProxyContext, ProxyError, ProxyMode, ProxyServer,
    ProxyStatus,
};
use crate::services::provider::ProviderService;
use crate::services::usage_stats::UsageStatsService;
use crate::settings::{RelaySettings, PROXY_MANAGED_TOKEN};

/// Settings key holding the persisted `ProxyConfig`.
const PROXY_CONFIG_KEY: &str = "proxy_config";

#[derive(Default)]
struct ControlState {
    mode: ProxyMode,
    server: Option<ProxyServer>,
    /// One per taken-over tool, in takeover order.
    snapshots: Vec<LiveConfigSnapshot>,
}

/// Snapshot, rewrite and restore of client configs plus their persisted
/// backups. Everything here is blocking file and SQLite I/O.
#[derive(Clone)]
struct ConfigTakeover {
    live: LiveConfigStore,
    db: Arc<Database>,
    apps: Vec<AppType>,
}

impl ConfigTakeover {
    /// Snapshots and rewrites every installed tool. On failure the tools
    /// already rewritten in this call are restored before returning.
    fn take_over_all(&self, base_url: &str) -> Result<Vec<LiveConfigSnapshot>, ProxyError> {
        let target = TakeoverTarget {
            base_url,
            token: PROXY_MANAGED_TOKEN,
        };
        let mut done: Vec<LiveConfigSnapshot> = Vec::new();

        for &app in &self.apps {
            if !self.live.is_installed(app) {
                log::info!("[Takeover] {app} 未安装，跳过");
                continue;
            }
            match self.take_over_one(app, &target) {
                Ok(snapshot) => done.push(snapshot),
                Err(e) => {
                    log::error!("[Takeover] {app} 接管失败: {e}");
                    return Err(ProxyError::TakeoverStartFailed {
                        app: app.to_string(),
                        reason: e.to_string(),
                        rollback_failures: self.restore_all(done),
                    });
                }
            }
        }

        if done.is_empty() {
            log::warn!("[Takeover] 没有可接管的客户端配置");
        }
        Ok(done)
    }

    fn take_over_one(
        &self,
        app: AppType,
        target: &TakeoverTarget<'_>,
    ) -> Result<LiveConfigSnapshot, AppError> {
        let snapshot = self.live.snapshot(app)?;
        self.db.save_live_backup(&snapshot)?;
        if let Err(e) = self.live.apply_takeover(&snapshot, target) {
            // apply_takeover already put back its own writes
            if let Err(de) = self.db.delete_live_backup(app) {
                log::warn!("[Takeover] 清理 {app} 备份失败: {de}");
            }
            return Err(e);
        }
        Ok(snapshot)
    }

    /// Restores each snapshot, dropping its backup on success. Returns the
    /// tools that failed.
    fn restore_all(&self, snapshots: Vec<LiveConfigSnapshot>) -> Vec<String> {
        let mut failed = Vec::new();
        for snapshot in snapshots.iter().rev() {
            match self.live.restore(snapshot) {
                Ok(()) => {
                    if let Err(e) = self.db.delete_live_backup(snapshot.app) {
                        log::warn!("[Takeover] 删除 {} 备份失败: {e}", snapshot.app);
                    }
                }
                Err(e) => {
                    log::error!("[Takeover] 恢复 {} 失败: {e}", snapshot.app);
                    failed.push(snapshot.app.to_string());
                }
            }
        }
        failed
    }
}

pub struct ProxyService {
    db: Arc<Database>,
    providers: Arc<ProviderService>,
    usage: Arc<UsageStatsService>,
    router: Arc<ProviderRouter>,
    forwarder: Arc<Forwarder>,
    takeover: ConfigTakeover,
    /// Address and port used by the next start.
    listen: RwLock<ProxyConfig>,
    control: Mutex<ControlState>,
    /// Last published status; readable without the control lock.
    status: RwLock<ProxyStatus>,
}

impl ProxyService {
    pub fn new(
        settings: RelaySettings,
        db: Arc<Database>,
        providers: Arc<ProviderService>,
        usage: Arc<UsageStatsService>,
    ) -> Result<Self, AppError> {
        let forwarder = Forwarder::new(
            Duration::from_secs(settings.connect_timeout_secs),
            Duration::from_secs(settings.idle_timeout_secs),
        )?;
        let listen = load_proxy_config(&db, &settings)?;
        let status = ProxyStatus {
            running: false,
            mode: ProxyMode::Stopped,
            address: listen.listen_address.clone(),
            port: listen.listen_port,
            current_provider_id: None,
            current_provider_name: None,
            taken_over_apps: Vec::new(),
        };
        Ok(Self {
            takeover: ConfigTakeover {
                live: LiveConfigStore::new(settings.config_home.clone()),
                db: db.clone(),
                apps: settings.takeover_apps.clone(),
            },
            db,
            providers,
            usage,
            router: Arc::new(ProviderRouter::new()),
            forwarder: Arc::new(forwarder),
            listen: RwLock::new(listen),
            control: Mutex::new(ControlState::default()),
            status: RwLock::new(status),
        })
    }

    /// `Stopped -> Monitoring`. Client configs are not touched.
    pub async fn start_monitoring(&self) -> Result<ProxyStatus, ProxyError> {
        let mut state = self.control.lock().await;
        if state.mode != ProxyMode::Stopped {
            return Err(ProxyError::AlreadyRunning(state.mode));
        }

        let upstream = self.providers.default_provider()?;
        let server = self.start_server().await?;
        state.server = Some(server);
        state.mode = ProxyMode::Monitoring;
        self.router.set(ProxyMode::Monitoring, upstream);

        log::info!("[Proxy] 已进入监控模式");
        Ok(self.publish(&state))
    }

    /// `Stopped | Monitoring -> TakeoverActive`.
    ///
    /// Already in takeover, this behaves as `hot_swap`: the existing
    /// snapshots are kept and nothing is captured again.
    pub async fn start_takeover(&self, provider_id: &str) -> Result<ProxyStatus, ProxyError> {
        let mut state = self.control.lock().await;
        let provider = self.providers.require(provider_id)?;

        if state.mode == ProxyMode::TakeoverActive {
            log::info!("[Takeover] 已处于接管模式，按热切换处理");
            return Ok(self.swap_locked(&state, provider));
        }

        let started = match state.server {
            Some(_) => None,
            None => Some(self.start_server().await?),
        };
        let origin = match (&started, &state.server) {
            (Some(server), _) | (None, Some(server)) => server.info().origin(),
            (None, None) => return Err(AppError::Message("proxy listener missing".into()).into()),
        };

        let snapshots = match self
            .run_blocking(move |takeover| takeover.take_over_all(&origin))
            .await
            .and_then(|result| result)
        {
            Ok(snapshots) => snapshots,
            Err(e) => {
                if let Some(server) = started {
                    server.stop().await;
                }
                return Err(e);
            }
        };

        if let Some(server) = started {
            state.server = Some(server);
        }
        state.snapshots = snapshots;
        state.mode = ProxyMode::TakeoverActive;
        self.router
            .set(ProxyMode::TakeoverActive, Some(provider.clone()));

        log::info!(
            "[Takeover] 接管完成，上游: {} ({})",
            provider.id,
            provider.host()
        );
        Ok(self.publish(&state))
    }

    /// `Monitoring | TakeoverActive -> Stopped`. No-op when already stopped.
    ///
    /// Every snapshot is attempted even if an earlier one fails; the listener
    /// is stopped regardless and failures come back as
    /// `PartialRestoreFailure`. A backup whose restore failed stays in the
    /// database for `recover_pending_restores`.
    pub async fn stop_with_restore(&self) -> Result<ProxyStatus, ProxyError> {
        let mut state = self.control.lock().await;
        if state.mode == ProxyMode::Stopped {
            return Ok(self.publish(&state));
        }

        let failed = self.restore_snapshots(std::mem::take(&mut state.snapshots)).await;

        if let Some(server) = state.server.take() {
            server.stop().await;
        }
        state.mode = ProxyMode::Stopped;
        self.router.set(ProxyMode::Stopped, None);
        let status = self.publish(&state);

        if failed.is_empty() {
            log::info!("[Proxy] 已停止并恢复配置");
            Ok(status)
        } else {
            Err(ProxyError::PartialRestoreFailure { failed })
        }
    }

    /// Repoints the live upstream. Only valid in takeover mode.
    ///
    /// The persisted default provider is not changed.
    pub async fn hot_swap(&self, provider_id: &str) -> Result<ProxyStatus, ProxyError> {
        let state = self.control.lock().await;
        if state.mode != ProxyMode::TakeoverActive {
            return Err(ProxyError::NotInTakeover(state.mode));
        }
        let provider = self.providers.require(provider_id)?;
        Ok(self.swap_locked(&state, provider))
    }

    /// Picks up an edited record if it is the live upstream.
    pub async fn provider_updated(&self, provider_id: &str) {
        let state = self.control.lock().await;
        let current = self.router.snapshot().provider;
        if current.as_ref().map(|p| p.id.as_str()) != Some(provider_id) {
            return;
        }
        if let Some(provider) = self.providers.get(provider_id) {
            self.router.set_provider(provider);
            self.publish(&state);
        }
    }

    pub fn get_status(&self) -> ProxyStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.get_status().running
    }

    pub fn is_takeover_active(&self) -> bool {
        self.get_status().mode == ProxyMode::TakeoverActive
    }

    pub fn get_proxy_config(&self) -> ProxyConfig {
        self.listen
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persists a new listen address and port. Only allowed while stopped,
    /// since taken-over clients point at the current origin.
    pub async fn update_proxy_config(
        &self,
        config: ProxyConfig,
    ) -> Result<ProxyStatus, ProxyError> {
        let state = self.control.lock().await;
        if state.mode != ProxyMode::Stopped {
            return Err(ProxyError::AlreadyRunning(state.mode));
        }
        let config = ProxyConfig {
            listen_address: config.listen_address.trim().to_string(),
            listen_port: config.listen_port,
        };
        config.validate()?;

        let json = serde_json::to_string(&config)
            .map_err(|e| AppError::Message(format!("failed to encode proxy config: {e}")))?;
        self.db.set_setting(PROXY_CONFIG_KEY, Some(&json))?;
        log::info!(
            "[Proxy] 监听配置已更新: {}:{}",
            config.listen_address,
            config.listen_port
        );
        *self
            .listen
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        Ok(self.publish(&state))
    }

    /// Restores configs left taken over by a session that ended without
    /// `stop_with_restore`. Must run before any takeover.
    pub async fn recover_pending_restores(&self) -> Result<Vec<AppType>, ProxyError> {
        let state = self.control.lock().await;
        if state.mode != ProxyMode::Stopped {
            return Err(ProxyError::AlreadyRunning(state.mode));
        }

        let pending = self
            .run_blocking(|takeover| takeover.db.load_live_backups())
            .await??;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        log::warn!("[Takeover] 发现 {} 个未恢复的配置备份", pending.len());

        let apps: Vec<AppType> = pending.iter().map(|s| s.app).collect();
        let failed = self.restore_snapshots(pending).await;
        if !failed.is_empty() {
            return Err(ProxyError::PartialRestoreFailure { failed });
        }
        Ok(apps)
    }

    async fn start_server(&self) -> Result<ProxyServer, ProxyError> {
        let ctx = ProxyContext {
            router: self.router.clone(),
            forwarder: self.forwarder.clone(),
            usage: self.usage.clone(),
        };
        let listen = self.get_proxy_config();
        ProxyServer::start(&listen.listen_address, listen.listen_port, ctx).await
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, ProxyError>
    where
        F: FnOnce(ConfigTakeover) -> T + Send + 'static,
        T: Send + 'static,
    {
        let takeover = self.takeover.clone();
        tokio::task::spawn_blocking(move || job(takeover))
            .await
            .map_err(|e| AppError::Message(format!("config task failed: {e}")).into())
    }

    /// Returns the tools whose restore failed.
    async fn restore_snapshots(&self, snapshots: Vec<LiveConfigSnapshot>) -> Vec<String> {
        let apps: Vec<String> = snapshots.iter().map(|s| s.app.to_string()).collect();
        match self
            .run_blocking(move |takeover| takeover.restore_all(snapshots))
            .await
        {
            Ok(failed) => failed,
            Err(e) => {
                log::error!("[Takeover] 恢复任务失败: {e}");
                apps
            }
        }
    }

    fn swap_locked(&self, state: &ControlState, provider: Arc<ProviderConfig>) -> ProxyStatus {
        let previous = self.router.set_provider(provider.clone());
        log::info!(
            "[Proxy] 热切换: {} -> {} ({})",
            previous.as_ref().map(|p| p.id.as_str()).unwrap_or("-"),
            provider.id,
            provider.host()
        );
        self.publish(state)
    }

    fn publish(&self, state: &ControlState) -> ProxyStatus {
        let route = self.router.snapshot();
        let (address, port) = match &state.server {
            Some(server) => (server.info().address.clone(), server.info().port),
            None => {
                let listen = self.get_proxy_config();
                (listen.listen_address, listen.listen_port)
            }
        };
        let status = ProxyStatus {
            running: state.mode.is_running(),
            mode: state.mode,
            address,
            port,
            current_provider_id: route.provider.as_ref().map(|p| p.id.clone()),
            current_provider_name: route.provider.as_ref().map(|p| p.name.clone()),
            taken_over_apps: state.snapshots.iter().map(|s| s.app).collect(),
        };
        *self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status.clone();
        status
    }
}

/// The persisted listener config wins over `RelaySettings`; an unreadable
/// value is ignored.
fn load_proxy_config(db: &Database, settings: &RelaySettings) -> Result<ProxyConfig, AppError> {
    let from_settings = ProxyConfig {
        listen_address: settings.listen_address.clone(),
        listen_port: settings.listen_port,
    };
    let Some(raw) = db.get_setting(PROXY_CONFIG_KEY)? else {
        return Ok(from_settings);
    };
    match serde_json::from_str::<ProxyConfig>(&raw) {
        Ok(config) if config.validate().is_ok() => Ok(config),
        _ => {
            log::warn!("[Proxy] 忽略无效的监听配置: {raw}");
            Ok(from_settings)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        home: std::path::PathBuf,
        service: ProxyService,
        providers: Arc<ProviderService>,
        db: Arc<Database>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir_all(home.join(".claude")).unwrap();
        fs::write(home.join(".claude/settings.json"), "{\"model\": \"opus\"}\n").unwrap();

        let settings = RelaySettings {
            listen_port: 0,
            data_dir: dir.path().join("data"),
            config_home: home.clone(),
            ..RelaySettings::default()
        };
        let db = Arc::new(Database::memory().unwrap());
        let providers = Arc::new(ProviderService::new(db.clone()).unwrap());
        for id in ["p1", "p2"] {
            providers
                .upsert(ProviderConfig {
                    id: id.into(),
                    name: id.to_uppercase(),
                    base_url: format!("https://{id}.example.com"),
                    api_key: format!("sk-{id}"),
                    model_map: IndexMap::new(),
                })
                .unwrap();
        }
        let usage = Arc::new(UsageStatsService::new(db.clone()).unwrap());
        let service = ProxyService::new(settings, db.clone(), providers.clone(), usage).unwrap();
        Fixture {
            _dir: dir,
            home,
            service,
            providers,
            db,
        }
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let f = fixture();
        let status = f.service.stop_with_restore().await.unwrap();
        assert_eq!(status.mode, ProxyMode::Stopped);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn monitoring_twice_is_rejected() {
        let f = fixture();
        f.service.start_monitoring().await.unwrap();
        assert!(matches!(
            f.service.start_monitoring().await,
            Err(ProxyError::AlreadyRunning(ProxyMode::Monitoring))
        ));
        f.service.stop_with_restore().await.unwrap();
    }

    #[tokio::test]
    async fn hot_swap_requires_takeover() {
        let f = fixture();
        assert!(matches!(
            f.service.hot_swap("p1").await,
            Err(ProxyError::NotInTakeover(ProxyMode::Stopped))
        ));
    }

    #[tokio::test]
    async fn takeover_with_unknown_provider_changes_nothing() {
        let f = fixture();
        let before = fs::read(f.home.join(".claude/settings.json")).unwrap();
        assert!(matches!(
            f.service.start_takeover("ghost").await,
            Err(ProxyError::UnknownProvider(_))
        ));
        assert_eq!(f.service.get_status().mode, ProxyMode::Stopped);
        assert_eq!(fs::read(f.home.join(".claude/settings.json")).unwrap(), before);
    }

    #[tokio::test]
    async fn takeover_swap_and_restore() {
        let f = fixture();
        let path = f.home.join(".claude/settings.json");
        let before = fs::read(&path).unwrap();

        let status = f.service.start_takeover("p1").await.unwrap();
        assert_eq!(status.mode, ProxyMode::TakeoverActive);
        assert_eq!(status.taken_over_apps, vec![AppType::Claude]);
        assert_ne!(status.port, 0);
        let live = fs::read_to_string(&path).unwrap();
        assert!(live.contains(&format!("127.0.0.1:{}", status.port)));
        assert_eq!(f.db.load_live_backups().unwrap().len(), 1);

        // second start is a swap, not a re-snapshot
        let status = f.service.start_takeover("p2").await.unwrap();
        assert_eq!(status.current_provider_id.as_deref(), Some("p2"));
        assert_eq!(f.db.load_live_backups().unwrap().len(), 1);

        let status = f.service.hot_swap("p1").await.unwrap();
        assert_eq!(status.current_provider_id.as_deref(), Some("p1"));
        assert_eq!(fs::read_to_string(&path).unwrap(), live);
        assert!(f.providers.default_provider_id().unwrap().is_none());

        let status = f.service.stop_with_restore().await.unwrap();
        assert_eq!(status.mode, ProxyMode::Stopped);
        assert!(status.taken_over_apps.is_empty());
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(f.db.load_live_backups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_takeover_keeps_monitoring_and_configs() {
        let f = fixture();
        // Codex is installed but its config cannot be parsed.
        fs::create_dir_all(f.home.join(".codex")).unwrap();
        fs::write(f.home.join(".codex/config.toml"), "model = [").unwrap();
        let claude_before = fs::read(f.home.join(".claude/settings.json")).unwrap();

        f.service.start_monitoring().await.unwrap();
        let err = f.service.start_takeover("p1").await.unwrap_err();
        match err {
            ProxyError::TakeoverStartFailed {
                app,
                rollback_failures,
                ..
            } => {
                assert_eq!(app, "codex");
                assert!(rollback_failures.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }

        let status = f.service.get_status();
        assert_eq!(status.mode, ProxyMode::Monitoring);
        assert!(status.running);
        assert_eq!(
            fs::read(f.home.join(".claude/settings.json")).unwrap(),
            claude_before
        );
        assert_eq!(
            fs::read_to_string(f.home.join(".codex/config.toml")).unwrap(),
            "model = ["
        );
        assert!(f.db.load_live_backups().unwrap().is_empty());
        f.service.stop_with_restore().await.unwrap();
    }

    #[tokio::test]
    async fn partial_restore_failure_still_stops() {
        let f = fixture();
        fs::create_dir_all(f.home.join(".gemini")).unwrap();
        fs::write(f.home.join(".gemini/.env"), "GEMINI_API_KEY=abc\n").unwrap();
        let claude = f.home.join(".claude/settings.json");
        let claude_before = fs::read(&claude).unwrap();

        let status = f.service.start_takeover("p1").await.unwrap();
        assert_eq!(status.taken_over_apps, vec![AppType::Claude, AppType::Gemini]);
        let port = status.port;

        // a directory where .env was makes its restore fail
        fs::remove_file(f.home.join(".gemini/.env")).unwrap();
        fs::create_dir(f.home.join(".gemini/.env")).unwrap();

        match f.service.stop_with_restore().await {
            Err(ProxyError::PartialRestoreFailure { failed }) => {
                assert_eq!(failed, vec!["gemini".to_string()]);
            }
            other => panic!("expected PartialRestoreFailure, got {other:?}"),
        }

        assert_eq!(fs::read(&claude).unwrap(), claude_before);
        let status = f.service.get_status();
        assert_eq!(status.mode, ProxyMode::Stopped);
        assert!(!status.running);
        assert!(status.taken_over_apps.is_empty());
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err());

        let pending = f.db.load_live_backups().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].app, AppType::Gemini);
    }

    #[tokio::test]
    async fn proxy_config_is_persisted_and_used_by_next_start() {
        let f = fixture();
        let port = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let config = ProxyConfig {
            listen_address: " 127.0.0.1 ".into(),
            listen_port: port,
        };
        let status = f.service.update_proxy_config(config).await.unwrap();
        assert_eq!(status.port, port);
        assert_eq!(f.service.get_proxy_config().listen_address, "127.0.0.1");

        let status = f.service.start_monitoring().await.unwrap();
        assert_eq!(status.port, port);
        assert!(matches!(
            f.service
                .update_proxy_config(ProxyConfig {
                    listen_address: "127.0.0.1".into(),
                    listen_port: 15999,
                })
                .await,
            Err(ProxyError::AlreadyRunning(ProxyMode::Monitoring))
        ));
        f.service.stop_with_restore().await.unwrap();

        // a fresh controller over the same database picks the saved value up
        let reopened = ProxyService::new(
            RelaySettings {
                listen_port: 0,
                config_home: f.home.clone(),
                ..RelaySettings::default()
            },
            f.db.clone(),
            f.providers.clone(),
            Arc::new(UsageStatsService::new(f.db.clone()).unwrap()),
        )
        .unwrap();
        assert_eq!(reopened.get_proxy_config().listen_port, port);
        assert_eq!(reopened.get_status().port, port);
    }

    #[tokio::test]
    async fn invalid_proxy_config_is_rejected() {
        let f = fixture();
        let err = f
            .service
            .update_proxy_config(ProxyConfig {
                listen_address: "not-an-ip".into(),
                listen_port: 15800,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Io(AppError::InvalidInput(_))), "{err}");
        assert_eq!(f.service.get_proxy_config().listen_port, 0);
    }

    #[tokio::test]
    async fn pending_backup_is_recovered() {
        let f = fixture();
        let path = f.home.join(".claude/settings.json");
        let before = fs::read(&path).unwrap();

        let store = LiveConfigStore::new(&f.home);
        let snapshot = store.snapshot(AppType::Claude).unwrap();
        f.db.save_live_backup(&snapshot).unwrap();
        store
            .apply_takeover(
                &snapshot,
                &TakeoverTarget {
                    base_url: "http://127.0.0.1:1",
                    token: PROXY_MANAGED_TOKEN,
                },
            )
            .unwrap();
        assert_ne!(fs::read(&path).unwrap(), before);

        let recovered = f.service.recover_pending_restores().await.unwrap();
        assert_eq!(recovered, vec![AppType::Claude]);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(f.db.load_live_backups().unwrap().is_empty());
    }
}
