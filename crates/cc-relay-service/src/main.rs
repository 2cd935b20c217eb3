use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{sse, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cc_relay_core::{
    provider::ProviderConfig,
    proxy::ProxyConfig,
    services::{check_env_conflicts, LogFilters},
    settings::RelaySettings,
    store::AppState,
    AppType, ProxyError, ProxyStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};

const STATUS_EVENT: &str = "proxy-status-changed";
const SECS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Clone)]
struct ServerState {
    app_state: Arc<AppState>,
    auth_token: Option<String>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct ServerEvent {
    event: String,
    payload: Value,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct InvokeRequest {
    command: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize)]
#[serde(untagged)]
enum InvokeResponse<T: Serialize> {
    Ok { ok: bool, data: T },
    Err { ok: bool, error: String },
}

fn auth_ok(state: &ServerState, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    let Some(expected) = state.auth_token.as_deref() else {
        return true;
    };
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");
    let qt = query_token.unwrap_or("");
    bearer == expected || qt == expected
}

fn json_err(status: StatusCode, msg: impl Into<String>) -> Response {
    let body = Json(InvokeResponse::<Value>::Err {
        ok: false,
        error: msg.into(),
    });
    (status, body).into_response()
}

fn to_json<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {key}"))
}

/// Optional non-negative integer argument that must fit in `u32`.
fn arg_u32(args: &Value, key: &str, default: u32) -> Result<u32, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("invalid {key}: {v}")),
    }
}

fn emit_status(state: &ServerState, status: &ProxyStatus) {
    let payload = serde_json::to_value(status).unwrap_or(Value::Null);
    // 没有订阅者时发送失败，忽略即可
    let _ = state.events.send(ServerEvent {
        event: STATUS_EVENT.to_string(),
        payload,
    });
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn events_sse(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(q): Query<TokenQuery>,
) -> Response {
    if !auth_ok(&state, &headers, q.token.as_deref()) {
        return json_err(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let mut rx = state.events.subscribe();
    let mut shutdown = state.shutdown.clone();
    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                _ = shutdown.changed() => break,
            };
            match received {
                Ok(evt) => {
                    let data = serde_json::to_string(&evt.payload).unwrap_or("null".to_string());
                    let msg = sse::Event::default().event(evt.event).data(data);
                    yield Ok::<_, std::convert::Infallible>(msg);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    sse::Sse::new(stream)
        .keep_alive(sse::KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
        .into_response()
}

async fn invoke(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(q): Query<TokenQuery>,
    Json(req): Json<InvokeRequest>,
) -> Response {
    if !auth_ok(&state, &headers, q.token.as_deref()) {
        return json_err(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let command = req.command.trim().to_string();
    if command.is_empty() {
        return json_err(StatusCode::BAD_REQUEST, "missing command");
    }

    match handle_invoke(&state, &command, req.args).await {
        Ok(v) => Json(InvokeResponse::Ok { ok: true, data: v }).into_response(),
        Err(e) => json_err(StatusCode::BAD_REQUEST, e),
    }
}

async fn handle_invoke(state: &ServerState, command: &str, args: Value) -> Result<Value, String> {
    let app = &state.app_state;
    match command {
        // ====== proxy mode ======
        "start_proxy_monitoring" => {
            let result = app.proxy_service.start_monitoring().await;
            emit_status(state, &app.proxy_service.get_status());
            to_json(result.map_err(|e| e.to_string())?)
        }
        "start_proxy_with_takeover" => {
            let provider_id = match args.get("providerId").and_then(|v| v.as_str()) {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => app
                    .providers
                    .default_provider_id()
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "missing providerId and no default provider".to_string())?,
            };
            let result = app.proxy_service.start_takeover(&provider_id).await;
            emit_status(state, &app.proxy_service.get_status());
            to_json(result.map_err(|e| e.to_string())?)
        }
        "stop_proxy_with_restore" => {
            let result = app.proxy_service.stop_with_restore().await;
            emit_status(state, &app.proxy_service.get_status());
            to_json(result.map_err(|e| e.to_string())?)
        }
        "switch_proxy_provider" => {
            let provider_id = arg_str(&args, "providerId")?;
            let status = app
                .proxy_service
                .hot_swap(provider_id)
                .await
                .map_err(|e| e.to_string())?;
            emit_status(state, &status);
            to_json(status)
        }
        "get_proxy_status" => to_json(app.proxy_service.get_status()),
        "is_proxy_running" => Ok(json!(app.proxy_service.is_running())),
        "is_live_takeover_active" => Ok(json!(app.proxy_service.is_takeover_active())),
        "get_proxy_config" => to_json(app.proxy_service.get_proxy_config()),
        "update_proxy_config" => {
            let config: ProxyConfig =
                serde_json::from_value(args.get("config").cloned().unwrap_or(Value::Null))
                    .map_err(|e| format!("invalid config: {e}"))?;
            let status = app
                .proxy_service
                .update_proxy_config(config)
                .await
                .map_err(|e| e.to_string())?;
            emit_status(state, &status);
            Ok(json!(true))
        }

        // ====== environment ======
        "check_env_conflicts" => {
            let app_type = AppType::from_str(arg_str(&args, "app")?).map_err(|e| e.to_string())?;
            to_json(check_env_conflicts(app_type, &app.settings.config_home))
        }

        // ====== usage ======
        "get_usage_summary" => {
            let end = args
                .get("endDate")
                .and_then(|v| v.as_i64())
                .unwrap_or_else(|| chrono::Utc::now().timestamp());
            let start = args
                .get("startDate")
                .and_then(|v| v.as_i64())
                .unwrap_or(end - 30 * SECS_PER_DAY);
            to_json(app.usage.summary(start, end).map_err(|e| e.to_string())?)
        }
        "get_usage_trends" => {
            let days = arg_u32(&args, "days", 7)
                .map_err(|e| ProxyError::UnknownQueryRange(e).to_string())?;
            to_json(app.usage.trends(days).map_err(|e| e.to_string())?)
        }
        "get_provider_stats" => to_json(app.usage.provider_stats()),
        "get_model_stats" => to_json(app.usage.model_stats()),
        "get_request_logs" => {
            let filters: LogFilters = match args.get("filters") {
                Some(v) if !v.is_null() => serde_json::from_value(v.clone())
                    .map_err(|e| format!("invalid filters: {e}"))?,
                _ => LogFilters::default(),
            };
            let page = arg_u32(&args, "page", 0)?;
            let page_size = arg_u32(&args, "pageSize", 20)?;
            to_json(
                app.usage
                    .request_logs(&filters, page, page_size)
                    .map_err(|e| e.to_string())?,
            )
        }

        // ====== providers ======
        "get_providers" => {
            let providers = app.providers.list();
            to_json(providers.iter().map(|p| p.as_ref()).collect::<Vec<_>>())
        }
        "upsert_provider" => {
            let provider: ProviderConfig =
                serde_json::from_value(args.get("provider").cloned().unwrap_or(Value::Null))
                    .map_err(|e| format!("invalid provider: {e}"))?;
            let saved = app.providers.upsert(provider).map_err(|e| e.to_string())?;
            app.proxy_service.provider_updated(&saved.id).await;
            Ok(json!(true))
        }
        "delete_provider" => {
            let id = arg_str(&args, "id")?;
            Ok(json!(app.providers.remove(id).map_err(|e| e.to_string())?))
        }
        "get_default_provider" => {
            let provider = app.providers.default_provider().map_err(|e| e.to_string())?;
            to_json(provider.as_deref())
        }
        "set_default_provider" => {
            let id = arg_str(&args, "id")?;
            app.providers
                .set_default_provider(id)
                .map_err(|e| e.to_string())?;
            Ok(json!(true))
        }
        "test_provider_connection" => {
            let id = arg_str(&args, "providerId")?;
            to_json(
                app.providers
                    .test_connection(id)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }

        other => Err(format!("unsupported command: {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let listen =
        std::env::var("CC_RELAY_WEB_LISTEN").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let auth_token = std::env::var("CC_RELAY_WEB_AUTH_TOKEN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let allow_origin =
        std::env::var("CC_RELAY_WEB_ALLOW_ORIGIN").unwrap_or_else(|_| "*".to_string());
    let auto_start = std::env::var("CC_RELAY_AUTO_START")
        .ok()
        .map(|v| v.trim().to_lowercase());
    let max_body_bytes: usize = std::env::var("CC_RELAY_WEB_MAX_BODY_BYTES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(10 * 1024 * 1024);

    let settings = RelaySettings::from_env()?;
    let app_state = Arc::new(AppState::new(settings)?);

    // 上次异常退出时残留的接管配置，先恢复再做其他事
    match app_state.proxy_service.recover_pending_restores().await {
        Ok(apps) if !apps.is_empty() => log::warn!("restored configs left taken over: {apps:?}"),
        Ok(_) => {}
        Err(e) => log::error!("config recovery failed: {e}"),
    }

    match auto_start.as_deref() {
        Some("monitoring") => match app_state.proxy_service.start_monitoring().await {
            Ok(status) => log::info!("proxy started: {}:{}", status.address, status.port),
            Err(e) => log::warn!("proxy start failed: {e}"),
        },
        Some("takeover") => {
            match app_state.providers.default_provider_id() {
                Ok(Some(id)) => match app_state.proxy_service.start_takeover(&id).await {
                    Ok(status) => {
                        log::info!("proxy takeover started: {}:{}", status.address, status.port)
                    }
                    Err(e) => log::warn!("proxy takeover failed: {e}"),
                },
                Ok(None) => {
                    log::warn!("CC_RELAY_AUTO_START=takeover but no default provider is set")
                }
                Err(e) => log::warn!("failed to read default provider: {e}"),
            }
        }
        Some(other) if !other.is_empty() && other != "0" && other != "off" => {
            log::warn!("unknown CC_RELAY_AUTO_START value: {other}")
        }
        _ => {}
    }

    let (tx, _rx) = broadcast::channel::<ServerEvent>(128);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = ServerState {
        app_state: app_state.clone(),
        auth_token,
        events: tx,
        shutdown: shutdown_rx,
    };

    let cors = if allow_origin.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = allow_origin
            .parse()
            .unwrap_or_else(|_| axum::http::HeaderValue::from_static("*"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let router = Router::new()
        .route("/health", get(health))
        .route("/invoke", post(invoke))
        .route("/events", get(events_sse))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = listen.parse()?;
    log::info!("service listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down, restoring client configs");
            if let Err(e) = app_state.proxy_service.stop_with_restore().await {
                log::error!("restore on shutdown failed: {e}");
            }
            app_state.usage.flush().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_relay_core::database::Database;

    fn server_state(dir: &tempfile::TempDir) -> ServerState {
        let home = dir.path().join("home");
        std::fs::create_dir_all(home.join(".claude")).unwrap();
        let settings = RelaySettings {
            listen_port: 0,
            data_dir: dir.path().join("data"),
            config_home: home,
            ..RelaySettings::default()
        };
        let db = Arc::new(Database::memory().unwrap());
        let app_state = AppState::with_database(settings, db).unwrap();
        let (tx, _rx) = broadcast::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        ServerState {
            app_state: Arc::new(app_state),
            auth_token: Some("secret".to_string()),
            events: tx,
            shutdown: shutdown_rx,
        }
    }

    fn provider_args(id: &str) -> Value {
        json!({
            "provider": {
                "id": id,
                "name": "Relay",
                "baseUrl": "https://api.example.com",
                "apiKey": "sk-test"
            }
        })
    }

    #[test]
    fn auth_accepts_bearer_or_query_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);
        let mut headers = HeaderMap::new();
        assert!(!auth_ok(&state, &headers, None));
        assert!(auth_ok(&state, &headers, Some("secret")));
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(auth_ok(&state, &headers, None));
    }

    #[tokio::test]
    async fn provider_commands_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);

        handle_invoke(&state, "upsert_provider", provider_args("p1")).await.unwrap();
        let list = handle_invoke(&state, "get_providers", Value::Null).await.unwrap();
        assert_eq!(list[0]["id"], "p1");
        assert_eq!(list[0]["baseUrl"], "https://api.example.com");

        handle_invoke(&state, "set_default_provider", json!({"id": "p1"})).await.unwrap();
        let default = handle_invoke(&state, "get_default_provider", Value::Null).await.unwrap();
        assert_eq!(default["id"], "p1");

        let removed = handle_invoke(&state, "delete_provider", json!({"id": "p1"})).await.unwrap();
        assert_eq!(removed, json!(true));
        let default = handle_invoke(&state, "get_default_provider", Value::Null).await.unwrap();
        assert!(default.is_null());
    }

    #[tokio::test]
    async fn mode_commands_broadcast_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);
        let mut rx = state.events.subscribe();

        let status = handle_invoke(&state, "start_proxy_monitoring", Value::Null).await.unwrap();
        assert_eq!(status["mode"], "monitoring");
        let evt = rx.try_recv().unwrap();
        assert_eq!(evt.event, STATUS_EVENT);
        assert_eq!(evt.payload["mode"], "monitoring");

        let running = handle_invoke(&state, "is_proxy_running", Value::Null).await.unwrap();
        assert_eq!(running, json!(true));
        let err = handle_invoke(&state, "switch_proxy_provider", json!({"providerId": "p1"}))
            .await
            .unwrap_err();
        assert!(err.contains("takeover"));

        let status = handle_invoke(&state, "stop_proxy_with_restore", Value::Null).await.unwrap();
        assert_eq!(status["mode"], "stopped");
        assert_eq!(rx.try_recv().unwrap().payload["running"], json!(false));
    }

    #[tokio::test]
    async fn usage_queries_validate_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);

        let trends = handle_invoke(&state, "get_usage_trends", json!({"days": 7})).await.unwrap();
        assert_eq!(trends.as_array().unwrap().len(), 7);
        assert!(handle_invoke(&state, "get_usage_trends", json!({"days": 14})).await.is_err());

        let summary = handle_invoke(
            &state,
            "get_usage_summary",
            json!({"startDate": 0, "endDate": 86_400}),
        )
        .await
        .unwrap();
        assert_eq!(summary["totalRequests"], 0);
        assert!(handle_invoke(&state, "get_usage_summary", json!({"startDate": 10, "endDate": 5}))
            .await
            .is_err());

        let logs = handle_invoke(&state, "get_request_logs", json!({"page": 0})).await.unwrap();
        assert_eq!(logs["total"], 0);
    }

    #[tokio::test]
    async fn integer_arguments_are_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);

        // 2^32 + 7 must not wrap around to 7
        let err = handle_invoke(&state, "get_usage_trends", json!({"days": 4_294_967_303u64}))
            .await
            .unwrap_err();
        assert!(err.contains("4294967303"), "{err}");
        assert!(handle_invoke(&state, "get_usage_trends", json!({"days": -7}))
            .await
            .is_err());

        for args in [
            json!({"page": 4_294_967_296u64}),
            json!({"pageSize": 4_294_967_316u64}),
            json!({"page": "1"}),
        ] {
            assert!(handle_invoke(&state, "get_request_logs", args).await.is_err());
        }
        let logs = handle_invoke(&state, "get_request_logs", json!({"page": 1, "pageSize": 5}))
            .await
            .unwrap();
        assert_eq!(logs["pageSize"], 5);
    }

    #[tokio::test]
    async fn proxy_config_commands() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);
        let mut rx = state.events.subscribe();

        let config = handle_invoke(&state, "get_proxy_config", Value::Null).await.unwrap();
        assert_eq!(config["listenAddress"], "127.0.0.1");

        let update = json!({"config": {"listenAddress": "127.0.0.1", "listenPort": 18321}});
        handle_invoke(&state, "update_proxy_config", update).await.unwrap();
        let config = handle_invoke(&state, "get_proxy_config", Value::Null).await.unwrap();
        assert_eq!(config["listenPort"], 18321);
        assert_eq!(rx.try_recv().unwrap().payload["port"], 18321);

        let bad = json!({"config": {"listenAddress": "localhost", "listenPort": 18321}});
        assert!(handle_invoke(&state, "update_proxy_config", bad).await.is_err());
        assert!(handle_invoke(&state, "update_proxy_config", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn env_conflicts_command_reads_shell_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);
        std::fs::write(
            dir.path().join("home/.bashrc"),
            "export OPENAI_BASE_URL=https://relay.example.com/v1
",
        )
        .unwrap();

        let found = handle_invoke(&state, "check_env_conflicts", json!({"app": "codex"}))
            .await
            .unwrap();
        let from_file: Vec<&Value> = found
            .as_array()
            .unwrap()
            .iter()
            .filter(|c| c["sourceType"] == "file")
            .collect();
        assert_eq!(from_file.len(), 1);
        assert_eq!(from_file[0]["varName"], "OPENAI_BASE_URL");

        assert!(handle_invoke(&state, "check_env_conflicts", json!({"app": "cursor"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = server_state(&dir);
        let err = handle_invoke(&state, "get_skills", Value::Null).await.unwrap_err();
        assert!(err.contains("unsupported command"));
    }
}
