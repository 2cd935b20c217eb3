//! Loopback listener lifecycle.

use axum::routing::get;
use axum::Router;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::error::ProxyError;
use super::handlers::{self, ProxyContext};
use super::types::ProxyServerInfo;
use crate::error::AppError;

/// How long `stop` waits for in-flight responses before cutting them off.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub(crate) fn router(ctx: ProxyContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .fallback(handlers::proxy_request)
        .with_state(ctx)
}

pub struct ProxyServer {
    info: ProxyServerInfo,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ProxyServer {
    pub async fn start(address: &str, port: u16, ctx: ProxyContext) -> Result<Self, ProxyError> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| AppError::Config(format!("listen address must be an IP: {address}")))?;
        let addr = SocketAddr::new(ip, port);

        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => ProxyError::PortInUse {
                address: address.to_string(),
                port,
            },
            _ => ProxyError::Io(AppError::io(addr.to_string(), e)),
        })?;
        let local = listener
            .local_addr()
            .map_err(|e| AppError::io(addr.to_string(), e))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(ctx);
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                log::error!("[Proxy] 代理服务器异常退出: {e}");
            }
        });

        let info = ProxyServerInfo {
            address: local.ip().to_string(),
            port: local.port(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        log::info!("[Proxy] 代理服务器已启动: {}:{}", info.address, info.port);
        Ok(Self {
            info,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn info(&self) -> &ProxyServerInfo {
        &self.info
    }

    /// Stops accepting connections and waits (bounded) for open ones.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                log::warn!("[Proxy] 等待连接关闭超时，强制停止");
                task.abort();
            }
        }
        log::info!("[Proxy] 代理服务器已停止: {}:{}", self.info.address, self.info.port);
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
