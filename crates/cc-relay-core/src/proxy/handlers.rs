use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use super::error::ProxyError;
use super::forwarder::{is_hop_by_hop, Forwarder};
use super::model_mapper;
use super::provider_router::ProviderRouter;
use super::usage::logger::RequestLogGuard;
use crate::services::usage_stats::UsageStatsService;

const MAX_REQUEST_BODY_BYTES: usize = 200 * 1024 * 1024;

/// Everything a request handler needs. Cloned per request.
#[derive(Clone)]
pub struct ProxyContext {
    pub router: Arc<ProviderRouter>,
    pub forwarder: Arc<Forwarder>,
    pub usage: Arc<UsageStatsService>,
}

pub(crate) async fn health(State(ctx): State<ProxyContext>) -> Json<serde_json::Value> {
    let route = ctx.router.snapshot();
    Json(json!({
        "status": "healthy",
        "mode": route.mode,
        "provider": route.provider.as_ref().map(|p| p.id.clone()),
    }))
}

pub(crate) async fn proxy_request(State(ctx): State<ProxyContext>, req: Request) -> Response {
    let started = Instant::now();
    // 每个请求只读取一次路由快照
    let route = ctx.router.snapshot();
    let Some(provider) = route.provider else {
        log::warn!("[Proxy] 未选择上游供应商，拒绝 {}", req.uri().path());
        return ProxyError::NoUpstream.into_response();
    };

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read request body: {e}"))
                .into_response()
        }
    };

    let query = parts.uri.query().map(str::to_string);
    let mapped = model_mapper::map_request(&provider, parts.uri.path(), body);

    let mut guard = RequestLogGuard::new(
        ctx.usage.clone(),
        &provider.id,
        mapped.model,
        route.mode,
        started,
    );

    let upstream = match ctx
        .forwarder
        .send(
            &provider,
            parts.method,
            &mapped.path,
            query.as_deref(),
            &parts.headers,
            mapped.body,
        )
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            log::warn!(
                "[Proxy] {} 上游请求失败 ({}): {err}",
                guard.request_id(),
                provider.id
            );
            guard.fail(err.status_code().as_u16(), err.to_string());
            return err.into_response();
        }
    };

    let status = upstream.status();
    let is_streaming = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false);
    guard.on_response(status.as_u16(), is_streaming);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    *response.body_mut() = Body::from_stream(relay_body(upstream.bytes_stream(), guard));
    response
}

/// Passes upstream chunks through as they arrive while feeding the usage
/// collector. Dropping the returned stream (client gone) drops the guard and
/// the upstream connection with it.
fn relay_body<S>(
    upstream: S,
    mut guard: RequestLogGuard,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    guard.observe(&bytes);
                    yield Ok(bytes);
                }
                Err(err) => {
                    let err = ProxyError::from_reqwest(err);
                    log::warn!("[Proxy] {} 上游响应中断: {err}", guard.request_id());
                    guard.interrupted(err.to_string());
                    yield Err(std::io::Error::other(err.to_string()));
                    return;
                }
            }
        }
        guard.complete();
    }
}
