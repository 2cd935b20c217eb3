//! Outbound request construction.
//!
//! The upstream request keeps the client's method, path, query, headers and
//! body. Only the host and the credential are replaced; the credential goes
//! into whichever slot the client used for the proxy token.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Method;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use super::error::ProxyError;
use crate::error::AppError;
use crate::provider::ProviderConfig;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers that describe a single hop (or framing) and are never copied.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || *name == header::HOST || *name == header::CONTENT_LENGTH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CredentialSlot {
    /// Anthropic style `x-api-key`.
    XApiKey,
    Bearer,
    /// Gemini style `x-goog-api-key`.
    GoogApiKey,
    /// Gemini `?key=` query parameter.
    QueryKey,
}

const X_API_KEY: &str = "x-api-key";
const X_GOOG_API_KEY: &str = "x-goog-api-key";

pub(crate) fn detect_credential_slot(headers: &HeaderMap, query: Option<&str>) -> CredentialSlot {
    if headers.contains_key(X_API_KEY) {
        CredentialSlot::XApiKey
    } else if headers.contains_key(header::AUTHORIZATION) {
        CredentialSlot::Bearer
    } else if headers.contains_key(X_GOOG_API_KEY) {
        CredentialSlot::GoogApiKey
    } else if query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, _)| k == "key"))
        .unwrap_or(false)
    {
        CredentialSlot::QueryKey
    } else {
        CredentialSlot::Bearer
    }
}

/// `base_url` + inbound path + query. A `/v1` present on both sides is kept once.
pub(crate) fn build_upstream_url(
    base_url: &str,
    path: &str,
    query: Option<&str>,
    slot: CredentialSlot,
    api_key: &str,
) -> Result<Url, ProxyError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| AppError::InvalidInput(format!("bad provider base_url '{base_url}': {e}")))?;

    let base_path = url.path().trim_end_matches('/').to_string();
    let path = if base_path.ends_with("/v1") && (path == "/v1" || path.starts_with("/v1/")) {
        &path[3..]
    } else {
        path
    };
    url.set_path(&format!("{base_path}{path}"));
    url.set_query(query);

    if slot == CredentialSlot::QueryKey {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "key" { api_key.to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Ok(url)
}

pub(crate) fn outbound_headers(
    inbound: &HeaderMap,
    slot: CredentialSlot,
    api_key: &str,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || *name == header::AUTHORIZATION
            || *name == X_API_KEY
            || *name == X_GOOG_API_KEY
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let credential = |raw: String| {
        HeaderValue::from_str(&raw)
            .map(|mut v| {
                v.set_sensitive(true);
                v
            })
            .map_err(|_| {
                AppError::InvalidInput("provider api key is not a valid header value".into())
            })
    };
    match slot {
        CredentialSlot::XApiKey => {
            headers.insert(X_API_KEY, credential(api_key.to_string())?);
        }
        CredentialSlot::Bearer => {
            headers.insert(header::AUTHORIZATION, credential(format!("Bearer {api_key}"))?);
        }
        CredentialSlot::GoogApiKey => {
            headers.insert(X_GOOG_API_KEY, credential(api_key.to_string())?);
        }
        CredentialSlot::QueryKey => {}
    }
    Ok(headers)
}

pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// No overall request timeout: streaming responses may run for minutes.
    /// `idle_timeout` bounds the gap between two reads instead.
    pub fn new(connect_timeout: Duration, idle_timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(idle_timeout)
            .no_proxy()
            .build()
            .map_err(|e| AppError::Message(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub(crate) async fn send(
        &self,
        provider: &ProviderConfig,
        method: Method,
        path: &str,
        query: Option<&str>,
        inbound: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let slot = detect_credential_slot(inbound, query);
        let url = build_upstream_url(&provider.base_url, path, query, slot, &provider.api_key)?;
        let headers = outbound_headers(inbound, slot, &provider.api_key)?;

        log::debug!("[Proxy] {method} {path} -> {} ({})", provider.host(), provider.id);
        self.client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(ProxyError::from_reqwest)
    }
}
