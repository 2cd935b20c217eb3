use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use super::types::ProxyMode;
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("port {port} on {address} is already in use")]
    PortInUse { address: String, port: u16 },

    #[error("proxy is already running ({0})")]
    AlreadyRunning(ProxyMode),

    #[error(transparent)]
    Io(#[from] AppError),

    /// Configs rewritten before the failure have been put back.
    #[error("takeover of {app} failed: {reason}{}", rollback_note(.rollback_failures))]
    TakeoverStartFailed {
        app: String,
        reason: String,
        rollback_failures: Vec<String>,
    },

    /// The proxy is stopped regardless.
    #[error("failed to restore config for: {}", .failed.join(", "))]
    PartialRestoreFailure { failed: Vec<String> },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("hot swap requires takeover mode (current: {0})")]
    NotInTakeover(ProxyMode),

    #[error("no upstream provider selected")]
    NoUpstream,

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("unsupported query range: {0}")]
    UnknownQueryRange(String),
}

fn rollback_note(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(" (rollback also failed for: {})", failures.join(", "))
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UnknownProvider(_) | ProxyError::UnknownQueryRange(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::AlreadyRunning(_)
            | ProxyError::NotInTakeover(_)
            | ProxyError::PortInUse { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::UpstreamTimeout(err.to_string())
        } else {
            ProxyError::UpstreamUnreachable(err.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "type": "error",
            "error": {
                "type": "proxy_error",
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_map_to_gateway_statuses() {
        assert_eq!(
            ProxyError::UpstreamUnreachable("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn partial_restore_lists_tools() {
        let err = ProxyError::PartialRestoreFailure {
            failed: vec!["codex".into(), "gemini".into()],
        };
        assert_eq!(err.to_string(), "failed to restore config for: codex, gemini");
    }
}
