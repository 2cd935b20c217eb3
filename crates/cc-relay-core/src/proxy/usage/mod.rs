//! Per-request usage capture: the record type, token extraction from
//! response bodies, pricing, and the guard that emits one record per request.

pub mod calculator;
pub(crate) mod logger;
pub mod parser;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::proxy::types::ProxyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    /// Upstream answered with an error status, failed to connect, timed out,
    /// or broke off mid-body.
    UpstreamError,
    /// The client went away before the response completed.
    Aborted,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::UpstreamError => "upstream_error",
            RequestOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RequestOutcome::Success),
            "upstream_error" => Ok(RequestOutcome::UpstreamError),
            "aborted" => Ok(RequestOutcome::Aborted),
            other => Err(AppError::InvalidInput(format!("unknown outcome: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Largest count the request log can hold (SQLite INTEGER is signed).
pub(crate) fn stored_count(n: u64) -> u64 {
    n.min(i64::MAX as u64)
}

/// One completed (or abandoned) proxied request. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub provider_id: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: Decimal,
    pub latency_ms: u64,
    pub status_code: u16,
    pub mode: ProxyMode,
    pub outcome: RequestOutcome,
    pub is_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
