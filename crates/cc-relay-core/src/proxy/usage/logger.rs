use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use super::calculator::calculate_cost;
use super::parser::UsageCollector;
use super::{RequestOutcome, RequestRecord};
use crate::proxy::types::ProxyMode;
use crate::services::usage_stats::UsageStatsService;

/// Status recorded when the client leaves before upstream headers arrive.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Emits exactly one `RequestRecord` for a proxied request.
///
/// The guard travels with the response body stream. If the stream is dropped
/// before `finish` (client disconnect, handler cancelled) the record is
/// emitted from `Drop` with outcome `Aborted`. Records are handed to the
/// usage writer thread; nothing here touches SQLite.
pub(crate) struct RequestLogGuard {
    usage: Arc<UsageStatsService>,
    request_id: String,
    provider_id: String,
    model: Option<String>,
    mode: ProxyMode,
    started: Instant,
    status_code: Option<u16>,
    is_streaming: bool,
    collector: UsageCollector,
    done: bool,
}

impl RequestLogGuard {
    pub(crate) fn new(
        usage: Arc<UsageStatsService>,
        provider_id: &str,
        model: Option<String>,
        mode: ProxyMode,
        started: Instant,
    ) -> Self {
        Self {
            usage,
            request_id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            model,
            mode,
            started,
            status_code: None,
            is_streaming: false,
            collector: UsageCollector::new(false),
            done: false,
        }
    }

    pub(crate) fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Upstream headers arrived.
    pub(crate) fn on_response(&mut self, status: u16, is_streaming: bool) {
        self.status_code = Some(status);
        self.is_streaming = is_streaming;
        self.collector = UsageCollector::new(is_streaming);
    }

    pub(crate) fn observe(&mut self, chunk: &[u8]) {
        self.collector.feed(chunk);
    }

    /// Body fully relayed.
    pub(crate) fn complete(&mut self) {
        let outcome = match self.status_code {
            Some(code) if (200..400).contains(&code) => RequestOutcome::Success,
            _ => RequestOutcome::UpstreamError,
        };
        self.emit(outcome, None);
    }

    /// No upstream response; `status` is what the proxy answered with.
    pub(crate) fn fail(&mut self, status: u16, message: String) {
        self.status_code = Some(status);
        self.emit(RequestOutcome::UpstreamError, Some(message));
    }

    /// Upstream broke off after headers were relayed.
    pub(crate) fn interrupted(&mut self, message: String) {
        self.emit(RequestOutcome::UpstreamError, Some(message));
    }

    fn emit(&mut self, outcome: RequestOutcome, error_message: Option<String>) {
        if self.done {
            return;
        }
        self.done = true;

        let tokens = self.collector.finish();
        let model = self
            .model
            .clone()
            .or_else(|| self.collector.model().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        let record = RequestRecord {
            request_id: self.request_id.clone(),
            timestamp: Utc::now(),
            provider_id: self.provider_id.clone(),
            cost: calculate_cost(&model, tokens),
            model,
            tokens_in: tokens.input_tokens,
            tokens_out: tokens.output_tokens,
            latency_ms: self.started.elapsed().as_millis() as u64,
            status_code: self.status_code.unwrap_or(CLIENT_CLOSED_REQUEST),
            mode: self.mode,
            outcome,
            is_streaming: self.is_streaming,
            error_message,
        };

        log::debug!(
            "[Usage] {} {} {} status={} in={} out={} {}ms",
            record.request_id,
            record.provider_id,
            record.model,
            record.status_code,
            record.tokens_in,
            record.tokens_out,
            record.latency_ms
        );
        self.usage.submit(record);
    }
}

impl Drop for RequestLogGuard {
    fn drop(&mut self) {
        if !self.done {
            log::info!("[Proxy] 请求 {} 被客户端中断", self.request_id);
            self.emit(RequestOutcome::Aborted, Some("client disconnected".to_string()));
        }
    }
}
