//! Token usage extraction.
//!
//! Chunks are fed in as they pass through the proxy, so nothing is held back
//! from the client. SSE bodies are scanned line by line; plain JSON bodies
//! are buffered (up to a cap) and parsed once the body ends.

use serde_json::Value;

use super::{stored_count, TokenUsage};

/// Plain JSON bodies larger than this are forwarded but not parsed.
const MAX_JSON_BUFFER: usize = 8 * 1024 * 1024;
/// A single SSE line longer than this is skipped.
const MAX_SSE_LINE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct UsageCollector {
    streaming: bool,
    buf: Vec<u8>,
    overflowed: bool,
    usage: TokenUsage,
    model: Option<String>,
}

impl UsageCollector {
    pub fn new(streaming: bool) -> Self {
        Self {
            streaming,
            buf: Vec::new(),
            overflowed: false,
            usage: TokenUsage::default(),
            model: None,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.streaming {
            self.feed_sse(chunk);
        } else if !self.overflowed {
            if self.buf.len() + chunk.len() > MAX_JSON_BUFFER {
                self.overflowed = true;
                self.buf = Vec::new();
            } else {
                self.buf.extend_from_slice(chunk);
            }
        }
    }

    pub fn finish(&mut self) -> TokenUsage {
        if self.streaming {
            if !self.buf.is_empty() {
                let line = std::mem::take(&mut self.buf);
                self.handle_sse_line(&line);
            }
        } else if !self.overflowed && !self.buf.is_empty() {
            let body = std::mem::take(&mut self.buf);
            if let Ok(value) = serde_json::from_slice::<Value>(&body) {
                self.absorb(&value);
            }
        }
        self.usage
    }

    /// Model name reported by the upstream, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn feed_sse(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.overflowed {
                self.overflowed = false;
                self.buf.clear();
                continue;
            }
            self.buf.extend_from_slice(head);
            let line = std::mem::take(&mut self.buf);
            self.handle_sse_line(&line);
        }
        if !rest.is_empty() && !self.overflowed {
            if self.buf.len() + rest.len() > MAX_SSE_LINE {
                self.overflowed = true;
                self.buf.clear();
            } else {
                self.buf.extend_from_slice(rest);
            }
        }
    }

    fn handle_sse_line(&mut self, line: &[u8]) {
        let Ok(line) = std::str::from_utf8(line) else {
            return;
        };
        let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            self.absorb(&value);
        }
    }

    fn absorb(&mut self, value: &Value) {
        if let Some(found) = extract_usage(value) {
            // 流式计数是累计值，取最大即可
            self.usage.input_tokens = self.usage.input_tokens.max(found.input_tokens);
            self.usage.output_tokens = self.usage.output_tokens.max(found.output_tokens);
        }
        if self.model.is_none() {
            self.model = extract_model(value);
        }
    }
}

/// Counts come from the upstream unchecked.
fn as_u64(v: Option<&Value>) -> Option<u64> {
    v.and_then(Value::as_u64).map(stored_count)
}

/// Usage from one Anthropic / OpenAI / Gemini payload or stream event.
pub fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let candidates = [
        value.get("usage"),
        value.get("message").and_then(|m| m.get("usage")),
        value.get("response").and_then(|r| r.get("usage")),
    ];
    for usage in candidates.into_iter().flatten() {
        let input =
            as_u64(usage.get("input_tokens")).or_else(|| as_u64(usage.get("prompt_tokens")));
        let output =
            as_u64(usage.get("output_tokens")).or_else(|| as_u64(usage.get("completion_tokens")));
        if input.is_some() || output.is_some() {
            return Some(TokenUsage {
                input_tokens: input.unwrap_or(0),
                output_tokens: output.unwrap_or(0),
            });
        }
    }

    let meta = value.get("usageMetadata")?;
    Some(TokenUsage {
        input_tokens: as_u64(meta.get("promptTokenCount")).unwrap_or(0),
        output_tokens: as_u64(meta.get("candidatesTokenCount")).unwrap_or(0),
    })
}

fn extract_model(value: &Value) -> Option<String> {
    value
        .get("model")
        .or_else(|| value.get("message").and_then(|m| m.get("model")))
        .or_else(|| value.get("response").and_then(|r| r.get("model")))
        .or_else(|| value.get("modelVersion"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
