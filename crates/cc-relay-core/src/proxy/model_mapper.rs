//! Model alias rewriting.
//!
//! The model lives either in the JSON body (`model` field) or, for Gemini,
//! in the path (`/models/{model}:method`). An alias is rewritten where it was
//! found and nowhere else; without an alias the request goes upstream
//! unchanged.

use bytes::Bytes;
use serde_json::Value;

use crate::provider::ProviderConfig;

const MODELS_SEGMENT: &str = "/models/";

/// Request as it will be sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRequest {
    pub path: String,
    pub body: Bytes,
    /// Model the upstream is asked to serve.
    pub model: Option<String>,
}

/// `model` from a JSON request body.
pub fn extract_model(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("model")?
        .as_str()
        .map(str::to_string)
}

/// Gemini puts the model in the path: `/v1beta/models/{model}:generateContent`.
/// Returns its byte range.
fn path_model_span(path: &str) -> Option<(usize, usize)> {
    let start = path.find(MODELS_SEGMENT)? + MODELS_SEGMENT.len();
    let len = path[start..].find([':', '/']).unwrap_or(path.len() - start);
    (len > 0).then_some((start, start + len))
}

pub fn map_request(provider: &ProviderConfig, path: &str, body: Bytes) -> MappedRequest {
    if let Some(requested) = extract_model(&body) {
        return map_body(provider, path, body, requested);
    }
    match path_model_span(path) {
        Some((start, end)) => {
            let requested = &path[start..end];
            let Some(mapped) = provider.map_model(requested) else {
                return MappedRequest {
                    path: path.to_string(),
                    body,
                    model: Some(requested.to_string()),
                };
            };
            log::debug!("[Proxy] 路径模型映射: {requested} -> {mapped}");
            MappedRequest {
                path: format!("{}{mapped}{}", &path[..start], &path[end..]),
                body,
                model: Some(mapped.to_string()),
            }
        }
        None => MappedRequest {
            path: path.to_string(),
            body,
            model: None,
        },
    }
}

fn map_body(
    provider: &ProviderConfig,
    path: &str,
    body: Bytes,
    requested: String,
) -> MappedRequest {
    let unchanged = |body: Bytes, model: String| MappedRequest {
        path: path.to_string(),
        body,
        model: Some(model),
    };
    let Some(mapped) = provider.map_model(&requested) else {
        return unchanged(body, requested);
    };

    let mut value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return unchanged(body, requested),
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("model".into(), Value::String(mapped.to_string()));
    }
    match serde_json::to_vec(&value) {
        Ok(rewritten) => {
            log::debug!("[Proxy] 模型映射: {requested} -> {mapped}");
            unchanged(Bytes::from(rewritten), mapped.to_string())
        }
        Err(_) => unchanged(body, requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn provider() -> ProviderConfig {
        let mut model_map = IndexMap::new();
        model_map.insert("claude-sonnet-4".to_string(), "glm-4.6".to_string());
        model_map.insert("gemini-2.5-pro".to_string(), "vendor-gemini".to_string());
        ProviderConfig {
            id: "p".into(),
            name: "p".into(),
            base_url: "https://p.example.com".into(),
            api_key: "k".into(),
            model_map,
        }
    }

    #[test]
    fn unmapped_body_is_forwarded_verbatim() {
        let raw = Bytes::from_static(b"{ \"model\" : \"gpt-4o\",  \"stream\": true }");
        let out = map_request(&provider(), "/v1/chat/completions", raw.clone());
        assert_eq!(out.body, raw);
        assert_eq!(out.path, "/v1/chat/completions");
        assert_eq!(out.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn mapped_model_rewrites_only_model_field() {
        let raw =
            Bytes::from_static(br#"{"model":"claude-sonnet-4","max_tokens":5,"messages":[]}"#);
        let out = map_request(&provider(), "/v1/messages", raw);
        let v: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(v["model"], "glm-4.6");
        assert_eq!(v["max_tokens"], 5);
        assert_eq!(out.path, "/v1/messages");
        assert_eq!(out.model.as_deref(), Some("glm-4.6"));
    }

    #[test]
    fn gemini_path_alias_rewrites_path_and_keeps_body() {
        let raw = Bytes::from_static(br#"{"contents":[{"parts":[{"text":"hi"}]}]}"#);
        let out = map_request(
            &provider(),
            "/v1beta/models/gemini-2.5-pro:generateContent",
            raw.clone(),
        );
        assert_eq!(out.body, raw);
        assert_eq!(out.path, "/v1beta/models/vendor-gemini:generateContent");
        assert_eq!(out.model.as_deref(), Some("vendor-gemini"));
    }

    #[test]
    fn unmapped_gemini_path_is_untouched() {
        let raw = Bytes::from_static(br#"{"contents":[]}"#);
        let path = "/v1beta/models/gemini-2.0-flash:streamGenerateContent";
        let out = map_request(&provider(), path, raw.clone());
        assert_eq!(out.body, raw);
        assert_eq!(out.path, path);
        assert_eq!(out.model.as_deref(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn model_span_in_gemini_path() {
        let model = |p: &'static str| path_model_span(p).map(|(s, e)| &p[s..e]);
        assert_eq!(
            model("/v1beta/models/gemini-2.5-pro:streamGenerateContent"),
            Some("gemini-2.5-pro")
        );
        assert_eq!(model("/v1beta/models/gemini-2.5-pro"), Some("gemini-2.5-pro"));
        assert_eq!(model("/v1/messages"), None);
        assert_eq!(model("/v1beta/models/"), None);
    }
}
