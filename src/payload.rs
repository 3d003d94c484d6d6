//! Shaping of inbound chat-completion bodies before they go upstream.
//!
//! Bodies stay as untyped JSON maps: the relay only needs to look at a few
//! keys, and anything it does not recognise is dropped rather than rejected.

use serde_json::{Map, Value};

/// Request fields Azure's chat-completions endpoint accepts.
pub const ALLOWED_PARAMS: &[&str] = &[
    "messages",
    "temperature",
    "role",
    "content",
    "contentPart",
    "contentPartImage",
    "enhancements",
    "dataSources",
    "n",
    "stream",
    "stop",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "user",
    "function_call",
    "functions",
    "tools",
    "tool_choice",
    "top_p",
    "log_probs",
    "top_logprobs",
    "response_format",
    "seed",
];

pub type Payload = Map<String, Value>;

#[must_use]
pub fn is_allowed(key: &str) -> bool {
    ALLOWED_PARAMS.contains(&key)
}

/// Result of projecting a payload onto [`ALLOWED_PARAMS`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPayload {
    pub body: Payload,
    /// Keys removed from the input, sorted.
    pub dropped: Vec<String>,
}

/// Collapse a structured `user` into the plain string Azure expects.
///
/// Strings are left alone. Objects with an `id` use that id; anything else is
/// replaced by its compact JSON rendering.
pub fn normalize_user(payload: &mut Payload) {
    let Some(user) = payload.get_mut("user") else {
        return;
    };
    if user.is_string() {
        return;
    }

    let replacement = match user.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(id) => id.to_string(),
        None => user.to_string(),
    };
    *user = Value::String(replacement);
}

/// Keep only allow-listed keys. Never fails: unknown keys are reported in
/// [`FilteredPayload::dropped`].
#[must_use]
pub fn filter_params(payload: Payload) -> FilteredPayload {
    let mut body = Payload::new();
    let mut dropped = Vec::new();

    for (key, value) in payload {
        if is_allowed(&key) {
            body.insert(key, value);
        } else {
            dropped.push(key);
        }
    }
    dropped.sort();

    FilteredPayload { body, dropped }
}

/// Streaming is requested only by a literal boolean `true`; truthy values
/// such as `1` or `"true"` select buffered mode.
#[must_use]
pub fn is_streaming(body: &Payload) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_string_user_is_untouched() {
        let mut body = payload(json!({ "user": "alice" }));
        normalize_user(&mut body);
        assert_eq!(body["user"], "alice");
    }

    #[test]
    fn test_user_object_uses_id() {
        let mut body = payload(json!({ "user": { "id": "u123", "name": "Alice" } }));
        normalize_user(&mut body);
        assert_eq!(body["user"], "u123");
    }

    #[test]
    fn test_user_object_without_id_is_rendered() {
        let mut body = payload(json!({ "user": { "name": "Alice" } }));
        normalize_user(&mut body);
        assert_eq!(body["user"], r#"{"name":"Alice"}"#);
    }

    #[test]
    fn test_non_string_id_and_scalars_are_rendered() {
        let mut numeric_id = payload(json!({ "user": { "id": 42 } }));
        normalize_user(&mut numeric_id);
        assert_eq!(numeric_id["user"], "42");

        let mut scalar = payload(json!({ "user": 7 }));
        normalize_user(&mut scalar);
        assert_eq!(scalar["user"], "7");
    }

    #[test]
    fn test_missing_user_is_noop() {
        let mut body = payload(json!({ "messages": [] }));
        normalize_user(&mut body);
        assert!(!body.contains_key("user"));
    }

    #[test]
    fn test_filter_is_set_intersection() {
        let input = payload(json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "temperature": 0.2,
            "stream": true,
            "model": "gpt-4o",
            "chat_id": "abc",
            "metadata": {},
        }));
        let keys: Vec<String> = input.keys().cloned().collect();

        let filtered = filter_params(input);

        let mut kept: Vec<&str> = filtered.body.keys().map(String::as_str).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec!["messages", "stream", "temperature"]);
        assert_eq!(filtered.dropped, vec!["chat_id", "metadata", "model"]);

        for key in keys {
            assert_ne!(
                filtered.body.contains_key(&key),
                filtered.dropped.contains(&key),
                "{key} must be kept or dropped, not both"
            );
        }
    }

    #[test]
    fn test_filter_nothing_dropped() {
        let filtered = filter_params(payload(json!({ "seed": 1, "n": 2 })));
        assert!(filtered.dropped.is_empty());
        assert_eq!(filtered.body.len(), 2);
    }

    #[test]
    fn test_stream_flag() {
        assert!(is_streaming(&payload(json!({ "stream": true }))));
        assert!(!is_streaming(&payload(json!({ "stream": false }))));
        assert!(!is_streaming(&payload(json!({ "stream": "true" }))));
        assert!(!is_streaming(&payload(json!({ "stream": 1 }))));
        assert!(!is_streaming(&Payload::new()));
    }
}
