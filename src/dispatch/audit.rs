//! Argument rendering for the per-request audit line
//!
//! Values under credential-like keys and strings that look like bearer credentials are masked.
//! Long strings are cut so a single large request cannot flood the log.

use serde_json::{Map, Value};

const REDACTED: &str = "[REDACTED]";
const MAX_LOGGED_CHARS: usize = 128;

const SENSITIVE_KEYS: [&str; 5] = ["authorization", "bearer", "api_key", "apikey", "key"];
const SENSITIVE_FRAGMENTS: [&str; 4] = ["token", "secret", "password", "credential"];

/// Copy of `arguments` that is safe to log.
pub fn audit_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    let item = if is_sensitive_key(key) {
                        Value::from(REDACTED)
                    } else {
                        audit_arguments(item)
                    };
                    (key.clone(), item)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(audit_arguments).collect()),
        Value::String(text) => Value::String(shorten(text)),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str())
        || SENSITIVE_FRAGMENTS
            .iter()
            .any(|fragment| key.contains(fragment))
}

fn shorten(text: &str) -> String {
    let is_bearer = text
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "));
    if is_bearer {
        return REDACTED.to_string();
    }

    match text.char_indices().nth(MAX_LOGGED_CHARS) {
        Some((cut, _)) => format!("{}... ({} bytes)", &text[..cut], text.len()),
        None => text.to_string(),
    }
}
