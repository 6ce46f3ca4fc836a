//! WebDriver-style `{value: ...}` envelopes.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::DriverError;

fn blob_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{.+?=(.+?)\}").expect("static regex"))
}

/// Detect a logical error inside a response body.
///
/// A body shaped like `{value: {error, message, traceback|stacktrace}}` with a
/// non-empty `error` is a failure regardless of the HTTP status.
pub fn detect_error(body: &[u8]) -> Option<DriverError> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    let value = parsed.get("value")?.as_object()?;

    let error = value.get("error")?.as_str()?.trim();
    if error.is_empty() {
        return None;
    }

    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let traceback = value
        .get("traceback")
        .or_else(|| value.get("stacktrace"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Some(DriverError::Backend {
        error: error.to_string(),
        message: extract_message(message),
        traceback,
    })
}

/// Pull the innermost value out of a stringified `{key = value}` blob,
/// returning the message untouched when it has no such shape.
pub fn extract_message(message: &str) -> String {
    blob_pattern()
        .captures_iter(message)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_matches('"').to_string())
        .unwrap_or_else(|| message.to_string())
}

/// Unwrap the `value` member of an envelope, or the whole document if absent.
pub fn unwrap_value(body: &[u8]) -> Option<Value> {
    let mut parsed: Value = serde_json::from_slice(body).ok()?;
    match parsed.get_mut("value") {
        Some(value) => Some(value.take()),
        None => Some(parsed),
    }
}
