//! Error-message extraction for REST responses.
//!
//! The backend reports failures as `{"message": ...}` where `message` is a
//! string or a list of validation messages.

use serde_json::Value;

/// Shown when a response carries no usable message.
pub const FALLBACK_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Extract the user-facing message from an error response body.
#[must_use]
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| message_from_value(&value))
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

/// Extract the message from an already-parsed error body.
#[must_use]
pub fn message_from_value(value: &Value) -> Option<String> {
    match value.get("message")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}
