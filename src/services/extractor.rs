//! Pull the artifact URL out of a completed task.

use serde_json::Value;

use crate::models::task::ExternalTask;

/// Task fields that may hold the artifact, in priority order.
const RESULT_FIELDS: &[&str] = &["result_url", "image_url", "url", "result", "images", "output"];

/// Keys tried inside a nested object.
const NESTED_URL_KEYS: &[&str] = &["url", "image_url", "src"];

/// Canonical artifact URL for `task`, or `None` when no recognised field
/// holds a usable value. Relative paths are prefixed with `origin`.
pub fn extract(task: &ExternalTask, origin: &str) -> Option<String> {
    RESULT_FIELDS
        .iter()
        .filter_map(|field| task.payload.get(*field))
        .find_map(|value| resolve(value, origin))
}

/// First usable URL inside `value`, normalized against `origin`.
fn resolve(value: &Value, origin: &str) -> Option<String> {
    match value {
        Value::String(s) => normalize(s.trim(), origin),
        Value::Object(map) => NESTED_URL_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .filter_map(Value::as_str)
            .find_map(|s| normalize(s.trim(), origin)),
        Value::Array(items) => items.iter().find_map(|item| resolve(item, origin)),
        _ => None,
    }
}

fn normalize(raw: &str, origin: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return Some(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("//") {
        let scheme = origin.split("://").next().unwrap_or("https");
        return Some(format!("{scheme}://{rest}"));
    }
    if lowered.starts_with("data:") || lowered.starts_with("javascript:") {
        return None;
    }

    let origin = origin.trim_end_matches('/');
    let path = raw.trim_start_matches('/');
    Some(format!("{origin}/{path}"))
}
