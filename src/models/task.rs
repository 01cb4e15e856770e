//! The rendering service's view of a job, read from its queue-list endpoint.
//!
//! The service is loose about response shapes (ids arrive as numbers or
//! strings, the list may sit under different keys), so parsing works on
//! `serde_json::Value` and skips anything it cannot make sense of.

use serde_json::Value;

/// External status code, as reported per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

/// Fields that may carry a human-readable failure reason.
const ERROR_FIELDS: &[&str] = &["error", "fail_reason", "err_msg", "message"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTask {
    pub id: Option<i64>,
    pub queue_id: i64,
    pub status: TaskStatus,
    /// The raw task object, kept for result extraction.
    pub payload: Value,
}

impl ExternalTask {
    pub fn from_value(queue_id: i64, value: &Value) -> Self {
        let status = value
            .get("status")
            .and_then(as_i64)
            .map(TaskStatus::from_code)
            .unwrap_or(TaskStatus::Pending);

        Self {
            id: value.get("id").and_then(as_i64),
            queue_id,
            status,
            payload: value.clone(),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        ERROR_FIELDS.iter().find_map(|field| {
            self.payload
                .get(*field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub tasks: Vec<ExternalTask>,
}

/// Extract queue entries from a queue-list response body.
pub fn parse_queue_list(body: &Value) -> Vec<QueueEntry> {
    let list = [
        body.pointer("/data/list"),
        body.pointer("/data/items"),
        body.pointer("/data/data"),
        body.get("data"),
        body.get("list"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_array);

    let Some(list) = list else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|entry| {
            let id = entry.get("id").and_then(as_i64)?;
            let tasks = entry
                .get("tasks")
                .and_then(Value::as_array)
                .map(|tasks| {
                    tasks
                        .iter()
                        .map(|t| ExternalTask::from_value(id, t))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Some(QueueEntry { id, tasks })
        })
        .collect()
}

/// Read an integer that may have been encoded as a JSON number or string.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
