use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::models::generation::GenerationRequest;
use crate::models::task::{as_i64, parse_queue_list, QueueEntry};

/// Response substrings that mean the credential has run out of balance.
pub const DEFAULT_EXHAUSTION_MARKERS: &[&str] = &["not enough", "insufficient_credits"];

const QUEUE_PAGE_SIZE: &str = "20";

/// Response fields that may explain a rejected create request.
const ERROR_MESSAGE_FIELDS: &[&str] = &["message", "error", "msg"];

/// Classified result of one create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted {
        task_id: Option<i64>,
        queue_id: Option<i64>,
    },
    Exhausted,
    Failed {
        message: String,
    },
}

/// HTTP client for the external rendering service.
pub struct RenderClient {
    http: Client,
    base_url: String,
    origin: String,
    exhaustion_markers: Vec<String>,
    exhaustion_codes: Vec<i64>,
}

impl RenderClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, RenderError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| RenderError::Config(format!("invalid base URL {base_url}: {e}")))?;
        let origin = parsed.origin().ascii_serialization();

        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("render-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            origin,
            exhaustion_markers: DEFAULT_EXHAUSTION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            exhaustion_codes: Vec::new(),
        })
    }

    /// Replace the signals that classify a response as credential exhaustion.
    pub fn with_exhaustion_signals(mut self, markers: &[String], codes: &[i64]) -> Self {
        self.exhaustion_markers = markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self.exhaustion_codes = codes.to_vec();
        self
    }

    /// Scheme and host of the service, used to absolutize relative result paths.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Issue one create request with `credential`.
    pub async fn submit(&self, credential: &str, request: &GenerationRequest) -> SubmitOutcome {
        let url = format!("{}/image-generator/create", self.base_url);

        let response = match self
            .http
            .post(&url)
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SubmitOutcome::Failed {
                    message: format!("request to rendering service failed: {e}"),
                }
            }
        };

        let status = response.status();
        match response.text().await {
            Ok(body) => self.classify(status, &body),
            Err(e) => SubmitOutcome::Failed {
                message: format!("failed to read rendering service response: {e}"),
            },
        }
    }

    /// Fetch the first page of the credential's generation queue.
    pub async fn list_queue(&self, credential: &str) -> Result<Vec<QueueEntry>, RenderError> {
        let url = format!("{}/ai-generator/queue-list", self.base_url);

        let body: Value = self
            .http
            .get(&url)
            .bearer_auth(credential)
            .query(&[("page", "1"), ("page_size", QUEUE_PAGE_SIZE), ("paranoid", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(parse_queue_list(&body))
    }

    fn classify(&self, status: StatusCode, body: &str) -> SubmitOutcome {
        let Ok(json) = serde_json::from_str::<Value>(body) else {
            if self.is_exhaustion_text(body) {
                return SubmitOutcome::Exhausted;
            }
            return SubmitOutcome::Failed {
                message: format!("rendering service returned HTTP {status} with a non-JSON body"),
            };
        };

        let code = json.get("code").and_then(as_i64);
        if code.is_some_and(|c| self.exhaustion_codes.contains(&c)) {
            return SubmitOutcome::Exhausted;
        }

        let message = ERROR_MESSAGE_FIELDS
            .iter()
            .filter_map(|field| json.get(*field).and_then(Value::as_str))
            .find(|m| !m.trim().is_empty())
            .map(str::to_string);

        // An accepted request may echo the prompt back, so markers are only
        // looked for in the error message of a rejected one.
        let accepted = status.is_success() && code == Some(0);
        if !accepted {
            if message.as_deref().is_some_and(|m| self.is_exhaustion_text(m)) {
                return SubmitOutcome::Exhausted;
            }
            return SubmitOutcome::Failed {
                message: message.unwrap_or_else(|| match code {
                    _ if !status.is_success() => format!("rendering service returned HTTP {status}"),
                    Some(c) => format!("rendering service returned code {c}"),
                    None => "rendering service response is missing a code".to_string(),
                }),
            };
        }

        let record = match json.get("data") {
            Some(Value::Array(items)) => items.first(),
            Some(obj @ Value::Object(_)) => Some(obj),
            _ => None,
        };

        let task_id = record.and_then(|r| r.get("id")).and_then(as_i64);
        let queue_id = record.and_then(|r| r.get("queue_id")).and_then(as_i64);

        if task_id.is_none() && queue_id.is_none() {
            return SubmitOutcome::Failed {
                message: "rendering service accepted the request but returned no task id".to_string(),
            };
        }

        SubmitOutcome::Submitted { task_id, queue_id }
    }

    fn is_exhaustion_text(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.exhaustion_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Render client configuration error: {0}")]
    Config(String),
}
