use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::cancel::{run_cancellable, CancelSlot, DEFAULT_POLL_INTERVAL};
use super::{BackendError, Part, Speaker, TextBackend, Turn};
use crate::config::EngineConfig;
use crate::http::{response_json_or_error, transport_error};

pub(crate) fn gemini_endpoint(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!(
        "{}/{}:generateContent",
        api_base.trim_end_matches('/'),
        model_path
    )
}

/// Text generation over Gemini `generateContent`.
pub struct GeminiTextBackend {
    api_base: String,
    model: String,
    api_key: Option<String>,
    http: HttpClient,
    timeout: Duration,
    poll_interval: Duration,
    slot: CancelSlot,
}

impl GeminiTextBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            model: config.text_model.clone(),
            api_key: config.gemini_api_key.clone(),
            http: HttpClient::new(),
            timeout: config.request_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            slot: CancelSlot::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        gemini_endpoint(&self.api_base, &self.model)
    }
}

/// Turns with nothing to send are skipped; binary parts only ride on user
/// turns.
pub(crate) fn build_text_payload(turns: &[Turn]) -> Value {
    let contents: Vec<Value> = turns
        .iter()
        .filter_map(|turn| {
            let parts: Vec<Value> = turn
                .parts
                .iter()
                .filter_map(|part| match part {
                    Part::Text(text) if text.trim().is_empty() => None,
                    Part::Text(text) => Some(json!({ "text": text })),
                    Part::Binary { .. } if turn.speaker != Speaker::User => None,
                    Part::Binary { media_type, bytes } => Some(json!({
                        "inlineData": {
                            "mimeType": media_type,
                            "data": BASE64.encode(bytes),
                        }
                    })),
                })
                .collect();
            if parts.is_empty() {
                return None;
            }
            Some(json!({
                "role": turn.speaker.as_str(),
                "parts": parts,
            }))
        })
        .collect();

    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": 0.7,
            "topK": 40,
            "topP": 0.95,
            "maxOutputTokens": 8192,
        }
    })
}

pub(crate) fn parse_text_response(payload: &Value) -> Result<String, BackendError> {
    if let Some(reason) = payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(BackendError::blocked(reason));
    }
    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        return Err(BackendError::empty());
    };
    let text = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(BackendError::empty());
    }
    Ok(text)
}

impl TextBackend for GeminiTextBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate(&self, turns: &[Turn]) -> Result<String, BackendError> {
        let token = self.slot.begin();
        let Some(api_key) = self.api_key.clone() else {
            self.slot.finish(&token);
            return Err(BackendError::credential_missing("Gemini"));
        };
        let payload = build_text_payload(turns);
        let endpoint = self.endpoint();
        let http = self.http.clone();
        let timeout = self.timeout;
        debug!(
            model = %self.model,
            turns = turns.len(),
            "gemini generateContent"
        );

        let result = run_cancellable(&token, self.poll_interval, move || {
            let response = http
                .post(&endpoint)
                .query(&[("key", api_key.as_str())])
                .timeout(timeout)
                .json(&payload)
                .send()
                .map_err(|err| transport_error("Gemini", &err))?;
            let parsed = response_json_or_error("Gemini", response)?;
            parse_text_response(&parsed)
        });
        self.slot.finish(&token);
        result
    }

    fn cancel(&self) {
        self.slot.cancel();
    }
}
