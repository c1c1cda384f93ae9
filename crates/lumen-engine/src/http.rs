use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::backends::BackendError;

/// Reads a JSON body, turning non-2xx statuses into `Transport` failures
/// that carry the provider's own error message when it sent one.
pub(crate) fn response_json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, BackendError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        BackendError::transport(format!("{provider} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        let detail = provider_error_message(&body).unwrap_or_else(|| truncate_text(&body, 512));
        return Err(BackendError::transport(format!(
            "{provider} request failed ({code}): {detail}"
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        BackendError::transport(format!("{provider} returned invalid JSON payload: {err}"))
    })
}

pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> BackendError {
    let cause = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    BackendError::transport(format!(
        "{provider} {cause}: {}",
        truncate_text(&err.to_string(), 512)
    ))
}

/// `{"error": {"message": "..."}}` as sent by both Gemini and Groq.
fn provider_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(|message| truncate_text(message, 512))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
