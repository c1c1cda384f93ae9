use std::time::Duration;

use lumen_contracts::messages::SearchResult;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{BackendError, SearchBackend};
use crate::config::EngineConfig;
use crate::http::{response_json_or_error, transport_error};
use crate::json_extract::extract_json_object;

pub const MAX_SEARCH_RESULTS: usize = 5;

const SEARCH_SYSTEM_PROMPT: &str = "You are a helpful web search assistant. Your task is to provide search results for the user's query. Return results in JSON format with title, link, and description for each result.";
const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes web search results. Create a concise, informative summary in markdown format with proper headings and formatting.";

/// Web search and result summarization through Groq's OpenAI-compatible
/// chat completions endpoint.
pub struct GroqSearchBackend {
    api_base: String,
    model: String,
    api_key: Option<String>,
    http: HttpClient,
    timeout: Duration,
}

impl GroqSearchBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.groq_api_base.clone(),
            model: config.search_model.clone(),
            api_key: config.groq_api_key.clone(),
            http: HttpClient::new(),
            timeout: config.request_timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn complete(&self, payload: &Value) -> Result<String, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::credential_missing("Groq"));
        };
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| transport_error("Groq", &err))?;
        let parsed = response_json_or_error("Groq", response)?;
        let content = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(BackendError::empty());
        }
        Ok(content.to_string())
    }
}

pub(crate) fn search_payload(model: &str, query: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SEARCH_SYSTEM_PROMPT },
            {
                "role": "user",
                "content": format!(
                    "Search the web for: {query}. Return {MAX_SEARCH_RESULTS} relevant search results in JSON format with fields: title, link, and description."
                ),
            }
        ],
        "temperature": 0.2,
        "max_tokens": 1024,
        "response_format": { "type": "json_object" },
    })
}

pub(crate) fn summary_payload(model: &str, results: &[SearchResult], query: &str) -> Value {
    let results_text = results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "Result {}:\nTitle: {}\nURL: {}\nDescription: {}\n",
                index + 1,
                result.title,
                result.link,
                result.snippet
            )
        })
        .collect::<Vec<String>>()
        .join("\n");
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SUMMARY_SYSTEM_PROMPT },
            {
                "role": "user",
                "content": format!(
                    "Summarize these search results for the query \"{query}\":\n\n{results_text}\n\nProvide a well-formatted markdown summary with headings, bullet points, and include links to the sources."
                ),
            }
        ],
        "temperature": 0.3,
        "max_tokens": 1024,
    })
}

/// Reads `{"results": [{title, link, description}]}`, filling gaps from the
/// query and keeping at most `MAX_SEARCH_RESULTS` entries.
pub(crate) fn parse_search_content(content: &str, query: &str) -> Result<Vec<SearchResult>, BackendError> {
    let parsed: Value = serde_json::from_str(content)
        .ok()
        .or_else(|| extract_json_object(content).and_then(|raw| serde_json::from_str(raw).ok()))
        .ok_or_else(|| BackendError::transport("Groq search returned no JSON object"))?;
    let Some(rows) = parsed.get("results").and_then(Value::as_array) else {
        return Err(BackendError::transport(
            "Unexpected response format from search API",
        ));
    };

    let encoded = urlencoding::encode(query);
    let field = |row: &Value, key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Ok(rows
        .iter()
        .take(MAX_SEARCH_RESULTS)
        .map(|row| SearchResult {
            title: field(row, "title").unwrap_or_else(|| format!("Search result for {query}")),
            link: field(row, "link")
                .unwrap_or_else(|| format!("https://www.google.com/search?q={encoded}")),
            snippet: field(row, "description")
                .or_else(|| field(row, "snippet"))
                .unwrap_or_else(|| "No description available".to_string()),
        })
        .collect())
}

impl SearchBackend for GroqSearchBackend {
    fn name(&self) -> &str {
        "groq"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchResult>, BackendError> {
        debug!(model = %self.model, "groq web search");
        let content = self.complete(&search_payload(&self.model, query))?;
        parse_search_content(&content, query)
    }

    fn summarize(&self, results: &[SearchResult], query: &str) -> Result<String, BackendError> {
        debug!(model = %self.model, results = results.len(), "groq summarize");
        self.complete(&summary_payload(&self.model, results, query))
    }
}
