use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SEARCH_MODEL: &str = "llama3-70b-8192";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
pub const DEFAULT_HISTORY_WINDOW: usize = 100;
pub const DEFAULT_TITLE_MAX_CHARS: usize = 30;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Everything the engine needs from its host, resolved once at startup.
///
/// Credentials are opaque strings handed to the adapters untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub gemini_api_base: String,
    pub groq_api_base: String,
    pub text_model: String,
    pub search_model: String,
    pub image_model: String,
    pub history_window: usize,
    pub title_max_chars: usize,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            groq_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            groq_api_base: DEFAULT_GROQ_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            search_model: DEFAULT_SEARCH_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("gemini_api_key", &redacted(&self.gemini_api_key))
            .field("groq_api_key", &redacted(&self.groq_api_key))
            .field("gemini_api_base", &self.gemini_api_base)
            .field("groq_api_base", &self.groq_api_base)
            .field("text_model", &self.text_model)
            .field("search_model", &self.search_model)
            .field("image_model", &self.image_model)
            .field("history_window", &self.history_window)
            .field("title_max_chars", &self.title_max_chars)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let api_base = |key: &str, default: &str| {
            read(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let defaults = Self::default();
        Self {
            gemini_api_key: read("GEMINI_API_KEY").or_else(|| read("GOOGLE_API_KEY")),
            groq_api_key: read("GROQ_API_KEY"),
            gemini_api_base: api_base("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            groq_api_base: api_base("GROQ_API_BASE", DEFAULT_GROQ_API_BASE),
            text_model: read("LUMEN_TEXT_MODEL").unwrap_or(defaults.text_model),
            search_model: read("LUMEN_SEARCH_MODEL").unwrap_or(defaults.search_model),
            image_model: read("LUMEN_IMAGE_MODEL").unwrap_or(defaults.image_model),
            ..defaults
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
