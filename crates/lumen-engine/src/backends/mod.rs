use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lumen_contracts::messages::SearchResult;
use tracing::warn;

pub mod cancel;
pub mod dryrun;
pub mod gemini;
pub mod groq;
pub mod image;

pub use cancel::{CancelSlot, CancelToken};
pub use dryrun::{DryrunImageBackend, DryrunSearchBackend, DryrunTextBackend};
pub use gemini::GeminiTextBackend;
pub use groq::GroqSearchBackend;
pub use image::{
    AspectRatio, DetailLevel, GeminiImageBackend, ImageOptions, ImageQuality, ImageRequest,
    ImageResponse, ImageStyle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Binary { media_type: String, bytes: Vec<u8> },
}

impl Part {
    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Option<Part> {
        let rest = url.trim().strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let media_type = header.strip_suffix(";base64")?.trim();
        if media_type.is_empty() {
            return None;
        }
        let bytes = BASE64.decode(payload.trim().as_bytes()).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(Part::Binary {
            media_type: media_type.to_string(),
            bytes,
        })
    }
}

/// One role-tagged entry of a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Puts data-URL images ahead of the text parts. Unparseable references
    /// are dropped with a warning.
    pub fn with_images(mut self, images: &[String]) -> Self {
        let mut image_parts = Vec::with_capacity(images.len());
        for image in images {
            match Part::from_data_url(image) {
                Some(part) => image_parts.push(part),
                None => warn!(
                    reference = %truncate_reference(image),
                    "skipping attached image that is not a base64 data URL"
                ),
            }
        }
        image_parts.append(&mut self.parts);
        self.parts = image_parts;
        self
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Binary { .. } => None,
            })
            .collect::<Vec<&str>>()
            .join("")
    }
}

fn truncate_reference(reference: &str) -> String {
    crate::http::truncate_text(reference, 48)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Blocked,
    Empty,
    Cancelled,
    Transport,
    CredentialMissing,
}

impl BackendErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendErrorKind::Blocked => "blocked",
            BackendErrorKind::Empty => "empty",
            BackendErrorKind::Cancelled => "cancelled",
            BackendErrorKind::Transport => "transport",
            BackendErrorKind::CredentialMissing => "credential_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn blocked(reason: &str) -> Self {
        Self::new(
            BackendErrorKind::Blocked,
            format!("Content blocked: {reason}"),
        )
    }

    pub fn empty() -> Self {
        Self::new(BackendErrorKind::Empty, "No response generated")
    }

    pub fn cancelled() -> Self {
        Self::new(BackendErrorKind::Cancelled, "Request cancelled")
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transport, message)
    }

    pub fn credential_missing(provider: &str) -> Self {
        Self::new(
            BackendErrorKind::CredentialMissing,
            format!("{provider} API key is not configured"),
        )
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

/// Prompt turns in, generated text out.
///
/// One call in flight per instance: a new `generate` cancels the previous
/// one, and `cancel` aborts whatever is running.
pub trait TextBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_configured(&self) -> bool {
        true
    }

    fn generate(&self, turns: &[Turn]) -> Result<String, BackendError>;

    fn cancel(&self) {}
}

pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, query: &str) -> Result<Vec<SearchResult>, BackendError>;

    fn summarize(&self, results: &[SearchResult], query: &str) -> Result<String, BackendError>;
}

pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, request: &ImageRequest) -> ImageResponse;
}
