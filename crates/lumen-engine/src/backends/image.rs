use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::gemini::gemini_endpoint;
use super::{BackendError, ImageBackend};
use crate::config::EngineConfig;
use crate::http::{response_json_or_error, transport_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageQuality {
    Standard,
    High,
    UltraHigh,
    Max,
}

impl ImageQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageQuality::Standard => "standard",
            ImageQuality::High => "high",
            ImageQuality::UltraHigh => "ultra-high",
            ImageQuality::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Square,
    Landscape,
    Portrait,
    Classic,
    ClassicPortrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Classic => "4:3",
            AspectRatio::ClassicPortrait => "3:4",
        }
    }

    /// Pixel size used by the offline backend.
    pub fn preview_size(self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (64, 64),
            AspectRatio::Landscape => (96, 54),
            AspectRatio::Portrait => (54, 96),
            AspectRatio::Classic => (80, 60),
            AspectRatio::ClassicPortrait => (60, 80),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStyle {
    Natural,
    Vivid,
    Artistic,
    Photorealistic,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageStyle::Natural => "natural",
            ImageStyle::Vivid => "vivid",
            ImageStyle::Artistic => "artistic",
            ImageStyle::Photorealistic => "photorealistic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    FourK,
    EightK,
    SixteenK,
}

impl DetailLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailLevel::FourK => "4k",
            DetailLevel::EightK => "8k",
            DetailLevel::SixteenK => "16k",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    pub quality: ImageQuality,
    pub aspect_ratio: AspectRatio,
    pub style: ImageStyle,
    pub detail_level: DetailLevel,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            quality: ImageQuality::UltraHigh,
            aspect_ratio: AspectRatio::Square,
            style: ImageStyle::Photorealistic,
            detail_level: DetailLevel::SixteenK,
        }
    }
}

impl ImageOptions {
    /// Fixed configuration used by the chat pipeline.
    pub fn enhanced() -> Self {
        Self {
            aspect_ratio: AspectRatio::Landscape,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub options: ImageOptions,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, options: ImageOptions) -> Self {
        Self {
            prompt: prompt.into(),
            options,
        }
    }

    pub fn enhanced_prompt(&self) -> String {
        let options = &self.options;
        format!(
            "Generate a {} resolution, {} quality, {} style image with aspect ratio {} of: {}",
            options.detail_level.as_str(),
            options.quality.as_str(),
            options.style.as_str(),
            options.aspect_ratio.as_str(),
            self.prompt
        )
    }
}

/// `data` is an image reference (URL or data URL) when `success` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResponse {
    pub success: bool,
    pub data: Option<String>,
    pub message: String,
}

impl ImageResponse {
    pub fn success(reference: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(reference.into()),
            message: "Image generated successfully".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

pub struct GeminiImageBackend {
    api_base: String,
    model: String,
    api_key: Option<String>,
    http: HttpClient,
    timeout: Duration,
}

impl GeminiImageBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            model: config.image_model.clone(),
            api_key: config.gemini_api_key.clone(),
            http: HttpClient::new(),
            timeout: config.request_timeout,
        }
    }

    fn request_image(&self, request: &ImageRequest) -> Result<String, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::credential_missing("Gemini"));
        };
        let payload = image_payload(request);
        debug!(model = %self.model, "gemini image generation");
        let response = self
            .http
            .post(gemini_endpoint(&self.api_base, &self.model))
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| transport_error("Gemini image", &err))?;
        let parsed = response_json_or_error("Gemini image", response)?;
        first_image_data_url(&parsed)
    }
}

pub(crate) fn image_payload(request: &ImageRequest) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": request.enhanced_prompt() }],
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
        }
    })
}

/// First inline image of the first candidate that has one, as a data URL.
pub(crate) fn first_image_data_url(payload: &Value) -> Result<String, BackendError> {
    if let Some(reason) = payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(BackendError::blocked(reason));
    }
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            if BASE64.decode(data.as_bytes()).is_err() {
                return Err(BackendError::transport(
                    "Gemini image base64 decode failed",
                ));
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return Ok(format!("data:{mime_type};base64,{data}"));
        }
    }
    Err(BackendError::new(
        super::BackendErrorKind::Empty,
        "No image received in response",
    ))
}

impl ImageBackend for GeminiImageBackend {
    fn name(&self) -> &str {
        "gemini-image"
    }

    fn generate(&self, request: &ImageRequest) -> ImageResponse {
        match self.request_image(request) {
            Ok(reference) => ImageResponse::success(reference),
            Err(err) => {
                warn!(error = %err, "image generation failed");
                ImageResponse::failure(err.message)
            }
        }
    }
}
