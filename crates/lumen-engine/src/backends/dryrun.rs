use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lumen_contracts::messages::SearchResult;
use sha2::{Digest, Sha256};

use super::{
    BackendError, ImageBackend, ImageRequest, ImageResponse, SearchBackend, Speaker,
    TextBackend, Turn,
};
use crate::http::truncate_text;
use crate::search::local_digest;

/// Offline text backend: echoes the last user turn.
#[derive(Debug, Clone, Default)]
pub struct DryrunTextBackend;

impl TextBackend for DryrunTextBackend {
    fn name(&self) -> &str {
        "dryrun-text"
    }

    fn generate(&self, turns: &[Turn]) -> Result<String, BackendError> {
        let Some(last) = turns.iter().rev().find(|turn| turn.speaker == Speaker::User) else {
            return Err(BackendError::empty());
        };
        let text = last.text();
        if text.trim().is_empty() {
            return Err(BackendError::empty());
        }
        Ok(format!(
            "[dryrun] {} turn(s) received. Last request: {}",
            turns.len(),
            truncate_text(text.trim(), 160)
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryrunSearchBackend;

impl SearchBackend for DryrunSearchBackend {
    fn name(&self) -> &str {
        "dryrun-search"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchResult>, BackendError> {
        let encoded = urlencoding::encode(query);
        Ok(vec![
            SearchResult {
                title: format!("{query} (dry run)"),
                link: format!("https://example.com/search?q={encoded}"),
                snippet: format!("Offline placeholder result for {query}."),
            },
            SearchResult {
                title: format!("More about {query}"),
                link: format!("https://example.org/wiki/{encoded}"),
                snippet: "Generated without network access.".to_string(),
            },
        ])
    }

    fn summarize(&self, results: &[SearchResult], query: &str) -> Result<String, BackendError> {
        Ok(local_digest(results, query))
    }
}

/// Offline image backend: a solid PNG whose color is derived from the prompt.
#[derive(Debug, Clone, Default)]
pub struct DryrunImageBackend;

impl DryrunImageBackend {
    fn render(&self, request: &ImageRequest) -> Result<String, image::ImageError> {
        let (width, height) = request.options.aspect_ratio.preview_size();
        let (r, g, b) = color_from_prompt(&request.enhanced_prompt());
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
    }
}

impl ImageBackend for DryrunImageBackend {
    fn name(&self) -> &str {
        "dryrun-image"
    }

    fn generate(&self, request: &ImageRequest) -> ImageResponse {
        match self.render(request) {
            Ok(reference) => ImageResponse::success(reference),
            Err(err) => ImageResponse::failure(format!("dry-run image encode failed: {err}")),
        }
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ImageOptions, Part};

    #[test]
    fn dryrun_text_echoes_last_user_turn() -> anyhow::Result<()> {
        let text = DryrunTextBackend.generate(&[
            Turn::user("first"),
            Turn::model("reply"),
            Turn::user("second question"),
        ])?;
        assert!(text.contains("3 turn(s)"));
        assert!(text.ends_with("second question"));
        assert!(DryrunTextBackend.generate(&[]).is_err());
        Ok(())
    }

    #[test]
    fn dryrun_image_is_a_decodable_png_data_url() -> anyhow::Result<()> {
        let response =
            DryrunImageBackend.generate(&ImageRequest::new("a lighthouse", ImageOptions::enhanced()));
        assert!(response.success);
        let reference = response.data.unwrap_or_default();
        let Some(Part::Binary { media_type, bytes }) = Part::from_data_url(&reference) else {
            anyhow::bail!("not a data URL: {reference}");
        };
        assert_eq!(media_type, "image/png");
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (96, 54));
        Ok(())
    }

    #[test]
    fn same_prompt_same_color() {
        assert_eq!(color_from_prompt("fox"), color_from_prompt("fox"));
    }
}
