use std::sync::OnceLock;

use regex::Regex;

/// Phrases that on their own mark an image request. Matched on word
/// boundaries against the lower-cased input.
const IMAGE_REQUEST_PHRASES: &[&str] = &[
    // English
    "create an image",
    "generate an image",
    "make an image",
    "design an image",
    "create a picture",
    "generate a picture",
    "make a picture",
    "show me an image",
    "show me a picture",
    "show a picture",
    "create a visual",
    "generate a photo",
    "create a photo",
    "create photo",
    "create picture",
    "can you draw",
    "draw me",
    "draw a",
    "draw an",
    "generate art",
    "create art",
    "create a scene",
    "picture of",
    "photo of",
    "image of",
    "illustrate",
    "illustration of",
    "visualize",
    "visualise",
    "visual representation",
    "depict",
    "portray",
    "sketch",
    "paint a",
    "paint me",
    "render a",
    "render an",
    // Hindi, transliterated
    "photo banao",
    "tasveer banao",
    "chitra banao",
    "image banao",
    "picture banao",
    "ek photo",
    "ek tasveer",
    "ek chitra",
    "dikhao",
    "bana do",
    "create karo",
];

const IMAGE_REQUEST_PATTERNS: &[&str] = &[
    r"\bwhat .{1,20} looks? like\b",
    r"\bhow (?:does|do|did|would|will) .{1,20} look\b",
    r"\bshow me .{0,20}\b(?:pictures?|images?|photos?|drawings?)\b",
    r"\b(?:create|make|generate|show|produce) .{1,30}\b(?:pictures?|images?|photos?|visuals?|illustrations?|drawings?|wallpapers?)\b",
];

fn phrase_regex() -> &'static Regex {
    static PHRASES: OnceLock<Regex> = OnceLock::new();
    PHRASES.get_or_init(|| {
        let alternation = IMAGE_REQUEST_PHRASES
            .iter()
            .map(|phrase| regex::escape(phrase))
            .collect::<Vec<String>>()
            .join("|");
        Regex::new(&format!(r"\b(?:{alternation})\b")).expect("image phrase alternation compiles")
    })
}

fn pattern_regexes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        IMAGE_REQUEST_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("image request pattern compiles"))
            .collect()
    })
}

/// Heuristic check for "please make me a picture" style requests.
///
/// Pure and cheap; false positives only send the request down the image
/// path, which falls back to text on failure.
pub fn is_image_intent(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return false;
    }
    phrase_regex().is_match(&lowered)
        || pattern_regexes()
            .iter()
            .any(|pattern| pattern.is_match(&lowered))
}
