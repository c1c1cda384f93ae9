/// Per-request toggles supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentOptions {
    /// Attached images as data URLs (`data:<mime>;base64,<payload>`).
    pub images: Vec<String>,
    pub use_reasoning: bool,
    pub use_web_search: bool,
    pub use_thinking: bool,
    /// Named tool to run before the text path.
    pub tool: Option<String>,
}

impl EnrichmentOptions {
    pub fn requested_tool(&self) -> Option<&str> {
        self.tool
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn toggle_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.use_web_search {
            names.push("web_search");
        }
        if self.use_reasoning {
            names.push("reasoning");
        }
        if self.use_thinking {
            names.push("thinking");
        }
        if self.requested_tool().is_some() {
            names.push("tool");
        }
        names
    }
}
