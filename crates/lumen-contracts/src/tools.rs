use serde::{Deserialize, Serialize};

/// Tools the dispatcher has a dedicated template for. Anything else runs
/// through the custom-tool template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Calculator,
    CodeExecutor,
    Translator,
    DataAnalysis,
    Summarizer,
    TimeService,
    Custom(String),
}

pub const KNOWN_TOOLS: &[&str] = &[
    "calculator",
    "code-executor",
    "translator",
    "data-analysis",
    "summarizer",
    "time-service",
];

impl ToolKind {
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "calculator" => ToolKind::Calculator,
            "code-executor" => ToolKind::CodeExecutor,
            "translator" => ToolKind::Translator,
            "data-analysis" => ToolKind::DataAnalysis,
            "summarizer" => ToolKind::Summarizer,
            "time-service" => ToolKind::TimeService,
            _ => ToolKind::Custom(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolKind::Calculator => "calculator",
            ToolKind::CodeExecutor => "code-executor",
            ToolKind::Translator => "translator",
            ToolKind::DataAnalysis => "data-analysis",
            ToolKind::Summarizer => "summarizer",
            ToolKind::TimeService => "time-service",
            ToolKind::Custom(name) => name.as_str(),
        }
    }

    /// Phrase used in user-facing sentences ("a calculator tool").
    pub fn noun(&self) -> &str {
        match self {
            ToolKind::Calculator => "calculator",
            ToolKind::CodeExecutor => "code execution",
            ToolKind::Translator => "translation",
            ToolKind::DataAnalysis => "data analysis",
            ToolKind::Summarizer => "text summarization",
            ToolKind::TimeService => "time service",
            ToolKind::Custom(name) => name.as_str(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ToolKind::Custom(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Advisory: the text is a sketch that a generative pass could refine.
    pub needs_additional_processing: bool,
}
