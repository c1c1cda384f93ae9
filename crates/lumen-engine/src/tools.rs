use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use lumen_contracts::tools::{ToolKind, ToolResult};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backends::{BackendError, BackendErrorKind, TextBackend, Turn};
use crate::json_extract::extract_json_object;

/// Structured answer parsed out of a tool response, one variant per tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPayload {
    Calculation {
        expression: String,
        calculation: String,
        result: String,
    },
    Code {
        task: String,
        language: String,
        code: String,
        explanation: String,
        output: String,
    },
    Translation {
        original_text: String,
        source_language: String,
        target_language: String,
        translation: String,
    },
    DataAnalysis {
        data_description: String,
        analysis: String,
        visualizations: String,
        insights: String,
        recommendations: String,
    },
    Summary {
        original_text_description: String,
        bullet_points: String,
        short_summary: String,
        medium_summary: String,
    },
    Time {
        timezone: String,
        local_time: String,
        answer: String,
    },
    Custom {
        tool_design: Option<String>,
        result: String,
        explanation: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolParseFailure {
    NoJsonObject,
    InvalidJson(String),
    MissingField(&'static str),
}

impl fmt::Display for ToolParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolParseFailure::NoJsonObject => write!(f, "no JSON object in response"),
            ToolParseFailure::InvalidJson(err) => write!(f, "invalid JSON object: {err}"),
            ToolParseFailure::MissingField(field) => write!(f, "missing field `{field}`"),
        }
    }
}

impl std::error::Error for ToolParseFailure {}

/// Runs named tools by prompting the text backend for a JSON answer.
///
/// Every path ends in a `ToolResult`; nothing here returns an error.
#[derive(Clone)]
pub struct ToolDispatcher {
    backend: Arc<dyn TextBackend>,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self { backend }
    }

    /// Runs one tool call. Every failure except a cancel is folded into an
    /// explanatory [`ToolResult`]; a cancel comes back as the error.
    pub fn run_tool(&self, user_message: &str, tool_name: &str) -> Result<ToolResult, BackendError> {
        let kind = ToolKind::from_name(tool_name);
        self.run_tool_at(user_message, &kind, Utc::now())
    }

    pub(crate) fn run_tool_at(
        &self,
        user_message: &str,
        kind: &ToolKind,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, BackendError> {
        debug!(tool = kind.name(), backend = self.backend.name(), "running tool");
        if !self.backend.is_configured() {
            return Ok(missing_credential_result(kind));
        }
        let prompt = tool_prompt(kind, user_message, now);
        let raw = match self.backend.generate(&[Turn::user(prompt)]) {
            Ok(raw) => raw,
            Err(err) if err.kind == BackendErrorKind::Cancelled => {
                debug!(tool = kind.name(), "tool call cancelled");
                return Err(err);
            }
            Err(err) if err.kind == BackendErrorKind::CredentialMissing => {
                return Ok(missing_credential_result(kind));
            }
            Err(err) => {
                warn!(tool = kind.name(), error = %err, "tool backend call failed");
                return Ok(backend_error_result(kind));
            }
        };
        Ok(match parse_payload(kind, &raw) {
            Ok(payload) => format_payload(kind, payload),
            Err(failure) => {
                warn!(tool = kind.name(), error = %failure, "tool response not parseable; returning raw text");
                raw_fallback_result(kind, &raw)
            }
        })
    }
}

pub(crate) fn tool_prompt(kind: &ToolKind, user_message: &str, now: DateTime<Utc>) -> String {
    match kind {
        ToolKind::Calculator => format!(
            "Act as a mathematical calculator. Extract the mathematical expression from this user request:\n\"{user_message}\"\n\n\
Return your response in this JSON format:\n\
{{\n  \"expression\": \"the mathematical expression extracted\",\n  \"calculation\": \"step by step calculation showing your work\",\n  \"result\": \"the final numerical result\"\n}}\n\n\
Only extract valid mathematical operations. If no clear mathematical task is found, explain that you couldn't identify a calculation to perform."
        ),
        ToolKind::CodeExecutor => format!(
            "Act as a code execution engine. For this user request:\n\"{user_message}\"\n\n\
1. Extract the programming task/question\n2. Write appropriate code to solve it\n3. Execute the code in a simulated environment\n4. Show the output/result\n\n\
Return your response in this JSON format:\n\
{{\n  \"task\": \"the programming task identified\",\n  \"language\": \"the programming language used\",\n  \"code\": \"the full code solution\",\n  \"explanation\": \"explanation of how the code works\",\n  \"output\": \"the simulated execution output\"\n}}"
        ),
        ToolKind::Translator => format!(
            "Act as a language translator. For this user request:\n\"{user_message}\"\n\n\
1. Identify the text to translate\n2. Identify the source and target languages\n3. Provide the translation\n\n\
Return your response in this JSON format:\n\
{{\n  \"originalText\": \"the text identified for translation\",\n  \"sourceLanguage\": \"the identified source language\",\n  \"targetLanguage\": \"the identified target language\",\n  \"translation\": \"the translated text\"\n}}"
        ),
        ToolKind::DataAnalysis => format!(
            "Act as a data analysis tool. For this user request:\n\"{user_message}\"\n\n\
1. Extract what data needs to be analyzed\n2. Generate realistic sample data if specific data is not provided\n3. Perform appropriate analysis based on the request\n4. Visualize results by describing charts/graphs (use ASCII if needed)\n\n\
Return your response in this JSON format:\n\
{{\n  \"dataDescription\": \"description of the data analyzed\",\n  \"analysis\": \"detailed analysis of the data\",\n  \"visualizations\": \"description or ASCII representation of visualizations\",\n  \"insights\": \"key insights from the analysis\",\n  \"recommendations\": \"recommendations based on the analysis\"\n}}"
        ),
        ToolKind::Summarizer => format!(
            "Act as a text summarization tool. For this user request:\n\"{user_message}\"\n\n\
1. Extract the text that needs to be summarized\n2. Create different types of summaries\n\n\
Return your response in this JSON format:\n\
{{\n  \"originalTextDescription\": \"description of the original text\",\n  \"bulletPoints\": \"bullet point summary of key points\",\n  \"shortSummary\": \"a concise one-paragraph summary\",\n  \"mediumSummary\": \"a more detailed 2-3 paragraph summary\"\n}}"
        ),
        ToolKind::TimeService => format!(
            "Act as a time and date service. The current UTC time is {} ({}). For this user request:\n\"{user_message}\"\n\n\
1. Identify the location or time zone the user is asking about (use UTC if none is given)\n2. Work out the answer from the current UTC time above\n\n\
Return your response in this JSON format:\n\
{{\n  \"timezone\": \"the time zone used\",\n  \"localTime\": \"the local date and time in that zone\",\n  \"answer\": \"a one or two sentence answer to the request\"\n}}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            now.format("%A"),
        ),
        ToolKind::Custom(name) => format!(
            "I need to create a specialized tool to handle user requests related to \"{name}\".\n\n\
User request: \"{user_message}\"\n\n\
1. Explain how this tool would work conceptually\n2. Provide a detailed response as if you had actually built and run this tool\n3. Be specific and provide realistic output based on the request\n\n\
Format your response as a JSON object with these fields:\n\
{{\n  \"toolDesign\": \"explanation of how the tool works\",\n  \"result\": \"the final output to the user after running the virtual tool\",\n  \"explanation\": \"brief explanation that the tool was simulated\"\n}}"
        ),
    }
}

pub(crate) fn parse_payload(kind: &ToolKind, raw: &str) -> Result<ToolPayload, ToolParseFailure> {
    let object_text = extract_json_object(raw).ok_or(ToolParseFailure::NoJsonObject)?;
    let value: Value = serde_json::from_str(object_text)
        .map_err(|err| ToolParseFailure::InvalidJson(err.to_string()))?;
    let Some(fields) = value.as_object() else {
        return Err(ToolParseFailure::NoJsonObject);
    };
    let required = |key: &'static str| field_text(fields, key).ok_or(ToolParseFailure::MissingField(key));

    Ok(match kind {
        ToolKind::Calculator => ToolPayload::Calculation {
            expression: required("expression")?,
            calculation: required("calculation")?,
            result: required("result")?,
        },
        ToolKind::CodeExecutor => ToolPayload::Code {
            task: required("task")?,
            language: field_text(fields, "language").unwrap_or_default(),
            code: required("code")?,
            explanation: required("explanation")?,
            output: required("output")?,
        },
        ToolKind::Translator => ToolPayload::Translation {
            original_text: required("originalText")?,
            source_language: required("sourceLanguage")?,
            target_language: required("targetLanguage")?,
            translation: required("translation")?,
        },
        ToolKind::DataAnalysis => ToolPayload::DataAnalysis {
            data_description: required("dataDescription")?,
            analysis: required("analysis")?,
            visualizations: required("visualizations")?,
            insights: required("insights")?,
            recommendations: required("recommendations")?,
        },
        ToolKind::Summarizer => ToolPayload::Summary {
            original_text_description: required("originalTextDescription")?,
            bullet_points: required("bulletPoints")?,
            short_summary: required("shortSummary")?,
            medium_summary: required("mediumSummary")?,
        },
        ToolKind::TimeService => ToolPayload::Time {
            timezone: required("timezone")?,
            local_time: required("localTime")?,
            answer: required("answer")?,
        },
        ToolKind::Custom(_) => ToolPayload::Custom {
            tool_design: field_text(fields, "toolDesign"),
            result: required("result")?,
            explanation: field_text(fields, "explanation"),
        },
    })
}

/// Field as display text. Numbers and booleans are stringified, string
/// lists become one line each; blank values count as missing.
fn field_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match fields.get(key)? {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>()
            .join("\n"),
        other => other.to_string(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn format_payload(kind: &ToolKind, payload: ToolPayload) -> ToolResult {
    let direct = |result: String| ToolResult {
        result,
        explanation: None,
        needs_additional_processing: false,
    };
    match payload {
        ToolPayload::Calculation {
            expression,
            calculation,
            result,
        } => direct(format!(
            "I calculated the result for \"{expression}\":\n\n{calculation}\n\nResult: {result}"
        )),
        ToolPayload::Code {
            task,
            language,
            code,
            explanation,
            output,
        } => direct(format!(
            "I wrote and executed code for: \"{task}\"\n\n```{language}\n{code}\n```\n\n**Execution Output:**\n```\n{output}\n```\n\n**Explanation:**\n{explanation}"
        )),
        ToolPayload::Translation {
            original_text,
            source_language,
            target_language,
            translation,
        } => direct(format!(
            "I translated from {source_language} to {target_language}:\n\n**Original ({source_language}):**\n{original_text}\n\n**Translation ({target_language}):**\n{translation}"
        )),
        ToolPayload::DataAnalysis {
            data_description,
            analysis,
            visualizations,
            insights,
            recommendations,
        } => direct(format!(
            "# Data Analysis Report\n\n## Data Analyzed\n{data_description}\n\n## Analysis\n{analysis}\n\n## Visualizations\n{visualizations}\n\n## Key Insights\n{insights}\n\n## Recommendations\n{recommendations}"
        )),
        ToolPayload::Summary {
            original_text_description,
            bullet_points,
            short_summary,
            medium_summary,
        } => direct(format!(
            "# Summary\n\n**Original Content:** {original_text_description}\n\n## Brief Summary\n{short_summary}\n\n## Key Points\n{bullet_points}\n\n## Detailed Summary\n{medium_summary}"
        )),
        ToolPayload::Time {
            timezone,
            local_time,
            answer,
        } => direct(format!(
            "The current time in {timezone} is {local_time}.\n\n{answer}"
        )),
        ToolPayload::Custom {
            tool_design,
            result,
            explanation,
        } => {
            let detail = explanation.or(tool_design).unwrap_or_default();
            ToolResult {
                result,
                explanation: Some(
                    format!(
                        "Note: I created a virtual {} tool to handle your request. {detail}",
                        kind.name()
                    )
                    .trim_end()
                    .to_string(),
                ),
                needs_additional_processing: true,
            }
        }
    }
}

fn missing_credential_result(kind: &ToolKind) -> ToolResult {
    if let ToolKind::Custom(name) = kind {
        return ToolResult {
            result: format!(
                "I wanted to create a specialized {name} tool to handle your request, but I couldn't access the API key needed to build it."
            ),
            explanation: Some("The tool creation process failed due to missing API key.".to_string()),
            needs_additional_processing: true,
        };
    }
    let noun = kind.noun();
    ToolResult {
        result: format!(
            "I tried to use a {noun} tool to process your request, but couldn't access the API key needed to process it."
        ),
        explanation: Some(format!(
            "The {noun} tool couldn't be used due to missing API key."
        )),
        needs_additional_processing: true,
    }
}

fn backend_error_result(kind: &ToolKind) -> ToolResult {
    if let ToolKind::Custom(name) = kind {
        return ToolResult {
            result: format!(
                "I attempted to build a specialized tool for {name}, but encountered an error."
            ),
            explanation: Some("The tool creation process failed.".to_string()),
            needs_additional_processing: true,
        };
    }
    ToolResult {
        result: format!(
            "I tried to use a {} tool to process your request, but encountered an error.",
            kind.noun()
        ),
        explanation: None,
        needs_additional_processing: true,
    }
}

fn raw_fallback_result(kind: &ToolKind, raw: &str) -> ToolResult {
    let raw = raw.trim();
    if let ToolKind::Custom(name) = kind {
        return ToolResult {
            result: format!(
                "I attempted to build a specialized tool for {name} based on your request, but encountered an issue. Here's what I can tell you based on your request:\n\n{raw}"
            ),
            explanation: Some(format!(
                "I tried to create a {name} tool but couldn't fully implement it."
            )),
            needs_additional_processing: true,
        };
    }
    ToolResult {
        result: format!(
            "I used a {} tool to process your request. Here's what I found:\n\n{raw}",
            kind.noun()
        ),
        explanation: None,
        needs_additional_processing: false,
    }
}
