use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use lumen_contracts::chat::is_image_intent;
use lumen_contracts::conversation::{Conversation, ConversationStore, ExchangeStart};
use lumen_contracts::events::{EventPayload, EventWriter};
use lumen_contracts::messages::{
    Message, MessageRole, MessageUpdate, ToolUsage, WebSearchRecord,
};
use lumen_contracts::options::EnrichmentOptions;
use lumen_contracts::roles::{PersonaRole, RoleRegistry};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backends::{
    BackendError, BackendErrorKind, DryrunImageBackend, DryrunSearchBackend, DryrunTextBackend,
    GeminiImageBackend, GeminiTextBackend, GroqSearchBackend, ImageBackend, ImageOptions,
    ImageRequest, SearchBackend, TextBackend, Turn,
};
use crate::config::EngineConfig;
use crate::search::{search_web, summarize_results};
use crate::tools::ToolDispatcher;

pub const ERROR_CONTENT: &str =
    "I'm sorry, I encountered an error processing your request. Please try again.";
pub const MISSING_CREDENTIAL_CONTENT: &str =
    "No API key is configured for the text model, so I couldn't generate a response. Add a key and try again.";
pub const IMAGE_FALLBACK_NOTE: &str = "\n\n*Note: I tried to generate an image but encountered an error. I've provided a text response instead.*";

/// Stage that produced the settled content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    WebSearch,
    Tool,
    Image,
    Text,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::WebSearch => "web_search",
            Route::Tool => "tool",
            Route::Image => "image",
            Route::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// The assistant message as settled in the store.
    pub message: Message,
    pub route: Route,
    /// Image generation was attempted and the text path answered instead.
    pub image_fallback: bool,
    /// Text-path failure that reached settle, if any.
    pub error: Option<BackendError>,
    /// Title assigned to the conversation by this exchange.
    pub title: Option<String>,
}

impl PipelineOutcome {
    /// Failures the caller should surface as an error notice.
    pub fn is_failure(&self) -> bool {
        self.error.as_ref().is_some_and(|err| {
            matches!(
                err.kind,
                BackendErrorKind::Transport | BackendErrorKind::Empty
            )
        })
    }
}

pub struct Backends {
    pub text: Arc<dyn TextBackend>,
    pub search: Arc<dyn SearchBackend>,
    pub image: Arc<dyn ImageBackend>,
}

impl Backends {
    pub fn live(config: &EngineConfig) -> Self {
        Self {
            text: Arc::new(GeminiTextBackend::new(config)),
            search: Arc::new(GroqSearchBackend::new(config)),
            image: Arc::new(GeminiImageBackend::new(config)),
        }
    }

    pub fn dryrun() -> Self {
        Self {
            text: Arc::new(DryrunTextBackend),
            search: Arc::new(DryrunSearchBackend),
            image: Arc::new(DryrunImageBackend),
        }
    }
}

/// Aborts the text call the orchestrator is waiting on, from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    backend: Arc<dyn TextBackend>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.backend.cancel();
    }
}

struct Draft {
    route: Route,
    update: MessageUpdate,
    image_fallback: bool,
    error: Option<BackendError>,
}

impl Draft {
    fn settled(route: Route, update: MessageUpdate) -> Self {
        Self {
            route,
            update,
            image_fallback: false,
            error: None,
        }
    }
}

struct TextAnswer {
    content: String,
    reasoning: Option<String>,
    thinking: Option<String>,
}

/// Runs one user utterance through search, tool, image and text stages
/// and settles the result into the conversation store.
///
/// `process_message` takes `&mut self`, so one orchestrator never has two
/// exchanges in flight.
pub struct Orchestrator {
    config: EngineConfig,
    backends: Backends,
    tools: ToolDispatcher,
    store: Arc<Mutex<ConversationStore>>,
    roles: RoleRegistry,
    active_role: Option<String>,
    events: EventWriter,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, backends: Backends, events: EventWriter) -> Self {
        let tools = ToolDispatcher::new(Arc::clone(&backends.text));
        Self {
            config,
            backends,
            tools,
            store: Arc::new(Mutex::new(ConversationStore::new())),
            roles: RoleRegistry::default(),
            active_role: None,
            events,
        }
    }

    pub fn with_store(mut self, store: ConversationStore) -> Self {
        self.store = Arc::new(Mutex::new(store));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared view of the store, readable while a message is in flight.
    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            backend: Arc::clone(&self.backends.text),
        }
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn active_role(&self) -> Option<&PersonaRole> {
        self.active_role
            .as_deref()
            .and_then(|role_id| self.roles.get(role_id))
    }

    /// Switches the persona for subsequent messages; `None` clears it.
    pub fn use_role(&mut self, role_id: Option<&str>) -> Result<Option<PersonaRole>, String> {
        let Some(role_id) = role_id.map(str::trim).filter(|id| !id.is_empty()) else {
            self.active_role = None;
            return Ok(None);
        };
        let Some(role) = self.roles.get(role_id).cloned() else {
            return Err(format!("Unknown role '{role_id}'."));
        };
        self.active_role = Some(role.id.clone());
        Ok(Some(role))
    }

    pub fn add_custom_role(&mut self, name: &str, description: &str) -> Result<PersonaRole, String> {
        self.roles.add_custom(name, description)
    }

    pub fn new_conversation(&mut self) -> Conversation {
        let conversation = self.lock_store().new_conversation().clone();
        info!(conversation_id = %conversation.id, "started new conversation");
        conversation
    }

    pub fn process_message(&mut self, text: &str, options: &EnrichmentOptions) -> PipelineOutcome {
        let text = text.trim();
        let (start, history) = {
            let mut store = self.lock_store();
            let history = store.history(self.config.history_window);
            let start = store.begin_exchange(Message::user(text, options.images.clone()));
            (start, history)
        };
        self.emit(
            "message_pending",
            json!({
                "message_id": start.placeholder_id,
                "user_message_id": start.user_message_id,
                "toggles": options.toggle_names(),
                "images": options.images.len(),
                "history": history.len(),
            }),
        );

        let draft = self.run_stages(text, options, &history);
        self.settle(text, &start, draft)
    }

    fn run_stages(&self, text: &str, options: &EnrichmentOptions, history: &[Message]) -> Draft {
        if options.use_web_search {
            if let Some(draft) = self.web_search_stage(text) {
                return draft;
            }
        } else {
            self.stage_skipped("web_search", "disabled");
        }

        if let Some(tool_name) = options.requested_tool() {
            if let Some(draft) = self.tool_stage(text, tool_name) {
                return draft;
            }
        }

        let mut image_fallback = false;
        if is_image_intent(text) {
            match self.image_stage(text) {
                Some(draft) => return draft,
                None => image_fallback = true,
            }
        } else {
            self.stage_skipped("image", "no image intent");
        }

        self.stage_started("text", json!({ "role": self.active_role().map(|role| role.id.clone()) }));
        match self.text_path(text, options, history) {
            Ok(answer) => {
                self.stage_finished("text", json!({ "chars": answer.content.chars().count() }));
                let mut content = answer.content;
                if image_fallback {
                    content.push_str(IMAGE_FALLBACK_NOTE);
                }
                Draft {
                    route: Route::Text,
                    update: MessageUpdate {
                        content,
                        reasoning: answer.reasoning,
                        thinking: answer.thinking,
                        ..MessageUpdate::default()
                    },
                    image_fallback,
                    error: None,
                }
            }
            Err(err) => {
                warn!(kind = err.kind.as_str(), error = %err, "text generation failed");
                self.stage_finished("text", json!({ "error": err.kind.as_str() }));
                Draft {
                    route: Route::Text,
                    update: MessageUpdate::content(failure_content(&err)),
                    image_fallback,
                    error: Some(err),
                }
            }
        }
    }

    /// Settles with the summary when the search produced any results.
    fn web_search_stage(&self, text: &str) -> Option<Draft> {
        self.stage_started("web_search", json!({ "backend": self.backends.search.name() }));
        let results = search_web(self.backends.search.as_ref(), text);
        if results.is_empty() {
            self.stage_finished("web_search", json!({ "results": 0, "short_circuit": false }));
            return None;
        }
        let summary = summarize_results(self.backends.search.as_ref(), &results, text);
        if summary.trim().is_empty() {
            self.stage_finished("web_search", json!({ "results": results.len(), "short_circuit": false }));
            return None;
        }
        self.stage_finished(
            "web_search",
            json!({ "results": results.len(), "short_circuit": true }),
        );
        Some(Draft::settled(
            Route::WebSearch,
            MessageUpdate {
                content: summary,
                web_search: Some(WebSearchRecord {
                    query: text.to_string(),
                    results,
                }),
                ..MessageUpdate::default()
            },
        ))
    }

    fn tool_stage(&self, text: &str, tool_name: &str) -> Option<Draft> {
        self.stage_started("tool", json!({ "tool": tool_name }));
        let result = match self.tools.run_tool(text, tool_name) {
            Ok(result) => result,
            Err(err) => {
                self.stage_finished("tool", json!({ "tool": tool_name, "error": err.kind.as_str() }));
                return Some(Draft {
                    route: Route::Tool,
                    update: MessageUpdate::content(err.message.clone()),
                    image_fallback: false,
                    error: Some(err),
                });
            }
        };
        self.stage_finished(
            "tool",
            json!({
                "tool": tool_name,
                "needs_additional_processing": result.needs_additional_processing,
            }),
        );
        if result.result.trim().is_empty() {
            return None;
        }
        let mut content = result.result.clone();
        if let Some(explanation) = result
            .explanation
            .as_deref()
            .map(str::trim)
            .filter(|explanation| !explanation.is_empty())
        {
            content.push_str(&format!("\n\n*{explanation}*"));
        }
        Some(Draft::settled(
            Route::Tool,
            MessageUpdate {
                content,
                tools_used: Some(ToolUsage {
                    tool_type: tool_name.to_string(),
                    result: result.result,
                    explanation: result.explanation,
                }),
                ..MessageUpdate::default()
            },
        ))
    }

    /// `None` means the attempt failed and the text path should answer.
    fn image_stage(&self, text: &str) -> Option<Draft> {
        self.stage_started("image", json!({ "backend": self.backends.image.name() }));
        let response = self
            .backends
            .image
            .generate(&ImageRequest::new(text, ImageOptions::enhanced()));
        match response.data.filter(|reference| response.success && !reference.is_empty()) {
            Some(reference) => {
                self.stage_finished("image", json!({ "success": true }));
                Some(Draft::settled(
                    Route::Image,
                    MessageUpdate {
                        content: format!(
                            "Here's the image I generated based on your request:\n\n*{text}*"
                        ),
                        images: vec![reference],
                        ..MessageUpdate::default()
                    },
                ))
            }
            None => {
                warn!(message = %response.message, "image generation failed; answering with text");
                self.stage_finished(
                    "image",
                    json!({ "success": false, "message": response.message }),
                );
                None
            }
        }
    }

    fn text_path(
        &self,
        text: &str,
        options: &EnrichmentOptions,
        history: &[Message],
    ) -> Result<TextAnswer, BackendError> {
        if !self.backends.text.is_configured() {
            return Err(BackendError::credential_missing(self.backends.text.name()));
        }
        let lead: Vec<Turn> = self
            .active_role()
            .map(|role| Turn::user(role.preamble()))
            .into_iter()
            .collect();

        let thinking = if options.use_thinking {
            Some(self.side_call("thinking", &lead, thinking_prompt(text))?)
        } else {
            None
        };
        let reasoning = if options.use_reasoning {
            Some(self.side_call("reasoning", &lead, reasoning_prompt(text))?)
        } else {
            None
        };

        let final_prompt = match (&reasoning, &thinking) {
            (Some(reasoning), _) => reasoning_recap(reasoning, text),
            (None, Some(thinking)) => thinking_recap(thinking, text),
            (None, None) => text.to_string(),
        };
        let mut turns = lead;
        turns.extend(history_turns(history));
        turns.push(Turn::user(final_prompt).with_images(&options.images));
        debug!(turns = turns.len(), "requesting final answer");
        let content = self.backends.text.generate(&turns)?;

        Ok(TextAnswer {
            content,
            reasoning,
            thinking,
        })
    }

    /// Transcript call built from the user text alone, without history.
    fn side_call(&self, stage: &str, lead: &[Turn], prompt: String) -> Result<String, BackendError> {
        self.stage_started(stage, json!({}));
        let mut turns = lead.to_vec();
        turns.push(Turn::user(prompt));
        let transcript = self.backends.text.generate(&turns);
        match &transcript {
            Ok(text) => self.stage_finished(stage, json!({ "chars": text.chars().count() })),
            Err(err) => self.stage_finished(stage, json!({ "error": err.kind.as_str() })),
        }
        transcript
    }

    fn settle(&self, user_text: &str, start: &ExchangeStart, draft: Draft) -> PipelineOutcome {
        let fallback_update = draft.update.clone();
        let (message, title) = {
            let mut store = self.lock_store();
            let message = match store.settle(&start.placeholder_id, draft.update) {
                Ok(message) => message.clone(),
                Err(err) => {
                    warn!(error = %err, "placeholder vanished before settle");
                    detached_message(&start.placeholder_id, fallback_update)
                }
            };
            let title = store.title_from_first_message(user_text, self.config.title_max_chars);
            (message, title)
        };

        self.emit(
            "message_settled",
            json!({
                "message_id": message.id,
                "route": draft.route.as_str(),
                "image_fallback": draft.image_fallback,
                "error": draft.error.as_ref().map(|err| err.kind.as_str()),
            }),
        );
        if let Some(title) = title.as_deref() {
            self.emit("conversation_titled", json!({ "title": title }));
        }
        info!(
            route = draft.route.as_str(),
            failed = draft.error.is_some(),
            "message settled"
        );

        PipelineOutcome {
            message,
            route: draft.route,
            image_fallback: draft.image_fallback,
            error: draft.error,
            title,
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, ConversationStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stage_started(&self, stage: &str, detail: Value) {
        debug!(stage, "stage started");
        self.emit("stage_started", with_stage(stage, detail));
    }

    fn stage_finished(&self, stage: &str, detail: Value) {
        self.emit("stage_finished", with_stage(stage, detail));
    }

    fn stage_skipped(&self, stage: &str, reason: &str) {
        self.emit("stage_skipped", json!({ "stage": stage, "reason": reason }));
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(event = event_type, error = %err, "failed to record pipeline event");
        }
    }
}

fn with_stage(stage: &str, detail: Value) -> Value {
    let mut payload = match detail {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    payload.insert("stage".to_string(), Value::String(stage.to_string()));
    Value::Object(payload)
}

fn failure_content(err: &BackendError) -> String {
    match err.kind {
        BackendErrorKind::Blocked | BackendErrorKind::Cancelled => err.message.clone(),
        BackendErrorKind::CredentialMissing => MISSING_CREDENTIAL_CONTENT.to_string(),
        BackendErrorKind::Transport | BackendErrorKind::Empty => ERROR_CONTENT.to_string(),
    }
}

fn history_turns(history: &[Message]) -> Vec<Turn> {
    history
        .iter()
        .filter(|message| !message.content.trim().is_empty() || !message.images.is_empty())
        .map(|message| match message.role {
            MessageRole::User => Turn::user(message.content.clone()).with_images(&message.images),
            MessageRole::Assistant => Turn::model(message.content.clone()),
        })
        .collect()
}

fn detached_message(id: &str, update: MessageUpdate) -> Message {
    Message {
        id: id.to_string(),
        role: MessageRole::Assistant,
        content: update.content,
        timestamp: Utc::now(),
        images: update.images,
        is_loading: false,
        reasoning: update.reasoning,
        thinking: update.thinking,
        web_search: update.web_search,
        tools_used: update.tools_used,
    }
}

pub(crate) fn thinking_prompt(user_text: &str) -> String {
    format!(
        "I need to answer the following question or request: \"{user_text}\".\n\
Let me think carefully about how to approach this problem step by step. I'll explore different aspects, consider relevant knowledge, and organize my thoughts.\n\
I should show my detailed thought process so that someone can follow my reasoning."
    )
}

pub(crate) fn reasoning_prompt(user_text: &str) -> String {
    format!(
        "I need to answer the following question or request: \"{user_text}\".\n\
Let me think step by step to reach a well-reasoned conclusion.\n\
I should consider relevant facts, potential approaches, and logical reasoning."
    )
}

fn reasoning_recap(reasoning: &str, user_text: &str) -> String {
    format!(
        "Based on my reasoning: {reasoning}\n\nHere is my concise, helpful response to the original question: \"{user_text}\""
    )
}

fn thinking_recap(thinking: &str, user_text: &str) -> String {
    format!(
        "Based on my thinking process: {thinking}\n\nNow I'll provide a clear, concise, and helpful response to the original question: \"{user_text}\""
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};
    use std::thread;
    use std::time::{Duration, Instant};

    use lumen_contracts::conversation::ConversationStore;
    use lumen_contracts::messages::SearchResult;
    use serde_json::Value;

    use super::*;
    use crate::backends::{ImageResponse, Speaker};

    type Reply = Box<dyn Fn(&str) -> Result<String, BackendError> + Send + Sync>;

    /// Answers from the last turn's text and records every request.
    struct RecordingText {
        reply: Reply,
        calls: Mutex<Vec<Vec<Turn>>>,
        store: OnceLock<Arc<Mutex<ConversationStore>>>,
        loading_seen: Mutex<Vec<usize>>,
    }

    impl RecordingText {
        fn new(reply: impl Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                calls: Mutex::new(Vec::new()),
                store: OnceLock::new(),
                loading_seen: Mutex::new(Vec::new()),
            })
        }

        fn answering(text: &'static str) -> Arc<Self> {
            Self::new(move |_| Ok(text.to_string()))
        }

        fn calls(&self) -> Vec<Vec<Turn>> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn last_prompts(&self) -> Vec<String> {
            self.calls()
                .iter()
                .filter_map(|turns| turns.last().map(Turn::text))
                .collect()
        }
    }

    impl TextBackend for RecordingText {
        fn name(&self) -> &str {
            "recording"
        }

        fn generate(&self, turns: &[Turn]) -> Result<String, BackendError> {
            if let Some(store) = self.store.get() {
                let loading = store.lock().map(|store| store.loading_count()).unwrap_or(0);
                if let Ok(mut seen) = self.loading_seen.lock() {
                    seen.push(loading);
                }
            }
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(turns.to_vec());
            }
            let prompt = turns.last().map(Turn::text).unwrap_or_default();
            (self.reply)(&prompt)
        }
    }

    struct RecordingSearch {
        results: Result<Vec<SearchResult>, BackendError>,
        summary: Result<String, BackendError>,
        searches: Mutex<Vec<String>>,
    }

    impl RecordingSearch {
        fn new(
            results: Result<Vec<SearchResult>, BackendError>,
            summary: Result<String, BackendError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                results,
                summary,
                searches: Mutex::new(Vec::new()),
            })
        }

        fn search_count(&self) -> usize {
            self.searches.lock().map(|searches| searches.len()).unwrap_or(0)
        }
    }

    impl SearchBackend for RecordingSearch {
        fn name(&self) -> &str {
            "recording-search"
        }

        fn search(&self, query: &str) -> Result<Vec<SearchResult>, BackendError> {
            if let Ok(mut searches) = self.searches.lock() {
                searches.push(query.to_string());
            }
            self.results.clone()
        }

        fn summarize(&self, _results: &[SearchResult], _query: &str) -> Result<String, BackendError> {
            self.summary.clone()
        }
    }

    struct RecordingImage {
        response: ImageResponse,
        requests: Mutex<Vec<ImageRequest>>,
    }

    impl RecordingImage {
        fn new(response: ImageResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ImageRequest> {
            self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
        }
    }

    impl ImageBackend for RecordingImage {
        fn name(&self) -> &str {
            "recording-image"
        }

        fn generate(&self, request: &ImageRequest) -> ImageResponse {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            self.response.clone()
        }
    }

    struct Harness {
        text: Arc<RecordingText>,
        search: Arc<RecordingSearch>,
        image: Arc<RecordingImage>,
        orchestrator: Orchestrator,
    }

    fn harness_with(
        text: Arc<RecordingText>,
        search: Arc<RecordingSearch>,
        image: Arc<RecordingImage>,
        events: EventWriter,
    ) -> Harness {
        let backends = Backends {
            text: Arc::clone(&text) as Arc<dyn TextBackend>,
            search: Arc::clone(&search) as Arc<dyn SearchBackend>,
            image: Arc::clone(&image) as Arc<dyn ImageBackend>,
        };
        let orchestrator = Orchestrator::new(EngineConfig::default(), backends, events);
        let _ = text.store.set(orchestrator.store());
        Harness {
            text,
            search,
            image,
            orchestrator,
        }
    }

    fn harness(text: Arc<RecordingText>) -> Harness {
        harness_with(
            text,
            RecordingSearch::new(Ok(two_results()), Ok("Search summary".to_string())),
            RecordingImage::new(ImageResponse::success("data:image/png;base64,AAAA")),
            EventWriter::disabled(),
        )
    }

    fn two_results() -> Vec<SearchResult> {
        vec![
            SearchResult {
                title: "Cats".to_string(),
                link: "https://cats.example".to_string(),
                snippet: "All about cats".to_string(),
            },
            SearchResult {
                title: "More cats".to_string(),
                link: "https://more.example".to_string(),
                snippet: "Even more".to_string(),
            },
        ]
    }

    fn loading_count(orchestrator: &Orchestrator) -> usize {
        orchestrator
            .store()
            .lock()
            .map(|store| store.loading_count())
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn successful_search_short_circuits_every_later_stage() {
        let mut h = harness(RecordingText::answering("should not be used"));
        let options = EnrichmentOptions {
            use_web_search: true,
            use_reasoning: true,
            use_thinking: true,
            tool: Some("calculator".to_string()),
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("Create an image of a cat", &options);

        assert_eq!(outcome.route, Route::WebSearch);
        assert_eq!(outcome.message.content, "Search summary");
        let record = outcome.message.web_search.clone();
        assert_eq!(
            record.as_ref().map(|record| record.query.as_str()),
            Some("Create an image of a cat")
        );
        assert_eq!(record.map(|record| record.results.len()), Some(2));
        assert_eq!(outcome.message.reasoning, None);
        assert_eq!(outcome.message.thinking, None);
        assert!(outcome.message.images.is_empty());
        assert!(h.text.calls().is_empty());
        assert!(h.image.requests().is_empty());
        assert_eq!(loading_count(&h.orchestrator), 0);
    }

    #[test]
    fn failed_search_still_answers_with_placeholders_and_digest() {
        let mut h = harness_with(
            RecordingText::answering("unused"),
            RecordingSearch::new(
                Err(BackendError::transport("down")),
                Err(BackendError::transport("down")),
            ),
            RecordingImage::new(ImageResponse::failure("unused")),
            EventWriter::disabled(),
        );
        let options = EnrichmentOptions {
            use_web_search: true,
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("tokio runtime", &options);

        assert_eq!(outcome.route, Route::WebSearch);
        assert!(outcome
            .message
            .content
            .starts_with("# Search Results for \"tokio runtime\""));
        assert_eq!(
            outcome.message.web_search.map(|record| record.results.len()),
            Some(5)
        );
        assert_eq!(h.search.search_count(), 1);
    }

    #[test]
    fn empty_search_falls_through_to_text() {
        let mut h = harness_with(
            RecordingText::answering("From the model"),
            RecordingSearch::new(Ok(Vec::new()), Ok("never".to_string())),
            RecordingImage::new(ImageResponse::failure("unused")),
            EventWriter::disabled(),
        );
        let options = EnrichmentOptions {
            use_web_search: true,
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("obscure query", &options);
        assert_eq!(outcome.route, Route::Text);
        assert_eq!(outcome.message.content, "From the model");
        assert_eq!(outcome.message.web_search, None);
    }

    #[test]
    fn reasoning_wins_final_prompt_when_both_transcripts_requested() {
        let text = RecordingText::new(|prompt| {
            if prompt.contains("think carefully about how to approach") {
                Ok("THINKING-TRANSCRIPT".to_string())
            } else if prompt.contains("well-reasoned conclusion") {
                Ok("REASONING-TRANSCRIPT".to_string())
            } else {
                Ok("Final answer".to_string())
            }
        });
        let mut h = harness(text);
        let options = EnrichmentOptions {
            use_reasoning: true,
            use_thinking: true,
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("Why is the sky blue?", &options);

        let prompts = h.text.last_prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("think carefully"));
        assert!(prompts[1].contains("well-reasoned conclusion"));
        let final_prompt = &prompts[2];
        assert!(final_prompt.starts_with("Based on my reasoning: REASONING-TRANSCRIPT"));
        assert!(!final_prompt.contains("THINKING-TRANSCRIPT"));
        assert!(final_prompt.ends_with("\"Why is the sky blue?\""));

        assert_eq!(outcome.message.content, "Final answer");
        assert_eq!(outcome.message.reasoning.as_deref(), Some("REASONING-TRANSCRIPT"));
        assert_eq!(outcome.message.thinking.as_deref(), Some("THINKING-TRANSCRIPT"));
    }

    #[test]
    fn thinking_alone_recaps_thinking_process() {
        let text = RecordingText::new(|prompt| {
            if prompt.contains("think carefully") {
                Ok("step one, step two".to_string())
            } else {
                Ok("Answer".to_string())
            }
        });
        let mut h = harness(text);
        let options = EnrichmentOptions {
            use_thinking: true,
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("Plan my week", &options);

        let prompts = h.text.last_prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("Based on my thinking process: step one, step two"));
        assert_eq!(outcome.message.reasoning, None);
        assert_eq!(outcome.message.thinking.as_deref(), Some("step one, step two"));
    }

    #[test]
    fn side_calls_ignore_history_but_final_call_carries_it() {
        let mut h = harness(RecordingText::answering("ok"));
        h.orchestrator
            .process_message("first question", &EnrichmentOptions::default());
        let options = EnrichmentOptions {
            use_reasoning: true,
            ..EnrichmentOptions::default()
        };
        h.orchestrator.process_message("second question", &options);

        let calls = h.text.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].len(), 1);
        let final_call = &calls[2];
        assert_eq!(final_call.len(), 3);
        assert_eq!(final_call[0].text(), "first question");
        assert_eq!(final_call[1].speaker, Speaker::Model);
        assert_eq!(final_call[1].text(), "ok");
    }

    #[test]
    fn active_role_leads_every_text_call() -> anyhow::Result<()> {
        let mut h = harness(RecordingText::answering("Arr"));
        let role = h
            .orchestrator
            .use_role(Some("tutor"))
            .map_err(anyhow::Error::msg)?
            .ok_or_else(|| anyhow::anyhow!("tutor role missing"))?;
        let options = EnrichmentOptions {
            use_thinking: true,
            ..EnrichmentOptions::default()
        };
        h.orchestrator.process_message("Explain recursion", &options);

        for call in h.text.calls() {
            assert_eq!(call[0].text(), role.preamble());
            assert_eq!(call[0].speaker, Speaker::User);
        }
        assert!(h.orchestrator.use_role(Some("pirate")).is_err());
        Ok(())
    }

    #[test]
    fn image_request_settles_with_caption_and_reference() {
        let mut h = harness(RecordingText::answering("unused"));
        let outcome = h
            .orchestrator
            .process_message("Create an image of a cat", &EnrichmentOptions::default());

        assert_eq!(outcome.route, Route::Image);
        assert_eq!(
            outcome.message.content,
            "Here's the image I generated based on your request:\n\n*Create an image of a cat*"
        );
        assert_eq!(outcome.message.images, vec!["data:image/png;base64,AAAA".to_string()]);
        let requests = h.image.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].options, ImageOptions::enhanced());
        assert!(h.text.calls().is_empty());
    }

    #[test]
    fn failed_image_falls_back_to_text_with_caveat() {
        let mut h = harness_with(
            RecordingText::answering("A cat is a small feline."),
            RecordingSearch::new(Ok(Vec::new()), Ok(String::new())),
            RecordingImage::new(ImageResponse::failure("quota exceeded")),
            EventWriter::disabled(),
        );
        let outcome = h
            .orchestrator
            .process_message("Create an image of a cat", &EnrichmentOptions::default());

        assert_eq!(outcome.route, Route::Text);
        assert!(outcome.image_fallback);
        assert_eq!(
            outcome.message.content,
            format!("A cat is a small feline.{IMAGE_FALLBACK_NOTE}")
        );
        assert!(outcome.message.images.is_empty());
        assert_eq!(h.text.calls().len(), 1);
    }

    #[test]
    fn tool_stage_records_usage_and_skips_text_path() {
        let text = RecordingText::answering(
            r#"{"expression": "2+2", "calculation": "2 + 2 = 4", "result": "4"}"#,
        );
        let mut h = harness(text);
        let options = EnrichmentOptions {
            tool: Some("calculator".to_string()),
            use_reasoning: true,
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("What is 2+2?", &options);

        assert_eq!(outcome.route, Route::Tool);
        assert!(outcome.message.content.ends_with("Result: 4"));
        let usage = outcome.message.tools_used.clone();
        assert_eq!(usage.as_ref().map(|usage| usage.tool_type.as_str()), Some("calculator"));
        assert_eq!(outcome.message.reasoning, None);
        assert_eq!(h.text.calls().len(), 1);
    }

    #[test]
    fn cancelled_tool_call_settles_as_cancelled() {
        let mut h = harness(RecordingText::new(|_| Err(BackendError::cancelled())));
        let options = EnrichmentOptions {
            tool: Some("calculator".to_string()),
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("What is 2+2?", &options);

        assert_eq!(outcome.route, Route::Tool);
        assert_eq!(outcome.message.content, "Request cancelled");
        assert_eq!(
            outcome.error.as_ref().map(|err| err.kind),
            Some(BackendErrorKind::Cancelled)
        );
        assert!(!outcome.is_failure());
        assert_eq!(outcome.message.tools_used, None);
        assert_eq!(h.text.calls().len(), 1);
    }

    #[test]
    fn custom_tool_explanation_is_appended_as_note() {
        let text = RecordingText::answering(
            r#"{"toolDesign": "Forecast lookup", "result": "Sunny, 24C.", "explanation": "Simulated."}"#,
        );
        let mut h = harness(text);
        let options = EnrichmentOptions {
            tool: Some("weather-lookup".to_string()),
            ..EnrichmentOptions::default()
        };

        let outcome = h.orchestrator.process_message("Weather in Rome?", &options);
        assert_eq!(
            outcome.message.content,
            "Sunny, 24C.\n\n*Note: I created a virtual weather-lookup tool to handle your request. Simulated.*"
        );
    }

    #[test]
    fn transport_failure_settles_with_apology() {
        let mut h = harness(RecordingText::new(|_| Err(BackendError::transport("503"))));
        let outcome = h
            .orchestrator
            .process_message("hello", &EnrichmentOptions::default());

        assert_eq!(outcome.message.content, ERROR_CONTENT);
        assert!(!outcome.message.is_loading);
        assert!(outcome.is_failure());
        assert_eq!(loading_count(&h.orchestrator), 0);
    }

    #[test]
    fn blocked_and_cancelled_are_shown_verbatim() {
        let mut blocked = harness(RecordingText::new(|_| Err(BackendError::blocked("SAFETY"))));
        let outcome = blocked
            .orchestrator
            .process_message("something risky", &EnrichmentOptions::default());
        assert_eq!(outcome.message.content, "Content blocked: SAFETY");
        assert!(!outcome.is_failure());

        let mut cancelled = harness(RecordingText::new(|_| Err(BackendError::cancelled())));
        let outcome = cancelled
            .orchestrator
            .process_message("long question", &EnrichmentOptions::default());
        assert_eq!(outcome.message.content, "Request cancelled");
        assert_eq!(
            outcome.error.map(|err| err.kind),
            Some(BackendErrorKind::Cancelled)
        );
    }

    #[test]
    fn reasoning_failure_stops_before_final_call() {
        let text = RecordingText::new(|prompt| {
            if prompt.contains("well-reasoned") {
                Err(BackendError::transport("reset"))
            } else {
                Ok("unused".to_string())
            }
        });
        let mut h = harness(text);
        let options = EnrichmentOptions {
            use_reasoning: true,
            ..EnrichmentOptions::default()
        };
        let outcome = h.orchestrator.process_message("why?", &options);

        assert_eq!(h.text.calls().len(), 1);
        assert_eq!(outcome.message.content, ERROR_CONTENT);
        assert_eq!(outcome.message.reasoning, None);
    }

    struct KeylessText;

    impl TextBackend for KeylessText {
        fn name(&self) -> &str {
            "keyless"
        }

        fn is_configured(&self) -> bool {
            false
        }

        fn generate(&self, _turns: &[Turn]) -> Result<String, BackendError> {
            Ok("unreachable".to_string())
        }
    }

    #[test]
    fn missing_credential_is_explained_without_calling_backend() {
        let backends = Backends {
            text: Arc::new(KeylessText),
            search: RecordingSearch::new(Ok(Vec::new()), Ok(String::new())),
            image: RecordingImage::new(ImageResponse::failure("unused")),
        };
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), backends, EventWriter::disabled());
        let options = EnrichmentOptions {
            use_reasoning: true,
            ..EnrichmentOptions::default()
        };

        let outcome = orchestrator.process_message("hello", &options);
        assert_eq!(outcome.message.content, MISSING_CREDENTIAL_CONTENT);
        assert_eq!(
            outcome.error.as_ref().map(|err| err.kind),
            Some(BackendErrorKind::CredentialMissing)
        );
        assert!(!outcome.is_failure());
    }

    /// Blocks until cancelled, like a request to a server that never answers.
    #[derive(Default)]
    struct StalledText {
        cancelled: AtomicBool,
    }

    impl TextBackend for StalledText {
        fn name(&self) -> &str {
            "stalled"
        }

        fn generate(&self, _turns: &[Turn]) -> Result<String, BackendError> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if self.cancelled.swap(false, Ordering::SeqCst) {
                    return Err(BackendError::cancelled());
                }
                thread::sleep(Duration::from_millis(5));
            }
            Ok("too late".to_string())
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_handle_aborts_in_flight_text_call() {
        let backends = Backends {
            text: Arc::new(StalledText::default()),
            search: RecordingSearch::new(Ok(Vec::new()), Ok(String::new())),
            image: RecordingImage::new(ImageResponse::failure("unused")),
        };
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), backends, EventWriter::disabled());
        let handle = orchestrator.cancel_handle();
        let store = orchestrator.store();
        let canceller = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                let loading = store.lock().map(|store| store.loading_count()).unwrap_or(0);
                if loading == 1 {
                    thread::sleep(Duration::from_millis(20));
                    handle.cancel();
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
        });

        let outcome = orchestrator.process_message("a long question", &EnrichmentOptions::default());
        let _ = canceller.join();

        assert_eq!(outcome.message.content, "Request cancelled");
        assert_eq!(
            outcome.error.map(|err| err.kind),
            Some(BackendErrorKind::Cancelled)
        );
        assert!(!outcome.message.is_loading);
    }

    #[test]
    fn placeholder_is_visible_while_backend_runs() {
        let mut h = harness(RecordingText::answering("done"));
        let outcome = h
            .orchestrator
            .process_message("hi", &EnrichmentOptions::default());

        let seen = h.text.loading_seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen, vec![1]);
        assert!(!outcome.message.is_loading);

        let store = h.orchestrator.store();
        let messages = store.lock().map(|store| store.messages().to_vec()).unwrap_or_default();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, outcome.message.id);
        assert_eq!(messages.iter().filter(|message| message.is_loading).count(), 0);
    }

    #[test]
    fn title_comes_from_first_message_only() {
        let mut h = harness(RecordingText::answering("ok"));
        let first = "Tell me everything about the Rust borrow checker please";
        let outcome = h
            .orchestrator
            .process_message(first, &EnrichmentOptions::default());
        assert_eq!(outcome.title.as_deref(), Some("Tell me everything about the R..."));

        let second = h
            .orchestrator
            .process_message("And lifetimes?", &EnrichmentOptions::default());
        assert_eq!(second.title, None);
        let title = h
            .orchestrator
            .store()
            .lock()
            .map(|store| store.active().title.clone())
            .unwrap_or_default();
        assert_eq!(title, "Tell me everything about the R...");

        h.orchestrator.new_conversation();
        let fresh = h
            .orchestrator
            .process_message("Short one", &EnrichmentOptions::default());
        assert_eq!(fresh.title.as_deref(), Some("Short one"));
    }

    #[test]
    fn image_only_first_message_leaves_title_to_next_message() {
        let mut h = harness(RecordingText::answering("A lighthouse."));
        let options = EnrichmentOptions {
            images: vec!["data:image/png;base64,AAEC".to_string()],
            ..EnrichmentOptions::default()
        };
        let first = h.orchestrator.process_message("", &options);
        assert_eq!(first.title, None);

        let second = h
            .orchestrator
            .process_message("Hello", &EnrichmentOptions::default());
        assert_eq!(second.title.as_deref(), Some("Hello"));

        let third = h
            .orchestrator
            .process_message("Anything else?", &EnrichmentOptions::default());
        assert_eq!(third.title, None);
    }

    #[test]
    fn attached_images_reach_the_final_user_turn() {
        let mut h = harness(RecordingText::answering("A tabby cat."));
        let options = EnrichmentOptions {
            images: vec!["data:image/png;base64,AAEC".to_string()],
            ..EnrichmentOptions::default()
        };
        h.orchestrator.process_message("What breed is this?", &options);

        let calls = h.text.calls();
        let last = calls[0].last().cloned().unwrap_or_else(|| Turn::user(""));
        assert_eq!(last.parts.len(), 2);
        assert_eq!(last.text(), "What breed is this?");
    }

    #[test]
    fn dryrun_backends_run_every_route_offline() {
        let mut orchestrator = Orchestrator::new(
            EngineConfig::default(),
            Backends::dryrun(),
            EventWriter::disabled(),
        );

        let picture = orchestrator.process_message("Draw a lighthouse at dusk", &EnrichmentOptions::default());
        assert_eq!(picture.route, Route::Image);
        assert!(picture.message.images[0].starts_with("data:image/png;base64,"));

        let searched = orchestrator.process_message(
            "rust async runtimes",
            &EnrichmentOptions {
                use_web_search: true,
                ..EnrichmentOptions::default()
            },
        );
        assert_eq!(searched.route, Route::WebSearch);
        assert!(searched.message.content.starts_with("# Search Results for"));

        let answered = orchestrator.process_message("hello there", &EnrichmentOptions::default());
        assert_eq!(answered.route, Route::Text);
        assert!(answered.message.content.starts_with("[dryrun]"));
        assert!(answered.error.is_none());
    }

    #[test]
    fn events_trace_the_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut h = harness_with(
            RecordingText::answering("hi there"),
            RecordingSearch::new(Ok(Vec::new()), Ok(String::new())),
            RecordingImage::new(ImageResponse::failure("unused")),
            EventWriter::new(&path, "session-test"),
        );
        h.orchestrator
            .process_message("hello", &EnrichmentOptions::default());

        let types: Vec<String> = fs::read_to_string(&path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "message_pending",
                "stage_skipped",
                "stage_skipped",
                "stage_started",
                "stage_finished",
                "message_settled",
                "conversation_titled",
            ]
        );
        Ok(())
    }
}
