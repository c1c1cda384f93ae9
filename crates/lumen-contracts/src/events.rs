use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for pipeline `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// A disabled writer builds the event but touches no file.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: Some(path.into()),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: None,
                session_id: String::new(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.build_event(event_type, payload);
        if let Some(path) = self.inner.path.as_deref() {
            self.append_line(path, &event)?;
        }
        Ok(Value::Object(event))
    }

    fn build_event(&self, event_type: &str, payload: EventPayload) -> EventPayload {
        let mut event = EventPayload::with_capacity(payload.len() + 3);
        event.insert("type".into(), event_type.into());
        event.insert("session_id".into(), self.inner.session_id.as_str().into());
        event.insert("ts".into(), now_utc_iso().into());
        event.extend(payload);
        event
    }

    fn append_line(&self, path: &Path, event: &EventPayload) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create events dir {}", parent.display()))?;
        }
        let line = serde_json::to_string(event)?;
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open events file {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append to {}", path.display()))?;
        Ok(())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
