use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::{Conversation, ConversationStore};
use crate::messages::Message;

pub const TRANSCRIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub schema_version: u64,
    pub exported_at: String,
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

impl Transcript {
    pub fn from_store(store: &ConversationStore) -> Self {
        Self {
            schema_version: TRANSCRIPT_SCHEMA_VERSION,
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            conversation: store.active().clone(),
            messages: store.messages().to_vec(),
        }
    }

    /// Rebuilds a store with this conversation active. Messages still
    /// marked loading are settled as interrupted.
    pub fn into_store(self) -> ConversationStore {
        ConversationStore::restore(self.conversation, self.messages)
    }
}

pub fn write_transcript(path: &Path, store: &ConversationStore) -> anyhow::Result<()> {
    let transcript = Transcript::from_store(store);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&transcript)?)
        .with_context(|| format!("write transcript {}", path.display()))?;
    Ok(())
}

pub fn load_transcript(path: &Path) -> anyhow::Result<Transcript> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read transcript {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("transcript {} is not JSON", path.display()))?;
    let version = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if version != TRANSCRIPT_SCHEMA_VERSION {
        anyhow::bail!(
            "unsupported transcript schema version {version} in {}",
            path.display()
        );
    }
    let transcript: Transcript = serde_json::from_value(value)?;
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{load_transcript, write_transcript};
    use crate::conversation::{ConversationStore, INTERRUPTED_CONTENT};
    use crate::messages::{Message, MessageUpdate};

    #[test]
    fn write_then_load_restores_conversation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("chat.json");

        let mut store = ConversationStore::new();
        let start = store.begin_exchange(Message::user("Plan a trip to Kyoto", Vec::new()));
        store.settle(&start.placeholder_id, MessageUpdate::content("Day 1: Fushimi Inari"))?;
        store.title_from_first_message("Plan a trip to Kyoto", 30);
        write_transcript(&path, &store)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schemaVersion"], json!(1));
        assert_eq!(parsed["conversation"]["title"], json!("Plan a trip to Kyoto"));
        assert_eq!(parsed["messages"][1]["content"], json!("Day 1: Fushimi Inari"));

        let restored = load_transcript(&path)?.into_store();
        assert_eq!(restored.active().title, "Plan a trip to Kyoto");
        assert_eq!(restored.messages().len(), 2);
        Ok(())
    }

    #[test]
    fn loading_messages_are_settled_as_interrupted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("chat.json");

        let mut store = ConversationStore::new();
        store.begin_exchange(Message::user("hello", Vec::new()));
        write_transcript(&path, &store)?;

        let restored = load_transcript(&path)?.into_store();
        assert_eq!(restored.loading_count(), 0);
        assert_eq!(restored.messages()[1].content, INTERRUPTED_CONTENT);
        Ok(())
    }

    #[test]
    fn rejects_unknown_schema_version() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("chat.json");
        std::fs::write(&path, r#"{"schemaVersion": 9}"#)?;
        let err = load_transcript(&path).err().map(|err| err.to_string());
        assert!(err.unwrap_or_default().contains("unsupported transcript schema version 9"));
        Ok(())
    }
}
