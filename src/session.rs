//! Chat sessions
//!
//! A [`ChatSession`] owns one [`VersionedFileStore`], the visible transcript,
//! the raw conversation history sent to the model, and its identity. Every
//! mutation bumps `last_accessed`; the [`SessionRegistry`] persists the
//! session after each one.

pub mod record;
mod registry;

pub use record::{ChatRecord, ChatStorage, PersistError};
pub use registry::SessionRegistry;

use crate::llm::LlmMessage;
use crate::store::{FileVersion, PutOutcome, VersionedFileStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    System,
}

/// One entry of the visible transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// Epoch milliseconds
    #[serde(deserialize_with = "crate::store::deserialize_millis")]
    pub timestamp: i64,
    /// Outbound event type for AI entries (`file_create`, `error`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ChatMessage {
    pub fn new(sender: Sender, text: impl Into<String>, kind: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            sender,
            timestamp: Utc::now().timestamp_millis(),
            kind: kind.map(str::to_string),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text, None)
    }
}

/// In-memory state of one chat
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: String,
    pub name: String,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub store: VersionedFileStore,
    pub history: Vec<LlmMessage>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, name: impl Into<String>, wallet_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            wallet_address: wallet_address.into(),
            created_at: now,
            last_accessed: now,
            messages: Vec::new(),
            store: VersionedFileStore::new(),
            history: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now().max(self.last_accessed);
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn add_history(&mut self, entry: LlmMessage) {
        self.history.push(entry);
        self.touch();
    }

    pub fn put_file(&mut self, path: &str, content: &str, language: &str) -> PutOutcome {
        let outcome = self.store.put(path, content, language);
        self.touch();
        outcome
    }

    pub fn delete_file(&mut self, path: &str) -> bool {
        let removed = self.store.delete(path);
        self.touch();
        removed
    }

    pub fn get_file(&self, path: &str, version: Option<usize>) -> Option<&FileVersion> {
        self.store.get(path, version)
    }

    pub fn file_history(&self, path: &str) -> &[FileVersion] {
        self.store.history_of(path)
    }
}
