//! Runtime for executing chat turns
//!
//! One [`SessionRuntime`] worker runs per connected wallet. It owns the
//! connection's outbound event channel and processes inbound [`Request`]s one
//! at a time, so no two turns ever interleave on a wallet's chats.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::error::{ChatError, ErrorKind};
use crate::extract::Action;
use crate::session::SessionRegistry;
use crate::store::DEFAULT_LANGUAGE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Runtime used by the server: model calls go through the registry
pub type ProductionRuntime = SessionRuntime<Arc<dyn LlmClient>>;

// ============================================================================
// Outbound events
// ============================================================================

/// Outbound event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    FileCreate,
    CodeEdit,
    FileDelete,
    Error,
    FileSaved,
    FileVersion,
    FileHistory,
    ContextCreated,
    ContextsLoaded,
    ContextSwitched,
    ContextDeleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::FileCreate => "file_create",
            EventKind::CodeEdit => "code_edit",
            EventKind::FileDelete => "file_delete",
            EventKind::Error => "error",
            EventKind::FileSaved => "file_saved",
            EventKind::FileVersion => "file_version",
            EventKind::FileHistory => "file_history",
            EventKind::ContextCreated => "context_created",
            EventKind::ContextsLoaded => "contexts_loaded",
            EventKind::ContextSwitched => "context_switched",
            EventKind::ContextDeleted => "context_deleted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<usize>,
    /// Epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Error classification, only on `error` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl EventMetadata {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Event sent to the client: `{type, content, metadata?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl ServerEvent {
    pub fn new(kind: EventKind, content: impl Into<Value>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(EventKind::Message, text.into())
    }

    /// Project a classified error onto the wire
    pub fn error(error: &ChatError) -> Self {
        Self::new(EventKind::Error, error.message.clone()).with_metadata(EventMetadata {
            kind: Some(error.kind),
            ..EventMetadata::default()
        })
    }

    /// Wire form of an extracted action
    pub fn from_action(action: &Action) -> Self {
        match action {
            Action::Message { text } => Self::message(text.clone()),
            Action::CreateFile { path, content } => Self::new(EventKind::FileCreate, content.clone())
                .with_metadata(EventMetadata {
                    language: Some(DEFAULT_LANGUAGE.to_string()),
                    ..EventMetadata::for_path(path.clone())
                }),
            Action::EditFile { path, replacement } => Self::new(EventKind::CodeEdit, replacement.clone())
                .with_metadata(EventMetadata {
                    language: Some(DEFAULT_LANGUAGE.to_string()),
                    ..EventMetadata::for_path(path.clone())
                }),
            Action::DeleteFile { path } => {
                Self::new(EventKind::FileDelete, String::new()).with_metadata(EventMetadata::for_path(path.clone()))
            }
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Tag the event with the chat it belongs to
    #[must_use]
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(EventMetadata::default).chat_id = Some(chat_id.into());
        self
    }

    /// Text stored in the transcript for this event
    pub fn transcript_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Inbound requests
// ============================================================================

/// Editor state the client sends along with a chat message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub current_code: Option<String>,
    /// Path -> file content (a string, or an object with a `content` string)
    #[serde(default)]
    pub file_system: HashMap<String, Value>,
}

impl ClientContext {
    /// Content the client holds for `path`, if any
    pub fn file_content(&self, path: &str) -> Option<&str> {
        match self.file_system.get(path)? {
            Value::String(content) => Some(content),
            Value::Object(file) => file.get("content").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Validated inbound request for a session worker
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Chat {
        chat_id: String,
        text: String,
        context: ClientContext,
    },
    SaveFile {
        chat_id: String,
        path: String,
        content: String,
        language: Option<String>,
    },
    GetFileVersion {
        chat_id: String,
        path: String,
        version: Option<usize>,
    },
    GetFileHistory {
        chat_id: String,
        path: String,
    },
    DeleteFile {
        chat_id: String,
        path: String,
    },
    CreateChat {
        name: Option<String>,
    },
    SwitchChat {
        chat_id: String,
    },
    DeleteChat {
        chat_id: String,
    },
    /// A message the transport could not turn into a request
    Rejected(ChatError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Timing and sampling knobs for turn execution
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub llm_timeout: Duration,
    /// Pause between emitted actions
    pub emit_delay: Duration,
    /// Pause after the preamble, before the first action
    pub preamble_pause: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(120),
            emit_delay: Duration::from_millis(400),
            preamble_pause: Duration::from_millis(500),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            llm_timeout: env_u64("COPILOT_LLM_TIMEOUT_SECS").map_or(defaults.llm_timeout, Duration::from_secs),
            emit_delay: env_u64("COPILOT_EMIT_DELAY_MS").map_or(defaults.emit_delay, Duration::from_millis),
            ..defaults
        }
    }

    /// No pauses, short timeout
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            llm_timeout: Duration::from_secs(5),
            emit_delay: Duration::ZERO,
            preamble_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring invalid numeric setting");
            None
        }
    }
}

// ============================================================================
// Runtime manager
// ============================================================================

/// The live side of a wallet connection
pub struct Connection {
    pub id: u64,
    pub requests: mpsc::Sender<Request>,
    pub events: mpsc::Receiver<ServerEvent>,
}

struct SessionHandle {
    connection_id: u64,
    cancel: CancellationToken,
}

/// Manager for all per-wallet session workers
pub struct RuntimeManager {
    registry: Arc<SessionRegistry>,
    llm: Arc<dyn LlmClient>,
    config: RuntimeConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    next_id: AtomicU64,
}

impl RuntimeManager {
    pub fn new(registry: Arc<SessionRegistry>, llm: Arc<dyn LlmClient>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            llm,
            config,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start a worker for `wallet`, replacing (and cancelling) any existing one
    pub async fn connect(&self, wallet: &str) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (request_tx, request_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let previous = self.sessions.write().await.insert(
            wallet.to_string(),
            SessionHandle {
                connection_id: id,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::info!(wallet = %wallet, replaced = previous.connection_id, "Replacing existing connection");
            previous.cancel.cancel();
        }

        let runtime: ProductionRuntime = SessionRuntime::new(
            wallet.to_string(),
            Arc::clone(&self.registry),
            Arc::clone(&self.llm),
            self.config.clone(),
            request_rx,
            event_tx,
            cancel,
        );
        let wallet_owned = wallet.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(wallet = %wallet_owned, connection_id = id, "Session runtime finished");
        });

        Connection {
            id,
            requests: request_tx,
            events: event_rx,
        }
    }

    /// Stop the worker for `wallet` if it still belongs to `connection_id`
    pub async fn disconnect(&self, wallet: &str, connection_id: u64) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(wallet).is_some_and(|h| h.connection_id == connection_id) {
            if let Some(handle) = sessions.remove(wallet) {
                handle.cancel.cancel();
            }
            tracing::info!(wallet = %wallet, connection_id, "Connection closed");
        }
    }

    pub async fn is_connected(&self, wallet: &str) -> bool {
        self.sessions.read().await.contains_key(wallet)
    }
}
