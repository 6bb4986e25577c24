//! Error taxonomy shared by the session layer and the transport
//!
//! Every failure a client can observe is a [`ChatError`]: a machine-checkable
//! [`ErrorKind`] plus a human-readable message. The wire `error` event is a
//! projection of this type, never the other way around.

use crate::llm::LlmError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified error surfaced to clients
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamFailure, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistenceFailure, message)
    }

    pub fn chat_not_found(wallet: &str, chat_id: &str) -> Self {
        Self::not_found(format!("Chat {chat_id} not found for wallet {wallet}"))
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        Self::upstream(format!("Error communicating with the model: {}", err.message))
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed JSON or a missing required field; the connection stays open
    InvalidInput,
    /// The model call failed, timed out, was cancelled or returned nothing usable
    UpstreamFailure,
    /// Chat, file or version absent
    NotFound,
    /// Durable write failed; in-memory state stays authoritative
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
