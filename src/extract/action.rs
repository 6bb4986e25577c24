//! Typed actions derived from assistant text

use serde::{Deserialize, Serialize};

/// A structured instruction extracted from one assistant response.
///
/// `content`/`replacement` are never empty for file actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Message { text: String },
    CreateFile { path: String, content: String },
    EditFile { path: String, replacement: String },
    DeleteFile { path: String },
}

impl Action {
    pub fn message(text: impl Into<String>) -> Self {
        Action::Message { text: text.into() }
    }

    /// Path the action touches, if it touches a file
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::Message { .. } => None,
            Action::CreateFile { path, .. }
            | Action::EditFile { path, .. }
            | Action::DeleteFile { path } => Some(path),
        }
    }

    /// New full content of the file, for actions that write one
    pub fn written_content(&self) -> Option<&str> {
        match self {
            Action::CreateFile { content, .. } => Some(content),
            Action::EditFile { replacement, .. } => Some(replacement),
            Action::Message { .. } | Action::DeleteFile { .. } => None,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Action::Message { .. })
    }
}
