//! Events that drive a turn

use crate::error::ChatError;
use crate::extract::Action;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage { text: String },

    // Model events
    ModelResponse { text: String },
    ModelFailed { error: ChatError },

    // Extraction and emission
    ActionsExtracted { actions: Vec<Action> },
    ActionEmitted,
}
