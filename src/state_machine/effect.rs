//! Effects produced by state transitions

use crate::error::ChatError;
use crate::extract::Action;
use crate::runtime::ServerEvent;

/// Which pause the executor should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// After the "analyzing" preamble, before the first action
    AfterPreamble,
    /// Between two emitted actions
    BetweenActions,
}

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append the user's text to the transcript and the model history
    RecordUserMessage { text: String },

    /// Call the model with the chat's history
    RequestModel,

    /// Append the model's raw reply to the model history
    RecordAssistantReply { text: String },

    /// Run the extractor over the reply
    ExtractActions { text: String },

    /// Send an event to the client and record it in the transcript
    Emit(ServerEvent),

    /// Write a file action through to the store, then emit it
    ApplyAction(Action),

    Pause(Pause),
}

impl Effect {
    pub fn emit_message(text: impl Into<String>) -> Self {
        Effect::Emit(ServerEvent::message(text))
    }

    pub fn emit_error(error: &ChatError) -> Self {
        Effect::Emit(ServerEvent::error(error))
    }
}
