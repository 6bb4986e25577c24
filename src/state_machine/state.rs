//! Turn state types

use crate::extract::Action;

/// Where a chat is in processing one user turn
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Ready for a user message
    #[default]
    Idle,

    /// The model call for the current turn is in flight
    AwaitingModelResponse,

    /// The reply arrived and is being turned into actions
    Extracting,

    /// Actions are being applied and emitted one at a time
    Emitting {
        /// Actions still to apply after the one in flight, in order
        remaining: Vec<Action>,
    },
}

impl TurnState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TurnState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingModelResponse => "awaiting_model_response",
            TurnState::Extracting => "extracting",
            TurnState::Emitting { .. } => "emitting",
        }
    }
}
