//! Pure state transition function
//!
//! `Idle -> AwaitingModelResponse -> Extracting -> Emitting -> Idle`, with
//! failures of the model call going straight back to `Idle` after a single
//! error event. There is no retry at this layer.

use super::effect::Pause;
use super::{Effect, Event, TurnState};
use crate::error::ChatError;
use thiserror::Error;

/// Reply to a blank user message
pub const READY_MESSAGE: &str = "Ready to help you with your smart contract development.";

/// Sent once the model replied, before any extracted action
pub const PREAMBLE_MESSAGE: &str = "Analyzing your request...";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A turn is already in progress for this chat")]
    TurnInProgress,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<TransitionError> for ChatError {
    fn from(err: TransitionError) -> Self {
        ChatError::invalid_input(err.to_string())
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(state: &TurnState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User Message Handling
        // ============================================================

        // Blank message: answer without calling the model
        (TurnState::Idle, Event::UserMessage { text }) if text.trim().is_empty() => {
            Ok(TransitionResult::new(TurnState::Idle).with_effect(Effect::emit_message(READY_MESSAGE)))
        }

        (TurnState::Idle, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(TurnState::AwaitingModelResponse)
                .with_effect(Effect::RecordUserMessage { text })
                .with_effect(Effect::RequestModel))
        }

        (_, Event::UserMessage { .. }) => Err(TransitionError::TurnInProgress),

        // ============================================================
        // Model Response Processing
        // ============================================================

        (TurnState::AwaitingModelResponse, Event::ModelResponse { text }) if text.trim().is_empty() => {
            let error = ChatError::upstream("The model returned an empty response");
            Ok(TransitionResult::new(TurnState::Idle).with_effect(Effect::emit_error(&error)))
        }

        (TurnState::AwaitingModelResponse, Event::ModelResponse { text }) => {
            Ok(TransitionResult::new(TurnState::Extracting).with_effects([
                Effect::RecordAssistantReply { text: text.clone() },
                Effect::emit_message(PREAMBLE_MESSAGE),
                Effect::Pause(Pause::AfterPreamble),
                Effect::ExtractActions { text },
            ]))
        }

        (TurnState::AwaitingModelResponse, Event::ModelFailed { error }) => {
            Ok(TransitionResult::new(TurnState::Idle).with_effect(Effect::emit_error(&error)))
        }

        // ============================================================
        // Extraction and Emission
        // ============================================================

        (TurnState::Extracting, Event::ActionsExtracted { actions }) => {
            let mut actions = actions.into_iter();
            match actions.next() {
                None => Ok(TransitionResult::new(TurnState::Idle)),
                Some(first) => Ok(TransitionResult::new(TurnState::Emitting {
                    remaining: actions.collect(),
                })
                .with_effect(Effect::ApplyAction(first))),
            }
        }

        (TurnState::Emitting { remaining }, Event::ActionEmitted) => match remaining.split_first() {
            None => Ok(TransitionResult::new(TurnState::Idle)),
            Some((next, rest)) => Ok(TransitionResult::new(TurnState::Emitting {
                remaining: rest.to_vec(),
            })
            .with_effect(Effect::Pause(Pause::BetweenActions))
            .with_effect(Effect::ApplyAction(next.clone()))),
        },

        // ============================================================
        // Everything else is a bug in the caller
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}
