//! Per-turn state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! executor feeds [`Event`]s in and carries out the returned [`Effect`]s.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Pause};
pub use event::Event;
pub use state::TurnState;
pub use transition::transition;
#[allow(unused_imports)] // Public API re-exports
pub use transition::{TransitionError, TransitionResult, PREAMBLE_MESSAGE, READY_MESSAGE};
