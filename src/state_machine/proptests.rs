//! Property-based tests for the turn state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::error::{ChatError, ErrorKind};
use crate::extract::Action;
use crate::runtime::EventKind;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(|text| Action::Message { text }),
        "[a-z{} ]{1,20}".prop_map(|content| Action::CreateFile {
            path: "contracts/Contract.sol".to_string(),
            content,
        }),
        "[a-z{} ]{1,20}".prop_map(|replacement| Action::EditFile {
            path: "contracts/Contract.sol".to_string(),
            replacement,
        }),
    ]
}

fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::InvalidInput),
        Just(ErrorKind::UpstreamFailure),
        Just(ErrorKind::NotFound),
        Just(ErrorKind::PersistenceFailure),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z ]{0,20}".prop_map(|text| Event::UserMessage { text }),
        "[a-z ]{0,20}".prop_map(|text| Event::ModelResponse { text }),
        (arb_error_kind(), "[a-z ]{1,20}").prop_map(|(kind, message)| Event::ModelFailed {
            error: ChatError::new(kind, message),
        }),
        proptest::collection::vec(arb_action(), 0..5)
            .prop_map(|actions| Event::ActionsExtracted { actions }),
        Just(Event::ActionEmitted),
    ]
}

fn arb_busy_state() -> impl Strategy<Value = TurnState> {
    prop_oneof![
        Just(TurnState::AwaitingModelResponse),
        Just(TurnState::Extracting),
        proptest::collection::vec(arb_action(), 0..4).prop_map(|remaining| TurnState::Emitting { remaining }),
    ]
}

fn error_events(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::Emit(event) if event.kind == EventKind::Error))
        .count()
}

/// Drive a full turn the way the executor does, returning every effect
fn run_turn(text: &str, reply: Option<&str>, actions: &[Action]) -> (TurnState, Vec<Effect>) {
    let mut state = TurnState::Idle;
    let mut effects = Vec::new();
    let mut pending = vec![Event::UserMessage { text: text.to_string() }];

    while let Some(event) = pending.pop() {
        let result = transition(&state, event).unwrap();
        state = result.new_state;
        for effect in result.effects {
            match &effect {
                Effect::RequestModel => pending.push(match reply {
                    Some(text) => Event::ModelResponse { text: text.to_string() },
                    None => Event::ModelFailed {
                        error: ChatError::upstream("down"),
                    },
                }),
                Effect::ExtractActions { .. } => pending.push(Event::ActionsExtracted {
                    actions: actions.to_vec(),
                }),
                Effect::ApplyAction(_) => pending.push(Event::ActionEmitted),
                _ => {}
            }
            effects.push(effect);
        }
    }
    (state, effects)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: no two turns interleave
    #[test]
    fn prop_busy_states_reject_user_messages(state in arb_busy_state(), text in "[a-z ]{0,20}") {
        let result = transition(&state, Event::UserMessage { text });
        prop_assert_eq!(result.unwrap_err(), TransitionError::TurnInProgress);
    }

    // Invariant 2: arbitrary event sequences never panic
    #[test]
    fn prop_random_events_are_total(events in proptest::collection::vec(arb_event(), 0..20)) {
        let mut state = TurnState::Idle;
        for event in events {
            match transition(&state, event) {
                Ok(result) => state = result.new_state,
                Err(_) => { /* rejected events do not move the machine */ }
            }
        }
    }

    // Invariant 3: a successful turn applies every action, in order, and ends idle
    #[test]
    fn prop_turn_emits_actions_in_order(
        text in "[a-z]{1,10}",
        reply in "[a-z]{1,20}",
        actions in proptest::collection::vec(arb_action(), 0..6),
    ) {
        let (state, effects) = run_turn(&text, Some(&reply), &actions);

        prop_assert!(state.is_idle());
        let applied: Vec<Action> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::ApplyAction(action) => Some(action.clone()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(applied, actions);
        prop_assert_eq!(error_events(&effects), 0);
    }

    // Invariant 4: a failed model call yields exactly one error and no assistant reply
    #[test]
    fn prop_failed_turn_emits_single_error(text in "[a-z]{1,10}") {
        let (state, effects) = run_turn(&text, None, &[]);

        prop_assert!(state.is_idle());
        prop_assert_eq!(error_events(&effects), 1);
        let recorded_user = effects.iter().any(|e| matches!(e, Effect::RecordUserMessage { .. }));
        let recorded_reply = effects.iter().any(|e| matches!(e, Effect::RecordAssistantReply { .. }));
        prop_assert!(recorded_user);
        prop_assert!(!recorded_reply);
    }

    // Invariant 5: model errors keep their kind on the wire
    #[test]
    fn prop_error_kind_survives(kind in arb_error_kind(), message in "[a-z ]{1,20}") {
        let result = transition(
            &TurnState::AwaitingModelResponse,
            Event::ModelFailed { error: ChatError::new(kind, message.clone()) },
        ).unwrap();

        let Effect::Emit(event) = &result.effects[0] else {
            return Err(TestCaseError::fail("expected emit"));
        };
        prop_assert_eq!(event.metadata.as_ref().and_then(|m| m.kind), Some(kind));
        prop_assert_eq!(&event.content, &serde_json::Value::String(message));
    }
}
