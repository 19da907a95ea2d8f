//! Property-based tests for the dialogue interpreter
//!
//! Random event sequences must never break the structural invariants.

use super::appointment::{appointment_chart, ChartOptions};
use super::grammar::{Grammar, GrammarConfig};
use super::prompts::PromptCatalog;
use super::task::{Classification, Entity, TaskPayload};
use super::topology::{NodeKind, Statechart};
use super::transition::{start, transition, DialogueState, TransitionError};
use super::Event;
use proptest::prelude::*;

fn test_chart(classify: bool) -> Statechart {
    let grammar = Grammar::compile(&GrammarConfig::default()).unwrap();
    appointment_chart(
        grammar,
        PromptCatalog::default(),
        ChartOptions {
            classify_unmatched_form_input: classify,
        },
    )
    .unwrap()
}

/// One step of a simulated session
#[derive(Debug, Clone)]
enum Step {
    Send(Event),
    /// Complete whatever task is pending
    Complete(Option<TaskPayload>),
    /// Deliver a result for a generation that is not pending
    Stale,
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_utterance() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Create a meeting.".to_string()),
        Just("Who is Ada Lovelace?".to_string()),
        Just("Can you help me with home assistance".to_string()),
        Just("What can I do?".to_string()),
        Just("Stop.".to_string()),
        Just("Help.".to_string()),
        Just("Yes.".to_string()),
        Just("No.".to_string()),
        Just("Lecture.".to_string()),
        Just("On Friday.".to_string()),
        Just("At 10".to_string()),
        Just("Create lunch on Monday at 11.".to_string()),
        Just("I don't want to be known.".to_string()),
        Just(String::new()),
        "[a-zA-Z ]{1,20}",
    ]
}

fn arb_payload() -> impl Strategy<Value = TaskPayload> {
    prop_oneof![
        "[A-Za-z. ]{0,60}".prop_map(|abstract_text| TaskPayload::Knowledge { abstract_text }),
        (
            prop::option::of(prop_oneof![
                Just("vacuum".to_string()),
                Just("stop".to_string()),
                Just("ask_oven_warm".to_string()),
                Just("cook".to_string()),
                "[a-z_]{1,10}",
            ]),
            prop::option::of("[A-Za-z]{1,10}"),
        )
            .prop_map(|(intent, day)| {
                TaskPayload::Classification(Classification {
                    intent,
                    entities: day
                        .into_iter()
                        .map(|value| Entity {
                            entity: "day".to_string(),
                            value,
                            start: 0,
                            end: 0,
                            extractor: None,
                        })
                        .collect(),
                })
            }),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        1 => Just(Step::Send(Event::Click)),
        1 => Just(Step::Send(Event::TtsReady)),
        4 => Just(Step::Send(Event::EndSpeech)),
        2 => Just(Step::Send(Event::Timeout)),
        6 => arb_utterance().prop_map(|u| Step::Send(Event::recognised(u))),
        2 => prop::option::of(arb_payload()).prop_map(Step::Complete),
        1 => Just(Step::Stale),
    ]
}

fn to_event(state: &DialogueState, step: Step) -> Event {
    match step {
        Step::Send(event) => event,
        Step::Complete(payload) => {
            let generation = state.pending_task.map_or(0, |p| p.generation);
            match payload {
                Some(payload) => Event::TaskDone {
                    generation,
                    payload,
                },
                None => Event::TaskError {
                    generation,
                    reason: "unreachable".to_string(),
                },
            }
        }
        Step::Stale => Event::TaskError {
            generation: state.generation + 1,
            reason: "stale".to_string(),
        },
    }
}

fn check_invariants(chart: &Statechart, state: &DialogueState) -> Result<(), TestCaseError> {
    let kind = chart.node(state.active).kind;
    prop_assert!(
        kind.is_leaf(),
        "active state {} is not a leaf",
        chart.path(state.active)
    );
    if let Some(pending) = state.pending_task {
        prop_assert_eq!(pending.state, state.active);
        prop_assert!(matches!(kind, NodeKind::Invoke(_)));
        prop_assert_eq!(pending.generation, state.generation);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Exactly one leaf is active and a pending task always belongs to it
    #[test]
    fn prop_single_active_leaf(
        classify in any::<bool>(),
        steps in proptest::collection::vec(arb_step(), 0..40)
    ) {
        let chart = test_chart(classify);
        let mut state = start(&chart).unwrap().new_state;
        check_invariants(&chart, &state)?;

        for step in steps {
            let event = to_event(&state, step);
            match transition(&chart, &state, event) {
                Ok(result) => state = result.new_state,
                Err(e) => prop_assert!(e.is_benign(), "unexpected error: {e}"),
            }
            check_invariants(&chart, &state)?;
        }
    }

    /// Once known, the username is never cleared
    #[test]
    fn prop_username_is_never_cleared(
        steps in proptest::collection::vec(arb_step(), 0..40)
    ) {
        let chart = test_chart(false);
        let mut state = start(&chart).unwrap().new_state;
        let mut known = false;

        for step in steps {
            let event = to_event(&state, step);
            if let Ok(result) = transition(&chart, &state, event) {
                state = result.new_state;
            }
            if known {
                prop_assert!(state.context.username.is_some());
            }
            known = state.context.username.is_some();
        }
    }

    /// Results for generations that are not pending never touch the context
    #[test]
    fn prop_stale_results_change_nothing(
        steps in proptest::collection::vec(arb_step(), 0..30),
        payload in arb_payload()
    ) {
        let chart = test_chart(true);
        let mut state = start(&chart).unwrap().new_state;
        for step in steps {
            let event = to_event(&state, step);
            if let Ok(result) = transition(&chart, &state, event) {
                state = result.new_state;
            }
        }

        let stale = Event::TaskDone { generation: state.generation + 7, payload };
        let rejected = matches!(
            transition(&chart, &state, stale),
            Err(TransitionError::StaleTask { .. })
        );
        prop_assert!(rejected, "stale result was not rejected");
    }
}
