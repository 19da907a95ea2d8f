//! Dialogue engine
//!
//! Hierarchical state machine with pure transitions in the Elm style: the
//! runtime feeds events in and executes the effects that come out.

pub mod appointment;
pub mod context;
mod effect;
pub mod event;
pub mod grammar;
pub mod prompts;
pub mod task;
pub mod topology;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use appointment::{appointment_chart, ChartOptions};
pub use context::Context;
pub use effect::{Effect, Utterance};
pub use event::Event;
pub use grammar::{Grammar, GrammarConfig};
pub use prompts::PromptCatalog;
pub use task::{TaskPayload, TaskRequest};
pub use topology::Statechart;
pub use transition::{start, transition, DialogueState, TransitionError};
