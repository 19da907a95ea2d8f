//! Effects produced by dialogue transitions

use super::task::TaskRequest;
use rand::seq::SliceRandom;
use serde::Serialize;

/// What to say; random choice is left to the executor so transitions stay pure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Utterance {
    Text(String),
    OneOf(Vec<String>),
}

impl Utterance {
    pub fn choose<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> String {
        match self {
            Utterance::Text(text) => text.clone(),
            Utterance::OneOf(options) => options.choose(rng).cloned().unwrap_or_default(),
        }
    }
}

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Synthesise speech
    Speak { utterance: Utterance },

    /// Open the microphone for one recognition turn
    Listen,

    /// Start an external task (spawns as background task)
    InvokeTask {
        generation: u64,
        request: TaskRequest,
    },

    /// Abort a running task; its late result will be stale anyway
    CancelTask { generation: u64 },

    /// Notify connected clients of the new active state
    PublishState,
}
