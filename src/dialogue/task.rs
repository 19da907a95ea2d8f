//! Descriptors for asynchronous external tasks
//!
//! The interpreter never performs I/O. Entering an invoke node produces a
//! [`TaskRequest`] tagged with a generation; the runtime executes it and
//! feeds the outcome back as `TASK_DONE` / `TASK_ERROR`.

use serde::{Deserialize, Serialize};

use super::topology::StateId;

/// What an invoke node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Encyclopaedic lookup of the captured celebrity name
    KnowledgeLookup,
    /// External intent/entity classification of the last utterance
    ClassifyIntent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskRequest {
    KnowledgeLookup { subject: String },
    ClassifyIntent { text: String },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::KnowledgeLookup { .. } => TaskKind::KnowledgeLookup,
            TaskRequest::ClassifyIntent { .. } => TaskKind::ClassifyIntent,
        }
    }
}

/// Successful task outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Knowledge {
        /// Empty when the knowledge base had nothing
        abstract_text: String,
    },
    Classification(Classification),
}

/// Classifier verdict for one utterance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Classification {
    /// Value of the first entity with the given name
    pub fn entity(&self, name: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.entity == name)
            .map(|e| e.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity: String,
    pub value: String,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default)]
    pub extractor: Option<String>,
}

/// The one task a session may have in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub state: StateId,
    pub generation: u64,
}
