//! Events that drive a dialogue

use super::task::TaskPayload;
use serde::{Deserialize, Serialize};

/// Events processed by the interpreter, one at a time to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // Session driver
    #[serde(rename = "CLICK")]
    Click,
    #[serde(rename = "TTS_READY")]
    TtsReady,

    // Speech engine
    #[serde(rename = "ENDSPEECH")]
    EndSpeech,
    #[serde(rename = "RECOGNISED")]
    Recognised { utterance: String, confidence: f64 },
    #[serde(rename = "TIMEOUT")]
    Timeout,

    // Task gateway
    #[serde(rename = "TASK_DONE")]
    TaskDone {
        generation: u64,
        payload: TaskPayload,
    },
    #[serde(rename = "TASK_ERROR")]
    TaskError { generation: u64, reason: String },

    // Raised internally when the meeting form is complete
    #[serde(rename = "FORM_COMPLETE")]
    FormComplete,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Click => EventKind::Click,
            Event::TtsReady => EventKind::TtsReady,
            Event::EndSpeech => EventKind::EndSpeech,
            Event::Recognised { .. } => EventKind::Recognised,
            Event::Timeout => EventKind::Timeout,
            Event::TaskDone { .. } => EventKind::TaskDone,
            Event::TaskError { .. } => EventKind::TaskError,
            Event::FormComplete => EventKind::FormComplete,
        }
    }

    /// Events a client may inject from outside the session
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Event::Click
                | Event::TtsReady
                | Event::EndSpeech
                | Event::Recognised { .. }
                | Event::Timeout
        )
    }

    pub fn is_task_completion(&self) -> bool {
        matches!(self, Event::TaskDone { .. } | Event::TaskError { .. })
    }

    pub fn recognised(utterance: impl Into<String>) -> Self {
        Event::Recognised {
            utterance: utterance.into(),
            confidence: 1.0,
        }
    }
}

/// Transition trigger keys; `Always` marks eventless transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Click,
    TtsReady,
    EndSpeech,
    Recognised,
    Timeout,
    TaskDone,
    TaskError,
    FormComplete,
    Always,
}
