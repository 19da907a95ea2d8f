//! Session context shared by every state of a dialogue

use serde::{Deserialize, Serialize};

/// A single speech recognition hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub utterance: String,
    pub confidence: f64,
}

/// Context fields addressable from templates and assignments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Username,
    CelebrityName,
    CelebrityInfo,
    Title,
    Day,
    Time,
    /// The most recent utterance (read-only)
    Utterance,
}

impl Field {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "username" => Some(Field::Username),
            "celebrity_name" => Some(Field::CelebrityName),
            "celebrity_info" => Some(Field::CelebrityInfo),
            "title" => Some(Field::Title),
            "day" => Some(Field::Day),
            "time" => Some(Field::Time),
            "utterance" => Some(Field::Utterance),
            _ => None,
        }
    }
}

/// Slots of the meeting form, in the order they are asked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Title,
    Day,
    Time,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Title, Slot::Day, Slot::Time];

    pub fn field(self) -> Field {
        match self {
            Slot::Title => Field::Title,
            Slot::Day => Field::Day,
            Slot::Time => Field::Time,
        }
    }

    /// Entity name used by the intent classifier
    pub fn entity_name(self) -> &'static str {
        match self {
            Slot::Title => "title",
            Slot::Day => "day",
            Slot::Time => "time",
        }
    }
}

/// Mutable record carried through a whole session
///
/// `None` means "not collected yet". Assigning an empty string stores `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub username: Option<String>,
    pub celebrity_name: Option<String>,
    pub celebrity_info: Option<String>,
    pub title: Option<String>,
    pub day: Option<String>,
    pub time: Option<String>,
    pub last_recognition: Option<Recognition>,
}

impl Context {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Username => self.username.as_deref(),
            Field::CelebrityName => self.celebrity_name.as_deref(),
            Field::CelebrityInfo => self.celebrity_info.as_deref(),
            Field::Title => self.title.as_deref(),
            Field::Day => self.day.as_deref(),
            Field::Time => self.time.as_deref(),
            Field::Utterance => self.utterance(),
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        let value = if value.is_empty() { None } else { Some(value) };
        match field {
            // Set once; later answers are ignored
            Field::Username => {
                if self.username.is_none() {
                    self.username = value;
                }
            }
            Field::CelebrityName => self.celebrity_name = value,
            Field::CelebrityInfo => self.celebrity_info = value,
            Field::Title => self.title = value,
            Field::Day => self.day = value,
            Field::Time => self.time = value,
            Field::Utterance => {}
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&str> {
        self.get(slot.field())
    }

    pub fn is_filled(&self, slot: Slot) -> bool {
        self.slot(slot).is_some()
    }

    /// Reset the meeting form to "nothing collected"
    pub fn clear_form(&mut self) {
        self.title = None;
        self.day = None;
        self.time = None;
    }

    pub fn utterance(&self) -> Option<&str> {
        self.last_recognition.as_ref().map(|r| r.utterance.as_str())
    }

    pub fn recognise(&mut self, utterance: impl Into<String>, confidence: f64) {
        self.last_recognition = Some(Recognition {
            utterance: utterance.into(),
            confidence,
        });
    }
}
