//! Grammars and slot matchers
//!
//! Everything here is pure: a recognised utterance goes in, an optional typed
//! value comes out. The tables live in [`GrammarConfig`], which is plain
//! data (loadable from JSON) and gets compiled once into a [`Grammar`].

use super::context::Slot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Menu intents, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Meeting,
    WhoIs,
    Stop,
    HomeAssistant,
    Options,
    Help,
}

/// Fixed literal vocabularies used by binary questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    Affirmative,
    Negative,
    /// Ways of declining to give a name
    OptOut,
}

/// Pattern set for one menu intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPatterns {
    pub intent: Intent,
    /// Used to describe the menu; empty descriptions are not announced
    #[serde(default)]
    pub description: String,
    pub patterns: Vec<String>,
}

/// Raw grammar tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarConfig {
    /// Exact utterance -> canonical meeting title
    pub titles: BTreeMap<String, String>,
    /// Day vocabulary, scanned in order
    pub days: Vec<String>,
    pub time_pattern: String,
    /// Single-utterance meeting request ("Create X on Y at Z.")
    pub free_form_pattern: String,
    pub intents: Vec<IntentPatterns>,
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
    pub opt_out: Vec<String>,
    /// Clarification requests spoken after a no-match
    pub clarifications: Vec<String>,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        let titles = [
            ("Lecture.", "Dialogue systems lecture"),
            ("Lunch.", "Lunch at the canteen"),
            ("Training.", "Workout at the gym"),
            ("Cinema.", "Watching a movie at the cinema"),
            ("Shopping.", "Shopping in the city"),
            ("Swedish course.", "Learning swedish"),
            ("President.", "Talking to the president"),
            ("Garden", "Walk in the garden"),
            ("Sleeping", "Taking a nap"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let intent = |intent, description: &str, patterns: &[&str]| IntentPatterns {
            intent,
            description: description.to_string(),
            patterns: strings(patterns),
        };

        Self {
            titles,
            days: strings(&[
                "Monday",
                "Tuesday",
                "Wednesday",
                "Thursday",
                "Friday",
                "Saturday",
                "Sunday",
                "Today",
                "Tomorrow",
            ]),
            time_pattern: r"(At )?(((1[0-2]|[1-9]):[0-5][0-9]|(1[0-2]|[1-9]))( [AP]M)?( o'clock)?\.?)"
                .to_string(),
            free_form_pattern: r"(Create (.*?))?((on |On )(.*?))?((at |At )(.*?))?\.".to_string(),
            intents: vec![
                intent(
                    Intent::Meeting,
                    "create a meeting",
                    &["Create a meeting.", "I would like to schedule a meeting."],
                ),
                intent(
                    Intent::WhoIs,
                    "request information about a person",
                    &[r"Who is (.*)\?", r"Tell me something about (.*)\?"],
                ),
                intent(Intent::Stop, "stop me", &["Stop.", "Shut up."]),
                intent(
                    Intent::HomeAssistant,
                    "ask me for home assistance",
                    &["Can you help me with home assistance", "Assist me in my home"],
                ),
                intent(Intent::Options, "", &["What can I do?", "How can you help me?"]),
                intent(Intent::Help, "", &["Help."]),
            ],
            affirmative: strings(&[
                "Yes.",
                "Of course.",
                "Sure.",
                "Yeah.",
                "Yes please.",
                "Yep.",
                "OK.",
                "Yes, thank you.",
            ]),
            negative: strings(&[
                "No.",
                "Nope.",
                "No no.",
                "Don't.",
                "Don't do it.",
                "No way.",
                "Not at all.",
            ]),
            opt_out: strings(&["I don't want to be known."]),
            clarifications: strings(&[
                "Sorry, could you please repeat that?",
                "I didn't catch that?",
                "What did you say?",
                "Come again?",
                "Sorry?",
                "Huh?",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Errors compiling a [`GrammarConfig`]
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("invalid pattern for {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("vocabulary `{0}` must not be empty")]
    EmptyVocabulary(&'static str),
}

/// Result of menu intent matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMatch {
    pub intent: Intent,
    /// First non-empty capture of the winning pattern set, unstripped
    pub subject: Option<String>,
}

/// Slots extracted from a single free-form utterance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFill {
    pub title: Option<String>,
    pub day: Option<String>,
    pub time: Option<String>,
}

impl FormFill {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::Title => self.title.as_deref(),
            Slot::Day => self.day.as_deref(),
            Slot::Time => self.time.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Slot::ALL.iter().all(|slot| self.get(*slot).is_none())
    }
}

#[derive(Debug)]
struct CompiledIntent {
    intent: Intent,
    description: String,
    patterns: Vec<Regex>,
}

/// Compiled, immutable grammar
#[derive(Debug)]
pub struct Grammar {
    titles: BTreeMap<String, String>,
    days: Vec<String>,
    time: Regex,
    free_form: Regex,
    intents: Vec<CompiledIntent>,
    affirmative: Vec<String>,
    negative: Vec<String>,
    opt_out: Vec<String>,
    clarifications: Vec<String>,
    sentence_boundary: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex, GrammarError> {
    Regex::new(pattern).map_err(|source| GrammarError::InvalidPattern {
        name: name.to_string(),
        source,
    })
}

impl Grammar {
    pub fn compile(config: &GrammarConfig) -> Result<Self, GrammarError> {
        if config.affirmative.is_empty() {
            return Err(GrammarError::EmptyVocabulary("affirmative"));
        }
        if config.negative.is_empty() {
            return Err(GrammarError::EmptyVocabulary("negative"));
        }
        if config.clarifications.is_empty() {
            return Err(GrammarError::EmptyVocabulary("clarifications"));
        }

        let intents = config
            .intents
            .iter()
            .map(|set| {
                let patterns = set
                    .patterns
                    .iter()
                    .map(|p| compile(&format!("{:?}", set.intent), p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledIntent {
                    intent: set.intent,
                    description: set.description.clone(),
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, GrammarError>>()?;

        Ok(Self {
            titles: config.titles.clone(),
            days: config.days.clone(),
            time: compile("time", &config.time_pattern)?,
            free_form: compile("free_form", &config.free_form_pattern)?,
            intents,
            affirmative: config.affirmative.clone(),
            negative: config.negative.clone(),
            opt_out: config.opt_out.clone(),
            clarifications: config.clarifications.clone(),
            sentence_boundary: compile("sentence_boundary", r"\. [A-Z]")?,
        })
    }

    /// Map an utterance to a slot value, if it carries one
    pub fn match_slot(&self, slot: Slot, utterance: &str) -> Option<String> {
        match slot {
            Slot::Title => self.titles.get(utterance).cloned(),
            Slot::Day => self
                .days
                .iter()
                .find(|day| utterance.contains(day.as_str()))
                .cloned(),
            Slot::Time => {
                let caps = self.time.captures(utterance)?;
                let clock = caps.get(3)?.as_str();
                Some(match caps.get(6) {
                    Some(meridiem) => format!("{clock}{}", meridiem.as_str()),
                    None => clock.to_string(),
                })
            }
        }
    }

    /// First intent whose pattern set matches; ties go to declaration order
    pub fn match_intent(&self, utterance: &str) -> Option<IntentMatch> {
        let set = self
            .intents
            .iter()
            .find(|set| set.patterns.iter().any(|p| p.is_match(utterance)))?;

        let subject = set.patterns.iter().find_map(|p| {
            p.captures(utterance)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });

        Some(IntentMatch {
            intent: set.intent,
            subject,
        })
    }

    /// Whether one specific pattern set matches, independent of intent order
    pub fn matches_patterns(&self, intent: Intent, utterance: &str) -> bool {
        self.intents
            .iter()
            .filter(|set| set.intent == intent)
            .any(|set| set.patterns.iter().any(|p| p.is_match(utterance)))
    }

    /// Exact membership in a literal vocabulary
    pub fn in_vocabulary(&self, vocabulary: Vocabulary, utterance: &str) -> bool {
        let list = match vocabulary {
            Vocabulary::Affirmative => &self.affirmative,
            Vocabulary::Negative => &self.negative,
            Vocabulary::OptOut => &self.opt_out,
        };
        list.iter().any(|entry| entry == utterance)
    }

    /// Extract whatever slots a "Create X on Y at Z." utterance carries
    pub fn parse_free_form(&self, utterance: &str) -> FormFill {
        let Some(caps) = self.free_form.captures(utterance) else {
            return FormFill::default();
        };
        let group = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        FormFill {
            title: group(2),
            day: group(5),
            time: group(8),
        }
    }

    pub fn clarifications(&self) -> &[String] {
        &self.clarifications
    }

    /// Spoken list of what the menu offers
    pub fn menu_description(&self) -> String {
        let options: Vec<&str> = self
            .intents
            .iter()
            .map(|set| set.description.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        format!("You can {}.", options.join(" or "))
    }

    /// Text before the first ". " that is followed by a capital letter
    pub fn first_sentence(&self, text: &str) -> String {
        self.sentence_boundary
            .split(text)
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Remove leading and trailing punctuation and whitespace from a captured subject
pub fn strip_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
}
