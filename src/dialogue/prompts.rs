//! Prompt sequencing and utterance templates
//!
//! A prompt point owns an ordered list of phrasings. Which one is spoken
//! depends only on the retry counter of the prompt region, so the sequencer
//! itself holds no state.
//!
//! Templates understand three placeholder forms:
//! - `{field}` renders the context value or nothing
//! - `{field|fallback}` renders the fallback when the field is empty
//! - `{field?when-set|when-empty}` picks a branch; both branches may contain
//!   placeholders

use super::context::{Context, Field};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Prompt points of the dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptId {
    GetUsername,
    Welcome,
    HomeAssistant,
    MeetingCelebrity,
    GetTitle,
    GetDay,
    WholeDay,
    GetTime,
    Confirmation,
}

impl PromptId {
    pub const ALL: [PromptId; 9] = [
        PromptId::GetUsername,
        PromptId::Welcome,
        PromptId::HomeAssistant,
        PromptId::MeetingCelebrity,
        PromptId::GetTitle,
        PromptId::GetDay,
        PromptId::WholeDay,
        PromptId::GetTime,
        PromptId::Confirmation,
    ];
}

/// Phrasings for one prompt point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSet {
    pub variants: Vec<String>,
    /// How many re-prompts a timeout may trigger before the point is abandoned
    #[serde(default)]
    pub max_repeats: Option<u32>,
}

impl PromptSet {
    fn new(variants: &[&str], max_repeats: Option<u32>) -> Self {
        Self {
            variants: variants.iter().map(|v| (*v).to_string()).collect(),
            max_repeats,
        }
    }

    /// `variants[min(retry, len - 1)]`
    pub fn variant(&self, retry: u32) -> Option<&str> {
        let last = self.variants.len().checked_sub(1)?;
        let index = usize::try_from(retry).map_or(last, |r| r.min(last));
        self.variants.get(index).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no phrasings configured for prompt {0:?}")]
    Missing(PromptId),
}

/// All prompt points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptCatalog {
    sets: BTreeMap<PromptId, PromptSet>,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        let three = Some(2);
        let sets = [
            (
                PromptId::GetUsername,
                PromptSet::new(&["Hi, who are you?", "What is your name?", "Hello?"], three),
            ),
            (
                PromptId::Welcome,
                PromptSet::new(
                    &[
                        "How can I help you, {username|Anonymous}!",
                        "What can I do for you?",
                        "{username|Hello}?",
                    ],
                    three,
                ),
            ),
            (
                PromptId::HomeAssistant,
                PromptSet::new(
                    &["How can I assist you?", "How may I help you?", "{username|Hello}?"],
                    three,
                ),
            ),
            (
                PromptId::MeetingCelebrity,
                PromptSet::new(
                    &[
                        "Do you want to meet them?",
                        "Shall I create a meeting?",
                        "{username|Hello}?",
                    ],
                    three,
                ),
            ),
            (
                PromptId::GetTitle,
                PromptSet::new(
                    &[
                        "What is it about?",
                        "How should I call the meeting?",
                        "What is the purpose?",
                    ],
                    three,
                ),
            ),
            (
                PromptId::GetDay,
                PromptSet::new(&["On which day is it?", "Which day?", "{username|Hello}?"], three),
            ),
            (
                PromptId::WholeDay,
                PromptSet::new(
                    &[
                        "Will it take the whole day?",
                        "For the whole day?",
                        "Is it the whole day?",
                    ],
                    three,
                ),
            ),
            (
                PromptId::GetTime,
                PromptSet::new(
                    &[
                        "What time is your meeting?",
                        "At which time?",
                        "When should it start?",
                    ],
                    three,
                ),
            ),
            (
                PromptId::Confirmation,
                PromptSet::new(
                    &[
                        "Do you want me to create a meeting titled {title} on {day} {time?at {time}|for the whole day}?",
                        "Shall I put {title} on {day} {time?at {time}|for the whole day} in your calendar?",
                    ],
                    Some(1),
                ),
            ),
        ]
        .into_iter()
        .collect();
        Self { sets }
    }
}

impl PromptCatalog {
    pub fn with_set(mut self, id: PromptId, set: PromptSet) -> Self {
        self.sets.insert(id, set);
        self
    }

    /// Every prompt point needs at least one phrasing
    pub fn validate(&self) -> Result<(), PromptError> {
        for id in PromptId::ALL {
            match self.sets.get(&id) {
                Some(set) if !set.variants.is_empty() => {}
                _ => return Err(PromptError::Missing(id)),
            }
        }
        Ok(())
    }

    pub fn get(&self, id: PromptId) -> Option<&PromptSet> {
        self.sets.get(&id)
    }

    pub fn max_repeats(&self, id: PromptId) -> Option<u32> {
        self.sets.get(&id).and_then(|set| set.max_repeats)
    }

    /// Phrasing to speak for `id` after `retry` re-prompts
    pub fn next_prompt(&self, id: PromptId, context: &Context, retry: u32) -> String {
        self.get(id)
            .and_then(|set| set.variant(retry))
            .map(|template| render(template, context))
            .unwrap_or_default()
    }
}

/// Render a template against the context
pub fn render(template: &str, context: &Context) -> String {
    let chars: Vec<char> = template.chars().collect();
    render_chars(&chars, context)
}

fn render_chars(chars: &[char], context: &Context) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(close) = matching_brace(chars, i) {
                out.push_str(&expand(&chars[i + 1..close], context));
                i = close + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in chars.iter().enumerate().skip(open) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of the first `|` not nested in braces
fn top_level_bar(chars: &[char]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in chars.iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn expand(inner: &[char], context: &Context) -> String {
    let name_len = inner
        .iter()
        .position(|c| *c == '?' || *c == '|')
        .unwrap_or(inner.len());
    let name: String = inner[..name_len].iter().collect();
    let value = Field::from_name(name.trim()).and_then(|field| context.get(field));
    let rest = &inner[name_len..];

    match rest.split_first() {
        None => value.unwrap_or_default().to_string(),
        Some(('|', fallback)) => match value {
            Some(v) => v.to_string(),
            None => render_chars(fallback, context),
        },
        Some((_, branches)) => {
            let empty: &[char] = &[];
            let (when_set, when_empty) = match top_level_bar(branches) {
                Some(bar) => (&branches[..bar], &branches[bar + 1..]),
                None => (branches, empty),
            };
            if value.is_some() {
                render_chars(when_set, context)
            } else {
                render_chars(when_empty, context)
            }
        }
    }
}
