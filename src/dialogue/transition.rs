//! Pure statechart interpreter
//!
//! `transition` takes the chart, the current dialogue state and one event,
//! and returns the next state plus the effects to execute. No I/O happens
//! here: speech, listening and external tasks are all effects.

use super::context::{Context, Field, Slot};
use super::effect::{Effect, Utterance};
use super::event::{Event, EventKind};
use super::grammar::strip_punctuation;
use super::prompts::render;
use super::task::{PendingTask, TaskKind, TaskPayload, TaskRequest};
use super::topology::{Action, Guard, HistoryDepth, NodeKind, Speech, StateId, Statechart, Transition};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Bound on eventless and raised-event steps within one dispatch
const MAX_MICROSTEPS: usize = 64;

/// Everything that changes while a session runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogueState {
    /// The single active leaf
    pub active: StateId,
    pub context: Context,
    /// Compound state -> leaf that was active when it was last exited
    pub history: HashMap<StateId, StateId>,
    /// Prompt region -> re-prompt counter
    pub retries: HashMap<StateId, u32>,
    pub generation: u64,
    pub pending_task: Option<PendingTask>,
}

impl DialogueState {
    pub fn active_path<'a>(&self, chart: &'a Statechart) -> &'a str {
        chart.path(self.active)
    }

    pub fn is_in(&self, chart: &Statechart, path: &str) -> bool {
        chart
            .lookup(path)
            .is_some_and(|id| id == self.active || chart.is_descendant(self.active, id))
    }
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: DialogueState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: DialogueState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Reasons an event did not change the state
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("no transition for {event:?} in `{state}`")]
    Unhandled { event: EventKind, state: String },
    #[error("task in flight in `{state}`, {event:?} ignored")]
    TaskInFlight { event: EventKind, state: String },
    #[error("discarded result of stale task generation {generation}")]
    StaleTask { generation: u64 },
    #[error("eventless transitions did not settle in `{state}`")]
    Livelock { state: String },
}

impl TransitionError {
    /// Benign errors leave the session as it was and are only logged
    pub fn is_benign(&self) -> bool {
        !matches!(self, TransitionError::Livelock { .. })
    }
}

/// Enter the chart's initial configuration
pub fn start(chart: &Statechart) -> Result<TransitionResult, TransitionError> {
    let mut step = Microstep::new(chart, DialogueState::default());
    step.enter_fresh(StateId::ROOT);
    step.settle()?;
    Ok(step.finish(None))
}

/// Pure transition function
///
/// Given the same inputs this always produces the same outputs. Random
/// choices (clarification phrasing) are left to the executor.
pub fn transition(
    chart: &Statechart,
    state: &DialogueState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let mut step = Microstep::new(chart, state.clone());
    step.dispatch(event)?;
    step.settle()?;
    Ok(step.finish(Some(state.active)))
}

struct Microstep<'a> {
    chart: &'a Statechart,
    state: DialogueState,
    effects: Vec<Effect>,
    raised: VecDeque<Event>,
    /// Event currently being dispatched, read by payload actions and guards
    event: Option<Event>,
    steps: usize,
}

impl<'a> Microstep<'a> {
    fn new(chart: &'a Statechart, state: DialogueState) -> Self {
        Self {
            chart,
            state,
            effects: Vec::new(),
            raised: VecDeque::new(),
            event: None,
            steps: 0,
        }
    }

    fn finish(self, previous: Option<StateId>) -> TransitionResult {
        let changed = previous != Some(self.state.active);
        let result = TransitionResult::new(self.state).with_effects(self.effects);
        if changed {
            result.with_effect(Effect::PublishState)
        } else {
            result
        }
    }

    fn active_path(&self) -> String {
        self.chart.path(self.state.active).to_string()
    }

    fn dispatch(&mut self, event: Event) -> Result<(), TransitionError> {
        let kind = event.kind();

        match &event {
            Event::Recognised {
                utterance,
                confidence,
            } => self.state.context.recognise(utterance.clone(), *confidence),
            Event::TaskDone { generation, .. } | Event::TaskError { generation, .. } => {
                match self.state.pending_task {
                    Some(pending) if pending.generation == *generation => {
                        // Finished; leaving the invoke node must not cancel it
                        self.state.pending_task = None;
                    }
                    _ => {
                        return Err(TransitionError::StaleTask {
                            generation: *generation,
                        })
                    }
                }
            }
            _ => {}
        }

        let completes_task = event.is_task_completion();
        self.event = Some(event);
        let chain = self.chart.ancestors(self.state.active);

        for &node in chain.iter().rev() {
            if let Some(t) = self.select(node, kind, true) {
                self.fire(node, t);
                return Ok(());
            }
        }

        if matches!(self.chart.node(self.state.active).kind, NodeKind::Invoke(_)) && !completes_task
        {
            return Err(TransitionError::TaskInFlight {
                event: kind,
                state: self.active_path(),
            });
        }

        for &node in &chain {
            if let Some(t) = self.select(node, kind, false) {
                self.fire(node, t);
                return Ok(());
            }
        }

        Err(TransitionError::Unhandled {
            event: kind,
            state: self.active_path(),
        })
    }

    /// Run eventless transitions and raised events until nothing is left
    fn settle(&mut self) -> Result<(), TransitionError> {
        loop {
            while let Some((source, t)) = self.eventless() {
                self.tick()?;
                self.fire(source, t);
            }
            let Some(event) = self.raised.pop_front() else {
                return Ok(());
            };
            self.tick()?;
            match self.dispatch(event) {
                Err(e) if !e.is_benign() => return Err(e),
                _ => {}
            }
        }
    }

    fn tick(&mut self) -> Result<(), TransitionError> {
        self.steps += 1;
        if self.steps > MAX_MICROSTEPS {
            return Err(TransitionError::Livelock {
                state: self.active_path(),
            });
        }
        Ok(())
    }

    fn eventless(&self) -> Option<(StateId, &'a Transition)> {
        self.chart
            .ancestors(self.state.active)
            .into_iter()
            .find_map(|node| self.select(node, EventKind::Always, false).map(|t| (node, t)))
    }

    /// First candidate whose guard passes
    fn select(&self, node: StateId, kind: EventKind, interrupt: bool) -> Option<&'a Transition> {
        let chart: &'a Statechart = self.chart;
        let table = if interrupt {
            &chart.node(node).interrupts
        } else {
            &chart.node(node).on
        };
        table
            .get(&kind)?
            .iter()
            .find(|t| self.guard(&t.guard, node))
    }

    fn fire(&mut self, source: StateId, t: &'a Transition) {
        let domain = self.domain(source, t.target);
        self.exit_to(domain);
        for action in &t.actions {
            self.run(action, source);
        }
        self.enter(domain, t.target);
    }

    /// The state a transition stays inside of
    fn domain(&self, source: StateId, target: StateId) -> StateId {
        if self.chart.is_descendant(target, source) {
            return source;
        }
        self.chart
            .ancestors(source)
            .into_iter()
            .skip(1)
            .find(|a| self.chart.is_descendant(target, *a))
            .unwrap_or(StateId::ROOT)
    }

    fn exit_to(&mut self, domain: StateId) {
        let leaf = self.state.active;
        for node in self.chart.ancestors(leaf) {
            if node == domain {
                break;
            }
            match self.chart.node(node).kind {
                NodeKind::Invoke(_) => {
                    if let Some(pending) = self.state.pending_task {
                        if pending.state == node {
                            self.effects.push(Effect::CancelTask {
                                generation: pending.generation,
                            });
                            self.state.pending_task = None;
                        }
                    }
                }
                NodeKind::Compound { .. } => {
                    self.state.history.insert(node, leaf);
                }
                _ => {}
            }
        }
        self.state.active = domain;
    }

    fn enter(&mut self, domain: StateId, target: StateId) {
        let mut path: Vec<StateId> = self
            .chart
            .ancestors(target)
            .into_iter()
            .take_while(|s| *s != domain)
            .collect();
        path.reverse();
        let Some((&last, above)) = path.split_last() else {
            return;
        };

        if let NodeKind::History(depth) = self.chart.node(last).kind {
            // Ancestors of a history node are re-activated without entry actions
            let region = self.chart.node(last).parent.unwrap_or(StateId::ROOT);
            self.restore(region, depth);
        } else {
            for &node in above {
                self.enter_node(node);
            }
            self.enter_fresh(last);
        }
    }

    fn restore(&mut self, region: StateId, depth: HistoryDepth) {
        let recorded = self
            .state
            .history
            .get(&region)
            .copied()
            .filter(|leaf| self.chart.is_descendant(*leaf, region));

        match (recorded, depth) {
            (Some(leaf), HistoryDepth::Deep) => {
                self.run_entry(leaf);
                self.activate_leaf(leaf);
            }
            (Some(leaf), HistoryDepth::Shallow) => {
                match self.chart.child_towards(region, leaf) {
                    Some(child) => self.enter_fresh(child),
                    None => self.enter_default(region),
                }
            }
            (None, _) => self.enter_default(region),
        }
    }

    /// Entry actions plus default descent down to a leaf
    fn enter_fresh(&mut self, node: StateId) {
        self.enter_node(node);
        if self.chart.node(node).kind.is_leaf() {
            self.activate_leaf(node);
        } else {
            self.enter_default(node);
        }
    }

    fn enter_default(&mut self, node: StateId) {
        if let NodeKind::Compound { initial } = self.chart.node(node).kind {
            self.enter_fresh(initial);
        }
    }

    fn enter_node(&mut self, node: StateId) {
        if self.chart.node(node).prompt.is_some() {
            self.state.retries.insert(node, 0);
        }
        self.run_entry(node);
    }

    fn run_entry(&mut self, node: StateId) {
        let chart: &'a Statechart = self.chart;
        for action in &chart.node(node).entry {
            self.run(action, node);
        }
    }

    fn activate_leaf(&mut self, leaf: StateId) {
        self.state.active = leaf;
        match self.chart.node(leaf).kind {
            NodeKind::Invoke(task) => self.start_task(leaf, task),
            NodeKind::Final => self.raised.push_back(Event::FormComplete),
            _ => {}
        }
    }

    fn start_task(&mut self, node: StateId, task: TaskKind) {
        let context = &self.state.context;
        let request = match task {
            TaskKind::KnowledgeLookup => TaskRequest::KnowledgeLookup {
                subject: context.celebrity_name.clone().unwrap_or_default(),
            },
            TaskKind::ClassifyIntent => TaskRequest::ClassifyIntent {
                text: context.utterance().unwrap_or_default().to_string(),
            },
        };
        self.state.generation += 1;
        let generation = self.state.generation;
        self.state.pending_task = Some(PendingTask {
            state: node,
            generation,
        });
        self.effects.push(Effect::InvokeTask {
            generation,
            request,
        });
    }

    fn retry_for(&self, node: StateId) -> u32 {
        self.chart
            .prompt_region(node)
            .and_then(|region| self.state.retries.get(&region))
            .copied()
            .unwrap_or(0)
    }

    fn utterance(&self) -> Option<&str> {
        self.state.context.utterance()
    }

    fn classification_intent(&self) -> Option<&str> {
        match &self.event {
            Some(Event::TaskDone {
                payload: TaskPayload::Classification(c),
                ..
            }) => c.intent.as_deref(),
            _ => None,
        }
    }

    fn guard(&self, guard: &Guard, source: StateId) -> bool {
        let grammar = self.chart.grammar();
        let utterance = self.utterance();
        match guard {
            Guard::Always => true,
            Guard::SlotMatches(slot) => {
                utterance.is_some_and(|u| grammar.match_slot(*slot, u).is_some())
            }
            Guard::InVocabulary(vocabulary) => {
                utterance.is_some_and(|u| grammar.in_vocabulary(*vocabulary, u))
            }
            Guard::Intent(intent) => utterance
                .and_then(|u| grammar.match_intent(u))
                .is_some_and(|m| m.intent == *intent),
            Guard::PatternSet(intent) => {
                utterance.is_some_and(|u| grammar.matches_patterns(*intent, u))
            }
            Guard::FreeForm => utterance.is_some_and(|u| !grammar.parse_free_form(u).is_empty()),
            Guard::SlotFilled(slot) => self.state.context.is_filled(*slot),
            Guard::TaskIntent(name) => self.classification_intent() == Some(name.as_str()),
            Guard::RetriesExhausted => {
                let Some(region) = self.chart.prompt_region(source) else {
                    return false;
                };
                let limit = self
                    .chart
                    .node(region)
                    .prompt
                    .and_then(|id| self.chart.prompts().max_repeats(id));
                limit.is_some_and(|max| self.retry_for(region) >= max)
            }
        }
    }

    fn speech(&self, speech: &Speech, source: StateId) -> Utterance {
        let context = &self.state.context;
        match speech {
            Speech::Template(template) => Utterance::Text(render(template, context)),
            Speech::OneOf(templates) => {
                Utterance::OneOf(templates.iter().map(|t| render(t, context)).collect())
            }
            Speech::Prompt(id) => Utterance::Text(self.chart.prompts().next_prompt(
                *id,
                context,
                self.retry_for(source),
            )),
        }
    }

    fn run(&mut self, action: &Action, source: StateId) {
        let chart: &'a Statechart = self.chart;
        let grammar = chart.grammar();
        match action {
            Action::Speak(speech) => {
                let utterance = self.speech(speech, source);
                self.effects.push(Effect::Speak { utterance });
            }
            Action::Listen => self.effects.push(Effect::Listen),
            Action::AssignSlot(slot) => {
                let value = self.utterance().and_then(|u| grammar.match_slot(*slot, u));
                if let Some(value) = value {
                    self.state.context.set(slot.field(), value);
                }
            }
            Action::AssignUsername => {
                let name = self.utterance().unwrap_or_default().to_string();
                self.state.context.set(Field::Username, name);
            }
            Action::AssignCelebrity => {
                let subject = self
                    .utterance()
                    .and_then(|u| grammar.match_intent(u))
                    .and_then(|m| m.subject)
                    .map(|s| strip_punctuation(&s).to_string())
                    .unwrap_or_default();
                self.state.context.set(Field::CelebrityName, subject);
            }
            Action::Assign(field, template) => {
                let value = render(template, &self.state.context);
                self.state.context.set(*field, value);
            }
            Action::ClearForm => self.state.context.clear_form(),
            Action::MergeFreeForm => {
                let fill = self
                    .utterance()
                    .map(|u| grammar.parse_free_form(u))
                    .unwrap_or_default();
                for slot in Slot::ALL {
                    if let Some(value) = fill.get(slot) {
                        self.state.context.set(slot.field(), value);
                    }
                }
            }
            Action::MergeEntities => {
                if let Some(Event::TaskDone {
                    payload: TaskPayload::Classification(classification),
                    ..
                }) = &self.event
                {
                    for slot in Slot::ALL {
                        // Absent entities leave the slot alone
                        if let Some(value) = classification.entity(slot.entity_name()) {
                            self.state.context.set(slot.field(), value);
                        }
                    }
                }
            }
            Action::StoreAbstract => {
                if let Some(Event::TaskDone {
                    payload: TaskPayload::Knowledge { abstract_text },
                    ..
                }) = &self.event
                {
                    let sentence = grammar.first_sentence(abstract_text);
                    self.state.context.set(Field::CelebrityInfo, sentence);
                }
            }
            Action::CountRetry => {
                if let Some(region) = self.chart.prompt_region(source) {
                    *self.state.retries.entry(region).or_default() += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::appointment::{appointment_chart, ChartOptions};
    use crate::dialogue::grammar::{Grammar, GrammarConfig};
    use crate::dialogue::prompts::PromptCatalog;
    use crate::dialogue::task::{Classification, Entity};

    fn chart_with(options: ChartOptions) -> Statechart {
        let grammar = Grammar::compile(&GrammarConfig::default()).unwrap();
        appointment_chart(grammar, PromptCatalog::default(), options).unwrap()
    }

    fn chart() -> Statechart {
        chart_with(ChartOptions::default())
    }

    /// Drives a session and collects spoken text
    struct Session<'a> {
        chart: &'a Statechart,
        state: DialogueState,
        spoken: Vec<String>,
        effects: Vec<Effect>,
    }

    impl<'a> Session<'a> {
        fn new(chart: &'a Statechart) -> Self {
            let result = start(chart).unwrap();
            Self {
                chart,
                state: result.new_state,
                spoken: Vec::new(),
                effects: result.effects,
            }
        }

        fn send(&mut self, event: Event) -> Result<(), TransitionError> {
            let result = transition(self.chart, &self.state, event)?;
            for effect in &result.effects {
                if let Effect::Speak {
                    utterance: Utterance::Text(text),
                } = effect
                {
                    self.spoken.push(text.clone());
                }
            }
            self.state = result.new_state;
            self.effects = result.effects;
            Ok(())
        }

        fn say(&mut self, utterance: &str) {
            self.send(Event::recognised(utterance)).unwrap();
        }

        fn end_speech(&mut self) {
            self.send(Event::EndSpeech).unwrap();
        }

        fn at(&self) -> &str {
            self.state.active_path(self.chart)
        }

        fn go_to(&mut self, path: &str) {
            self.state.active = self.chart.lookup(path).unwrap();
        }

        fn last_spoken(&self) -> &str {
            self.spoken.last().map_or("", String::as_str)
        }

        fn invoked(&self) -> Option<(u64, TaskRequest)> {
            self.effects.iter().find_map(|e| match e {
                Effect::InvokeTask {
                    generation,
                    request,
                } => Some((*generation, request.clone())),
                _ => None,
            })
        }
    }

    fn welcomed(chart: &Statechart) -> Session<'_> {
        let mut s = Session::new(chart);
        s.send(Event::Click).unwrap();
        s.send(Event::TtsReady).unwrap();
        s.end_speech();
        s.say("Ada");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.welcome.ask");
        s
    }

    #[test]
    fn test_starts_idle() {
        let chart = chart();
        let s = Session::new(&chart);
        assert_eq!(s.at(), "idle");
        assert!(s.effects.contains(&Effect::PublishState));
    }

    #[test]
    fn test_end_to_end_meeting() {
        let chart = chart();
        let mut s = Session::new(&chart);
        s.send(Event::Click).unwrap();
        s.send(Event::TtsReady).unwrap();
        assert_eq!(s.at(), "dialogue.getUsername.prompt");
        s.say("Create a meeting.");
        assert_eq!(s.last_spoken(), "Let's create a meeting.");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.meeting.getTitle.prompt");
        s.say("Lecture.");
        assert_eq!(s.at(), "dialogue.meeting.getDay.prompt");
        s.say("On Friday.");
        assert_eq!(s.at(), "dialogue.meeting.wholeDay.prompt");
        s.say("At 10");
        assert_eq!(s.at(), "dialogue.confirmation.prompt");
        s.say("Yes.");

        assert_eq!(s.at(), "dialogue.info");
        let ctx = &s.state.context;
        assert_eq!(ctx.title.as_deref(), Some("Dialogue systems lecture"));
        assert_eq!(ctx.day.as_deref(), Some("Friday"));
        assert_eq!(ctx.time.as_deref(), Some("10"));
        let confirmation = s
            .spoken
            .iter()
            .find(|t| t.starts_with("Do you want me to create"))
            .unwrap();
        assert!(confirmation.contains("Dialogue systems lecture"));
        assert!(confirmation.contains("Friday"));
        assert!(confirmation.contains("10"));
    }

    #[test]
    fn test_binary_resolution() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.state.context.title = Some("Lunch at the canteen".to_string());
        s.state.context.day = Some("Monday".to_string());

        let mut no = Session {
            chart: &chart,
            state: s.state.clone(),
            spoken: vec![],
            effects: vec![],
        };
        no.go_to("dialogue.confirmation.ask");
        no.say("No.");
        assert!(no.state.is_in(&chart, "dialogue.welcome"));

        s.go_to("dialogue.confirmation.ask");
        let before = s.state.context.clone();
        s.say("Maybe later");
        assert_eq!(s.at(), "dialogue.confirmation.nomatch");
        assert_eq!(s.state.context.title, before.title);
        assert_eq!(s.state.context.day, before.day);

        s.end_speech();
        s.say("Yes.");
        assert_eq!(s.at(), "dialogue.info");
        assert!(s.last_spoken().contains("for the whole day"));
    }

    #[test]
    fn test_filled_slot_is_not_asked_again() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.state.context.title = Some("Lunch at the canteen".to_string());
        let spoken = s.spoken.len();
        s.end_speech();
        assert_eq!(s.at(), "dialogue.meeting.getDay.prompt");
        assert_eq!(s.spoken.len(), spoken + 1);
        assert_eq!(s.last_spoken(), "On which day is it?");
    }

    #[test]
    fn test_free_form_fills_several_slots() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.end_speech();
        s.say("Create lunch on Friday at 12.");
        assert_eq!(s.at(), "dialogue.confirmation.prompt");
        assert_eq!(s.state.context.title.as_deref(), Some("lunch"));
        assert_eq!(s.state.context.day.as_deref(), Some("Friday"));
        assert_eq!(s.state.context.time.as_deref(), Some("12"));
    }

    #[test]
    fn test_help_returns_to_same_leaf() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Can you help me with home assistance");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.homeAssistant.ask");

        s.say("Help.");
        assert_eq!(s.at(), "help");
        assert_eq!(
            s.last_spoken(),
            "I can help you to create meetings in your calendar."
        );
        s.end_speech();
        assert_eq!(s.at(), "dialogue.homeAssistant.ask");
        assert_eq!(s.effects.first(), Some(&Effect::Listen));
    }

    #[test]
    fn test_help_keeps_retry_count() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.last_spoken(), "What can I do for you?");
        s.end_speech();

        s.say("Help.");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.welcome.ask");

        // The restored prompt continues with the third phrasing
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.at(), "dialogue.welcome.prompt");
        assert_eq!(s.last_spoken(), "Ada?");
    }

    #[test]
    fn test_help_interrupt_beats_local_match() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting. Help.");
        assert_eq!(s.at(), "help");
    }

    #[test]
    fn test_history_keeps_form_slots() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.end_speech();
        s.say("Lecture.");
        s.say("Help.");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.meeting.getDay.prompt");
        assert_eq!(
            s.state.context.title.as_deref(),
            Some("Dialogue systems lecture")
        );
    }

    #[test]
    fn test_timeout_rotates_prompts_then_gives_up() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.end_speech();
        assert_eq!(s.last_spoken(), "What is it about?");
        s.end_speech();
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.last_spoken(), "How should I call the meeting?");
        s.end_speech();
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.last_spoken(), "What is the purpose?");
        s.end_speech();
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.at(), "init");
    }

    #[test]
    fn test_no_match_counts_towards_prompt_rotation() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Tell me a joke");
        assert_eq!(s.at(), "dialogue.welcome.nomatch");
        assert_eq!(
            s.effects.first(),
            Some(&Effect::Speak {
                utterance: Utterance::OneOf(chart.grammar().clarifications().to_vec())
            })
        );
        s.end_speech();
        s.send(Event::Timeout).unwrap();
        assert_eq!(s.last_spoken(), "Ada?");
    }

    #[test]
    fn test_celebrity_lookup_round_trip() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Who is Ada Lovelace?");
        assert_eq!(s.at(), "dialogue.askForCelebrity");
        assert_eq!(
            s.state.context.celebrity_name.as_deref(),
            Some("Ada Lovelace")
        );
        let (generation, request) = s.invoked().unwrap();
        assert_eq!(
            request,
            TaskRequest::KnowledgeLookup {
                subject: "Ada Lovelace".to_string()
            }
        );

        // Everything but the completion is ignored while invoking
        assert!(matches!(
            s.send(Event::EndSpeech),
            Err(TransitionError::TaskInFlight { .. })
        ));

        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Knowledge {
                abstract_text: "Ada Lovelace was an English mathematician. She wrote notes."
                    .to_string(),
            },
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.infoCelebrity");
        assert_eq!(s.last_spoken(), "Ada Lovelace was an English mathematician");
        assert_eq!(s.state.pending_task, None);

        s.end_speech();
        s.say("Yes.");
        assert_eq!(s.at(), "dialogue.meeting.getDay.prompt");
        assert_eq!(
            s.state.context.title.as_deref(),
            Some("Meeting with Ada Lovelace")
        );
    }

    #[test]
    fn test_lookup_failure_apologises() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Who is Nobody Inparticular?");
        let (generation, _) = s.invoked().unwrap();
        s.send(Event::TaskError {
            generation,
            reason: "connection refused".to_string(),
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.lookupFailed");
        assert_eq!(
            s.last_spoken(),
            "Sorry, I didn't get any info about Nobody Inparticular."
        );

        s.end_speech();
        assert_eq!(s.at(), "dialogue.meetingCelebrity.prompt");
    }

    #[test]
    fn test_missing_abstract_is_reported() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Who is Nobody Inparticular?");
        let (generation, _) = s.invoked().unwrap();
        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Knowledge {
                abstract_text: String::new(),
            },
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.infoCelebrity");
        assert_eq!(
            s.last_spoken(),
            "I couldn't find any info about Nobody Inparticular!"
        );
    }

    #[test]
    fn test_late_result_is_discarded() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Who is Ada Lovelace?");
        let (generation, _) = s.invoked().unwrap();

        // Help preempts the lookup and cancels it
        s.say("Help.");
        assert!(s
            .effects
            .contains(&Effect::CancelTask { generation }));
        assert_eq!(s.state.pending_task, None);

        let before = s.state.clone();
        let result = s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Knowledge {
                abstract_text: "Too late.".to_string(),
            },
        });
        assert_eq!(result, Err(TransitionError::StaleTask { generation }));
        assert_eq!(s.state, before);
        assert_eq!(s.state.context.celebrity_info, None);

        // Returning re-invokes with a fresh generation
        s.end_speech();
        assert_eq!(s.at(), "dialogue.askForCelebrity");
        let (fresh, _) = s.invoked().unwrap();
        assert!(fresh > generation);
    }

    #[test]
    fn test_home_assistant_routes_by_classified_intent() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Can you help me with home assistance");
        s.end_speech();
        s.say("Please vacuum the floor");
        assert_eq!(s.at(), "dialogue.homeAssistant.classify");
        let (generation, request) = s.invoked().unwrap();
        assert_eq!(
            request,
            TaskRequest::ClassifyIntent {
                text: "Please vacuum the floor".to_string()
            }
        );
        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Classification(Classification {
                intent: Some("vacuum".to_string()),
                entities: vec![],
            }),
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.homeAssistant.vacuum");
        assert_eq!(s.last_spoken(), "I will clean the floor.");
        s.end_speech();
        assert_eq!(s.at(), "dialogue.homeAssistant.prompt");

        s.end_speech();
        s.say("Stop it");
        let (generation, _) = s.invoked().unwrap();
        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Classification(Classification {
                intent: Some("stop".to_string()),
                entities: vec![],
            }),
        })
        .unwrap();
        assert_eq!(s.last_spoken(), "Alright.");
        s.end_speech();
        assert!(s.state.is_in(&chart, "dialogue.welcome"));
    }

    #[test]
    fn test_unknown_classified_intent_is_no_match() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Assist me in my home");
        s.end_speech();
        s.say("Sing a song");
        let (generation, _) = s.invoked().unwrap();
        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Classification(Classification::default()),
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.homeAssistant.nomatch");
    }

    #[test]
    fn test_classifier_entities_fill_form() {
        let chart = chart_with(ChartOptions {
            classify_unmatched_form_input: true,
        });
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.end_speech();
        s.say("I want to meet my supervisor on Tuesday");
        assert_eq!(s.at(), "dialogue.meeting.classify");
        let (generation, _) = s.invoked().unwrap();
        let entity = |name: &str, value: &str| Entity {
            entity: name.to_string(),
            value: value.to_string(),
            start: 0,
            end: 0,
            extractor: None,
        };
        s.send(Event::TaskDone {
            generation,
            payload: TaskPayload::Classification(Classification {
                intent: Some("create_meeting".to_string()),
                entities: vec![
                    entity("title", "Supervision"),
                    entity("day", "Tuesday"),
                ],
            }),
        })
        .unwrap();
        assert_eq!(s.at(), "dialogue.meeting.wholeDay.prompt");
        assert_eq!(s.state.context.title.as_deref(), Some("Supervision"));
        assert_eq!(s.state.context.time, None);
    }

    #[test]
    fn test_without_classifier_form_input_is_no_match() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("Create a meeting.");
        s.end_speech();
        s.say("I want to meet my supervisor");
        assert_eq!(s.at(), "dialogue.meeting.getTitle.nomatch");
        assert_eq!(s.invoked(), None);
    }

    #[test]
    fn test_username_opt_out() {
        let chart = chart();
        let mut s = Session::new(&chart);
        s.send(Event::Click).unwrap();
        s.send(Event::TtsReady).unwrap();
        s.say("I don't want to be known.");
        assert_eq!(s.at(), "dialogue.welcome.prompt");
        assert_eq!(s.state.context.username, None);
        assert_eq!(s.last_spoken(), "How can I help you, Anonymous!");
    }

    #[test]
    fn test_menu_help_returns_to_welcome() {
        let chart = chart();
        let mut s = welcomed(&chart);
        s.say("What can I do?");
        assert_eq!(s.at(), "dialogue.menuHelp");
        assert!(s.last_spoken().starts_with("You can create a meeting"));
        s.end_speech();
        assert_eq!(s.at(), "dialogue.welcome.ask");
    }

    #[test]
    fn test_unhandled_event_is_benign() {
        let chart = chart();
        let mut s = Session::new(&chart);
        let err = s.send(Event::EndSpeech).unwrap_err();
        assert!(err.is_benign());
        assert_eq!(s.at(), "idle");
    }
}
