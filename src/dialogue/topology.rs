//! Statechart topology
//!
//! States live in an arena indexed by [`StateId`]. A chart is declared with
//! [`ChartBuilder`] using dotted paths (`dialogue.meeting.getTitle`) and
//! validated once; afterwards every lookup is an index.

use super::context::{Field, Slot};
use super::event::EventKind;
use super::grammar::{Grammar, Intent, Vocabulary};
use super::prompts::{PromptCatalog, PromptId};
use super::task::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Stable index of a state node; the default is the root
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StateId(u32);

impl StateId {
    pub const ROOT: StateId = StateId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryDepth {
    /// Restore the recorded immediate child
    Shallow,
    /// Restore the recorded leaf
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Atomic,
    Compound { initial: StateId },
    History(HistoryDepth),
    /// Entering raises `FORM_COMPLETE`
    Final,
    Invoke(TaskKind),
}

impl NodeKind {
    /// Leaves are the only nodes that can be "the" active state
    pub fn is_leaf(self) -> bool {
        matches!(self, NodeKind::Atomic | NodeKind::Final | NodeKind::Invoke(_))
    }
}

/// Transition guards
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Always,
    /// The last utterance carries a value for the slot
    SlotMatches(Slot),
    InVocabulary(Vocabulary),
    /// The menu matcher picks this intent
    Intent(Intent),
    /// This intent's patterns match, whatever their rank
    PatternSet(Intent),
    /// The free-form parser extracts at least one slot
    FreeForm,
    SlotFilled(Slot),
    /// A classification result names this intent
    TaskIntent(String),
    /// The prompt region exhausted its re-prompts
    RetriesExhausted,
}

/// Something to say
#[derive(Debug, Clone, PartialEq)]
pub enum Speech {
    Template(String),
    /// Random pick among rendered templates
    OneOf(Vec<String>),
    /// Current variant of a prompt point
    Prompt(PromptId),
}

/// Transition and entry actions
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Speak(Speech),
    Listen,
    /// Store the slot value carried by the last utterance
    AssignSlot(Slot),
    /// Store the last utterance as the username
    AssignUsername,
    /// Store the subject of a who-is question, punctuation stripped
    AssignCelebrity,
    /// Store a rendered template
    Assign(Field, String),
    ClearForm,
    /// Fill whatever slots a free-form utterance carries
    MergeFreeForm,
    /// Fill slots from classifier entities
    MergeEntities,
    /// Keep the first sentence of a knowledge abstract
    StoreAbstract,
    /// Count one more re-prompt for the enclosing prompt region
    CountRetry,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub guard: Guard,
    pub target: StateId,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub path: String,
    pub parent: Option<StateId>,
    pub children: Vec<StateId>,
    pub kind: NodeKind,
    pub entry: Vec<Action>,
    pub on: HashMap<EventKind, Vec<Transition>>,
    pub interrupts: HashMap<EventKind, Vec<Transition>>,
    /// Set on prompt regions; retry counters are kept per region
    pub prompt: Option<PromptId>,
}

/// Validated chart plus the immutable tables its guards and actions use
#[derive(Debug)]
pub struct Statechart {
    nodes: Vec<Node>,
    by_path: HashMap<String, StateId>,
    grammar: Grammar,
    prompts: PromptCatalog,
}

impl Statechart {
    pub fn node(&self, id: StateId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (StateId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (id_at(i), n))
    }

    pub fn lookup(&self, path: &str) -> Option<StateId> {
        self.by_path.get(path).copied()
    }

    pub fn path(&self, id: StateId) -> &str {
        &self.node(id).path
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn prompts(&self) -> &PromptCatalog {
        &self.prompts
    }

    /// `id` followed by its ancestors up to the root
    pub fn ancestors(&self, id: StateId) -> Vec<StateId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `id` lies strictly below `ancestor`
    pub fn is_descendant(&self, id: StateId, ancestor: StateId) -> bool {
        let mut current = self.node(id).parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.node(p).parent;
        }
        false
    }

    /// Nearest prompt region at or above `id`
    pub fn prompt_region(&self, id: StateId) -> Option<StateId> {
        self.ancestors(id)
            .into_iter()
            .find(|s| self.node(*s).prompt.is_some())
    }

    /// Child of `ancestor` on the path down to `id`
    pub fn child_towards(&self, ancestor: StateId, id: StateId) -> Option<StateId> {
        self.ancestors(id)
            .into_iter()
            .find(|s| self.node(*s).parent == Some(ancestor))
    }
}

fn id_at(index: usize) -> StateId {
    StateId(u32::try_from(index).unwrap_or(u32::MAX))
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("state `{0}` is declared twice")]
    Duplicate(String),
    #[error("parent of `{0}` is not declared")]
    MissingParent(String),
    #[error("transition from `{from}` targets unknown state `{target}`")]
    UnknownTarget { from: String, target: String },
    #[error("compound state `{path}` has no child `{initial}`")]
    MissingInitial { path: String, initial: String },
    #[error("history node `{0}` must sit inside a compound state")]
    OrphanHistory(String),
    #[error("state `{0}` cannot have children")]
    ChildOfLeaf(String),
    #[error("compound state `{0}` has no children")]
    EmptyCompound(String),
    #[error("prompt catalogue: {0}")]
    Prompts(#[from] super::prompts::PromptError),
}

#[derive(Debug, Clone)]
enum DeclKind {
    Atomic,
    Compound { initial: String },
    History(HistoryDepth),
    Final,
    Invoke(TaskKind),
}

/// Transition declaration with an unresolved dotted target
#[derive(Debug, Clone)]
pub struct TransitionDecl {
    guard: Guard,
    target: String,
    actions: Vec<Action>,
}

/// Start declaring a transition to `target`
pub fn go(target: &str) -> TransitionDecl {
    TransitionDecl {
        guard: Guard::Always,
        target: target.to_string(),
        actions: Vec::new(),
    }
}

impl TransitionDecl {
    pub fn when(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodeDecl {
    path: String,
    kind: DeclKind,
    entry: Vec<Action>,
    on: Vec<(EventKind, TransitionDecl)>,
    interrupts: Vec<(EventKind, TransitionDecl)>,
    prompt: Option<PromptId>,
}

impl NodeDecl {
    pub fn entry(&mut self, action: Action) -> &mut Self {
        self.entry.push(action);
        self
    }

    /// Local transition; candidates are tried in declaration order
    pub fn on(&mut self, event: EventKind, transition: TransitionDecl) -> &mut Self {
        self.on.push((event, transition));
        self
    }

    /// Transition that preempts everything below this node
    pub fn interrupt(&mut self, event: EventKind, transition: TransitionDecl) -> &mut Self {
        self.interrupts.push((event, transition));
        self
    }

    pub fn prompt(&mut self, id: PromptId) -> &mut Self {
        self.prompt = Some(id);
        self
    }
}

/// Declares a chart; the root `""` is implicit
#[derive(Debug)]
pub struct ChartBuilder {
    decls: Vec<NodeDecl>,
}

impl ChartBuilder {
    pub fn new(initial: &str) -> Self {
        Self {
            decls: vec![NodeDecl {
                path: String::new(),
                kind: DeclKind::Compound {
                    initial: initial.to_string(),
                },
                entry: Vec::new(),
                on: Vec::new(),
                interrupts: Vec::new(),
                prompt: None,
            }],
        }
    }

    fn declare(&mut self, path: &str, kind: DeclKind) -> &mut NodeDecl {
        self.decls.push(NodeDecl {
            path: path.to_string(),
            kind,
            entry: Vec::new(),
            on: Vec::new(),
            interrupts: Vec::new(),
            prompt: None,
        });
        let last = self.decls.len() - 1;
        &mut self.decls[last]
    }

    pub fn root(&mut self) -> &mut NodeDecl {
        &mut self.decls[0]
    }

    pub fn atomic(&mut self, path: &str) -> &mut NodeDecl {
        self.declare(path, DeclKind::Atomic)
    }

    /// `initial` is the name of a direct child
    pub fn compound(&mut self, path: &str, initial: &str) -> &mut NodeDecl {
        self.declare(
            path,
            DeclKind::Compound {
                initial: initial.to_string(),
            },
        )
    }

    pub fn history(&mut self, path: &str, depth: HistoryDepth) -> &mut NodeDecl {
        self.declare(path, DeclKind::History(depth))
    }

    pub fn final_state(&mut self, path: &str) -> &mut NodeDecl {
        self.declare(path, DeclKind::Final)
    }

    pub fn invoke(&mut self, path: &str, task: TaskKind) -> &mut NodeDecl {
        self.declare(path, DeclKind::Invoke(task))
    }

    /// Resolve every path and check the structural rules
    pub fn build(self, grammar: Grammar, prompts: PromptCatalog) -> Result<Statechart, ChartError> {
        prompts.validate()?;

        let mut by_path = HashMap::new();
        for (i, decl) in self.decls.iter().enumerate() {
            if by_path.insert(decl.path.clone(), id_at(i)).is_some() {
                return Err(ChartError::Duplicate(decl.path.clone()));
            }
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(self.decls.len());
        for decl in &self.decls {
            let (parent, name) = match decl.path.rsplit_once('.') {
                Some((parent, name)) => (Some(parent), name),
                None if decl.path.is_empty() => (None, ""),
                None => (Some(""), decl.path.as_str()),
            };
            let parent = match parent {
                Some(p) => Some(
                    *by_path
                        .get(p)
                        .ok_or_else(|| ChartError::MissingParent(decl.path.clone()))?,
                ),
                None => None,
            };
            nodes.push(Node {
                name: name.to_string(),
                path: decl.path.clone(),
                parent,
                children: Vec::new(),
                // Placeholder until children are known
                kind: NodeKind::Atomic,
                entry: decl.entry.clone(),
                on: HashMap::new(),
                interrupts: HashMap::new(),
                prompt: decl.prompt,
            });
        }

        for i in 0..nodes.len() {
            if let Some(parent) = nodes[i].parent {
                nodes[parent.index()].children.push(id_at(i));
            }
        }

        let resolve = |from: &str, target: &str| {
            by_path
                .get(target)
                .copied()
                .ok_or_else(|| ChartError::UnknownTarget {
                    from: from.to_string(),
                    target: target.to_string(),
                })
        };
        let resolve_all = |from: &str, list: &[(EventKind, TransitionDecl)]| {
            let mut map: HashMap<EventKind, Vec<Transition>> = HashMap::new();
            for (event, t) in list {
                map.entry(*event).or_default().push(Transition {
                    guard: t.guard.clone(),
                    target: resolve(from, &t.target)?,
                    actions: t.actions.clone(),
                });
            }
            Ok::<_, ChartError>(map)
        };

        for (decl, node) in self.decls.iter().zip(&nodes) {
            if matches!(decl.kind, DeclKind::History(_)) {
                let parent_is_compound = node.parent.is_some_and(|p| {
                    matches!(self.decls[p.index()].kind, DeclKind::Compound { .. })
                });
                if !parent_is_compound {
                    return Err(ChartError::OrphanHistory(decl.path.clone()));
                }
            }
        }

        for (i, decl) in self.decls.iter().enumerate() {
            let has_children = !nodes[i].children.is_empty();
            let kind = match &decl.kind {
                DeclKind::Compound { initial } => {
                    if !has_children {
                        return Err(ChartError::EmptyCompound(decl.path.clone()));
                    }
                    let initial_path = child_path(&decl.path, initial);
                    let initial_id = by_path
                        .get(&initial_path)
                        .copied()
                        .filter(|id| nodes[id.index()].parent == Some(id_at(i)))
                        .ok_or_else(|| ChartError::MissingInitial {
                            path: decl.path.clone(),
                            initial: initial.clone(),
                        })?;
                    NodeKind::Compound {
                        initial: initial_id,
                    }
                }
                other => {
                    if has_children {
                        return Err(ChartError::ChildOfLeaf(decl.path.clone()));
                    }
                    match other {
                        DeclKind::History(depth) => NodeKind::History(*depth),
                        DeclKind::Final => NodeKind::Final,
                        DeclKind::Invoke(task) => NodeKind::Invoke(*task),
                        DeclKind::Atomic | DeclKind::Compound { .. } => NodeKind::Atomic,
                    }
                }
            };
            nodes[i].kind = kind;
            nodes[i].on = resolve_all(&decl.path, &decl.on)?;
            nodes[i].interrupts = resolve_all(&decl.path, &decl.interrupts)?;
        }

        Ok(Statechart {
            nodes,
            by_path,
            grammar,
            prompts,
        })
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}
