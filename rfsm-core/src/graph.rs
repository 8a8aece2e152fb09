//! Host-side snapshot of a machine's structure.
//!
//! Built by [`StateGraphExtractor`](crate::StateGraphExtractor) after a
//! successful load. The snapshot is immutable; a reload produces a new one
//! with a new [`GraphVersion`].

use crate::naming;
use serde::{Deserialize, Serialize};

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Composite,
    Leaf,
    Connector,
    Unknown,
}

impl StateKind {
    /// Parses the tag reported by the introspection chunk.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "composite" => StateKind::Composite,
            "leaf" => StateKind::Leaf,
            "connector" => StateKind::Connector,
            _ => StateKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Composite => "composite",
            StateKind::Leaf => "leaf",
            StateKind::Connector => "connector",
            StateKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the hierarchy, named in host form (no `root.` prefix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    pub kind: StateKind,
    pub has_entry: bool,
    pub has_doo: bool,
    pub has_exit: bool,
}

impl State {
    /// Name of the enclosing state, `None` for top-level nodes.
    pub fn parent(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Last path segment.
    pub fn local_name(&self) -> &str {
        self.name.rsplit_once('.').map_or(self.name.as_str(), |(_, local)| local)
    }

    /// Nesting depth; top-level nodes are at depth 0.
    pub fn depth(&self) -> usize {
        self.name.matches('.').count()
    }

    /// Connectors are pseudo-states and never carry callbacks.
    pub fn accepts_callbacks(&self) -> bool {
        self.kind != StateKind::Connector
    }
}

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum TransitionTarget {
    State(String),
    /// Runs its effect without leaving the source.
    Internal,
}

impl std::fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionTarget::State(name) => f.write_str(name),
            TransitionTarget::Internal => f.write_str(naming::INTERNAL_TARGET),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub source: String,
    pub target: TransitionTarget,
    /// Raw trigger names, completion events included in `e_done@<fqn>` form.
    pub events: Vec<String>,
    pub priority: Option<i64>,
}

impl Transition {
    pub fn is_internal(&self) -> bool {
        matches!(self.target, TransitionTarget::Internal)
    }

    pub fn target_name(&self) -> Option<&str> {
        match &self.target {
            TransitionTarget::State(name) => Some(name),
            TransitionTarget::Internal => None,
        }
    }

    /// Trigger names for display, with completion events collapsed to `e_done`.
    pub fn display_events(&self) -> Vec<&str> {
        self.events.iter().map(|e| naming::display_event_name(e)).collect()
    }

    pub fn is_triggered_by(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn is_completion(&self) -> bool {
        self.events.iter().any(|e| naming::is_completion_event(e))
    }
}

/// Identifies one extraction of one definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphVersion {
    /// Incremented on every successful load of the owning machine.
    pub generation: u64,
    /// CRC32C of the definition file bytes.
    pub checksum: u32,
}

impl std::fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}/{:08x}", self.generation, self.checksum)
    }
}

/// States and transitions of a loaded definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateGraph {
    pub version: GraphVersion,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
}

impl StateGraph {
    pub fn new(states: Vec<State>, transitions: Vec<Transition>) -> Self {
        Self {
            version: GraphVersion::default(),
            states,
            transitions,
        }
    }

    pub fn with_version(mut self, version: GraphVersion) -> Self {
        self.version = version;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.transitions.is_empty()
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn contains_state(&self, name: &str) -> bool {
        self.state(name).is_some()
    }

    /// Direct children of `parent`; pass `None` for top-level nodes.
    pub fn children_of<'a>(&'a self, parent: Option<&'a str>) -> impl Iterator<Item = &'a State> + 'a {
        self.states.iter().filter(move |s| s.parent() == parent)
    }

    pub fn transitions_from<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions.iter().filter(move |t| t.source == state)
    }

    pub fn transitions_to<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.target_name() == Some(state))
    }

    /// Transitions whose source or target is not a state of this graph.
    pub fn dangling_transitions(&self) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| {
                !self.contains_state(&t.source)
                    || t.target_name().is_some_and(|name| !self.contains_state(name))
            })
            .collect()
    }

    /// Equality of contents, ignoring the version stamp.
    pub fn same_structure(&self, other: &StateGraph) -> bool {
        self.states == other.states && self.transitions == other.transitions
    }
}
