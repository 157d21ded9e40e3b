//! Per-rule binding graphs.
//!
//! A binding graph has one position per variable (plus anonymous positions
//! for dotted paths and literal values) and one edge per attribute a rule
//! reads or writes. It is built once per check and never mutated afterwards.

mod resolver;

use std::fmt;

use serde::Serialize;

use crate::parser::Constant;
use crate::span::Span;

pub use resolver::resolve;

/// Index of a position in [`BindingGraph::positions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PositionId(usize);

impl PositionId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// What a position stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionRole {
    /// An object or value reached through attribute edges.
    Value,
    /// A variable bound in an attribute slot (`^<attr>`).
    Attribute,
}

/// A symbolic working-memory element the rule talks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub id: PositionId,
    /// Variable name, or `None` for anonymous positions.
    pub variable: Option<String>,
    pub role: PositionRole,
    /// First occurrence.
    pub span: Span,
    /// Introduced inside a negated condition.
    pub negated: bool,
    /// Introduced by an action as a new identifier.
    pub created: bool,
}

impl Position {
    /// Variable name or `<anonymous>`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.variable.as_deref().unwrap_or("<anonymous>")
    }
}

/// Attribute slot of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeLabel {
    /// A single constant attribute name.
    Name { name: String },
    /// `^<< a b >>`: any of several names.
    Choice { names: Vec<String> },
    /// A variable or otherwise unknown attribute; matches every schema edge.
    Wildcard { variable: Option<PositionId> },
}

impl AttributeLabel {
    /// Returns true if a schema attribute called `name` satisfies this label.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Name { name: n } => n == name,
            Self::Choice { names } => names.iter().any(|n| n == name),
            Self::Wildcard { .. } => true,
        }
    }

    /// Constant names this label requires, empty for wildcards.
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Name { name } => std::slice::from_ref(name),
            Self::Choice { names } => names,
            Self::Wildcard { .. } => &[],
        }
    }

    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }
}

impl fmt::Display for AttributeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name { name } => f.write_str(name),
            Self::Choice { names } => write!(f, "<< {} >>", names.join(" ")),
            Self::Wildcard { .. } => f.write_str("*"),
        }
    }
}

/// How an action changes working memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Remove,
    /// The same attribute of the same object is both removed and added.
    Modify,
}

/// Which side of the arrow produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "side", content = "action", rename_all = "snake_case")]
pub enum Side {
    Condition,
    Action(ActionKind),
}

/// One attribute the rule reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingEdge {
    pub subject: PositionId,
    pub attribute: AttributeLabel,
    pub target: PositionId,
    /// Statically known values tested or written.
    pub constants: Vec<Constant>,
    /// The value is a function call result.
    pub opaque: bool,
    /// False for edges under negation: they describe an absence check.
    pub asserting: bool,
    pub side: Side,
    /// The attribute test or make this edge came from.
    pub span: Span,
}

impl BindingEdge {
    #[must_use]
    pub const fn is_action(&self) -> bool {
        matches!(self.side, Side::Action(_))
    }
}

/// An anchor keyword attached to a position: `(state <s> ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorBinding {
    pub position: PositionId,
    pub keyword: String,
    pub span: Span,
}

/// The derived variable graph of one production.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingGraph {
    pub positions: Vec<Position>,
    pub edges: Vec<BindingEdge>,
    pub anchors: Vec<AnchorBinding>,
}

impl BindingGraph {
    #[must_use]
    pub fn position(&self, id: PositionId) -> &Position {
        &self.positions[id.0]
    }

    /// Looks up a position by variable name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.variable.as_deref() == Some(name))
    }

    /// Edges leaving `position`.
    pub fn edges_from(&self, position: PositionId) -> impl Iterator<Item = (usize, &BindingEdge)> {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.subject == position)
    }

    /// Anchor keywords attached to `position`.
    pub fn anchors_of(&self, position: PositionId) -> impl Iterator<Item = &AnchorBinding> {
        self.anchors.iter().filter(move |a| a.position == position)
    }

    pub(crate) fn push_position(
        &mut self,
        variable: Option<String>,
        role: PositionRole,
        span: Span,
        negated: bool,
        created: bool,
    ) -> PositionId {
        let id = PositionId(self.positions.len());
        self.positions.push(Position {
            id,
            variable,
            role,
            span,
            negated,
            created,
        });
        id
    }
}
