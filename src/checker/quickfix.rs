//! Schema edits suggested by diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::schema::{EdgeId, KindCategory, Multiplicity, NodeId, SchemaGraph, ValueKind};

/// A schema change that would make a diagnostic go away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuickFix {
    /// Add an identifier attribute pointing at a new node named after it.
    AddChild { node: NodeId, attribute: String },
    /// Add a scalar attribute.
    AddEdge {
        node: NodeId,
        attribute: String,
        kind: ValueKind,
        #[serde(default)]
        multiplicity: Multiplicity,
    },
    /// Add a value to an enumeration attribute.
    ExtendEnumeration { edge: EdgeId, value: String },
}

/// What applying a fix changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedFix {
    EdgeAdded { edge: EdgeId, node: NodeId },
    ChildAdded { edge: EdgeId, node: NodeId, child: NodeId },
    EnumerationExtended { edge: EdgeId, node: NodeId },
    /// The schema already satisfied the fix.
    Unchanged,
}

impl AppliedFix {
    /// The node whose outgoing edges changed.
    #[must_use]
    pub const fn touched_node(&self) -> Option<NodeId> {
        match self {
            Self::EdgeAdded { node, .. } | Self::ChildAdded { node, .. } | Self::EnumerationExtended { node, .. } => {
                Some(*node)
            }
            Self::Unchanged => None,
        }
    }

    #[must_use]
    pub const fn edge(&self) -> Option<EdgeId> {
        match self {
            Self::EdgeAdded { edge, .. } | Self::ChildAdded { edge, .. } | Self::EnumerationExtended { edge, .. } => {
                Some(*edge)
            }
            Self::Unchanged => None,
        }
    }
}

impl QuickFix {
    /// Node and attribute an add-style fix targets.
    #[must_use]
    pub fn target(&self) -> Option<(NodeId, &str)> {
        match self {
            Self::AddChild { node, attribute } | Self::AddEdge { node, attribute, .. } => Some((*node, attribute)),
            Self::ExtendEnumeration { .. } => None,
        }
    }

    /// Applies the fix to `schema`.
    ///
    /// A scalar fix whose attribute already exists as an enumeration merges
    /// into it; an enumeration fix for a value already present is a no-op.
    pub fn apply(&self, schema: &mut SchemaGraph) -> Result<AppliedFix, SchemaError> {
        match self {
            Self::AddChild { node, attribute } => {
                let (edge, child) = schema.add_child(*node, attribute.clone())?;
                Ok(AppliedFix::ChildAdded {
                    edge,
                    node: *node,
                    child,
                })
            }
            Self::AddEdge {
                node,
                attribute,
                kind,
                multiplicity,
            } => {
                if let ValueKind::Enumeration { values } = kind {
                    let existing = schema
                        .edges_named(*node, attribute)
                        .find(|e| e.kind.category() == KindCategory::Enumeration)
                        .map(|e| e.id);
                    if let Some(edge) = existing {
                        let mut changed = false;
                        for value in values {
                            changed |= schema.extend_enumeration(edge, value.clone())?;
                        }
                        return Ok(if changed {
                            AppliedFix::EnumerationExtended { edge, node: *node }
                        } else {
                            AppliedFix::Unchanged
                        });
                    }
                }
                match schema.add_edge(*node, attribute.clone(), kind.clone(), *multiplicity) {
                    Ok(edge) => Ok(AppliedFix::EdgeAdded { edge, node: *node }),
                    Err(SchemaError::DuplicateEdge { .. }) => Ok(AppliedFix::Unchanged),
                    Err(err) => Err(err),
                }
            }
            Self::ExtendEnumeration { edge, value } => {
                let node = schema.edge(*edge).map(|e| e.from).ok_or(SchemaError::EdgeNotFound(*edge))?;
                if schema.extend_enumeration(*edge, value.clone())? {
                    Ok(AppliedFix::EnumerationExtended { edge: *edge, node })
                } else {
                    Ok(AppliedFix::Unchanged)
                }
            }
        }
    }
}

impl fmt::Display for QuickFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddChild { node, attribute } => write!(f, "add identifier attribute '{attribute}' to {node}"),
            Self::AddEdge {
                node, attribute, kind, ..
            } => write!(f, "add attribute '{attribute}' ({kind}) to {node}"),
            Self::ExtendEnumeration { edge, value } => write!(f, "add '{value}' to enumeration {edge}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_child_creates_node() {
        let mut g = SchemaGraph::with_roots(["state"]).unwrap();
        let state = g.root("state").unwrap();
        let fix = QuickFix::AddChild {
            node: state,
            attribute: "io".to_string(),
        };
        let applied = fix.apply(&mut g).unwrap();
        let AppliedFix::ChildAdded { child, .. } = applied else {
            panic!("expected child, got {applied:?}");
        };
        assert_eq!(g.describe_node(child), "io");
        assert_eq!(applied.touched_node(), Some(state));
    }

    #[test]
    fn test_add_enumeration_merges_into_existing() {
        let mut g = SchemaGraph::new();
        let block = g.add_node("block").unwrap();
        let color = g
            .add_edge(block, "color", ValueKind::enumeration(["red"]), Multiplicity::Single)
            .unwrap();
        let fix = QuickFix::AddEdge {
            node: block,
            attribute: "color".to_string(),
            kind: ValueKind::enumeration(["yellow"]),
            multiplicity: Multiplicity::Single,
        };
        assert_eq!(
            fix.apply(&mut g).unwrap(),
            AppliedFix::EnumerationExtended { edge: color, node: block }
        );
        assert_eq!(fix.apply(&mut g).unwrap(), AppliedFix::Unchanged);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_extend_enumeration() {
        let mut g = SchemaGraph::new();
        let block = g.add_node("block").unwrap();
        let color = g
            .add_edge(block, "color", ValueKind::enumeration(["red"]), Multiplicity::Single)
            .unwrap();
        let fix = QuickFix::ExtendEnumeration {
            edge: color,
            value: "yellow".to_string(),
        };
        assert!(matches!(fix.apply(&mut g).unwrap(), AppliedFix::EnumerationExtended { .. }));
        assert_eq!(g.edge(color).unwrap().kind, ValueKind::enumeration(["red", "yellow"]));
    }

    #[test]
    fn test_conflicting_fix_is_rejected() {
        let mut g = SchemaGraph::new();
        let block = g.add_node("block").unwrap();
        g.add_edge(block, "size", ValueKind::integer(), Multiplicity::Single)
            .unwrap();
        let fix = QuickFix::AddChild {
            node: block,
            attribute: "size".to_string(),
        };
        assert!(fix.apply(&mut g).unwrap_err().is_conflict());
    }
}
