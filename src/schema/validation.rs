//! Schema document validation.
//!
//! Documents arrive from disk and may have been edited by hand, so every
//! structural invariant the graph relies on is checked before a document is
//! turned into a [`crate::schema::SchemaGraph`].

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SchemaError;
use crate::schema::serialization::{SchemaDocument, SCHEMA_DOCUMENT_VERSION};
use crate::schema::{EdgeId, NodeId, ValueKind};

/// Upper bound for node, edge, and root names.
pub const MAX_NAME_LEN: usize = 1024;

fn invalid(reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidDocument { reason: reason.into() }
}

fn validate_name(what: &'static str, name: &str) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        return Err(SchemaError::EmptyName { what });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!("{what} name exceeds {MAX_NAME_LEN} bytes")));
    }
    Ok(())
}

/// Returns true if `name` can be written as a rule attribute: non-empty
/// and made only of ASCII letters, digits, `-` and `_`.
#[must_use]
pub fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub(crate) fn validate_attribute_name(name: &str) -> Result<(), SchemaError> {
    validate_name("Attribute", name)?;
    if !is_valid_attribute_name(name) {
        return Err(SchemaError::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// Checks a document for dangling references, duplicate ids, conflicting
/// attribute kinds, and id counters that would reuse existing ids.
pub fn validate_document(doc: &SchemaDocument) -> Result<(), SchemaError> {
    if doc.version != SCHEMA_DOCUMENT_VERSION {
        return Err(invalid(format!(
            "unsupported version {} (expected {SCHEMA_DOCUMENT_VERSION})",
            doc.version
        )));
    }

    let mut nodes = BTreeSet::new();
    for node in &doc.nodes {
        validate_name("Node", &node.name)?;
        if node.id.get() == u32::MAX {
            return Err(invalid(format!("node id {} is reserved", node.id)));
        }
        if !nodes.insert(node.id) {
            return Err(invalid(format!("duplicate node id {}", node.id)));
        }
    }

    let mut edge_ids = BTreeSet::new();
    let mut by_name: BTreeMap<(NodeId, &str), Vec<(EdgeId, &ValueKind)>> = BTreeMap::new();
    for edge in &doc.edges {
        validate_attribute_name(&edge.name)?;
        if edge.id.get() == u32::MAX {
            return Err(invalid(format!("edge id {} is reserved", edge.id)));
        }
        if !edge_ids.insert(edge.id) {
            return Err(invalid(format!("duplicate edge id {}", edge.id)));
        }
        if !nodes.contains(&edge.from) {
            return Err(invalid(format!("edge {} starts at missing node {}", edge.id, edge.from)));
        }
        if let Some(target) = edge.kind.target() {
            if !nodes.contains(&target) {
                return Err(invalid(format!("edge {} targets missing node {target}", edge.id)));
            }
        }
        edge.kind.validate()?;

        let siblings = by_name.entry((edge.from, edge.name.as_str())).or_default();
        for (other, kind) in siblings.iter() {
            if kind.category() != edge.kind.category() {
                return Err(SchemaError::Conflict {
                    node: edge.from,
                    attribute: edge.name.clone(),
                    existing: kind.category().to_string(),
                    requested: edge.kind.category().to_string(),
                });
            }
            if **kind == edge.kind {
                return Err(SchemaError::DuplicateEdge {
                    node: edge.from,
                    attribute: edge.name.clone(),
                    existing: *other,
                });
            }
        }
        siblings.push((edge.id, &edge.kind));
    }

    for (name, node) in &doc.roots {
        validate_name("Root", name)?;
        if !nodes.contains(node) {
            return Err(SchemaError::UnknownRoot(name.clone()));
        }
    }

    // Zero counters mean "derive from content".
    if doc.next_node != 0 {
        if let Some(max) = nodes.last() {
            if doc.next_node <= max.get() {
                return Err(invalid(format!("next_node {} would reuse {max}", doc.next_node)));
            }
        }
    }
    if doc.next_edge != 0 {
        if let Some(max) = edge_ids.last() {
            if doc.next_edge <= max.get() {
                return Err(invalid(format!("next_edge {} would reuse {max}", doc.next_edge)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Multiplicity, SchemaEdge, SchemaNode};

    fn node(id: u32, name: &str) -> SchemaNode {
        SchemaNode {
            id: NodeId::new(id),
            name: name.to_string(),
            comment: None,
        }
    }

    fn edge(id: u32, from: u32, name: &str, kind: ValueKind) -> SchemaEdge {
        SchemaEdge {
            id: EdgeId::new(id),
            from: NodeId::new(from),
            name: name.to_string(),
            kind,
            multiplicity: Multiplicity::Single,
            comment: None,
        }
    }

    fn doc(nodes: Vec<SchemaNode>, edges: Vec<SchemaEdge>) -> SchemaDocument {
        SchemaDocument {
            version: SCHEMA_DOCUMENT_VERSION,
            roots: BTreeMap::new(),
            nodes,
            edges,
            next_node: 0,
            next_edge: 0,
        }
    }

    #[test]
    fn accepts_valid_document() {
        let d = doc(
            vec![node(0, "state"), node(1, "io")],
            vec![edge(0, 0, "io", ValueKind::Identifier { target: NodeId::new(1) })],
        );
        assert!(validate_document(&d).is_ok());
    }

    #[test]
    fn rejects_dangling_target() {
        let d = doc(
            vec![node(0, "state")],
            vec![edge(0, 0, "io", ValueKind::Identifier { target: NodeId::new(9) })],
        );
        let err = validate_document(&d).unwrap_err();
        assert!(err.to_string().contains("missing node"));
    }

    #[test]
    fn rejects_conflicting_kinds() {
        let d = doc(
            vec![node(0, "block")],
            vec![
                edge(0, 0, "color", ValueKind::enumeration(["red"])),
                edge(1, 0, "color", ValueKind::integer()),
            ],
        );
        assert!(matches!(validate_document(&d), Err(SchemaError::Conflict { .. })));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let d = doc(vec![node(0, "a"), node(0, "b")], Vec::new());
        assert!(validate_document(&d).is_err());
    }

    #[test]
    fn rejects_unknown_root_and_stale_counter() {
        let mut d = doc(vec![node(0, "state")], Vec::new());
        d.roots.insert("impasse".to_string(), NodeId::new(7));
        assert_eq!(
            validate_document(&d),
            Err(SchemaError::UnknownRoot("impasse".to_string()))
        );

        let mut d = doc(vec![node(0, "state"), node(4, "x")], Vec::new());
        d.next_node = 3;
        assert!(validate_document(&d).is_err());
    }

    #[test]
    fn rejects_reserved_ids() {
        let d = doc(vec![node(u32::MAX, "state")], Vec::new());
        assert!(validate_document(&d).unwrap_err().to_string().contains("reserved"));

        let d = doc(
            vec![node(0, "state")],
            vec![edge(u32::MAX, 0, "io", ValueKind::String)],
        );
        assert!(validate_document(&d).unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn rejects_attribute_names_rules_cannot_spell() {
        for name in ["a.b", "two words", "x*"] {
            let d = doc(vec![node(0, "state")], vec![edge(0, 0, name, ValueKind::String)]);
            assert_eq!(
                validate_document(&d),
                Err(SchemaError::InvalidName { name: name.to_string() })
            );
        }
        assert!(is_valid_attribute_name("input-link"));
        assert!(is_valid_attribute_name("sensor_2"));
        assert!(!is_valid_attribute_name(""));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut d = doc(Vec::new(), Vec::new());
        d.version = 99;
        assert!(validate_document(&d).is_err());
    }
}
