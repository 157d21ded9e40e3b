//! Portable JSON form of the schema graph.
//!
//! The document lists nodes and edges sorted by id, roots sorted by name, and
//! the id counters, so a save/load cycle reproduces the graph exactly,
//! including alternative order and ids that later edits will allocate.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DmError, DmResult, SchemaError};
use crate::schema::validation::validate_document;
use crate::schema::{NodeId, SchemaEdge, SchemaGraph, SchemaNode};

/// Format version written by [`SchemaGraph::to_document`].
pub const SCHEMA_DOCUMENT_VERSION: u32 = 1;

/// Serializable schema snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub version: u32,
    #[serde(default)]
    pub roots: BTreeMap<String, NodeId>,
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
    #[serde(default)]
    pub edges: Vec<SchemaEdge>,
    /// Next node id to allocate; derived from the nodes when absent.
    #[serde(default)]
    pub next_node: u32,
    #[serde(default)]
    pub next_edge: u32,
}

impl SchemaGraph {
    /// Snapshot of this graph as a document.
    #[must_use]
    pub fn to_document(&self) -> SchemaDocument {
        let (next_node, next_edge) = self.counters();
        SchemaDocument {
            version: SCHEMA_DOCUMENT_VERSION,
            roots: self.roots().map(|(name, id)| (name.to_string(), id)).collect(),
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
            next_node,
            next_edge,
        }
    }

    /// Rebuilds a graph from a document after validating it.
    pub fn from_document(doc: SchemaDocument) -> Result<Self, SchemaError> {
        validate_document(&doc)?;

        let mut graph = Self::new();
        for node in doc.nodes {
            graph.insert_node(node);
        }
        let mut edges = doc.edges;
        edges.sort_by_key(|e| e.id);
        for edge in edges {
            graph.insert_edge(edge);
        }
        for (name, node) in doc.roots {
            graph.insert_root(name, node);
        }
        graph.set_counters(doc.next_node, doc.next_edge);
        Ok(graph)
    }

    /// Serializes to pretty JSON.
    pub fn to_json_pretty(&self) -> DmResult<String> {
        serde_json::to_string_pretty(&self.to_document())
            .map_err(|e| DmError::internal(format!("serialize schema: {e}")))
    }

    /// Deserializes and validates a JSON document.
    pub fn from_json(s: &str) -> DmResult<Self> {
        let doc = serde_json::from_str::<SchemaDocument>(s).map_err(|e| SchemaError::InvalidDocument {
            reason: e.to_string(),
        })?;
        Ok(Self::from_document(doc)?)
    }

    /// Writes the schema to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> DmResult<()> {
        let path = path.as_ref();
        let json = self.to_json_pretty()?;
        std::fs::write(path, json)?;
        info!(
            path = %path.display(),
            nodes = self.node_count(),
            edges = self.edge_count(),
            "schema saved"
        );
        Ok(())
    }

    /// Reads a schema from `path`.
    pub fn load(path: impl AsRef<Path>) -> DmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let graph = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "schema loaded"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Multiplicity, ValueKind};

    fn sample() -> SchemaGraph {
        let mut g = SchemaGraph::with_roots(["state"]).unwrap();
        let state = g.root("state").unwrap();
        let block = g.add_node("block").unwrap();
        let other = g.add_node("pyramid").unwrap();
        g.add_edge(state, "block", ValueKind::Identifier { target: block }, Multiplicity::Multi)
            .unwrap();
        g.add_edge(state, "block", ValueKind::Identifier { target: other }, Multiplicity::Multi)
            .unwrap();
        g.add_edge(block, "color", ValueKind::enumeration(["red", "green", "blue"]), Multiplicity::Single)
            .unwrap();
        g.add_edge(block, "size", ValueKind::Float { min: Some(0.0), max: None }, Multiplicity::Single)
            .unwrap();
        g.add_edge(block, "on", ValueKind::Identifier { target: block }, Multiplicity::Single)
            .unwrap();
        g
    }

    #[test]
    fn json_roundtrip_is_exact() {
        let g = sample();
        let json = g.to_json_pretty().unwrap();
        let back = SchemaGraph::from_json(&json).unwrap();
        assert_eq!(g, back);
        assert_eq!(back.to_json_pretty().unwrap(), json);
        assert_eq!(g.fingerprint(), back.fingerprint());
    }

    #[test]
    fn roundtrip_preserves_alternative_order() {
        let g = sample();
        let state = g.root("state").unwrap();
        let back = SchemaGraph::from_json(&g.to_json_pretty().unwrap()).unwrap();
        let names = |graph: &SchemaGraph| -> Vec<String> {
            graph
                .edges_named(state, "block")
                .filter_map(|e| e.kind.target())
                .map(|n| graph.describe_node(n))
                .collect()
        };
        assert_eq!(names(&g), names(&back));
        assert_eq!(names(&back), vec!["block".to_string(), "pyramid".to_string()]);
    }

    #[test]
    fn roundtrip_preserves_counters_after_removal() {
        let mut g = sample();
        let pyramid = g.nodes().find(|n| n.name == "pyramid").map(|n| n.id).unwrap();
        g.remove_node(pyramid).unwrap();
        let mut back = SchemaGraph::from_json(&g.to_json_pretty().unwrap()).unwrap();
        assert_eq!(g, back);
        let fresh = back.add_node("fresh").unwrap();
        assert_eq!(fresh, g.add_node("fresh").unwrap());
    }

    #[test]
    fn missing_counters_are_derived() {
        let json = r#"{
            "version": 1,
            "roots": {"state": 0},
            "nodes": [{"id": 0, "name": "state"}, {"id": 3, "name": "io"}],
            "edges": [{"id": 5, "from": 0, "name": "io", "kind": {"type": "identifier", "target": 3}}]
        }"#;
        let mut g = SchemaGraph::from_json(json).unwrap();
        assert_eq!(g.add_node("next").unwrap(), NodeId::new(4));
        let state = g.root("state").unwrap();
        let edge = g.add_edge(state, "name", ValueKind::String, Multiplicity::Single).unwrap();
        assert_eq!(edge.get(), 6);
    }

    #[test]
    fn malformed_json_is_schema_error() {
        let err = SchemaGraph::from_json("{ not json").unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let g = sample();
        g.save(&path).unwrap();
        let back = SchemaGraph::load(&path).unwrap();
        assert_eq!(g, back);

        let missing = SchemaGraph::load(dir.path().join("missing.json")).unwrap_err();
        assert!(missing.is_io());
    }
}
