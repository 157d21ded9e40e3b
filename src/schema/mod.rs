//! Schema graph ("datamap").
//!
//! Nodes describe classes of working-memory objects and edges describe
//! their attributes. The graph lives in a flat arena addressed by stable
//! integer ids, so cycles and shared substructure need no reference
//! cycles. Every mutation either succeeds completely or returns a
//! [`SchemaError`] and leaves the graph untouched.

mod kind;
pub mod serialization;
pub mod validation;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

pub use kind::{Acceptance, KindCategory, Multiplicity, ValueKind};
pub use serialization::{SchemaDocument, SCHEMA_DOCUMENT_VERSION};

/// Stable identity of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable identity of a schema edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(u32);

impl EdgeId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A schema element a rule check looked at.
///
/// Checks record the set of these they depended on; schema edits report the
/// ones they touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum SchemaRef {
    /// The outgoing edge set of a node, or its name.
    Node(NodeId),
    Edge(EdgeId),
    /// A root registration by name, including absent ones.
    Root(String),
}

/// One class of working-memory object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub id: NodeId,
    /// Display name; not required to be unique.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A named attribute of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEdge {
    pub id: EdgeId,
    pub from: NodeId,
    /// Attribute name.
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Everything a node removal took with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNode {
    pub node: SchemaNode,
    /// Edges deleted along with the node, outgoing and incoming.
    pub removed_edges: Vec<SchemaEdge>,
    /// Edges that used to target the node and now target the replacement.
    pub repointed_edges: Vec<EdgeId>,
    /// Root names that pointed at the node.
    pub roots: Vec<String>,
}

/// Arena-backed schema graph.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    nodes: BTreeMap<NodeId, SchemaNode>,
    edges: BTreeMap<EdgeId, SchemaEdge>,
    /// Outgoing edges per node in declaration order.
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    /// Identifier edges targeting each node.
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    roots: BTreeMap<String, NodeId>,
    next_node: u32,
    next_edge: u32,
}

impl PartialEq for SchemaGraph {
    // The adjacency maps are derived from `edges`.
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.edges == other.edges
            && self.roots == other.roots
            && self.next_node == other.next_node
            && self.next_edge == other.next_edge
    }
}

impl SchemaGraph {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schema with one root node per name.
    pub fn with_roots<I, S>(names: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for name in names {
            graph.add_root(name)?;
        }
        Ok(graph)
    }

    // ---- lookup ----

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&SchemaNode> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&SchemaEdge> {
        self.edges.get(&id)
    }

    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &SchemaNode> {
        self.nodes.values()
    }

    /// Edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &SchemaEdge> {
        self.edges.values()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edges of `node` in declaration order.
    pub fn edges_from(&self, node: NodeId) -> impl Iterator<Item = &SchemaEdge> {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    /// Outgoing edges of `node` named `attribute`, alternatives in
    /// declaration order.
    pub fn edges_named<'a>(
        &'a self,
        node: NodeId,
        attribute: &'a str,
    ) -> impl Iterator<Item = &'a SchemaEdge> + 'a {
        self.edges_from(node).filter(move |e| e.name == attribute)
    }

    /// Identifier edges that point at `node`.
    pub fn edges_into(&self, node: NodeId) -> impl Iterator<Item = &SchemaEdge> {
        self.incoming
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    /// Node registered under root `name`.
    #[must_use]
    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.roots.get(name).copied()
    }

    /// Root registrations by name.
    pub fn roots(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.roots.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Display name of a node, or its id when it no longer exists.
    #[must_use]
    pub fn describe_node(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(node) => node.name.clone(),
            None => id.to_string(),
        }
    }

    // ---- mutation ----

    /// Adds a node.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeId, SchemaError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "Node" });
        }
        let id = NodeId(allocate(&mut self.next_node, "node")?);
        self.nodes.insert(
            id,
            SchemaNode {
                id,
                name,
                comment: None,
            },
        );
        Ok(id)
    }

    /// Adds a node and registers it as root `name`.
    ///
    /// Fails if the root name is already registered.
    pub fn add_root(&mut self, name: impl Into<String>) -> Result<NodeId, SchemaError> {
        let name = name.into();
        if let Some(existing) = self.roots.get(&name) {
            return Err(SchemaError::InvalidDocument {
                reason: format!("root '{name}' is already registered to {existing}"),
            });
        }
        let id = self.add_node(name.clone())?;
        self.roots.insert(name, id);
        Ok(id)
    }

    /// Registers `node` as root `name`, returning the previous registration.
    pub fn set_root(&mut self, name: impl Into<String>, node: NodeId) -> Result<Option<NodeId>, SchemaError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "Root" });
        }
        if !self.nodes.contains_key(&node) {
            return Err(SchemaError::NodeNotFound(node));
        }
        Ok(self.roots.insert(name, node))
    }

    /// Removes root registration `name`; the node itself stays.
    pub fn remove_root(&mut self, name: &str) -> Result<NodeId, SchemaError> {
        self.roots
            .remove(name)
            .ok_or_else(|| SchemaError::UnknownRoot(name.to_string()))
    }

    /// Renames a node, returning the old name.
    pub fn rename_node(&mut self, id: NodeId, name: impl Into<String>) -> Result<String, SchemaError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "Node" });
        }
        let node = self.nodes.get_mut(&id).ok_or(SchemaError::NodeNotFound(id))?;
        Ok(std::mem::replace(&mut node.name, name))
    }

    /// Sets or clears a node comment.
    pub fn set_node_comment(&mut self, id: NodeId, comment: Option<String>) -> Result<(), SchemaError> {
        let node = self.nodes.get_mut(&id).ok_or(SchemaError::NodeNotFound(id))?;
        node.comment = comment;
        Ok(())
    }

    /// Adds an attribute edge.
    ///
    /// An edge whose name already exists on `from` is accepted as an
    /// alternative when its kind has the same category and differs from
    /// every existing alternative. A different category is a
    /// [`SchemaError::Conflict`]; an identical kind is a
    /// [`SchemaError::DuplicateEdge`].
    pub fn add_edge(
        &mut self,
        from: NodeId,
        name: impl Into<String>,
        kind: ValueKind,
        multiplicity: Multiplicity,
    ) -> Result<EdgeId, SchemaError> {
        let name = name.into();
        self.check_edge(from, &name, &kind, None)?;

        let id = EdgeId(allocate(&mut self.next_edge, "edge")?);
        self.insert_edge(SchemaEdge {
            id,
            from,
            name,
            kind,
            multiplicity,
            comment: None,
        });
        Ok(id)
    }

    /// Shorthand for an identifier edge to a fresh node named after the
    /// attribute. Returns the new edge and node.
    pub fn add_child(
        &mut self,
        from: NodeId,
        attribute: impl Into<String>,
    ) -> Result<(EdgeId, NodeId), SchemaError> {
        let attribute = attribute.into();
        if !self.nodes.contains_key(&from) {
            return Err(SchemaError::NodeNotFound(from));
        }
        validation::validate_attribute_name(&attribute)?;
        let clash = self
            .edges_named(from, &attribute)
            .map(|e| e.kind.category())
            .find(|category| *category != KindCategory::Identifier);
        if let Some(existing) = clash {
            return Err(SchemaError::Conflict {
                node: from,
                attribute,
                existing: existing.to_string(),
                requested: KindCategory::Identifier.to_string(),
            });
        }
        if self.next_edge == u32::MAX {
            return Err(SchemaError::InvalidDocument {
                reason: "edge ids exhausted".to_string(),
            });
        }
        let node = self.add_node(attribute.clone())?;
        let edge = self.add_edge(from, attribute, ValueKind::Identifier { target: node }, Multiplicity::Single)?;
        Ok((edge, node))
    }

    /// Replaces an edge's kind and multiplicity, returning the old edge.
    pub fn update_edge(
        &mut self,
        id: EdgeId,
        kind: ValueKind,
        multiplicity: Multiplicity,
    ) -> Result<SchemaEdge, SchemaError> {
        let edge = self.edges.get(&id).ok_or(SchemaError::EdgeNotFound(id))?;
        let (from, name) = (edge.from, edge.name.clone());
        self.check_edge(from, &name, &kind, Some(id))?;

        let old = self.remove_edge_indexes(id)?;
        self.insert_edge(SchemaEdge {
            kind,
            multiplicity,
            ..old.clone()
        });
        Ok(old)
    }

    /// Replaces an edge's kind, keeping its multiplicity.
    pub fn update_edge_kind(&mut self, id: EdgeId, kind: ValueKind) -> Result<SchemaEdge, SchemaError> {
        let multiplicity = self
            .edges
            .get(&id)
            .map(|e| e.multiplicity)
            .ok_or(SchemaError::EdgeNotFound(id))?;
        self.update_edge(id, kind, multiplicity)
    }

    /// Adds `value` to an enumeration edge. Returns false if it was already present.
    pub fn extend_enumeration(&mut self, id: EdgeId, value: impl Into<String>) -> Result<bool, SchemaError> {
        let edge = self.edges.get(&id).ok_or(SchemaError::EdgeNotFound(id))?;
        let ValueKind::Enumeration { values } = &edge.kind else {
            return Err(SchemaError::Conflict {
                node: edge.from,
                attribute: edge.name.clone(),
                existing: edge.kind.category().to_string(),
                requested: "enumeration".to_string(),
            });
        };
        let value = value.into();
        if values.contains(&value) {
            return Ok(false);
        }
        let mut values = values.clone();
        values.insert(value);
        self.update_edge_kind(id, ValueKind::Enumeration { values })?;
        Ok(true)
    }

    /// Removes an edge.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<SchemaEdge, SchemaError> {
        self.remove_edge_indexes(id)
    }

    /// Removes a node along with its outgoing edges and every edge that
    /// targets it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<RemovedNode, SchemaError> {
        if !self.nodes.contains_key(&id) {
            return Err(SchemaError::NodeNotFound(id));
        }
        let incoming: Vec<EdgeId> = self.incoming.get(&id).cloned().unwrap_or_default();
        let mut removed_edges = Vec::new();
        for edge in incoming {
            removed_edges.push(self.remove_edge_indexes(edge)?);
        }
        self.finish_node_removal(id, removed_edges, Vec::new())
    }

    /// Removes a node, re-pointing edges that targeted it at `replacement`.
    ///
    /// Re-pointed edges that would duplicate an existing alternative are
    /// deleted instead.
    pub fn remove_node_repointing(&mut self, id: NodeId, replacement: NodeId) -> Result<RemovedNode, SchemaError> {
        if !self.nodes.contains_key(&id) {
            return Err(SchemaError::NodeNotFound(id));
        }
        if !self.nodes.contains_key(&replacement) {
            return Err(SchemaError::NodeNotFound(replacement));
        }
        if id == replacement {
            return Err(SchemaError::InvalidDocument {
                reason: format!("cannot re-point {id} onto itself"),
            });
        }

        let incoming: Vec<EdgeId> = self.incoming.get(&id).cloned().unwrap_or_default();
        let mut removed_edges = Vec::new();
        let mut repointed = Vec::new();
        for edge_id in incoming {
            let mut edge = self.remove_edge_indexes(edge_id)?;
            // Self-loops leave with the node's outgoing edges.
            if edge.from == id {
                removed_edges.push(edge);
                continue;
            }
            edge.kind = ValueKind::Identifier { target: replacement };
            let duplicate = self
                .edges_named(edge.from, &edge.name)
                .any(|other| other.kind == edge.kind);
            if duplicate {
                removed_edges.push(edge);
            } else {
                repointed.push(edge.id);
                self.insert_edge(edge);
            }
        }
        self.finish_node_removal(id, removed_edges, repointed)
    }

    /// blake3 fingerprint of the schema content.
    ///
    /// Every string is length-prefixed and value kinds are hashed field by
    /// field, so distinct schemas never share an encoding.
    #[must_use]
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for node in self.nodes.values() {
            hasher.update(b"N");
            hasher.update(&node.id.0.to_le_bytes());
            hash_str(&mut hasher, &node.name);
        }
        for edge in self.edges.values() {
            hasher.update(b"E");
            hasher.update(&edge.id.0.to_le_bytes());
            hasher.update(&edge.from.0.to_le_bytes());
            hash_str(&mut hasher, &edge.name);
            hash_kind(&mut hasher, &edge.kind);
            hasher.update(&[edge.multiplicity as u8]);
        }
        for (name, node) in &self.roots {
            hasher.update(b"R");
            hash_str(&mut hasher, name);
            hasher.update(&node.0.to_le_bytes());
        }
        hasher.finalize()
    }

    // ---- internals ----

    fn check_edge(
        &self,
        from: NodeId,
        name: &str,
        kind: &ValueKind,
        replacing: Option<EdgeId>,
    ) -> Result<(), SchemaError> {
        if !self.nodes.contains_key(&from) {
            return Err(SchemaError::NodeNotFound(from));
        }
        validation::validate_attribute_name(name)?;
        kind.validate()?;
        if let Some(target) = kind.target() {
            if !self.nodes.contains_key(&target) {
                return Err(SchemaError::NodeNotFound(target));
            }
        }
        for existing in self.edges_named(from, name) {
            if Some(existing.id) == replacing {
                continue;
            }
            if existing.kind.category() != kind.category() {
                return Err(SchemaError::Conflict {
                    node: from,
                    attribute: name.to_string(),
                    existing: existing.kind.category().to_string(),
                    requested: kind.category().to_string(),
                });
            }
            if existing.kind == *kind {
                return Err(SchemaError::DuplicateEdge {
                    node: from,
                    attribute: name.to_string(),
                    existing: existing.id,
                });
            }
        }
        Ok(())
    }

    /// Inserts an already-validated edge, keeping `outgoing` sorted by id.
    pub(crate) fn insert_edge(&mut self, edge: SchemaEdge) {
        let out = self.outgoing.entry(edge.from).or_default();
        let pos = out.partition_point(|e| *e < edge.id);
        out.insert(pos, edge.id);
        if let Some(target) = edge.kind.target() {
            self.incoming.entry(target).or_default().push(edge.id);
        }
        self.next_edge = self.next_edge.max(edge.id.0.saturating_add(1));
        self.edges.insert(edge.id, edge);
    }

    /// Inserts an already-validated node.
    pub(crate) fn insert_node(&mut self, node: SchemaNode) {
        self.next_node = self.next_node.max(node.id.0.saturating_add(1));
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn set_counters(&mut self, next_node: u32, next_edge: u32) {
        self.next_node = self.next_node.max(next_node);
        self.next_edge = self.next_edge.max(next_edge);
    }

    pub(crate) const fn counters(&self) -> (u32, u32) {
        (self.next_node, self.next_edge)
    }

    pub(crate) fn insert_root(&mut self, name: String, node: NodeId) {
        self.roots.insert(name, node);
    }

    fn remove_edge_indexes(&mut self, id: EdgeId) -> Result<SchemaEdge, SchemaError> {
        let edge = self.edges.remove(&id).ok_or(SchemaError::EdgeNotFound(id))?;
        if let Some(out) = self.outgoing.get_mut(&edge.from) {
            out.retain(|e| *e != id);
        }
        if let Some(target) = edge.kind.target() {
            if let Some(inc) = self.incoming.get_mut(&target) {
                inc.retain(|e| *e != id);
            }
        }
        Ok(edge)
    }

    fn finish_node_removal(
        &mut self,
        id: NodeId,
        mut removed_edges: Vec<SchemaEdge>,
        repointed_edges: Vec<EdgeId>,
    ) -> Result<RemovedNode, SchemaError> {
        let outgoing: Vec<EdgeId> = self.outgoing.remove(&id).unwrap_or_default();
        for edge in outgoing {
            if self.edges.contains_key(&edge) {
                removed_edges.push(self.remove_edge_indexes(edge)?);
            }
        }
        self.incoming.remove(&id);

        let roots: Vec<String> = self
            .roots
            .iter()
            .filter(|(_, node)| **node == id)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &roots {
            self.roots.remove(name);
        }

        let node = self.nodes.remove(&id).ok_or(SchemaError::NodeNotFound(id))?;
        removed_edges.sort_by_key(|e| e.id);
        Ok(RemovedNode {
            node,
            removed_edges,
            repointed_edges,
            roots,
        })
    }
}

/// Hands out the next id from `counter`. `u32::MAX` is never issued, so the
/// counter always stays above every id in the graph.
fn allocate(counter: &mut u32, what: &str) -> Result<u32, SchemaError> {
    let id = *counter;
    *counter = id
        .checked_add(1)
        .ok_or_else(|| SchemaError::InvalidDocument {
            reason: format!("{what} ids exhausted"),
        })?;
    Ok(id)
}

fn hash_str(hasher: &mut blake3::Hasher, text: &str) {
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

fn hash_bound<T: Copy>(hasher: &mut blake3::Hasher, bound: Option<T>, bytes: impl Fn(T) -> [u8; 8]) {
    match bound {
        Some(value) => {
            hasher.update(&[1]);
            hasher.update(&bytes(value));
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_kind(hasher: &mut blake3::Hasher, kind: &ValueKind) {
    match kind {
        ValueKind::Identifier { target } => {
            hasher.update(b"I");
            hasher.update(&target.0.to_le_bytes());
        }
        ValueKind::Enumeration { values } => {
            hasher.update(b"V");
            hasher.update(&(values.len() as u64).to_le_bytes());
            for value in values {
                hash_str(hasher, value);
            }
        }
        ValueKind::Integer { min, max } => {
            hasher.update(b"i");
            hash_bound(hasher, *min, i64::to_le_bytes);
            hash_bound(hasher, *max, i64::to_le_bytes);
        }
        ValueKind::Float { min, max } => {
            hasher.update(b"f");
            hash_bound(hasher, *min, |v: f64| v.to_bits().to_le_bytes());
            hash_bound(hasher, *max, |v: f64| v.to_bits().to_le_bytes());
        }
        ValueKind::String => {
            hasher.update(b"S");
        }
    }
}
