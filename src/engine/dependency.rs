//! Rule dependency tracking.
//!
//! Each completed check records the schema elements it looked at. A schema
//! edit is reduced to the set of elements it changed, and the index maps that
//! set back to the rules that must be rechecked.

use std::collections::{BTreeSet, HashMap};

use crate::schema::{SchemaGraph, SchemaRef};

/// Reverse index from schema elements to the rules that depend on them.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    by_ref: HashMap<SchemaRef, BTreeSet<String>>,
    by_rule: HashMap<String, BTreeSet<SchemaRef>>,
}

impl DependencyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the dependency set of `rule`.
    pub fn record(&mut self, rule: &str, dependencies: &BTreeSet<SchemaRef>) {
        self.remove(rule);
        for dep in dependencies {
            self.by_ref.entry(dep.clone()).or_default().insert(rule.to_string());
        }
        self.by_rule.insert(rule.to_string(), dependencies.clone());
    }

    /// Forgets `rule`.
    pub fn remove(&mut self, rule: &str) {
        let Some(old) = self.by_rule.remove(rule) else {
            return;
        };
        for dep in old {
            if let Some(rules) = self.by_ref.get_mut(&dep) {
                rules.remove(rule);
                if rules.is_empty() {
                    self.by_ref.remove(&dep);
                }
            }
        }
    }

    /// Rules depending on any of `changed`.
    #[must_use]
    pub fn dependents<'a>(&self, changed: impl IntoIterator<Item = &'a SchemaRef>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for dep in changed {
            if let Some(rules) = self.by_ref.get(dep) {
                out.extend(rules.iter().cloned());
            }
        }
        out
    }

    /// The recorded dependency set of `rule`.
    #[must_use]
    pub fn dependencies_of(&self, rule: &str) -> Option<&BTreeSet<SchemaRef>> {
        self.by_rule.get(rule)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_rule.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_rule.is_empty()
    }
}

/// Schema elements that differ between `old` and `new`.
///
/// A changed edge reports itself and the node(s) it hangs off, since adding
/// or removing an attribute changes what lookups on that node return. Node
/// comments and edge comments are not part of any check and are ignored.
#[must_use]
pub fn schema_changes(old: &SchemaGraph, new: &SchemaGraph) -> BTreeSet<SchemaRef> {
    let mut changed = BTreeSet::new();

    let node_ids: BTreeSet<_> = old.nodes().chain(new.nodes()).map(|n| n.id).collect();
    for id in node_ids {
        let before = old.node(id).map(|n| n.name.as_str());
        let after = new.node(id).map(|n| n.name.as_str());
        if before != after {
            changed.insert(SchemaRef::Node(id));
        }
    }

    let edge_ids: BTreeSet<_> = old.edges().chain(new.edges()).map(|e| e.id).collect();
    for id in edge_ids {
        let before = old.edge(id);
        let after = new.edge(id);
        let same = match (before, after) {
            (Some(a), Some(b)) => {
                a.from == b.from && a.name == b.name && a.kind == b.kind && a.multiplicity == b.multiplicity
            }
            (None, None) => true,
            _ => false,
        };
        if same {
            continue;
        }
        changed.insert(SchemaRef::Edge(id));
        for edge in before.into_iter().chain(after) {
            changed.insert(SchemaRef::Node(edge.from));
        }
    }

    let root_names: BTreeSet<&str> = old.roots().chain(new.roots()).map(|(name, _)| name).collect();
    for name in root_names {
        if old.root(name) != new.root(name) {
            changed.insert(SchemaRef::Root(name.to_string()));
        }
    }

    changed
}
