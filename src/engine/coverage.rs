//! Schema coverage across a rule set.
//!
//! Every check records the schema edges its conditions tested and its
//! actions created. Coverage walks the schema from its roots and lists the
//! edges no rule tests, no rule creates, or only one side touches.
//! Architecture-level attributes that the runtime maintains are exempt, and
//! the walk stays out of the link a list cannot apply to: input arrives
//! without rules creating it and output leaves without rules testing it.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::checker::EdgeUsage;
use crate::schema::{EdgeId, NodeId, SchemaGraph};

/// Attributes left out of every coverage list.
pub const COVERAGE_EXEMPT: [&str; 12] = [
    "attribute",
    "choices",
    "impasse",
    "input-link",
    "io",
    "item",
    "operator",
    "output-link",
    "quiescence",
    "superstate",
    "top-state",
    "type",
];

const INPUT_LINK: &str = "input-link";
const OUTPUT_LINK: &str = "output-link";

/// Schema edges the registered rules leave uncovered, each list in
/// breadth-first order from the roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    /// No condition tests the edge. Output-link contents are not visited.
    pub never_tested: Vec<EdgeId>,
    /// No action creates the edge. Input-link contents are not visited.
    pub never_created: Vec<EdgeId>,
    /// Tested somewhere but never created. Neither link is visited.
    pub tested_not_created: Vec<EdgeId>,
    /// Created somewhere but never tested. Neither link is visited.
    pub created_not_tested: Vec<EdgeId>,
}

impl Coverage {
    /// Computes coverage of `schema` given the merged usage of every rule.
    #[must_use]
    pub fn compute(schema: &SchemaGraph, usage: &EdgeUsage) -> Self {
        let tested = |id: &EdgeId| usage.tested.contains(id);
        let created = |id: &EdgeId| usage.created.contains(id);
        Self {
            never_tested: scan(schema, &[OUTPUT_LINK], |id| !tested(id)),
            never_created: scan(schema, &[INPUT_LINK], |id| !created(id)),
            tested_not_created: scan(schema, &[INPUT_LINK, OUTPUT_LINK], |id| tested(id) && !created(id)),
            created_not_tested: scan(schema, &[INPUT_LINK, OUTPUT_LINK], |id| created(id) && !tested(id)),
        }
    }

    /// Returns true if every list is empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.never_tested.is_empty()
            && self.never_created.is_empty()
            && self.tested_not_created.is_empty()
            && self.created_not_tested.is_empty()
    }
}

/// Breadth-first walk from every root, not following edges named in
/// `fenced`. Returns the non-exempt edges selected by `select`.
fn scan(schema: &SchemaGraph, fenced: &[&str], select: impl Fn(&EdgeId) -> bool) -> Vec<EdgeId> {
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for (_, root) in schema.roots() {
        if visited.insert(root) {
            queue.push_back(root);
        }
    }

    let mut out = Vec::new();
    while let Some(node) = queue.pop_front() {
        for edge in schema.edges_from(node) {
            if !COVERAGE_EXEMPT.contains(&edge.name.as_str()) && select(&edge.id) {
                out.push(edge.id);
            }
            if fenced.contains(&edge.name.as_str()) {
                continue;
            }
            if let Some(target) = edge.kind.target() {
                if visited.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Multiplicity, ValueKind};

    struct Fixture {
        schema: SchemaGraph,
        name: EdgeId,
        sensor: EdgeId,
        command: EdgeId,
        score: EdgeId,
    }

    fn fixture() -> Fixture {
        let mut schema = SchemaGraph::with_roots(["state"]).unwrap();
        let state = schema.root("state").unwrap();
        let (_, io) = schema.add_child(state, "io").unwrap();
        let (_, input) = schema.add_child(io, "input-link").unwrap();
        let (_, output) = schema.add_child(io, "output-link").unwrap();
        let name = schema
            .add_edge(state, "name", ValueKind::String, Multiplicity::Single)
            .unwrap();
        let sensor = schema
            .add_edge(input, "sensor", ValueKind::float(), Multiplicity::Single)
            .unwrap();
        let command = schema
            .add_edge(output, "command", ValueKind::String, Multiplicity::Single)
            .unwrap();
        let score = schema
            .add_edge(state, "score", ValueKind::integer(), Multiplicity::Single)
            .unwrap();
        Fixture {
            schema,
            name,
            sensor,
            command,
            score,
        }
    }

    #[test]
    fn test_nothing_used() {
        let f = fixture();
        let coverage = Coverage::compute(&f.schema, &EdgeUsage::default());
        // Output contents need no test, input contents need no creator.
        assert_eq!(coverage.never_tested, vec![f.name, f.score, f.sensor]);
        assert_eq!(coverage.never_created, vec![f.name, f.score, f.command]);
        assert!(coverage.tested_not_created.is_empty());
        assert!(coverage.created_not_tested.is_empty());
        assert!(!coverage.is_complete());
    }

    #[test]
    fn test_one_sided_use() {
        let f = fixture();
        let usage = EdgeUsage {
            tested: BTreeSet::from([f.name, f.sensor]),
            created: BTreeSet::from([f.score, f.command]),
        };
        let coverage = Coverage::compute(&f.schema, &usage);
        assert_eq!(coverage.never_tested, vec![f.score]);
        assert_eq!(coverage.never_created, vec![f.name]);
        assert_eq!(coverage.tested_not_created, vec![f.name]);
        assert_eq!(coverage.created_not_tested, vec![f.score]);
    }

    #[test]
    fn test_full_use_and_exemptions() {
        let f = fixture();
        let all: BTreeSet<EdgeId> = [f.name, f.score, f.sensor, f.command].into_iter().collect();
        let usage = EdgeUsage {
            tested: all.clone(),
            created: all,
        };
        // io, input-link and output-link themselves are never listed.
        assert!(Coverage::compute(&f.schema, &usage).is_complete());
    }

    #[test]
    fn test_unreachable_edges_ignored() {
        let mut f = fixture();
        let orphan = f.schema.add_node("orphan").unwrap();
        f.schema
            .add_edge(orphan, "loose", ValueKind::String, Multiplicity::Single)
            .unwrap();
        let coverage = Coverage::compute(&f.schema, &EdgeUsage::default());
        assert_eq!(coverage.never_tested.len(), 3);
    }
}
