//! Lock-step walk of a binding graph against the schema graph.
//!
//! Phase one assigns every position a set of candidate schema nodes by
//! propagating from anchored positions until nothing changes. Candidate sets
//! only ever shrink, and schema lookups are memoized per (schema node,
//! binding edge), so the walk terminates on cyclic schemas. Phase two reads
//! the final states and emits diagnostics in binding-edge order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::trace;

use crate::binding::{ActionKind, BindingEdge, BindingGraph, PositionId, PositionRole, Side};
use crate::checker::{Diagnostic, DiagnosticKind, EdgeUsage, QuickFix, Severity};
use crate::config::CheckerConfig;
use crate::parser::{Constant, LiteralKind};
use crate::schema::validation::is_valid_attribute_name;
use crate::schema::{Acceptance, EdgeId, Multiplicity, NodeId, SchemaEdge, SchemaGraph, SchemaRef, ValueKind};
use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PositionState {
    Unreached,
    /// Schema nodes this identifier may be, in discovery order.
    Candidates(Vec<NodeId>),
    /// Bound to a scalar attribute value.
    Scalar,
    /// Narrowing found no consistent binding; already reported.
    Poisoned,
    /// Function call result.
    Opaque,
}

/// Diagnostics and dependency set of one production.
#[derive(Debug, Clone, Default)]
pub(crate) struct WalkResult {
    pub diagnostics: Vec<Diagnostic>,
    pub dependencies: BTreeSet<SchemaRef>,
    pub usage: EdgeUsage,
}

pub(crate) struct Walk<'a> {
    schema: &'a SchemaGraph,
    config: &'a CheckerConfig,
    graph: &'a BindingGraph,
    rule: &'a str,
    production: &'a str,
    states: Vec<PositionState>,
    /// First candidate set each position received, before any narrowing.
    initial: Vec<Option<Vec<NodeId>>>,
    /// Binding edge that first reached each position.
    via: Vec<Option<usize>>,
    /// Root name each anchored position resolved to.
    roots: Vec<Option<String>>,
    memo: HashMap<(NodeId, usize), Vec<EdgeId>>,
    /// Type mismatches discovered while narrowing, by binding edge.
    conflicts: BTreeMap<usize, String>,
    dependencies: BTreeSet<SchemaRef>,
    usage: EdgeUsage,
    /// (span, attribute) pairs already reported. Multi-value tests yield
    /// one binding edge per value but one diagnostic.
    reported: BTreeSet<(Span, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(
        schema: &'a SchemaGraph,
        config: &'a CheckerConfig,
        graph: &'a BindingGraph,
        rule: &'a str,
        production: &'a str,
    ) -> Self {
        let n = graph.positions.len();
        Self {
            schema,
            config,
            graph,
            rule,
            production,
            states: vec![PositionState::Unreached; n],
            initial: vec![None; n],
            via: vec![None; n],
            roots: vec![None; n],
            memo: HashMap::new(),
            conflicts: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            usage: EdgeUsage::default(),
            reported: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> WalkResult {
        self.seed_anchors();

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for index in 0..self.graph.edges.len() {
                changed |= self.propagate(index);
            }
            if !changed {
                break;
            }
        }
        trace!(production = self.production, rounds, lookups = self.memo.len(), "binding walk settled");

        for index in 0..self.graph.edges.len() {
            self.report_edge(index);
        }
        if self.config.report_unanchored {
            self.report_unanchored();
        }

        self.diagnostics.sort_by(Diagnostic::source_order);
        WalkResult {
            diagnostics: self.diagnostics,
            dependencies: self.dependencies,
            usage: self.usage,
        }
    }

    // ---- phase one ----

    fn seed_anchors(&mut self) {
        let graph = self.graph;
        let config = self.config;
        for anchor in &graph.anchors {
            let Some(root) = config.root_for(&anchor.keyword) else {
                let advisory = self.advisory(
                    anchor.span,
                    format!("no schema root is configured for anchor '{}'", anchor.keyword),
                );
                self.diagnostics.push(advisory);
                continue;
            };
            self.dependencies.insert(SchemaRef::Root(root.to_string()));
            let Some(node) = self.schema.root(root) else {
                if config.report_unanchored {
                    let advisory = self.advisory(
                        anchor.span,
                        format!("anchor '{}' refers to schema root '{root}', which does not exist", anchor.keyword),
                    );
                    self.diagnostics.push(advisory);
                }
                continue;
            };

            let p = anchor.position.index();
            self.roots[p].get_or_insert_with(|| root.to_string());
            let consistent = match &self.states[p] {
                PositionState::Unreached => true,
                PositionState::Candidates(nodes) => nodes.contains(&node),
                _ => continue,
            };
            if consistent {
                self.states[p] = PositionState::Candidates(vec![node]);
                self.initial[p].get_or_insert_with(|| vec![node]);
                continue;
            }
            self.states[p] = PositionState::Poisoned;
            let mismatch = Diagnostic::new(
                self.rule,
                Severity::Error,
                DiagnosticKind::TypeMismatch,
                anchor.span,
                format!(
                    "{} is anchored to roots that are different schema nodes",
                    graph.position(anchor.position).label()
                ),
            )
            .with_production(self.production);
            self.diagnostics.push(mismatch);
        }
    }

    /// Schema edges of `node` matching binding edge `index`.
    fn lookup(&mut self, node: NodeId, index: usize) -> &[EdgeId] {
        let schema = self.schema;
        let graph = self.graph;
        let edge = &graph.edges[index];
        let dependencies = &mut self.dependencies;
        self.memo.entry((node, index)).or_insert_with(|| {
            dependencies.insert(SchemaRef::Node(node));
            let matched: Vec<EdgeId> = schema
                .edges_from(node)
                .filter(|e| edge.attribute.matches(&e.name))
                .map(|e| e.id)
                .collect();
            dependencies.extend(matched.iter().map(|e| SchemaRef::Edge(*e)));
            matched
        })
    }

    fn propagate(&mut self, index: usize) -> bool {
        let graph = self.graph;
        let edge = &graph.edges[index];
        let PositionState::Candidates(subjects) = &self.states[edge.subject.index()] else {
            return false;
        };
        let subjects = subjects.clone();

        let mut matched_subjects = Vec::new();
        let mut targets: Vec<NodeId> = Vec::new();
        let mut scalar = false;
        for node in &subjects {
            let matched = self.lookup(*node, index).to_vec();
            if !matched.is_empty() {
                matched_subjects.push(*node);
            }
            for id in matched {
                match self.schema.edge(id).and_then(|e| e.kind.target()) {
                    Some(t) if !targets.contains(&t) => targets.push(t),
                    Some(_) => {}
                    None => scalar = true,
                }
            }
        }

        let narrows = edge.asserting && !edge.is_action();
        let mut changed = false;

        if narrows
            && !edge.attribute.is_wildcard()
            && !matched_subjects.is_empty()
            && matched_subjects.len() < subjects.len()
        {
            trace!(
                position = self.graph.position(edge.subject).label(),
                attribute = %edge.attribute,
                before = subjects.len(),
                after = matched_subjects.len(),
                "narrowed subject"
            );
            self.states[edge.subject.index()] = PositionState::Candidates(matched_subjects);
            changed = true;
        }

        let proposed = if edge.opaque {
            Some(PositionState::Opaque)
        } else if !targets.is_empty() {
            Some(PositionState::Candidates(targets))
        } else if scalar {
            Some(PositionState::Scalar)
        } else {
            None
        };
        if let Some(proposed) = proposed {
            changed |= self.update_target(index, edge.target, proposed, narrows);
        }
        changed
    }

    fn update_target(&mut self, index: usize, target: PositionId, proposed: PositionState, narrows: bool) -> bool {
        let t = target.index();
        let next = match (&self.states[t], &proposed) {
            (PositionState::Unreached, _) => {
                self.via[t] = Some(index);
                if let PositionState::Candidates(nodes) = &proposed {
                    self.initial[t] = Some(nodes.clone());
                }
                proposed
            }
            _ if !narrows => return false,
            (PositionState::Candidates(current), PositionState::Candidates(new)) => {
                let kept: Vec<NodeId> = current.iter().copied().filter(|n| new.contains(n)).collect();
                if kept.len() == current.len() {
                    return false;
                }
                if kept.is_empty() {
                    let message = format!(
                        "{} cannot be both {} and {}",
                        self.graph.position(target).label(),
                        self.describe_nodes(current),
                        self.describe_nodes(new)
                    );
                    self.conflicts.entry(index).or_insert(message);
                    PositionState::Poisoned
                } else {
                    trace!(position = self.graph.position(target).label(), kept = kept.len(), "narrowed value");
                    PositionState::Candidates(kept)
                }
            }
            (PositionState::Candidates(_), PositionState::Scalar) | (PositionState::Scalar, PositionState::Candidates(_)) => {
                let message = format!(
                    "{} is used both as an identifier and as a scalar value",
                    self.graph.position(target).label()
                );
                self.conflicts.entry(index).or_insert(message);
                PositionState::Poisoned
            }
            _ => return false,
        };
        self.states[t] = next;
        true
    }

    // ---- phase two ----

    fn severity(&self, edge: &BindingEdge) -> Severity {
        if edge.asserting {
            Severity::Error
        } else {
            self.config.negated_severity
        }
    }

    fn report_edge(&mut self, index: usize) {
        let graph = self.graph;
        let edge = &graph.edges[index];
        let severity = self.severity(edge);

        if let Some(message) = self.conflicts.get(&index).cloned() {
            let path = self.path_to(edge.target);
            self.push(severity, DiagnosticKind::TypeMismatch, edge.span, message, Some(path), None);
        }

        match self.states[edge.subject.index()].clone() {
            PositionState::Scalar => {
                if !self.reported.insert((edge.span, edge.attribute.to_string())) {
                    return;
                }
                let subject = graph.position(edge.subject).label();
                let path = self.path_to(edge.subject);
                self.push(
                    severity,
                    DiagnosticKind::TypeMismatch,
                    edge.span,
                    format!("{subject} holds a scalar value and cannot have attribute '{}'", edge.attribute),
                    Some(path),
                    None,
                );
            }
            PositionState::Candidates(subjects) => self.report_candidates(index, &subjects, severity),
            PositionState::Unreached | PositionState::Poisoned | PositionState::Opaque => {}
        }
    }

    fn report_candidates(&mut self, index: usize, subjects: &[NodeId], severity: Severity) {
        let graph = self.graph;
        let edge = &graph.edges[index];
        if edge.attribute.is_wildcard() {
            return;
        }

        let mut alternatives: Vec<EdgeId> = Vec::new();
        for node in subjects {
            for id in self.lookup(*node, index).to_vec() {
                if !alternatives.contains(&id) {
                    alternatives.push(id);
                }
            }
        }

        self.record_usage(edge, &alternatives);

        for name in edge.attribute.names() {
            let defined = alternatives
                .iter()
                .filter_map(|id| self.schema.edge(*id))
                .any(|e| &e.name == name);
            if defined || !self.reported.insert((edge.span, name.clone())) {
                continue;
            }
            let path = format!("{}.{name}", self.path_to(edge.subject));

            // Defined on an alternative that narrowing already ruled out.
            let dropped = self.dropped_alternatives(edge, index, subjects, name);
            if !dropped.is_empty() {
                let message = format!(
                    "{} was narrowed to {}, but attribute '{name}' is only defined on {}",
                    graph.position(edge.subject).label(),
                    self.describe_nodes(subjects),
                    self.describe_nodes(&dropped)
                );
                self.push(severity, DiagnosticKind::TypeMismatch, edge.span, message, Some(path), None);
                continue;
            }

            let message = format!(
                "attribute '{name}' is not defined on {}",
                self.describe_nodes(subjects)
            );
            let fix = subjects.first().and_then(|node| self.suggest(edge, *node, name));
            self.push(severity, DiagnosticKind::UndefinedAttribute, edge.span, message, Some(path), fix);
        }

        if alternatives.is_empty() {
            return;
        }
        let alternatives: Vec<SchemaEdge> = alternatives
            .iter()
            .filter_map(|id| self.schema.edge(*id).cloned())
            .collect();
        for constant in &edge.constants {
            self.check_constant(edge, constant, &alternatives, severity);
        }
    }

    /// Candidates `edge`'s subject started with, and lost to narrowing,
    /// that define `name`.
    fn dropped_alternatives(&mut self, edge: &BindingEdge, index: usize, subjects: &[NodeId], name: &str) -> Vec<NodeId> {
        let Some(initial) = self.initial[edge.subject.index()].clone() else {
            return Vec::new();
        };
        let schema = self.schema;
        initial
            .into_iter()
            .filter(|node| !subjects.contains(node))
            .filter(|node| {
                self.lookup(*node, index)
                    .iter()
                    .filter_map(|id| schema.edge(*id))
                    .any(|e| e.name == name)
            })
            .collect()
    }

    /// Marks the schema edges a condition tests or an action creates.
    fn record_usage(&mut self, edge: &BindingEdge, alternatives: &[EdgeId]) {
        let into = match edge.side {
            Side::Condition => &mut self.usage.tested,
            Side::Action(ActionKind::Add | ActionKind::Modify) => &mut self.usage.created,
            Side::Action(ActionKind::Remove) => return,
        };
        into.extend(alternatives.iter().copied());
    }

    fn check_constant(&mut self, edge: &BindingEdge, constant: &Constant, alternatives: &[SchemaEdge], severity: Severity) {
        let results: Vec<Acceptance> = alternatives
            .iter()
            .map(|e| e.kind.accepts(&constant.text, constant.kind))
            .collect();
        if results.contains(&Acceptance::Accepted) {
            return;
        }

        let attribute = &alternatives[0].name;
        let path = format!("{}.{attribute}", self.path_to(edge.subject));
        let enumeration = alternatives
            .iter()
            .zip(&results)
            .find(|(_, r)| **r == Acceptance::NotInEnumeration)
            .map(|(e, _)| e);

        if let Some(enumeration) = enumeration {
            let allowed = match &enumeration.kind {
                ValueKind::Enumeration { values } => values.iter().cloned().collect::<Vec<_>>().join(", "),
                other => other.to_string(),
            };
            let message = format!(
                "value '{constant}' is not allowed for attribute '{attribute}' (expected one of: {allowed})"
            );
            let fix = QuickFix::ExtendEnumeration {
                edge: enumeration.id,
                value: constant.text.clone(),
            };
            self.push(severity, DiagnosticKind::ValueNotInEnumeration, constant.span, message, Some(path), Some(fix));
            return;
        }

        if let Some(ranged) = alternatives
            .iter()
            .zip(&results)
            .find(|(_, r)| **r == Acceptance::OutOfRange)
            .map(|(e, _)| e)
        {
            let message = format!(
                "value {constant} is out of range for attribute '{attribute}' ({})",
                ranged.kind
            );
            self.push(severity, DiagnosticKind::ValueOutOfRange, constant.span, message, Some(path), None);
            return;
        }

        let message = format!(
            "value '{constant}' does not fit attribute '{attribute}' ({})",
            alternatives[0].kind
        );
        self.push(severity, DiagnosticKind::TypeMismatch, constant.span, message, Some(path), None);
    }

    /// Schema edit that would define `attribute` on `node` for this edge.
    /// None when the schema cannot hold the name.
    fn suggest(&self, edge: &BindingEdge, node: NodeId, attribute: &str) -> Option<QuickFix> {
        if !is_valid_attribute_name(attribute) {
            return None;
        }
        let same_attribute: Vec<&BindingEdge> = self
            .graph
            .edges
            .iter()
            .filter(|e| e.subject == edge.subject && e.attribute.names().iter().any(|n| n == attribute))
            .collect();
        let multiplicity = if same_attribute.len() > 1 {
            Multiplicity::Multi
        } else {
            Multiplicity::Single
        };
        // Every value written in the same test or make.
        let constants: Vec<&Constant> = same_attribute
            .iter()
            .filter(|e| e.span == edge.span)
            .flat_map(|e| &e.constants)
            .collect();

        let kind = if edge.opaque {
            Some(ValueKind::String)
        } else {
            constants.first().map(|first| match ValueKind::infer_from_literal(&first.text, first.kind) {
                ValueKind::Enumeration { .. } => ValueKind::enumeration(
                    constants
                        .iter()
                        .filter(|c| matches!(c.kind, LiteralKind::Symbol | LiteralKind::Quoted))
                        .map(|c| c.text.clone()),
                ),
                other => other,
            })
        };
        Some(match kind {
            Some(kind) => QuickFix::AddEdge {
                node,
                attribute: attribute.to_string(),
                kind,
                multiplicity,
            },
            None => QuickFix::AddChild {
                node,
                attribute: attribute.to_string(),
            },
        })
    }

    fn report_unanchored(&mut self) {
        let mut connected = vec![false; self.graph.positions.len()];
        let mut queue: VecDeque<PositionId> = VecDeque::new();
        for anchor in &self.graph.anchors {
            if !connected[anchor.position.index()] {
                connected[anchor.position.index()] = true;
                queue.push_back(anchor.position);
            }
        }
        while let Some(p) = queue.pop_front() {
            for (_, edge) in self.graph.edges_from(p) {
                if !connected[edge.target.index()] {
                    connected[edge.target.index()] = true;
                    queue.push_back(edge.target);
                }
            }
        }

        let graph = self.graph;
        let mut reported = BTreeSet::new();
        for edge in &graph.edges {
            let p = edge.subject;
            if connected[p.index()] || !reported.insert(p) {
                continue;
            }
            let position = graph.position(p);
            let what = match position.role {
                PositionRole::Attribute => "attribute variable",
                PositionRole::Value => "variable",
            };
            let message = format!("{what} {} is not connected to any schema root", position.label());
            let advisory = self.advisory(position.span, message);
            self.diagnostics.push(advisory);
        }
    }

    // ---- helpers ----

    fn advisory(&self, span: Span, message: String) -> Diagnostic {
        Diagnostic::new(self.rule, Severity::Advisory, DiagnosticKind::UnanchoredPattern, span, message)
            .with_production(self.production)
    }

    fn push(
        &mut self,
        severity: Severity,
        kind: DiagnosticKind,
        span: Span,
        message: String,
        path: Option<String>,
        fix: Option<QuickFix>,
    ) {
        let mut d = Diagnostic::new(self.rule, severity, kind, span, message).with_production(self.production);
        if let Some(path) = path {
            d = d.with_path(path);
        }
        if let Some(fix) = fix {
            d = d.with_fix(fix);
        }
        self.diagnostics.push(d);
    }

    fn describe_nodes(&self, nodes: &[NodeId]) -> String {
        nodes
            .iter()
            .map(|n| self.schema.describe_node(*n))
            .collect::<Vec<_>>()
            .join(" or ")
    }

    /// Dotted attribute path from the anchor root to `position`.
    fn path_to(&self, position: PositionId) -> String {
        let mut segments = Vec::new();
        let mut current = position;
        for _ in 0..=self.graph.positions.len() {
            match self.via[current.index()] {
                Some(index) => {
                    let edge = &self.graph.edges[index];
                    segments.push(edge.attribute.to_string());
                    current = edge.subject;
                }
                None => break,
            }
        }
        let start = match &self.roots[current.index()] {
            Some(root) => root.clone(),
            None => self.graph.position(current).label().to_string(),
        };
        segments.push(start);
        segments.reverse();
        segments.join(".")
    }
}
