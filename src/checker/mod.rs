//! Semantic consistency checker.
//!
//! Checks parsed productions against a [`SchemaGraph`]: every attribute a
//! rule reads or writes must exist on the schema node its subject is bound
//! to, and statically known values must fit the attribute's value kind.
//! A check is a pure function of (rule text, schema, config) and never
//! fails; every problem becomes a [`Diagnostic`].

mod diagnostic;
mod quickfix;
mod walk;

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::binding::resolve;
use crate::config::CheckerConfig;
use crate::parser::{parse_file, Condition, ConditionBody, Production};
use crate::schema::{EdgeId, SchemaGraph, SchemaRef};

pub use diagnostic::{Diagnostic, DiagnosticKind, Severity};
pub use quickfix::{AppliedFix, QuickFix};

use walk::Walk;

/// Schema edges a rule's conditions test and its actions create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeUsage {
    pub tested: BTreeSet<EdgeId>,
    pub created: BTreeSet<EdgeId>,
}

impl EdgeUsage {
    /// Adds every edge of `other`.
    pub fn extend(&mut self, other: Self) {
        self.tested.extend(other.tested);
        self.created.extend(other.created);
    }
}

/// Result of checking one rule's source text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleCheck {
    /// Sorted in source order.
    pub diagnostics: Vec<Diagnostic>,
    /// Schema elements the check looked at.
    pub dependencies: BTreeSet<SchemaRef>,
    /// Schema edges matched by attribute tests and makes.
    pub usage: EdgeUsage,
    /// At least one production failed to parse.
    pub parse_failed: bool,
    /// Names of the productions that parsed.
    pub productions: Vec<String>,
}

impl RuleCheck {
    /// Returns true if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics of one kind.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

/// Checks rules against one schema snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Checker<'a> {
    schema: &'a SchemaGraph,
    config: &'a CheckerConfig,
}

impl<'a> Checker<'a> {
    #[must_use]
    pub const fn new(schema: &'a SchemaGraph, config: &'a CheckerConfig) -> Self {
        Self { schema, config }
    }

    /// Parses and checks every production in `source`.
    #[must_use]
    pub fn check_source(&self, rule: &str, source: &str) -> RuleCheck {
        let parsed = parse_file(source);
        let mut check = RuleCheck {
            parse_failed: !parsed.errors.is_empty(),
            ..RuleCheck::default()
        };
        for err in &parsed.errors {
            check.diagnostics.push(Diagnostic::syntax(rule, err));
        }
        for production in &parsed.productions {
            let one = self.check_production(rule, production);
            check.diagnostics.extend(one.diagnostics);
            check.dependencies.extend(one.dependencies);
            check.usage.extend(one.usage);
            check.productions.push(production.name.clone());
        }
        check.diagnostics.sort_by(Diagnostic::source_order);
        debug!(
            rule,
            productions = check.productions.len(),
            diagnostics = check.diagnostics.len(),
            dependencies = check.dependencies.len(),
            parse_failed = check.parse_failed,
            "rule checked"
        );
        check
    }

    /// Checks one parsed production.
    #[must_use]
    pub fn check_production(&self, rule: &str, production: &Production) -> RuleCheck {
        let mut check = RuleCheck {
            productions: vec![production.name.clone()],
            ..RuleCheck::default()
        };
        match resolve(production) {
            Ok(graph) => {
                let result = Walk::new(self.schema, self.config, &graph, rule, &production.name).run();
                check.diagnostics = result.diagnostics;
                check.dependencies = result.dependencies;
                check.usage = result.usage;
            }
            Err(err) => {
                // Anchor roots still count so adding a missing root rechecks.
                check.dependencies = self.anchor_roots(production);
                check
                    .diagnostics
                    .push(Diagnostic::binding(rule, &production.name, &err));
            }
        }
        check
    }

    fn anchor_roots(&self, production: &Production) -> BTreeSet<SchemaRef> {
        fn visit(conditions: &[Condition], out: &mut Vec<String>) {
            for c in conditions {
                match &c.body {
                    ConditionBody::Pattern(p) => {
                        if let Some(anchor) = &p.anchor {
                            out.push(anchor.keyword.clone());
                        }
                    }
                    ConditionBody::Conjunction(inner) => visit(inner, out),
                }
            }
        }
        let mut keywords = Vec::new();
        visit(&production.conditions, &mut keywords);
        keywords
            .iter()
            .filter_map(|k| self.config.root_for(k))
            .map(|root| SchemaRef::Root(root.to_string()))
            .collect()
    }
}
