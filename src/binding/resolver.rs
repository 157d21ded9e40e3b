//! Builds a [`BindingGraph`] from a parsed production.
//!
//! Conditions are processed in source order. A condition's subject must be
//! bound by an earlier condition unless the condition carries an anchor
//! keyword. Variables introduced inside a negation are local to it.
//! Actions are unordered among themselves: a variable first appearing as an
//! action value is a new identifier and may be used as the subject of any
//! other action.

use std::collections::{HashMap, HashSet};

use crate::binding::{
    ActionKind, AnchorBinding, AttributeLabel, BindingEdge, BindingGraph, PositionId, PositionRole, Side,
};
use crate::error::BindingError;
use crate::parser::{
    Action, AttrValueMake, AttrValueTest, Condition, ConditionBody, Constant, FunctionCall, Pattern,
    Production, RhsValue, Test, Variable,
};
use crate::span::Span;

/// Resolves the variable bindings of `production`.
///
/// Fails with [`BindingError::UnboundVariable`] when a subject, attribute
/// variable, relational operand, or action operand has no binding.
pub fn resolve(production: &Production) -> Result<BindingGraph, BindingError> {
    let mut resolver = Resolver::default();
    for condition in &production.conditions {
        resolver.condition(condition, false)?;
    }
    resolver.check_references()?;
    resolver.actions(&production.actions)?;
    Ok(resolver.graph)
}

#[derive(Default)]
struct Resolver {
    graph: BindingGraph,
    scope: HashMap<String, PositionId>,
    /// Every variable bound anywhere on the condition side.
    bound_anywhere: HashSet<String>,
    /// Operands of non-equality relational tests.
    references: Vec<Variable>,
}

fn unbound(variable: &Variable) -> BindingError {
    BindingError::UnboundVariable {
        variable: variable.name.clone(),
        span: variable.span,
    }
}

impl Resolver {
    // ---- conditions ----

    fn condition(&mut self, condition: &Condition, negated: bool) -> Result<(), BindingError> {
        let negated = negated || condition.negated;
        let saved = condition.negated.then(|| self.scope.clone());

        match &condition.body {
            ConditionBody::Pattern(pattern) => self.pattern(pattern, negated)?,
            ConditionBody::Conjunction(inner) => {
                for c in inner {
                    self.condition(c, negated)?;
                }
            }
        }

        if let Some(scope) = saved {
            self.scope = scope;
        }
        Ok(())
    }

    fn pattern(&mut self, pattern: &Pattern, negated: bool) -> Result<(), BindingError> {
        let subject = match self.scope.get(&pattern.id.name) {
            Some(position) => *position,
            None if pattern.anchor.is_some() => self.bind(&pattern.id, PositionRole::Value, negated),
            None => return Err(unbound(&pattern.id)),
        };
        if let Some(anchor) = &pattern.anchor {
            self.graph.anchors.push(AnchorBinding {
                position: subject,
                keyword: anchor.keyword.clone(),
                span: anchor.span,
            });
        }
        for constraint in &pattern.id_constraints {
            if let Some(v) = constraint.referenced_variable() {
                self.references.push(v.clone());
            }
        }
        for test in &pattern.tests {
            self.attr_value_test(subject, test, negated);
        }
        Ok(())
    }

    fn attr_value_test(&mut self, subject: PositionId, test: &AttrValueTest, negated: bool) {
        let negated = negated || test.negated;
        let Some((last, init)) = test.path.split_last() else {
            return;
        };

        let mut current = subject;
        for segment in init {
            let attribute = self.attribute_label(segment, negated);
            let target = self.anonymous(segment.span(), negated, false);
            self.push_condition(current, attribute, target, Vec::new(), negated, test.span);
            current = target;
        }

        let attribute = self.attribute_label(last, negated);
        if test.values.is_empty() {
            let target = self.anonymous(last.span(), negated, false);
            self.push_condition(current, attribute, target, Vec::new(), negated, test.span);
            return;
        }
        for value in &test.values {
            self.collect_references(&value.test);
            let target = self.value_position(&value.test, negated);
            let constants = value.test.known_constants().into_iter().cloned().collect();
            self.push_condition(current, attribute.clone(), target, constants, negated, test.span);
        }
    }

    fn attribute_label(&mut self, segment: &Test, negated: bool) -> AttributeLabel {
        self.collect_references(segment);
        let mut variable = None;
        for part in segment.parts() {
            if let Some(v) = part.binding_variable() {
                let position = match self.scope.get(&v.name) {
                    Some(p) => *p,
                    None => self.bind(v, PositionRole::Attribute, negated),
                };
                variable.get_or_insert(position);
            }
        }

        let mut names: Vec<String> = Vec::new();
        for c in segment.known_constants() {
            if !names.contains(&c.text) {
                names.push(c.text.clone());
            }
        }
        match names.len() {
            0 => AttributeLabel::Wildcard { variable },
            1 => AttributeLabel::Name {
                name: names.remove(0),
            },
            _ => AttributeLabel::Choice { names },
        }
    }

    /// Position for a value slot: the bound variable if there is one,
    /// otherwise a fresh anonymous position. Extra equality variables in a
    /// conjunctive test alias the same position.
    fn value_position(&mut self, test: &Test, negated: bool) -> PositionId {
        let mut position = None;
        for part in test.parts() {
            let Some(v) = part.binding_variable() else {
                continue;
            };
            match (position, self.scope.get(&v.name).copied()) {
                (None, Some(p)) => position = Some(p),
                (None, None) => position = Some(self.bind(v, PositionRole::Value, negated)),
                (Some(p), None) => {
                    self.scope.insert(v.name.clone(), p);
                    self.note_bound(&v.name);
                }
                (Some(_), Some(_)) => {}
            }
        }
        position.unwrap_or_else(|| self.anonymous(test.span(), negated, false))
    }

    fn collect_references(&mut self, test: &Test) {
        for part in test.parts() {
            if let Some(v) = part.referenced_variable() {
                self.references.push(v.clone());
            }
        }
    }

    fn check_references(&self) -> Result<(), BindingError> {
        match self.references.iter().find(|v| !self.bound_anywhere.contains(&v.name)) {
            Some(v) => Err(unbound(v)),
            None => Ok(()),
        }
    }

    fn push_condition(
        &mut self,
        subject: PositionId,
        attribute: AttributeLabel,
        target: PositionId,
        constants: Vec<Constant>,
        negated: bool,
        span: Span,
    ) {
        self.graph.edges.push(BindingEdge {
            subject,
            attribute,
            target,
            constants,
            opaque: false,
            asserting: !negated,
            side: Side::Condition,
            span,
        });
    }

    // ---- actions ----

    fn actions(&mut self, actions: &[Action]) -> Result<(), BindingError> {
        // Action values not bound on the condition side are new identifiers.
        for action in actions {
            let Action::Make { makes, .. } = action else {
                continue;
            };
            for make in makes {
                for value in &make.values {
                    if let RhsValue::Variable(v) = &value.value {
                        if !self.scope.contains_key(&v.name) {
                            let id = self.graph.push_position(
                                Some(v.name.clone()),
                                PositionRole::Value,
                                v.span,
                                false,
                                true,
                            );
                            self.scope.insert(v.name.clone(), id);
                        }
                    }
                }
            }
        }

        let first_action_edge = self.graph.edges.len();
        for action in actions {
            match action {
                Action::Make { id, makes, .. } => {
                    let subject = *self.scope.get(&id.name).ok_or_else(|| unbound(id))?;
                    for make in makes {
                        self.attr_value_make(subject, make)?;
                    }
                }
                Action::Call(call) => self.check_call(call)?,
            }
        }
        self.mark_modifies(first_action_edge);
        Ok(())
    }

    fn attr_value_make(&mut self, subject: PositionId, make: &AttrValueMake) -> Result<(), BindingError> {
        let Some((last, init)) = make.path.split_last() else {
            return Ok(());
        };

        let mut current = subject;
        for segment in init {
            let attribute = self.rhs_attribute(segment)?;
            let target = self.anonymous(segment.span(), false, true);
            self.push_action(current, attribute, target, Vec::new(), false, ActionKind::Add, make.span);
            current = target;
        }

        let attribute = self.rhs_attribute(last)?;
        for value in &make.values {
            let kind = if value.is_reject() {
                ActionKind::Remove
            } else {
                ActionKind::Add
            };
            let (target, constants, opaque) = match &value.value {
                RhsValue::Variable(v) => (*self.scope.get(&v.name).ok_or_else(|| unbound(v))?, Vec::new(), false),
                RhsValue::Constant(c) => (self.anonymous(c.span, false, true), vec![c.clone()], false),
                RhsValue::Call(call) => {
                    self.check_call(call)?;
                    (self.anonymous(call.span, false, true), Vec::new(), true)
                }
            };
            for preference in &value.preferences {
                if let Some(referent) = &preference.referent {
                    self.check_rhs_operand(referent)?;
                }
            }
            self.push_action(current, attribute.clone(), target, constants, opaque, kind, make.span);
        }
        Ok(())
    }

    fn rhs_attribute(&mut self, segment: &RhsValue) -> Result<AttributeLabel, BindingError> {
        Ok(match segment {
            RhsValue::Constant(c) => AttributeLabel::Name { name: c.text.clone() },
            RhsValue::Variable(v) => AttributeLabel::Wildcard {
                variable: Some(*self.scope.get(&v.name).ok_or_else(|| unbound(v))?),
            },
            RhsValue::Call(call) => {
                self.check_call(call)?;
                AttributeLabel::Wildcard { variable: None }
            }
        })
    }

    fn check_rhs_operand(&self, value: &RhsValue) -> Result<(), BindingError> {
        match value {
            RhsValue::Variable(v) if !self.scope.contains_key(&v.name) => Err(unbound(v)),
            RhsValue::Call(call) => self.check_call(call),
            _ => Ok(()),
        }
    }

    fn check_call(&self, call: &FunctionCall) -> Result<(), BindingError> {
        for arg in &call.args {
            self.check_rhs_operand(arg)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_action(
        &mut self,
        subject: PositionId,
        attribute: AttributeLabel,
        target: PositionId,
        constants: Vec<Constant>,
        opaque: bool,
        kind: ActionKind,
        span: Span,
    ) {
        self.graph.edges.push(BindingEdge {
            subject,
            attribute,
            target,
            constants,
            opaque,
            asserting: true,
            side: Side::Action(kind),
            span,
        });
    }

    /// Tags add/remove pairs on the same subject and attribute as modifies.
    fn mark_modifies(&mut self, from: usize) {
        let edges = &self.graph.edges[from..];
        let mut modified: Vec<(PositionId, AttributeLabel)> = Vec::new();
        for edge in edges {
            if edge.side != Side::Action(ActionKind::Remove) {
                continue;
            }
            let paired = edges.iter().any(|other| {
                other.side == Side::Action(ActionKind::Add)
                    && other.subject == edge.subject
                    && other.attribute == edge.attribute
            });
            if paired {
                modified.push((edge.subject, edge.attribute.clone()));
            }
        }
        for edge in &mut self.graph.edges[from..] {
            if modified
                .iter()
                .any(|(s, a)| *s == edge.subject && *a == edge.attribute)
            {
                edge.side = Side::Action(ActionKind::Modify);
            }
        }
    }

    // ---- positions ----

    fn bind(&mut self, variable: &Variable, role: PositionRole, negated: bool) -> PositionId {
        let id = self
            .graph
            .push_position(Some(variable.name.clone()), role, variable.span, negated, false);
        self.scope.insert(variable.name.clone(), id);
        self.note_bound(&variable.name);
        id
    }

    fn note_bound(&mut self, name: &str) {
        self.bound_anywhere.insert(name.to_string());
    }

    fn anonymous(&mut self, span: Span, negated: bool, created: bool) -> PositionId {
        self.graph
            .push_position(None, PositionRole::Value, span, negated, created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_production;

    fn graph(src: &str) -> BindingGraph {
        resolve(&parse_production(src).unwrap()).unwrap()
    }

    fn error(src: &str) -> BindingError {
        resolve(&parse_production(src).unwrap()).unwrap_err()
    }

    fn attr(edge: &BindingEdge) -> String {
        edge.attribute.to_string()
    }

    #[test]
    fn test_chain_links_positions() {
        let g = graph("sp {t (state <s> ^io <io>) (<io> ^input-link <il>) --> (<s> ^done yes)}");
        assert_eq!(g.anchors.len(), 1);
        assert_eq!(g.anchors[0].keyword, "state");
        let s = g.variable("<s>").unwrap().id;
        let io = g.variable("<io>").unwrap().id;
        let il = g.variable("<il>").unwrap().id;
        assert_eq!(g.edges[0].subject, s);
        assert_eq!(g.edges[0].target, io);
        assert_eq!(g.edges[1].subject, io);
        assert_eq!(g.edges[1].target, il);
        assert_eq!(attr(&g.edges[1]), "input-link");
        assert_eq!(g.edges[2].side, Side::Action(ActionKind::Add));
        assert_eq!(g.edges[2].constants[0].text, "yes");
    }

    #[test]
    fn test_unbound_subject_is_error() {
        let err = error("sp {t (<x> ^a b) --> (<x> ^c d)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<x>"));
    }

    #[test]
    fn test_dotted_path_creates_anonymous_positions() {
        let g = graph("sp {t (state <s> ^io.input-link.block <b>) --> (<b> ^seen yes)}");
        let names: Vec<String> = g.edges.iter().take(3).map(attr).collect();
        assert_eq!(names, vec!["io", "input-link", "block"]);
        assert!(g.position(g.edges[0].target).variable.is_none());
        assert_eq!(g.edges[1].subject, g.edges[0].target);
    }

    #[test]
    fn test_negation_marks_edges_and_scopes_variables() {
        let g = graph("sp {t (state <s> ^a <x>) -(<x> ^b <y>) --> (<s> ^c d)}");
        let b = g.edges.iter().find(|e| attr(e) == "b").unwrap();
        assert!(!b.asserting);
        assert!(g.position(b.target).negated);

        let err = error("sp {t (state <s> ^a <x>) -(<x> ^b <y>) (<y> ^c d) --> (<s> ^e f)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<y>"));
    }

    #[test]
    fn test_negated_conjunction_is_non_asserting() {
        let g = graph("sp {t (state <s> ^a <x>) -{(<x> ^b <y>) (<y> ^c d)} --> (<s> ^e f)}");
        let c = g.edges.iter().find(|e| attr(e) == "c").unwrap();
        assert!(!c.asserting);
        let a = g.edges.iter().find(|e| attr(e) == "a").unwrap();
        assert!(a.asserting);
    }

    #[test]
    fn test_negated_attribute_test() {
        let g = graph("sp {t (state <s> -^foo bar ^baz qux) --> (<s> ^x y)}");
        assert!(!g.edges[0].asserting);
        assert!(g.edges[1].asserting);
    }

    #[test]
    fn test_attribute_variable_and_disjunction() {
        let g = graph("sp {t (state <s> ^<attr> <v> ^<< a b >> c) --> (<s> ^x y)}");
        assert!(g.edges[0].attribute.is_wildcard());
        let attr_pos = g.variable("<attr>").unwrap();
        assert_eq!(attr_pos.role, PositionRole::Attribute);
        assert_eq!(g.edges[1].attribute.names(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_value_disjunction_constants() {
        let g = graph("sp {t (state <s> ^color << red blue >>) --> (<s> ^x y)}");
        let texts: Vec<&str> = g.edges[0].constants.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["red", "blue"]);
    }

    #[test]
    fn test_relational_reference_must_be_bound() {
        let err = error("sp {t (state <s> ^a > <limit>) --> (<s> ^x y)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<limit>"));

        let g = graph("sp {t (state <s> ^a <x> ^b > <x>) --> (<s> ^x y)}");
        assert_eq!(g.edges.len(), 3);
    }

    #[test]
    fn test_action_creates_identifiers_in_any_order() {
        let g = graph("sp {t (state <s> ^a b) --> (<o> ^name go) (<s> ^operator <o> +)}");
        let o = g.variable("<o>").unwrap();
        assert!(o.created);
        assert_eq!(g.edges.iter().filter(|e| e.is_action()).count(), 2);
    }

    #[test]
    fn test_action_subject_must_be_bound() {
        let err = error("sp {t (state <s> ^a b) --> (<q> ^name go)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<q>"));
    }

    #[test]
    fn test_negated_variable_unusable_in_actions() {
        let err = error("sp {t (state <s> ^a b) -(<s> ^c <z>) --> (<z> ^d e)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<z>"));
    }

    #[test]
    fn test_preference_referent_must_be_bound() {
        let err = error("sp {t (state <s> ^operator <o1>) --> (<s> ^operator <o1> > <o2>)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<o2>"));
    }

    #[test]
    fn test_remove_and_modify_tagging() {
        let g = graph("sp {t (state <s> ^count <c> ^flag <f>) --> (<s> ^count <c> - ^count 5 ^flag <f> -)}");
        let sides: Vec<Side> = g.edges.iter().filter(|e| e.is_action()).map(|e| e.side).collect();
        assert_eq!(
            sides,
            vec![
                Side::Action(ActionKind::Modify),
                Side::Action(ActionKind::Modify),
                Side::Action(ActionKind::Remove),
            ]
        );
    }

    #[test]
    fn test_function_call_values_are_opaque() {
        let g = graph("sp {t (state <s> ^count <c>) --> (<s> ^count (+ <c> 1)) (write <c>)}");
        let action = g.edges.iter().find(|e| e.is_action()).unwrap();
        assert!(action.opaque);

        let err = error("sp {t (state <s> ^count <c>) --> (write <missing>)}");
        assert!(matches!(err, BindingError::UnboundVariable { ref variable, .. } if variable == "<missing>"));
    }

    #[test]
    fn test_missing_value_is_fresh_position() {
        let g = graph("sp {t (state <s> ^superstate) --> (<s> ^x y)}");
        assert!(g.position(g.edges[0].target).variable.is_none());
    }
}
