//! Diagnostics produced by a rule check.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::checker::QuickFix;
use crate::error::{BindingError, SyntaxError};
use crate::span::Span;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Advisory,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Advisory => "advisory",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Syntax,
    UnboundVariable,
    UndefinedAttribute,
    ValueNotInEnumeration,
    ValueOutOfRange,
    TypeMismatch,
    UnanchoredPattern,
}

impl DiagnosticKind {
    /// Kinds that stop the rest of the rule from being checked.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Syntax | Self::UnboundVariable)
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syntax => "syntax",
            Self::UnboundVariable => "unbound-variable",
            Self::UndefinedAttribute => "undefined-attribute",
            Self::ValueNotInEnumeration => "value-not-in-enumeration",
            Self::ValueOutOfRange => "value-out-of-range",
            Self::TypeMismatch => "type-mismatch",
            Self::UnanchoredPattern => "unanchored-pattern",
        })
    }
}

/// One finding about one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Identity of the checked rule as registered with the engine.
    pub rule: String,
    /// Production the finding is in, when the text parsed far enough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<String>,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub span: Span,
    pub message: String,
    /// Attribute path from the anchor, e.g. `state.io.inputlink`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_fix: Option<QuickFix>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        rule: impl Into<String>,
        severity: Severity,
        kind: DiagnosticKind,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule: rule.into(),
            production: None,
            severity,
            kind,
            span,
            message: message.into(),
            path: None,
            quick_fix: None,
        }
    }

    #[must_use]
    pub fn with_production(mut self, production: impl Into<String>) -> Self {
        self.production = Some(production.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_fix(mut self, fix: QuickFix) -> Self {
        self.quick_fix = Some(fix);
        self
    }

    /// Diagnostic for a production that failed to parse.
    #[must_use]
    pub fn syntax(rule: &str, err: &SyntaxError) -> Self {
        Self::new(rule, Severity::Error, DiagnosticKind::Syntax, err.span, err.message.clone())
    }

    /// Diagnostic for a production whose bindings could not be resolved.
    #[must_use]
    pub fn binding(rule: &str, production: &str, err: &BindingError) -> Self {
        Self::new(rule, Severity::Error, DiagnosticKind::UnboundVariable, err.span(), err.to_string())
            .with_production(production)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Source order, then kind, then message.
    pub fn source_order(a: &Self, b: &Self) -> Ordering {
        a.span
            .start
            .cmp(&b.span.start)
            .then(a.span.end.cmp(&b.span.end))
            .then(a.kind.cmp(&b.kind))
            .then_with(|| a.message.cmp(&b.message))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {} [{}]", self.rule, self.span, self.severity, self.kind)?;
        if let Some(production) = &self.production {
            write!(f, " in {production}")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_position_and_kind() {
        let d = Diagnostic::new(
            "blocks.soar::move",
            Severity::Error,
            DiagnosticKind::UndefinedAttribute,
            Span::new(10, 19, 2, 4),
            "attribute 'inputlink' is not defined on io-node",
        )
        .with_production("move");
        let text = d.to_string();
        assert!(text.starts_with("blocks.soar::move:2:4: error [undefined-attribute] in move"));
        assert!(d.is_error());
    }

    #[test]
    fn test_source_order() {
        let a = Diagnostic::new("r", Severity::Error, DiagnosticKind::TypeMismatch, Span::new(5, 6, 1, 6), "b");
        let b = Diagnostic::new("r", Severity::Advisory, DiagnosticKind::UndefinedAttribute, Span::new(5, 6, 1, 6), "a");
        let c = Diagnostic::new("r", Severity::Error, DiagnosticKind::Syntax, Span::new(1, 2, 1, 2), "c");
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort_by(Diagnostic::source_order);
        assert_eq!(v, vec![c, b, a]);
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(DiagnosticKind::Syntax.is_fatal());
        assert!(DiagnosticKind::UnboundVariable.is_fatal());
        assert!(!DiagnosticKind::UndefinedAttribute.is_fatal());
    }

    #[test]
    fn test_serialized_shape() {
        let d = Diagnostic::new("r", Severity::Warning, DiagnosticKind::UnanchoredPattern, Span::default(), "m");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["kind"], "unanchored_pattern");
        assert!(json.get("quick_fix").is_none());
    }
}
