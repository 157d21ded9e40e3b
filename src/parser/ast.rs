//! Abstract syntax tree for Soar productions.
//!
//! The tree keeps the surface structure the checker needs (condition
//! nesting, negation, attribute paths, value tests, preferences) and drops
//! everything else. Every node carries the [`Span`] it was parsed from so
//! diagnostics can point back into the editor.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::span::Span;

/// Shape of a constant as written in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralKind {
    /// Bare symbolic constant (`red`, `input-link`).
    Symbol,
    /// Integer constant.
    Integer,
    /// Floating point constant.
    Float,
    /// `|quoted|` string constant.
    Quoted,
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?[0-9]+$").expect("valid integer regex"))
}

fn float_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?([0-9]+\.[0-9]*|\.[0-9]+|[0-9]+)([eE][+-]?[0-9]+)?$")
            .expect("valid float regex")
    })
}

impl LiteralKind {
    /// Classifies unquoted constant text.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        if integer_re().is_match(text) {
            Self::Integer
        } else if float_re().is_match(text) {
            Self::Float
        } else {
            Self::Symbol
        }
    }

    /// Returns true for integer and float constants.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// Relational operators in condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// `=` or no operator.
    Equal,
    /// `<>`
    NotEqual,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessOrEqual,
    /// `>=`
    GreaterOrEqual,
    /// `<=>`
    SameType,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::SameType => "<=>",
        })
    }
}

/// A `<name>` variable occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Name including the angle brackets.
    pub name: String,
    /// Where this occurrence appears.
    pub span: Span,
}

/// A constant occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    /// Text without quoting.
    pub text: String,
    /// How it was written.
    pub kind: LiteralKind,
    /// Where this occurrence appears.
    pub span: Span,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LiteralKind::Quoted => write!(f, "|{}|", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

/// Operand of a relational test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingleTest {
    Variable(Variable),
    Constant(Constant),
}

/// One non-conjunctive test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleTest {
    /// `<< a b c >>`
    Disjunction {
        values: Vec<Constant>,
        span: Span,
    },
    /// Optional relation followed by a variable or constant.
    Relational {
        relation: Relation,
        operand: SingleTest,
        span: Span,
    },
}

impl SimpleTest {
    /// Source position.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::Disjunction { span, .. } | Self::Relational { span, .. } => *span,
        }
    }

    /// The variable this test binds, i.e. an equality test on a variable.
    #[must_use]
    pub fn binding_variable(&self) -> Option<&Variable> {
        match self {
            Self::Relational {
                relation: Relation::Equal,
                operand: SingleTest::Variable(v),
                ..
            } => Some(v),
            _ => None,
        }
    }

    /// Constants whose value is statically known: equality constants and
    /// disjunction members.
    pub fn known_constants(&self) -> Vec<&Constant> {
        match self {
            Self::Disjunction { values, .. } => values.iter().collect(),
            Self::Relational {
                relation: Relation::Equal,
                operand: SingleTest::Constant(c),
                ..
            } => vec![c],
            Self::Relational { .. } => Vec::new(),
        }
    }

    /// Variables referenced but not bound by this test (`<> <x>`, `> <y>`).
    #[must_use]
    pub fn referenced_variable(&self) -> Option<&Variable> {
        match self {
            Self::Relational {
                relation,
                operand: SingleTest::Variable(v),
                ..
            } if *relation != Relation::Equal => Some(v),
            _ => None,
        }
    }
}

/// A test in an identifier, attribute, or value slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Test {
    Simple(SimpleTest),
    /// `{ t1 t2 ... }`
    Conjunctive {
        tests: Vec<SimpleTest>,
        span: Span,
    },
}

impl Test {
    /// Source position.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::Simple(t) => t.span(),
            Self::Conjunctive { span, .. } => *span,
        }
    }

    /// The component simple tests.
    #[must_use]
    pub fn parts(&self) -> &[SimpleTest] {
        match self {
            Self::Simple(t) => std::slice::from_ref(t),
            Self::Conjunctive { tests, .. } => tests,
        }
    }

    /// First variable bound by an equality test.
    #[must_use]
    pub fn binding_variable(&self) -> Option<&Variable> {
        self.parts().iter().find_map(SimpleTest::binding_variable)
    }

    /// Statically known constants across all parts.
    pub fn known_constants(&self) -> Vec<&Constant> {
        self.parts().iter().flat_map(SimpleTest::known_constants).collect()
    }
}

/// Keyword that anchors a condition to a schema root: `(state <s> ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub keyword: String,
    pub span: Span,
}

/// `^attr.path value*` inside a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrValueTest {
    /// Written as `-^attr`.
    pub negated: bool,
    /// One test per dotted path segment; never empty.
    pub path: Vec<Test>,
    /// Value tests; empty means "any value".
    pub values: Vec<ValueTest>,
    pub span: Span,
}

/// A value slot test with its optional acceptable-preference marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTest {
    pub test: Test,
    /// Trailing `+`.
    pub acceptable: bool,
}

/// `([state] <id> ^attr value ...)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub anchor: Option<Anchor>,
    pub id: Variable,
    /// Non-binding parts of the identifier test (`{<s> <> <t>}`).
    pub id_constraints: Vec<SimpleTest>,
    pub tests: Vec<AttrValueTest>,
    pub span: Span,
}

/// One condition: a pattern or a brace-delimited conjunction, either of
/// which may be negated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub negated: bool,
    pub body: ConditionBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionBody {
    Pattern(Pattern),
    Conjunction(Vec<Condition>),
}

/// Right-hand-side value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RhsValue {
    Variable(Variable),
    Constant(Constant),
    /// Opaque for schema purposes.
    Call(FunctionCall),
}

impl RhsValue {
    /// Source position.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::Variable(v) => v.span,
            Self::Constant(c) => c.span,
            Self::Call(call) => call.span,
        }
    }
}

/// `(name args...)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<RhsValue>,
    pub span: Span,
}

/// Preference markers that may follow an action value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    /// `+`
    Acceptable,
    /// `-`
    Reject,
    /// `!`
    Require,
    /// `~`
    Prohibit,
    /// `=`
    Indifferent,
    /// `>`
    Better,
    /// `<`
    Worse,
    /// `@`
    Reconsider,
    /// `&`
    Parallel,
}

impl PreferenceKind {
    /// Preferences that may take a second (referent) value.
    #[must_use]
    pub const fn is_binary_capable(&self) -> bool {
        matches!(self, Self::Indifferent | Self::Better | Self::Worse | Self::Parallel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub kind: PreferenceKind,
    pub referent: Option<RhsValue>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMake {
    pub value: RhsValue,
    pub preferences: Vec<Preference>,
}

impl ValueMake {
    /// Returns true if this value is being removed (`-` preference).
    #[must_use]
    pub fn is_reject(&self) -> bool {
        self.preferences.iter().any(|p| p.kind == PreferenceKind::Reject)
    }
}

/// `^attr.path value prefs ...` inside an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrValueMake {
    pub path: Vec<RhsValue>,
    pub values: Vec<ValueMake>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// `(<id> ^attr value ...)`
    Make {
        id: Variable,
        makes: Vec<AttrValueMake>,
        span: Span,
    },
    /// Top-level function call such as `(write ...)`.
    Call(FunctionCall),
}

/// A parsed `sp { ... }` production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    pub name: String,
    pub name_span: Span,
    pub doc: Option<String>,
    pub flags: Vec<String>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    /// From `sp` through the closing brace.
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_literals() {
        assert_eq!(LiteralKind::classify("42"), LiteralKind::Integer);
        assert_eq!(LiteralKind::classify("-7"), LiteralKind::Integer);
        assert_eq!(LiteralKind::classify("3.25"), LiteralKind::Float);
        assert_eq!(LiteralKind::classify("1e5"), LiteralKind::Float);
        assert_eq!(LiteralKind::classify("red"), LiteralKind::Symbol);
        assert_eq!(LiteralKind::classify("2nd"), LiteralKind::Symbol);
        assert!(LiteralKind::Float.is_numeric());
        assert!(!LiteralKind::Quoted.is_numeric());
    }

    #[test]
    fn test_known_constants_ignore_inequalities() {
        let c = Constant {
            text: "3".to_string(),
            kind: LiteralKind::Integer,
            span: Span::default(),
        };
        let eq = SimpleTest::Relational {
            relation: Relation::Equal,
            operand: SingleTest::Constant(c.clone()),
            span: Span::default(),
        };
        let gt = SimpleTest::Relational {
            relation: Relation::Greater,
            operand: SingleTest::Constant(c),
            span: Span::default(),
        };
        assert_eq!(eq.known_constants().len(), 1);
        assert!(gt.known_constants().is_empty());
    }

    #[test]
    fn test_constant_display_requotes() {
        let c = Constant {
            text: "hello world".to_string(),
            kind: LiteralKind::Quoted,
            span: Span::default(),
        };
        assert_eq!(c.to_string(), "|hello world|");
    }
}
