//! Value kinds carried by schema edges.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::parser::LiteralKind;
use crate::schema::NodeId;

/// What an attribute's value may be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    /// Reference to another object type.
    Identifier {
        /// Node describing the referenced object.
        target: NodeId,
    },
    /// Closed set of symbolic values.
    Enumeration {
        /// Allowed values, kept sorted.
        values: BTreeSet<String>,
    },
    /// Integer with optional inclusive bounds.
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Float with optional inclusive bounds.
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Any string.
    String,
}

/// Coarse grouping of [`ValueKind`]s.
///
/// Two edges with the same attribute name on one node must share a category;
/// within a category they are recorded as alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindCategory {
    Identifier,
    Enumeration,
    Integer,
    Float,
    String,
}

impl fmt::Display for KindCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identifier => "identifier",
            Self::Enumeration => "enumeration",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
        })
    }
}

/// Outcome of testing a literal against a value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    NotInEnumeration,
    OutOfRange,
    /// The literal cannot be a value of this kind at all.
    WrongType,
}

impl ValueKind {
    /// Enumeration from any iterable of strings.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enumeration {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Unbounded integer.
    #[must_use]
    pub const fn integer() -> Self {
        Self::Integer { min: None, max: None }
    }

    /// Unbounded float.
    #[must_use]
    pub const fn float() -> Self {
        Self::Float { min: None, max: None }
    }

    /// The category of this kind.
    #[must_use]
    pub const fn category(&self) -> KindCategory {
        match self {
            Self::Identifier { .. } => KindCategory::Identifier,
            Self::Enumeration { .. } => KindCategory::Enumeration,
            Self::Integer { .. } => KindCategory::Integer,
            Self::Float { .. } => KindCategory::Float,
            Self::String => KindCategory::String,
        }
    }

    /// Target node for identifier kinds.
    #[must_use]
    pub const fn target(&self) -> Option<NodeId> {
        match self {
            Self::Identifier { target } => Some(*target),
            _ => None,
        }
    }

    /// Checks that numeric bounds are ordered.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Integer {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(SchemaError::InvalidRange {
                min: min.to_string(),
                max: max.to_string(),
            }),
            Self::Float {
                min: Some(min),
                max: Some(max),
            } if min > max || min.is_nan() || max.is_nan() => Err(SchemaError::InvalidRange {
                min: min.to_string(),
                max: max.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Tests a literal written as `text` with shape `literal`.
    #[must_use]
    pub fn accepts(&self, text: &str, literal: LiteralKind) -> Acceptance {
        match self {
            Self::Identifier { .. } => Acceptance::WrongType,
            Self::String => Acceptance::Accepted,
            Self::Enumeration { values } => {
                if values.contains(text) {
                    Acceptance::Accepted
                } else {
                    Acceptance::NotInEnumeration
                }
            }
            Self::Integer { min, max } => {
                if literal != LiteralKind::Integer {
                    return Acceptance::WrongType;
                }
                let Ok(v) = text.parse::<i64>() else {
                    return Acceptance::OutOfRange;
                };
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    Acceptance::OutOfRange
                } else {
                    Acceptance::Accepted
                }
            }
            Self::Float { min, max } => {
                if !literal.is_numeric() {
                    return Acceptance::WrongType;
                }
                let Ok(v) = text.parse::<f64>() else {
                    return Acceptance::WrongType;
                };
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    Acceptance::OutOfRange
                } else {
                    Acceptance::Accepted
                }
            }
        }
    }

    /// The value kind a literal most naturally belongs to, used when
    /// proposing a new schema edge.
    #[must_use]
    pub fn infer_from_literal(text: &str, literal: LiteralKind) -> Self {
        match literal {
            LiteralKind::Integer => Self::integer(),
            LiteralKind::Float => Self::float(),
            LiteralKind::Symbol | LiteralKind::Quoted => Self::enumeration([text]),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier { target } => write!(f, "identifier -> {target}"),
            Self::Enumeration { values } => {
                f.write_str("enumeration [")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str(v)?;
                }
                f.write_str("]")
            }
            Self::Integer { min, max } => write_range(f, "integer", *min, *max),
            Self::Float { min, max } => write_range(f, "float", *min, *max),
            Self::String => f.write_str("string"),
        }
    }
}

fn write_range<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    min: Option<T>,
    max: Option<T>,
) -> fmt::Result {
    f.write_str(name)?;
    if min.is_none() && max.is_none() {
        return Ok(());
    }
    f.write_str(" [")?;
    match min {
        Some(m) => write!(f, "{m}")?,
        None => f.write_str("...")?,
    }
    f.write_str(", ")?;
    match max {
        Some(m) => write!(f, "{m}")?,
        None => f.write_str("...")?,
    }
    f.write_str("]")
}

/// Whether an attribute may hold several values at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Single,
    Multi,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_membership() {
        let kind = ValueKind::enumeration(["red", "green", "blue"]);
        assert_eq!(kind.accepts("red", LiteralKind::Symbol), Acceptance::Accepted);
        assert_eq!(kind.accepts("yellow", LiteralKind::Symbol), Acceptance::NotInEnumeration);
    }

    #[test]
    fn test_integer_range() {
        let kind = ValueKind::Integer {
            min: Some(0),
            max: Some(10),
        };
        assert_eq!(kind.accepts("5", LiteralKind::Integer), Acceptance::Accepted);
        assert_eq!(kind.accepts("11", LiteralKind::Integer), Acceptance::OutOfRange);
        assert_eq!(kind.accepts("1.5", LiteralKind::Float), Acceptance::WrongType);
        assert_eq!(kind.accepts("five", LiteralKind::Symbol), Acceptance::WrongType);
    }

    #[test]
    fn test_float_accepts_integers() {
        let kind = ValueKind::Float {
            min: Some(0.0),
            max: Some(1.0),
        };
        assert_eq!(kind.accepts("1", LiteralKind::Integer), Acceptance::Accepted);
        assert_eq!(kind.accepts("1.5", LiteralKind::Float), Acceptance::OutOfRange);
    }

    #[test]
    fn test_identifier_rejects_literals() {
        let kind = ValueKind::Identifier { target: NodeId::new(1) };
        assert_eq!(kind.accepts("x", LiteralKind::Symbol), Acceptance::WrongType);
        assert_eq!(kind.target(), Some(NodeId::new(1)));
    }

    #[test]
    fn test_invalid_range() {
        let kind = ValueKind::Integer {
            min: Some(5),
            max: Some(1),
        };
        assert!(kind.validate().is_err());
        assert!(ValueKind::integer().validate().is_ok());
    }

    #[test]
    fn test_inference() {
        assert_eq!(ValueKind::infer_from_literal("3", LiteralKind::Integer).category(), KindCategory::Integer);
        assert_eq!(ValueKind::infer_from_literal("2.5", LiteralKind::Float).category(), KindCategory::Float);
        assert_eq!(
            ValueKind::infer_from_literal("red", LiteralKind::Symbol),
            ValueKind::enumeration(["red"])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueKind::enumeration(["b", "a"]).to_string(), "enumeration [a b]");
        assert_eq!(
            ValueKind::Integer { min: Some(1), max: None }.to_string(),
            "integer [1, ...]"
        );
        assert_eq!(ValueKind::String.to_string(), "string");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&ValueKind::enumeration(["x"])).unwrap();
        assert_eq!(json, r#"{"type":"enumeration","values":["x"]}"#);
        let back: ValueKind = serde_json::from_str(r#"{"type":"integer","max":3}"#).unwrap();
        assert_eq!(back, ValueKind::Integer { min: None, max: Some(3) });
    }
}
