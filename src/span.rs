//! Source positions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A byte range in rule source text plus the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// 1-based line of `start`.
    pub line: u32,
    /// 1-based column of `start`, counted in characters.
    pub column: u32,
}

impl Span {
    /// Creates a span.
    #[must_use]
    pub const fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn to(self, other: Self) -> Self {
        if other.start < self.start {
            return other.to(self);
        }
        Self {
            start: self.start,
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }

    /// Shifts the span by `offset` bytes and `lines` lines.
    ///
    /// Used when a production is re-parsed out of a larger file.
    #[must_use]
    pub const fn shifted(self, offset: usize, lines: u32) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            line: self.line + lines,
            column: self.column,
        }
    }

    /// The slice of `text` covered by this span, if in bounds.
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start..self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
