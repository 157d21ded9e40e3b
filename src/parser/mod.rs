//! Soar production parser.
//!
//! Turns rule source text into [`Production`] trees. Parsing is a pure
//! function of the text; a file with several broken productions yields one
//! [`crate::error::SyntaxError`] per broken production.

pub mod ast;
mod grammar;
pub mod lexer;

pub use ast::{
    Action, Anchor, AttrValueMake, AttrValueTest, Condition, ConditionBody, Constant, FunctionCall,
    LiteralKind, Pattern, Preference, PreferenceKind, Production, Relation, RhsValue, SimpleTest,
    SingleTest, Test, ValueMake, ValueTest, Variable,
};
pub use grammar::{parse_file, parse_production, split_productions, ParsedFile, SourceChunk, ANCHOR_KEYWORDS};
