//! # dmcheck - Datamap consistency checking for Soar productions
//!
//! dmcheck is a static analyzer for Soar production rules. It parses rules,
//! resolves how their variables bind to working-memory objects, and verifies
//! every attribute path the rules read or write against a user-maintained
//! schema graph (the "datamap").
//!
//! ## Core Concepts
//!
//! - **SchemaGraph**: Arena-backed graph of object types (nodes) and named attributes (edges)
//! - **BindingGraph**: Per-rule graph of variable positions connected by attribute tests
//! - **Diagnostic**: A finding tied to a rule and source position, optionally with a schema quick fix
//! - **CheckEngine**: Incremental engine that rechecks only the rules a schema edit affects
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dmcheck::{CheckEngine, Multiplicity, SchemaGraph, ValueKind};
//!
//! let mut schema = SchemaGraph::with_roots(["state"])?;
//! let state = schema.root("state").unwrap();
//! let (_, io) = schema.add_child(state, "io")?;
//! schema.add_child(io, "input-link")?;
//!
//! let engine = CheckEngine::with_schema(schema);
//! let diagnostics = engine.check_rule(
//!     "blocks::read",
//!     "sp {read (state <s> ^io.inputlink <il>) --> (<s> ^seen yes)}",
//! )?;
//! assert_eq!(diagnostics.len(), 2);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Foundations
pub mod error;
pub mod span;

// Front end
pub mod binding;
pub mod parser;

// Schema and checking
pub mod checker;
pub mod config;
pub mod schema;

// Incremental engine
pub mod engine;

// Re-export primary types at crate root for convenience
pub use binding::{BindingGraph, Position, PositionId};
pub use checker::{AppliedFix, Checker, Diagnostic, DiagnosticKind, EdgeUsage, QuickFix, RuleCheck, Severity};
pub use config::{CheckerConfig, EngineConfig};
pub use engine::{
    CheckEngine, CheckEvent, CheckState, Coverage, DiagnosticStream, EngineStats, SchemaEdit, SubscriptionId,
};
pub use error::{BindingError, DmError, DmResult, EngineError, SchemaError, SyntaxError};
pub use parser::{parse_file, parse_production, ParsedFile, Production};
pub use schema::{
    EdgeId, KindCategory, Multiplicity, NodeId, SchemaDocument, SchemaEdge, SchemaGraph, SchemaNode, SchemaRef,
    ValueKind,
};
pub use span::Span;
