//! The `@`-macro language layered on top of the host SQL parser
//! (spec.md §4.A/§4.B): AST, scanner, evaluator, built-in combinators
//! and the user-macro registry.

pub mod ast;
pub mod eval;
pub mod registry;
pub mod value;

pub use ast::{BinOp, ClauseKind, MacroCall, MacroNode, ParseError, PropValue, PropertyBlock};
pub use eval::MacroEvaluator;
pub use registry::{MacroOutput, MacroRegistry, UserMacroFn};
pub use value::Value;
