//! The `@`-macro sum type (Design Note 9) and the scanner that builds it
//! out of raw model source text.
//!
//! There is no shared base class, by design: the evaluator pattern-matches
//! on `MacroNode` directly. A `MacroNode` tree is the "extended AST" that
//! component A (dialect extensions) would otherwise bolt onto the host SQL
//! parser's own enum; since the host parser (`sqlparser`) is an external,
//! unmodified crate, we build this as a parallel layer instead and hand
//! the host parser clean SQL text once every macro node has evaluated away.

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    With,
    Join,
    Where,
    GroupBy,
    Having,
    OrderBy,
}

impl ClauseKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ClauseKind::With => "WITH",
            ClauseKind::Join => "JOIN",
            ClauseKind::Where => "WHERE",
            ClauseKind::GroupBy => "GROUP BY",
            ClauseKind::Having => "HAVING",
            ClauseKind::OrderBy => "ORDER BY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "WITH" => Some(ClauseKind::With),
            "JOIN" => Some(ClauseKind::Join),
            "WHERE" => Some(ClauseKind::Where),
            "GROUP_BY" => Some(ClauseKind::GroupBy),
            "HAVING" => Some(ClauseKind::Having),
            "ORDER_BY" => Some(ClauseKind::OrderBy),
            _ => None,
        }
    }

    /// The exact set of reserved clause macros (spec.md §4.A).
    pub const ALL: [ClauseKind; 6] = [
        ClauseKind::With,
        ClauseKind::Join,
        ClauseKind::Where,
        ClauseKind::GroupBy,
        ClauseKind::Having,
        ClauseKind::OrderBy,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroCall {
    pub name: String,
    pub args: Vec<MacroNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Concat,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Concat => "||",
        }
    }
}

/// The macro AST. `Native`/`Seq` carry document structure (plain SQL
/// text interleaved with macro constructs); the remaining variants are
/// the macro constructs themselves, per spec.md §4.A / §9.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroNode {
    /// A verbatim span of host-SQL text with no macro content.
    Native(String),
    /// `@ident` — variable substitution.
    Var(String),
    /// `@NAME(args...)` — a macro function call (built-in or user).
    Func(MacroCall),
    /// `@DEF(name, expr)` — binds a local, evaluates to nothing.
    Def { name: String, expr: Box<MacroNode> },
    /// `@SQL('text', into=kind)` — template-substitutes `text` then
    /// splices the result as SQL (parsing happens downstream, once the
    /// whole document has had its macros eliminated).
    Sql {
        template: Box<MacroNode>,
        into: Option<String>,
    },
    /// `@'string with @vars'` — template substitution.
    StrReplace(Box<MacroNode>),
    /// One of the six reserved clause macros, absorbing the following
    /// native clause as its body.
    Clause {
        kind: ClauseKind,
        condition: Box<MacroNode>,
        body: Box<MacroNode>,
    },
    /// `x -> expr` / `(x, y) -> expr`, not evaluated until a combinator
    /// consumes it.
    Lambda {
        params: Vec<String>,
        body: Box<MacroNode>,
    },
    /// A sequence of sibling nodes making up one contiguous span of SQL
    /// (the top-level query template is always a `Seq`).
    Seq(Vec<MacroNode>),
    /// A literal value inside an expression position.
    Literal(Value),
    BinaryOp {
        op: BinOp,
        lhs: Box<MacroNode>,
        rhs: Box<MacroNode>,
    },
    Not(Box<MacroNode>),
    Neg(Box<MacroNode>),
    ListLit(Vec<MacroNode>),
}

impl MacroNode {
    /// True if this node (or any descendant) is a macro construct that
    /// must be eliminated before the text is handed to the host parser.
    pub fn contains_macro(&self) -> bool {
        match self {
            MacroNode::Native(_) | MacroNode::Literal(_) => false,
            MacroNode::Seq(items) => items.iter().any(MacroNode::contains_macro),
            _ => true,
        }
    }
}

/// A flat `key = value` property list, used for `MODEL(...)`/`AUDIT(...)`
/// top-level definition blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Ident(String),
    Str(String),
    Number(f64),
    Bool(bool),
    Tuple(Vec<PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Ident(s) | PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Vec<PropValue> {
        match self {
            PropValue::Tuple(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBlock {
    pub kind: String,
    pub properties: Vec<(String, PropValue)>,
}

mod parser;
pub use parser::{parse_property_block, parse_query_template, ParseError};
