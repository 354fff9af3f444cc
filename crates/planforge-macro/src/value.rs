//! Runtime values produced by evaluating macro expressions.
//!
//! Deliberately small: integers, floats, strings, booleans, lists, and a
//! `Raw` variant for SQL text that has already been rendered (used by
//! `REDUCE`/`EACH` accumulation so repeated rendering doesn't re-quote
//! SQL fragments as string literals).

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// SQL text that is already in its final rendered form and must be
    /// spliced verbatim rather than re-quoted.
    Raw(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Raw(s) => !s.is_empty(),
        }
    }

    /// Renders this value as it should appear spliced into SQL text.
    pub fn to_sql(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_sql).collect();
                format!("({})", parts.join(", "))
            }
            Value::Raw(s) => s.clone(),
        }
    }

    /// Renders this value as plain display text, used for `@'...'`
    /// template substitution where values are interpolated without
    /// SQL-literal quoting.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Str(s) => s.clone(),
            Value::Raw(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Raw(_) => "raw",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

/// Binary arithmetic/comparison/logical operator applied numerically
/// when both sides are numbers, falling back to string concatenation for
/// `+`/`||` and structural equality for `==`/`!=`.
pub fn apply_binary(op: &str, lhs: &Value, rhs: &Value) -> Value {
    use Value::*;
    match op {
        "==" => Bool(lhs == rhs),
        "!=" => Bool(lhs != rhs),
        "AND" => Bool(lhs.is_truthy() && rhs.is_truthy()),
        "OR" => Bool(lhs.is_truthy() || rhs.is_truthy()),
        "||" => Str(format!("{}{}", lhs.to_display(), rhs.to_display())),
        "<" | "<=" | ">" | ">=" => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Bool(match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            }),
            _ => Bool(match op {
                "<" => lhs.to_display() < rhs.to_display(),
                "<=" => lhs.to_display() <= rhs.to_display(),
                ">" => lhs.to_display() > rhs.to_display(),
                _ => lhs.to_display() >= rhs.to_display(),
            }),
        },
        "+" | "-" | "*" | "/" => match (lhs, rhs) {
            (Str(a), _) | (_, Str(a)) if op == "+" && matches!(lhs, Str(_)) && matches!(rhs, Str(_)) => {
                let _ = a;
                Str(format!("{}{}", lhs.to_display(), rhs.to_display()))
            }
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => {
                    let result = match op {
                        "+" => a + b,
                        "-" => a - b,
                        "*" => a * b,
                        _ => a / b,
                    };
                    if matches!(lhs, Int(_)) && matches!(rhs, Int(_)) && result.fract() == 0.0 {
                        Int(result as i64)
                    } else {
                        Float(result)
                    }
                }
                _ => Null,
            },
        },
        _ => Null,
    }
}

pub fn apply_unary(op: &str, operand: &Value) -> Value {
    match op {
        "NOT" => Value::Bool(!operand.is_truthy()),
        "-" => match operand {
            Value::Int(i) => Value::Int(-i),
            Value::Float(f) => Value::Float(-f),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}
