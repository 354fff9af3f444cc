//! Hand-rolled scanner/parser turning raw model source text into
//! [`MacroNode`] trees.
//!
//! Two grammars share one cursor:
//! - *document mode* — plain SQL text where `@` introduces a macro
//!   construct and everything else passes through verbatim.
//! - *expression mode* — used inside macro-call arguments, `@DEF`
//!   right-hand sides, lambda bodies and clause conditions, where bare
//!   identifiers are local-variable references (no `@` needed, mirroring
//!   how lambda parameters read as plain names inside the evaluated
//!   macro body).

use std::fmt;

use super::{BinOp, ClauseKind, MacroCall, MacroNode, PropValue, PropertyBlock};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "macro parse error: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Cursor {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat_char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn starts_with_ci(&self, word: &str) -> bool {
        let rest: String = self.chars[self.pos..].iter().take(word.len()).collect();
        rest.eq_ignore_ascii_case(word)
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn read_number(&mut self) -> PResult<f64> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| ParseError(format!("invalid number literal '{text}'")))
    }

    /// Reads a `'...'` SQL string literal with `''` as an escaped quote,
    /// returning the unescaped contents.
    fn read_quoted(&mut self, quote: char) -> PResult<String> {
        if !self.eat_char(quote) {
            return Err(ParseError(format!("expected {quote}")));
        }
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError("unterminated string literal".into())),
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        out.push(quote);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------
// Expression-mode grammar
// ---------------------------------------------------------------------

fn parse_or_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let mut lhs = parse_and_expr(c)?;
    loop {
        c.skip_ws();
        if c.starts_with_ci("OR") && !ident_char_follows(c, 2) {
            c.pos += 2;
            let rhs = parse_and_expr(c)?;
            lhs = MacroNode::BinaryOp {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else {
            break;
        }
    }
    Ok(lhs)
}

fn ident_char_follows(c: &Cursor, offset: usize) -> bool {
    matches!(c.peek_at(offset), Some(ch) if ch.is_alphanumeric() || ch == '_')
}

fn parse_and_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let mut lhs = parse_not_expr(c)?;
    loop {
        c.skip_ws();
        if c.starts_with_ci("AND") && !ident_char_follows(c, 3) {
            c.pos += 3;
            let rhs = parse_not_expr(c)?;
            lhs = MacroNode::BinaryOp {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else {
            break;
        }
    }
    Ok(lhs)
}

fn parse_not_expr(c: &mut Cursor) -> PResult<MacroNode> {
    c.skip_ws();
    if c.starts_with_ci("NOT") && !ident_char_follows(c, 3) {
        c.pos += 3;
        let operand = parse_not_expr(c)?;
        return Ok(MacroNode::Not(Box::new(operand)));
    }
    parse_cmp_expr(c)
}

fn parse_cmp_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let lhs = parse_concat_expr(c)?;
    c.skip_ws();
    let op = if c.starts_with_ci("==") {
        Some(BinOp::Eq)
    } else if c.starts_with_ci("!=") {
        Some(BinOp::Ne)
    } else if c.starts_with_ci("<=") {
        Some(BinOp::Le)
    } else if c.starts_with_ci(">=") {
        Some(BinOp::Ge)
    } else if c.peek() == Some('<') {
        Some(BinOp::Lt)
    } else if c.peek() == Some('>') {
        Some(BinOp::Gt)
    } else {
        None
    };
    if let Some(op) = op {
        c.pos += op.as_str().len();
        let rhs = parse_concat_expr(c)?;
        return Ok(MacroNode::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        });
    }
    Ok(lhs)
}

fn parse_concat_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let mut lhs = parse_add_expr(c)?;
    loop {
        c.skip_ws();
        if c.peek() == Some('|') && c.peek_at(1) == Some('|') {
            c.pos += 2;
            let rhs = parse_add_expr(c)?;
            lhs = MacroNode::BinaryOp {
                op: BinOp::Concat,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        } else {
            break;
        }
    }
    Ok(lhs)
}

fn parse_add_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let mut lhs = parse_mul_expr(c)?;
    loop {
        c.skip_ws();
        let op = match c.peek() {
            Some('+') => Some(BinOp::Add),
            Some('-') => Some(BinOp::Sub),
            _ => None,
        };
        match op {
            Some(op) => {
                c.pos += 1;
                let rhs = parse_mul_expr(c)?;
                lhs = MacroNode::BinaryOp {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
            }
            None => break,
        }
    }
    Ok(lhs)
}

fn parse_mul_expr(c: &mut Cursor) -> PResult<MacroNode> {
    let mut lhs = parse_unary(c)?;
    loop {
        c.skip_ws();
        let op = match c.peek() {
            Some('*') => Some(BinOp::Mul),
            Some('/') => Some(BinOp::Div),
            _ => None,
        };
        match op {
            Some(op) => {
                c.pos += 1;
                let rhs = parse_unary(c)?;
                lhs = MacroNode::BinaryOp {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
            }
            None => break,
        }
    }
    Ok(lhs)
}

fn parse_unary(c: &mut Cursor) -> PResult<MacroNode> {
    c.skip_ws();
    if c.peek() == Some('-') && !matches!(c.peek_at(1), Some(d) if d.is_ascii_digit()) {
        c.pos += 1;
        let operand = parse_unary(c)?;
        return Ok(MacroNode::Neg(Box::new(operand)));
    }
    parse_postfix_primary(c)
}

fn parse_postfix_primary(c: &mut Cursor) -> PResult<MacroNode> {
    let node = parse_primary(c)?;
    c.skip_ws();
    if c.peek() == Some('-') && c.peek_at(1) == Some('>') {
        // single-identifier lambda: `x -> expr`
        if let MacroNode::Var(name) = node {
            c.pos += 2;
            let body = parse_or_expr(c)?;
            return Ok(MacroNode::Lambda {
                params: vec![name],
                body: Box::new(body),
            });
        }
    }
    Ok(node)
}

fn parse_primary(c: &mut Cursor) -> PResult<MacroNode> {
    c.skip_ws();
    match c.peek() {
        Some('(') => {
            c.pos += 1;
            // Could be: parenthesized expr, tuple literal, or lambda params.
            c.skip_ws();
            if c.peek() == Some(')') {
                c.pos += 1;
                c.skip_ws();
                if c.peek() == Some('-') && c.peek_at(1) == Some('>') {
                    c.pos += 2;
                    let body = parse_or_expr(c)?;
                    return Ok(MacroNode::Lambda {
                        params: vec![],
                        body: Box::new(body),
                    });
                }
                return Ok(MacroNode::ListLit(vec![]));
            }
            let mut items = vec![parse_or_expr(c)?];
            c.skip_ws();
            while c.eat_char(',') {
                items.push(parse_or_expr(c)?);
                c.skip_ws();
            }
            if !c.eat_char(')') {
                return Err(ParseError("expected ')'".into()));
            }
            c.skip_ws();
            if c.peek() == Some('-') && c.peek_at(1) == Some('>') {
                let all_idents: Option<Vec<String>> = items
                    .iter()
                    .map(|n| match n {
                        MacroNode::Var(name) => Some(name.clone()),
                        _ => None,
                    })
                    .collect();
                if let Some(params) = all_idents {
                    c.pos += 2;
                    let body = parse_or_expr(c)?;
                    return Ok(MacroNode::Lambda {
                        params,
                        body: Box::new(body),
                    });
                }
            }
            if items.len() == 1 {
                Ok(items.into_iter().next().unwrap())
            } else {
                Ok(MacroNode::ListLit(items))
            }
        }
        Some('[') => {
            c.pos += 1;
            let mut items = Vec::new();
            c.skip_ws();
            if c.peek() != Some(']') {
                items.push(parse_or_expr(c)?);
                c.skip_ws();
                while c.eat_char(',') {
                    items.push(parse_or_expr(c)?);
                    c.skip_ws();
                }
            }
            if !c.eat_char(']') {
                return Err(ParseError("expected ']'".into()));
            }
            Ok(MacroNode::ListLit(items))
        }
        Some('\'') => {
            let s = c.read_quoted('\'')?;
            Ok(MacroNode::Literal(Value::Str(s)))
        }
        Some('@') => {
            c.pos += 1;
            if c.peek() == Some('\'') {
                let s = c.read_quoted('\'')?;
                return Ok(MacroNode::StrReplace(Box::new(MacroNode::Native(s))));
            }
            let name = c.read_ident();
            if name.is_empty() {
                return Err(ParseError("expected identifier after '@'".into()));
            }
            if c.peek() == Some('(') {
                let args = parse_args(c)?;
                Ok(build_call(name, args)?)
            } else {
                Ok(MacroNode::Var(name))
            }
        }
        Some(ch) if ch.is_ascii_digit() => {
            let n = c.read_number()?;
            if n.fract() == 0.0 && n.abs() < 1e15 {
                Ok(MacroNode::Literal(Value::Int(n as i64)))
            } else {
                Ok(MacroNode::Literal(Value::Float(n)))
            }
        }
        Some(ch) if ch.is_alphabetic() || ch == '_' => {
            let ident = c.read_ident();
            match ident.to_ascii_uppercase().as_str() {
                "TRUE" => Ok(MacroNode::Literal(Value::Bool(true))),
                "FALSE" => Ok(MacroNode::Literal(Value::Bool(false))),
                "NULL" => Ok(MacroNode::Literal(Value::Null)),
                _ => Ok(MacroNode::Var(ident)),
            }
        }
        Some(other) => Err(ParseError(format!("unexpected character '{other}' in expression"))),
        None => Err(ParseError("unexpected end of input in expression".into())),
    }
}

fn parse_args(c: &mut Cursor) -> PResult<Vec<MacroNode>> {
    if !c.eat_char('(') {
        return Err(ParseError("expected '('".into()));
    }
    let mut args = Vec::new();
    c.skip_ws();
    if c.peek() != Some(')') {
        args.push(parse_or_expr(c)?);
        c.skip_ws();
        while c.eat_char(',') {
            args.push(parse_or_expr(c)?);
            c.skip_ws();
        }
    }
    if !c.eat_char(')') {
        return Err(ParseError("expected ')'".into()));
    }
    Ok(args)
}

fn build_call(name: String, args: Vec<MacroNode>) -> PResult<MacroNode> {
    match name.to_ascii_uppercase().as_str() {
        "DEF" => {
            if args.len() != 2 {
                return Err(ParseError("@DEF expects exactly 2 arguments".into()));
            }
            let mut it = args.into_iter();
            let name_node = it.next().unwrap();
            let expr = it.next().unwrap();
            let bound_name = match name_node {
                MacroNode::Var(n) => n,
                MacroNode::Literal(Value::Str(n)) => n,
                _ => return Err(ParseError("@DEF name must be an identifier".into())),
            };
            Ok(MacroNode::Def {
                name: bound_name,
                expr: Box::new(expr),
            })
        }
        "SQL" => {
            if args.is_empty() || args.len() > 2 {
                return Err(ParseError("@SQL expects 1 or 2 arguments".into()));
            }
            let mut it = args.into_iter();
            let template = it.next().unwrap();
            let into = it.next().and_then(|n| match n {
                MacroNode::Var(s) => Some(s),
                MacroNode::Literal(Value::Str(s)) => Some(s),
                _ => None,
            });
            Ok(MacroNode::Sql {
                template: Box::new(template),
                into,
            })
        }
        _ => Ok(MacroNode::Func(MacroCall { name, args })),
    }
}

// ---------------------------------------------------------------------
// Document-mode grammar
// ---------------------------------------------------------------------

/// Keywords that close an absorbed clause-macro body when they appear at
/// paren depth 0, matching native SQL clause boundaries.
const CLAUSE_BOUNDARY_KEYWORDS: [&str; 6] =
    ["GROUP BY", "HAVING", "ORDER BY", "LIMIT", "WHERE", "WITH"];

fn at_clause_boundary(c: &Cursor) -> bool {
    if c.peek() == Some('@') {
        let saved = c.pos;
        let mut probe = Cursor {
            chars: c.chars.clone(),
            pos: c.pos + 1,
        };
        let name = probe.read_ident();
        let _ = saved;
        if ClauseKind::from_name(&name).is_some() && probe.peek() == Some('(') {
            return true;
        }
    }
    for kw in CLAUSE_BOUNDARY_KEYWORDS {
        if c.starts_with_ci(kw) {
            return true;
        }
    }
    false
}

/// Scans document text into a `Seq`, stopping at end of input or, when
/// `stop_at_clause_boundary` is set, at the next clause-macro / native
/// clause keyword at paren depth 0 (used to capture an absorbed clause
/// body without swallowing the next clause).
fn scan_segment(c: &mut Cursor, stop_at_clause_boundary: bool) -> PResult<MacroNode> {
    let mut nodes = Vec::new();
    let mut buf = String::new();
    let mut depth: i32 = 0;

    macro_rules! flush {
        () => {
            if !buf.is_empty() {
                nodes.push(MacroNode::Native(std::mem::take(&mut buf)));
            }
        };
    }

    while !c.eof() {
        if stop_at_clause_boundary && depth == 0 && at_clause_boundary(c) {
            break;
        }
        match c.peek().unwrap() {
            '(' => {
                depth += 1;
                buf.push(c.bump().unwrap());
            }
            ')' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                buf.push(c.bump().unwrap());
            }
            '\'' => {
                // Native string literal: copy verbatim, including escaped quotes.
                buf.push(c.bump().unwrap());
                loop {
                    match c.bump() {
                        None => return Err(ParseError("unterminated string literal".into())),
                        Some(ch) => {
                            buf.push(ch);
                            if ch == '\'' {
                                if c.peek() == Some('\'') {
                                    buf.push(c.bump().unwrap());
                                } else {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            '@' => {
                flush!();
                nodes.push(parse_at_construct(c)?);
            }
            _ => {
                buf.push(c.bump().unwrap());
            }
        }
    }
    flush!();
    Ok(MacroNode::Seq(nodes))
}

/// Parses one `@...` construct encountered in document mode: a clause
/// macro (absorbing its body), a plain function call, a bare var, or a
/// `@'...'` template string.
fn parse_at_construct(c: &mut Cursor) -> PResult<MacroNode> {
    c.pos += 1; // consume '@'
    if c.peek() == Some('\'') {
        let s = c.read_quoted('\'')?;
        return Ok(MacroNode::StrReplace(Box::new(MacroNode::Native(s))));
    }
    let name = c.read_ident();
    if name.is_empty() {
        return Err(ParseError("expected identifier after '@'".into()));
    }
    if c.peek() != Some('(') {
        return Ok(MacroNode::Var(name));
    }
    let args = parse_args(c)?;

    if let Some(kind) = ClauseKind::from_name(&name) {
        if args.len() != 1 {
            return Err(ParseError(format!("@{name} expects exactly 1 argument")));
        }
        let condition = args.into_iter().next().unwrap();
        c.skip_ws();
        let body = scan_segment(c, true)?;
        return Ok(MacroNode::Clause {
            kind,
            condition: Box::new(condition),
            body: Box::new(body),
        });
    }

    build_call(name, args)
}

/// Parses a full query/clause template (the public document-mode entry
/// point).
pub fn parse_query_template(text: &str) -> PResult<MacroNode> {
    let mut c = Cursor::new(text);
    scan_segment(&mut c, false)
}

// ---------------------------------------------------------------------
// MODEL(...) / AUDIT(...) property blocks
// ---------------------------------------------------------------------

fn parse_prop_value(c: &mut Cursor) -> PResult<PropValue> {
    c.skip_ws();
    match c.peek() {
        Some('\'') | Some('"') => {
            let q = c.peek().unwrap();
            let s = c.read_quoted(q)?;
            Ok(PropValue::Str(s))
        }
        Some('(') => {
            c.pos += 1;
            let mut items = Vec::new();
            c.skip_ws();
            if c.peek() != Some(')') {
                items.push(parse_prop_value(c)?);
                c.skip_ws();
                while c.eat_char(',') {
                    items.push(parse_prop_value(c)?);
                    c.skip_ws();
                }
            }
            if !c.eat_char(')') {
                return Err(ParseError("expected ')' in property tuple".into()));
            }
            Ok(PropValue::Tuple(items))
        }
        Some(ch) if ch.is_ascii_digit() || ch == '-' => {
            let n = c.read_number()?;
            Ok(PropValue::Number(n))
        }
        Some(ch) if ch.is_alphanumeric() || ch == '_' || ch == '.' => {
            let start = c.pos;
            while matches!(c.peek(), Some(ch) if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '@') {
                c.pos += 1;
            }
            let ident: String = c.chars[start..c.pos].iter().collect();
            match ident.to_ascii_lowercase().as_str() {
                "true" => Ok(PropValue::Bool(true)),
                "false" => Ok(PropValue::Bool(false)),
                _ => Ok(PropValue::Ident(ident)),
            }
        }
        _ => Err(ParseError("expected a property value".into())),
    }
}

/// Parses `NAME(key = value, key2 = value2, ...)`, e.g. `MODEL(...)`.
pub fn parse_property_block(text: &str) -> PResult<PropertyBlock> {
    let mut c = Cursor::new(text.trim());
    c.skip_ws();
    let kind = c.read_ident();
    if kind.is_empty() {
        return Err(ParseError("expected MODEL or AUDIT keyword".into()));
    }
    c.skip_ws();
    if !c.eat_char('(') {
        return Err(ParseError(format!("expected '(' after {kind}")));
    }
    let mut properties = Vec::new();
    c.skip_ws();
    while c.peek() != Some(')') {
        c.skip_ws();
        let key = c.read_ident();
        if key.is_empty() {
            return Err(ParseError("expected property name".into()));
        }
        c.skip_ws();
        if !c.eat_char('=') {
            return Err(ParseError(format!("expected '=' after property '{key}'")));
        }
        let value = parse_prop_value(&mut c)?;
        properties.push((key, value));
        c.skip_ws();
        if !c.eat_char(',') {
            break;
        }
        c.skip_ws();
    }
    if !c.eat_char(')') {
        return Err(ParseError(format!("expected ')' closing {kind}(...)")));
    }
    Ok(PropertyBlock { kind, properties })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_var() {
        let n = parse_query_template("SELECT x FROM t WHERE ds = @end_ds").unwrap();
        assert!(n.contains_macro());
    }

    #[test]
    fn parses_clause_macro_with_condition() {
        let n = parse_at_construct_helper("@WHERE(TRUE) x > 1");
        match n {
            MacroNode::Clause { kind, .. } => assert_eq!(kind, ClauseKind::Where),
            other => panic!("expected Clause, got {other:?}"),
        }
    }

    fn parse_at_construct_helper(text: &str) -> MacroNode {
        let mut c = Cursor::new(text);
        parse_at_construct(&mut c).unwrap()
    }

    #[test]
    fn parses_def_and_func() {
        let n = parse_query_template("@DEF(x, 1 + 2) SELECT @x").unwrap();
        if let MacroNode::Seq(items) = n {
            assert!(matches!(items[0], MacroNode::Def { .. }));
        } else {
            panic!("expected Seq");
        }
    }

    #[test]
    fn parses_lambda_single_param() {
        let n = parse_or_expr(&mut Cursor::new("x -> x + 1")).unwrap();
        match n {
            MacroNode::Lambda { params, .. } => assert_eq!(params, vec!["x".to_string()]),
            other => panic!("expected Lambda, got {other:?}"),
        }
    }

    #[test]
    fn parses_property_block() {
        let block =
            parse_property_block("MODEL(name = db.schema.tbl, kind = FULL, owner = 'jane')")
                .unwrap();
        assert_eq!(block.kind, "MODEL");
        assert_eq!(block.properties[0].0, "name");
    }
}
