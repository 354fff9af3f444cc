//! The macro evaluator (spec.md §4.B): walks a [`MacroNode`] tree
//! child-first, substituting variables, evaluating macro calls, and
//! producing plain SQL text with every macro construct eliminated.

use indexmap::IndexMap;

use planforge_error::{PlanError, PlanResult};

use crate::ast::{BinOp, MacroNode};
use crate::registry::{MacroOutput, MacroRegistry};
use crate::value::{apply_binary, apply_unary, Value};

/// Binds variables for one render and dispatches macro calls through a
/// [`MacroRegistry`]. Not `Send`/`Sync`: the rendering cache that owns
/// one of these per model is single-writer, per spec.md §5/§9.
pub struct MacroEvaluator<'a> {
    pub locals: IndexMap<String, Value>,
    registry: &'a MacroRegistry,
}

impl<'a> MacroEvaluator<'a> {
    pub fn new(registry: &'a MacroRegistry) -> Self {
        MacroEvaluator {
            locals: IndexMap::new(),
            registry,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    /// Renders a whole template (pre-statements or a query body) to SQL
    /// text, eliminating every macro node.
    pub fn render(&mut self, node: &MacroNode) -> PlanResult<String> {
        Ok(self.eval_to_sql(node)?.unwrap_or_default())
    }

    /// Evaluates `node` as a value (used for `@DEF` right-hand sides,
    /// clause conditions, and lambda bodies consumed by combinators).
    pub fn eval_expr(&mut self, node: &MacroNode) -> PlanResult<Value> {
        match node {
            MacroNode::Literal(v) => Ok(v.clone()),
            MacroNode::Var(name) => self.lookup(name),
            MacroNode::BinaryOp { op, lhs, rhs } => {
                let l = self.eval_expr(lhs)?;
                let r = self.eval_expr(rhs)?;
                Ok(apply_binary(op.as_str(), &l, &r))
            }
            MacroNode::Not(inner) => {
                let v = self.eval_expr(inner)?;
                Ok(apply_unary("NOT", &v))
            }
            MacroNode::Neg(inner) => {
                let v = self.eval_expr(inner)?;
                Ok(apply_unary("-", &v))
            }
            MacroNode::ListLit(items) => {
                let values = items
                    .iter()
                    .map(|n| self.eval_expr(n))
                    .collect::<PlanResult<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            MacroNode::Sql { .. } | MacroNode::StrReplace(_) => {
                let text = self.eval_to_sql(node)?.unwrap_or_default();
                Ok(Value::Raw(text))
            }
            MacroNode::Func(call) => self.eval_func_as_value(&call.name, &call.args),
            MacroNode::Def { .. } => Err(self.err(
                node,
                "@DEF is not valid inside an expression",
            )),
            MacroNode::Clause { .. } => Err(self.err(
                node,
                "a clause macro is not valid inside an expression",
            )),
            MacroNode::Lambda { .. } => Err(self.err(
                node,
                "a lambda is not valid outside of a combinator argument",
            )),
            MacroNode::Native(s) => Ok(Value::Raw(s.clone())),
            MacroNode::Seq(items) => {
                let text = self.render_seq(items)?;
                Ok(Value::Raw(text))
            }
        }
    }

    /// Evaluates `node` as SQL text, child-first. Returns `None` when the
    /// node disappears entirely (a false clause macro, a `@DEF`, a macro
    /// call that resolved to nothing).
    pub fn eval_to_sql(&mut self, node: &MacroNode) -> PlanResult<Option<String>> {
        match node {
            MacroNode::Native(s) => Ok(Some(s.clone())),
            MacroNode::Seq(items) => Ok(Some(self.render_seq(items)?)),
            MacroNode::Var(name) => Ok(Some(self.lookup(name)?.to_sql())),
            MacroNode::Literal(v) => Ok(Some(v.to_sql())),
            MacroNode::BinaryOp { .. } | MacroNode::Not(_) | MacroNode::Neg(_) => {
                Ok(Some(self.eval_expr(node)?.to_sql()))
            }
            MacroNode::ListLit(_) => Ok(Some(self.eval_expr(node)?.to_sql())),
            MacroNode::Def { name, expr } => {
                let value = self.eval_expr(expr)?;
                self.bind(name.clone(), value);
                Ok(None)
            }
            MacroNode::Sql { template, into: _ } => {
                // `into` informs the downstream host-parser hand-off
                // (which node kind to parse the spliced text as); at
                // this layer we only eliminate the macro and splice text.
                Ok(Some(self.eval_to_sql(template)?.unwrap_or_default()))
            }
            MacroNode::StrReplace(inner) => {
                let text = match inner.as_ref() {
                    MacroNode::Native(s) => s.clone(),
                    other => self.eval_to_sql(other)?.unwrap_or_default(),
                };
                Ok(Some(self.template_substitute(&text)))
            }
            MacroNode::Clause {
                kind,
                condition,
                body,
            } => {
                let cond = self.eval_expr(condition)?;
                if cond.is_truthy() {
                    let body_sql = self.eval_to_sql(body)?.unwrap_or_default();
                    Ok(Some(format!("{} {}", kind.keyword(), body_sql)))
                } else {
                    Ok(None)
                }
            }
            MacroNode::Lambda { .. } => Err(self.err(
                node,
                "a lambda is not valid outside of a combinator argument",
            )),
            MacroNode::Func(call) => self.eval_func_as_sql(&call.name, &call.args),
        }
    }

    fn render_seq(&mut self, items: &[MacroNode]) -> PlanResult<String> {
        let mut out = String::new();
        for item in items {
            if let Some(text) = self.eval_to_sql(item)? {
                out.push_str(&text);
            }
        }
        Ok(out)
    }

    fn lookup(&self, name: &str) -> PlanResult<Value> {
        self.locals
            .get(name)
            .cloned()
            .ok_or_else(|| PlanError::macro_eval(
                format!("undefined macro variable '@{name}'"),
                String::new(),
                format!("@{name}"),
            ))
    }

    fn err(&self, node: &MacroNode, message: &str) -> PlanError {
        PlanError::macro_eval(message, format!("{node:?}"), String::new())
    }

    // -- builtin combinators ------------------------------------------------

    fn split_each_args<'n>(&self, args: &'n [MacroNode]) -> PlanResult<(&'n MacroNode, &'n [String], &'n MacroNode)> {
        if args.len() != 2 {
            return Err(PlanError::macro_eval(
                "combinator expects exactly 2 arguments: (items, lambda)",
                String::new(),
                String::new(),
            ));
        }
        match &args[1] {
            MacroNode::Lambda { params, body } => Ok((&args[0], params.as_slice(), body)),
            _ => Err(PlanError::macro_eval(
                "combinator's second argument must be a lambda",
                String::new(),
                String::new(),
            )),
        }
    }

    fn as_list(&self, v: Value) -> Vec<Value> {
        match v {
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// `@EACH(items, f)` — map, dropping `None` results.
    fn eval_each(&mut self, args: &[MacroNode]) -> PlanResult<Vec<Value>> {
        let (items_node, params, body) = self.split_each_args(args)?;
        if params.len() != 1 {
            return Err(PlanError::macro_eval(
                "@EACH lambda must take exactly one parameter",
                String::new(),
                String::new(),
            ));
        }
        let param = params[0].clone();
        let items = self.as_list(self.eval_expr(items_node)?);
        let mut out = Vec::with_capacity(items.len());
        let saved = self.locals.shift_remove(&param);
        for item in items {
            self.locals.insert(param.clone(), item);
            if let Some(rendered) = self.eval_to_sql(body)? {
                out.push(Value::Raw(rendered));
            }
        }
        self.restore_local(&param, saved);
        Ok(out)
    }

    /// `@FILTER(items, f)` — keep where truthy.
    fn eval_filter(&mut self, args: &[MacroNode]) -> PlanResult<Vec<Value>> {
        let (items_node, params, body) = self.split_each_args(args)?;
        if params.len() != 1 {
            return Err(PlanError::macro_eval(
                "@FILTER lambda must take exactly one parameter",
                String::new(),
                String::new(),
            ));
        }
        let param = params[0].clone();
        let items = self.as_list(self.eval_expr(items_node)?);
        let mut out = Vec::new();
        let saved = self.locals.shift_remove(&param);
        for item in items {
            self.locals.insert(param.clone(), item.clone());
            if self.eval_expr(body)?.is_truthy() {
                out.push(item);
            }
        }
        self.restore_local(&param, saved);
        Ok(out)
    }

    /// `@REDUCE(items, f)` — left fold; `f` takes two elements.
    fn eval_reduce(&mut self, args: &[MacroNode]) -> PlanResult<Value> {
        let (items_node, params, body) = self.split_each_args(args)?;
        if params.len() != 2 {
            return Err(PlanError::macro_eval(
                "@REDUCE lambda must take exactly two parameters",
                String::new(),
                String::new(),
            ));
        }
        let (acc_param, item_param) = (params[0].clone(), params[1].clone());
        let mut items = self.as_list(self.eval_expr(items_node)?).into_iter();
        let mut acc = match items.next() {
            Some(first) => first,
            None => return Ok(Value::Null),
        };
        let saved_acc = self.locals.shift_remove(&acc_param);
        let saved_item = self.locals.shift_remove(&item_param);
        for item in items {
            self.locals.insert(acc_param.clone(), acc.clone());
            self.locals.insert(item_param.clone(), item);
            let rendered = self.eval_to_sql(body)?.unwrap_or_default();
            acc = Value::Raw(rendered);
        }
        self.restore_local(&acc_param, saved_acc);
        self.restore_local(&item_param, saved_item);
        Ok(acc)
    }

    fn restore_local(&mut self, name: &str, saved: Option<Value>) {
        match saved {
            Some(v) => {
                self.locals.insert(name.to_string(), v);
            }
            None => {
                self.locals.shift_remove(name);
            }
        }
    }

    fn eval_func_as_value(&mut self, name: &str, args: &[MacroNode]) -> PlanResult<Value> {
        match name.to_ascii_uppercase().as_str() {
            "EACH" => Ok(Value::List(self.eval_each(args)?)),
            "FILTER" => Ok(Value::List(self.eval_filter(args)?)),
            "REDUCE" => self.eval_reduce(args),
            other => match self.registry.call(self, other, args)? {
                MacroOutput::None => Ok(Value::Null),
                MacroOutput::Node(node) => {
                    let text = self.eval_to_sql(&node)?.unwrap_or_default();
                    Ok(Value::Raw(text))
                }
                MacroOutput::Nodes(nodes) => {
                    let mut out = Vec::with_capacity(nodes.len());
                    for node in &nodes {
                        out.push(Value::Raw(self.eval_to_sql(node)?.unwrap_or_default()));
                    }
                    Ok(Value::List(out))
                }
            },
        }
    }

    fn eval_func_as_sql(&mut self, name: &str, args: &[MacroNode]) -> PlanResult<Option<String>> {
        match name.to_ascii_uppercase().as_str() {
            "EACH" => {
                let rendered = self.eval_each(args)?;
                Ok(Some(join_values(&rendered)))
            }
            "FILTER" => {
                let rendered = self.eval_filter(args)?;
                Ok(Some(join_values(&rendered)))
            }
            "REDUCE" => Ok(Some(self.eval_reduce(args)?.to_sql())),
            other => match self.registry.call(self, other, args)? {
                MacroOutput::None => Ok(None),
                MacroOutput::Node(node) => self.eval_to_sql(&node),
                MacroOutput::Nodes(nodes) => {
                    let mut out = String::new();
                    for node in &nodes {
                        if let Some(text) = self.eval_to_sql(node)? {
                            if !out.is_empty() {
                                out.push_str(", ");
                            }
                            out.push_str(&text);
                        }
                    }
                    Ok(Some(out))
                }
            },
        }
    }

    /// `@'text with @vars'` / `@SQL(...)` substitution: replaces `@ident`
    /// occurrences with the bound local's display text. A lone `@` not
    /// followed by an identifier passes through unchanged.
    fn template_substitute(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '@' && i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[start..j].iter().collect();
                match self.locals.get(&name) {
                    Some(v) => out.push_str(&v.to_display()),
                    None => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
                i = j;
            } else {
                out.push(chars[i]);
                i += 1;
            }
        }
        out
    }
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_sql)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Matches only the enum discriminant, ignoring comparable fields — used
/// internally to silence "unused" lints on `BinOp` when formatting errors.
#[allow(dead_code)]
fn _assert_binop_display(op: BinOp) -> &'static str {
    op.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_query_template;

    fn eval(src: &str) -> String {
        let registry = MacroRegistry::new();
        let mut ev = MacroEvaluator::new(&registry);
        ev.bind("start_date", Value::Str("2021-01-01".into()));
        let node = parse_query_template(src).unwrap();
        ev.render(&node).unwrap()
    }

    #[test]
    fn clause_macro_true_includes_clause() {
        let out = eval("SELECT x FROM t @WHERE(TRUE) x > 1");
        assert_eq!(out, "SELECT x FROM t WHERE x > 1");
    }

    #[test]
    fn clause_macro_false_drops_clause() {
        let out = eval("SELECT x FROM t @WHERE(FALSE) x > 1");
        assert_eq!(out, "SELECT x FROM t ");
    }

    #[test]
    fn var_substitution() {
        let out = eval("SELECT * FROM t WHERE ds = @start_date");
        assert_eq!(out, "SELECT * FROM t WHERE ds = '2021-01-01'");
    }

    #[test]
    fn no_macro_nodes_remain_is_trivially_true_after_render() {
        let node = parse_query_template("SELECT @EACH([1,2,3], x -> x)").unwrap();
        assert!(node.contains_macro());
        let registry = MacroRegistry::new();
        let mut ev = MacroEvaluator::new(&registry);
        let rendered = ev.render(&node).unwrap();
        assert_eq!(rendered, "SELECT 1, 2, 3");
    }

    #[test]
    fn filter_keeps_truthy() {
        let node = parse_query_template("@FILTER([1, 2, 3], x -> x > 1)").unwrap();
        let registry = MacroRegistry::new();
        let mut ev = MacroEvaluator::new(&registry);
        assert_eq!(ev.render(&node).unwrap(), "2, 3");
    }

    #[test]
    fn reduce_folds_left() {
        let node = parse_query_template("@REDUCE([1, 2, 3], (a, b) -> a + b)").unwrap();
        let registry = MacroRegistry::new();
        let mut ev = MacroEvaluator::new(&registry);
        assert_eq!(ev.render(&node).unwrap(), "6");
    }
}
