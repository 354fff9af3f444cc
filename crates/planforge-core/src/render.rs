//! Query rendering (spec.md §4.D / SPEC_FULL.md §4.D').
//!
//! Two stages: the macro evaluator eliminates every `MacroNode` down to
//! plain SQL text (component A/B), then that text is parsed by
//! `sqlparser` for the structural passes — table substitution, model
//! inlining and incremental-predicate injection — that spec.md's
//! "extended AST" would otherwise require forking the host parser for.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Join, ObjectName, Query, Select, SetExpr, TableAlias,
    TableFactor, TableWithJoins,
};
use sqlparser::dialect::{Dialect, GenericDialect};
use sqlparser::parser::Parser;

use planforge_error::{PlanError, PlanResult};
use planforge_macro::{MacroEvaluator, MacroNode, MacroRegistry, Value};
use planforge_schemas::{Model, ModelKind, TimeColumn};

/// The inclusive `[start, end]` window a query is rendered for, plus the
/// `latest` timestamp used for `@latest_ds`-style macros (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl RenderWindow {
    /// A fixed reference window so date macros never pollute a model's
    /// `data_hash` (spec.md §4.E).
    pub fn epoch() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable");
        RenderWindow {
            start: epoch,
            end: epoch,
            latest: epoch,
        }
    }

    fn locals(&self) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("start_date".to_string(), Value::Str(self.start.to_rfc3339()));
        m.insert("end_date".to_string(), Value::Str(self.end.to_rfc3339()));
        m.insert("latest_date".to_string(), Value::Str(self.latest.to_rfc3339()));
        m.insert("start_ds".to_string(), Value::Str(self.start.format("%Y-%m-%d").to_string()));
        m.insert("end_ds".to_string(), Value::Str(self.end.format("%Y-%m-%d").to_string()));
        m.insert("latest_ds".to_string(), Value::Str(self.latest.format("%Y-%m-%d").to_string()));
        m
    }
}

/// What to rewrite table references to, and which referenced models to
/// inline as correlated subqueries (spec.md §4.D steps 4-5).
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// model name -> physical table name.
    pub physical_tables: BTreeMap<String, String>,
    /// model names whose definitions should be inlined in place of a
    /// table reference.
    pub expand: std::collections::BTreeSet<String>,
    /// Extra caller-supplied variables, merged over the window locals.
    pub extra_locals: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    model: String,
    audit: Option<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    latest: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    query: Query,
    canonical: String,
}

/// Memoizes rendering per `(model, audit, start, end, latest)`. Not
/// `Send`/`Sync`: callers must not share a renderer across threads while
/// rendering is in flight (spec.md §5).
#[derive(Default)]
pub struct RenderCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct QueryRenderer {
    registry: MacroRegistry,
    cache: RenderCache,
}

impl QueryRenderer {
    pub fn new(registry: MacroRegistry) -> Self {
        QueryRenderer {
            registry,
            cache: RenderCache::new(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Renders `model`'s query for `window`, consulting and populating
    /// the render cache. `models_by_name` is used to recursively render
    /// models named in `ctx.expand`.
    pub fn render(
        &mut self,
        model: &Model,
        window: RenderWindow,
        ctx: &RenderContext,
        models_by_name: &BTreeMap<String, &Model>,
    ) -> PlanResult<Query> {
        let key = CacheKey {
            model: model.name.clone(),
            audit: None,
            start: window.start,
            end: window.end,
            latest: window.latest,
        };
        if let Some(entry) = self.cache.entries.get(&key) {
            return Ok(entry.query.clone());
        }

        let query = self.render_uncached(model, window, ctx, models_by_name)?;
        let canonical = query.to_string();
        self.cache.entries.insert(
            key,
            CacheEntry {
                query: query.clone(),
                canonical,
            },
        );
        Ok(query)
    }

    fn render_uncached(
        &self,
        model: &Model,
        window: RenderWindow,
        ctx: &RenderContext,
        models_by_name: &BTreeMap<String, &Model>,
    ) -> PlanResult<Query> {
        let template = match &model.query {
            planforge_schemas::ModelQuery::Sql(node) => node,
            planforge_schemas::ModelQuery::Python { .. } => {
                return Err(PlanError::engine(format!(
                    "model '{}' has a Python entrypoint and cannot be rendered as SQL",
                    model.name
                )))
            }
            planforge_schemas::ModelQuery::Seed(_) => {
                return Err(PlanError::engine(format!(
                    "model '{}' is a SEED model and has no query to render",
                    model.name
                )))
            }
        };

        // Steps 1-3: evaluate @DEF statements, then the query template.
        let mut locals = window.locals();
        for (k, v) in &ctx.extra_locals {
            locals.insert(k.clone(), v.clone());
        }
        let mut evaluator = MacroEvaluator::new(&self.registry);
        for (k, v) in locals {
            evaluator.bind(k, v);
        }
        for stmt in &model.extra_statements {
            if let MacroNode::Def { name, expr } = stmt {
                let value = evaluator.eval_expr(expr)?;
                evaluator.bind(name.clone(), value);
            }
        }

        let sql = evaluator.render(template)?;

        let dialect = dialect_for(&model.dialect);
        let mut statements = Parser::parse_sql(dialect.as_ref(), &sql)
            .map_err(|e| PlanError::macro_eval(format!("rendered SQL failed to parse: {e}"), sql.clone(), sql.clone()))?;
        let stmt = statements.pop().ok_or_else(|| {
            PlanError::macro_eval("rendered model produced no SQL statement", sql.clone(), sql.clone())
        })?;
        let mut query = match stmt {
            sqlparser::ast::Statement::Query(q) => *q,
            other => {
                return Err(PlanError::macro_eval(
                    format!("rendered model is not a query: {other}"),
                    sql.clone(),
                    sql,
                ))
            }
        };

        // Step 4: inline expanded models.
        if !ctx.expand.is_empty() {
            self.expand_models(&mut query, ctx, models_by_name, window)?;
        }

        // Step 5: substitute physical table names.
        if !ctx.physical_tables.is_empty() {
            substitute_tables(&mut query, &ctx.physical_tables);
        }

        // Step 6: incremental time-column predicate injection.
        if model.kind == ModelKind::IncrementalByTime {
            if let Some(tc) = &model.time_column {
                inject_time_predicate(&mut query, dialect.as_ref(), tc, window)?;
            }
        }

        // Step 7: algebraic simplification.
        simplify(&mut query);

        Ok(query)
    }

    fn expand_models(
        &self,
        query: &mut Query,
        ctx: &RenderContext,
        models_by_name: &BTreeMap<String, &Model>,
        window: RenderWindow,
    ) -> PlanResult<()> {
        walk_table_factors(query, &mut |tf| {
            if let TableFactor::Table { name, alias, .. } = tf {
                let model_name = name.to_string();
                if ctx.expand.contains(&model_name) {
                    if let Some(inner_model) = models_by_name.get(&model_name) {
                        let mut sub_ctx = ctx.clone();
                        sub_ctx.expand.remove(&model_name);
                        let mut renderer_clone = QueryRenderer {
                            registry: self.registry.clone(),
                            cache: RenderCache::new(),
                        };
                        let inner = renderer_clone.render_uncached(inner_model, window, &sub_ctx, models_by_name)?;
                        let view_alias = alias.clone().unwrap_or_else(|| TableAlias {
                            name: sqlparser::ast::Ident::new(model_name.replace('.', "__")),
                            columns: Vec::new(),
                        });
                        *tf = TableFactor::Derived {
                            lateral: false,
                            subquery: Box::new(inner),
                            alias: Some(view_alias),
                        };
                    }
                }
            }
            Ok(())
        })
    }
}

fn dialect_for(name: &str) -> Box<dyn Dialect> {
    // Every dialect in spec.md's external-collaborator surface maps
    // through `sqlparser`'s generic dialect; specific dialects can be
    // added here without touching the renderer's call sites.
    let _ = name;
    Box::new(GenericDialect {})
}

fn has_group_by(group_by: &GroupByExpr) -> bool {
    !matches!(group_by, GroupByExpr::Expressions(exprs, ..) if exprs.is_empty())
}

/// Walks every `TableFactor` reachable from `query` (FROM lists, JOINs,
/// derived subqueries, CTEs, set operations), applying `f` to each.
fn walk_table_factors(
    query: &mut Query,
    f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>,
) -> PlanResult<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            walk_table_factors(&mut cte.query, f)?;
        }
    }
    walk_set_expr(&mut query.body, f)?;
    Ok(())
}

fn walk_set_expr(
    set_expr: &mut SetExpr,
    f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>,
) -> PlanResult<()> {
    match set_expr {
        SetExpr::Select(select) => walk_select(select, f)?,
        SetExpr::Query(q) => walk_table_factors(q, f)?,
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, f)?;
            walk_set_expr(right, f)?;
        }
        _ => {}
    }
    Ok(())
}

fn walk_select(select: &mut Select, f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>) -> PlanResult<()> {
    for twj in &mut select.from {
        walk_table_with_joins(twj, f)?;
    }
    Ok(())
}

fn walk_table_with_joins(
    twj: &mut TableWithJoins,
    f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>,
) -> PlanResult<()> {
    walk_one_table_factor(&mut twj.relation, f)?;
    for join in &mut twj.joins {
        walk_join(join, f)?;
    }
    Ok(())
}

fn walk_join(join: &mut Join, f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>) -> PlanResult<()> {
    walk_one_table_factor(&mut join.relation, f)
}

fn walk_one_table_factor(
    tf: &mut TableFactor,
    f: &mut impl FnMut(&mut TableFactor) -> PlanResult<()>,
) -> PlanResult<()> {
    if let TableFactor::Derived { subquery, .. } = tf {
        walk_table_factors(subquery, f)?;
    }
    f(tf)
}

/// The format a time column needs no conversion for: the column is
/// assumed to already be a native `DATE`, so the boundary literals
/// compare against it directly.
const NATIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Descends into every `SELECT` in `query` and injects a time-column
/// predicate into `WHERE` unless the select has a `GROUP BY`, in which
/// case into `HAVING` (spec.md §4.D step 6). The declared time column
/// format drives the conversion (spec.md §4.C): the default
/// `%Y-%m-%d` format compares the native column directly, any other
/// format casts the column to text and compares against boundary
/// literals rendered in that same format (spec.md §8 scenario 7).
fn inject_time_predicate(
    query: &mut Query,
    dialect: &dyn Dialect,
    time_col: &TimeColumn,
    window: RenderWindow,
) -> PlanResult<()> {
    let start_literal = window.start.format(&time_col.format).to_string();
    let end_literal = window.end.format(&time_col.format).to_string();

    let predicate_sql = if time_col.format == NATIVE_DATE_FORMAT {
        format!("{} BETWEEN '{start_literal}' AND '{end_literal}'", time_col.name)
    } else {
        format!(
            "CAST({} AS TEXT) BETWEEN '{start_literal}' AND '{end_literal}'",
            time_col.name
        )
    };

    let predicate = Parser::new(dialect)
        .try_with_sql(&predicate_sql)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| PlanError::macro_eval(format!("failed to build incremental predicate: {e}"), predicate_sql.clone(), String::new()))?;

    inject_into_query(query, &predicate)
}

fn inject_into_query(query: &mut Query, predicate: &Expr) -> PlanResult<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            inject_into_query(&mut cte.query, predicate)?;
        }
    }
    inject_into_set_expr(&mut query.body, predicate)
}

fn inject_into_set_expr(set_expr: &mut SetExpr, predicate: &Expr) -> PlanResult<()> {
    match set_expr {
        SetExpr::Select(select) => inject_into_select(select, predicate),
        SetExpr::Query(q) => inject_into_query(q, predicate),
        SetExpr::SetOperation { left, right, .. } => {
            inject_into_set_expr(left, predicate)?;
            inject_into_set_expr(right, predicate)
        }
        _ => Ok(()),
    }
}

fn inject_into_select(select: &mut Select, predicate: &Expr) -> PlanResult<()> {
    for twj in &mut select.from {
        if let TableFactor::Derived { subquery, .. } = &mut twj.relation {
            inject_into_query(subquery, predicate)?;
        }
        for join in &mut twj.joins {
            if let TableFactor::Derived { subquery, .. } = &mut join.relation {
                inject_into_query(subquery, predicate)?;
            }
        }
    }

    let target = if has_group_by(&select.group_by) {
        &mut select.having
    } else {
        &mut select.selection
    };
    *target = Some(match target.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(existing),
            op: BinaryOperator::And,
            right: Box::new(predicate.clone()),
        },
        None => predicate.clone(),
    });
    Ok(())
}

/// Rewrites every `TableFactor::Table` name found in `physical_tables`
/// (model name -> physical table name) to its physical identifier.
fn substitute_tables(query: &mut Query, physical_tables: &BTreeMap<String, String>) {
    let _ = walk_table_factors(query, &mut |tf| {
        if let TableFactor::Table { name, .. } = tf {
            let key = name.to_string();
            if let Some(physical) = physical_tables.get(&key) {
                *name = object_name_from_dotted(physical);
            }
        }
        Ok(())
    });
}

fn object_name_from_dotted(s: &str) -> ObjectName {
    ObjectName(s.split('.').map(sqlparser::ast::Ident::new).collect())
}

/// Collects every table name a rendered query references, for parent
/// discovery ahead of fingerprinting (spec.md §4.E's topological
/// ordering requirement).
pub fn referenced_table_names(query: &Query) -> std::collections::BTreeSet<String> {
    let mut names = std::collections::BTreeSet::new();
    collect_table_names(query, &mut names);
    names
}

fn collect_table_names(query: &Query, names: &mut std::collections::BTreeSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_table_names(&cte.query, names);
        }
    }
    collect_table_names_set_expr(&query.body, names);
}

fn collect_table_names_set_expr(set_expr: &SetExpr, names: &mut std::collections::BTreeSet<String>) {
    match set_expr {
        SetExpr::Select(select) => collect_table_names_select(select, names),
        SetExpr::Query(q) => collect_table_names(q, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_table_names_set_expr(left, names);
            collect_table_names_set_expr(right, names);
        }
        _ => {}
    }
}

fn collect_table_names_select(select: &Select, names: &mut std::collections::BTreeSet<String>) {
    for twj in &select.from {
        collect_table_names_factor(&twj.relation, names);
        for join in &twj.joins {
            collect_table_names_factor(&join.relation, names);
        }
    }
}

fn collect_table_names_factor(tf: &TableFactor, names: &mut std::collections::BTreeSet<String>) {
    match tf {
        TableFactor::Table { name, .. } => {
            names.insert(name.to_string());
        }
        TableFactor::Derived { subquery, .. } => collect_table_names(subquery, names),
        _ => {}
    }
}

/// Folds constant boolean predicates the macro evaluator commonly
/// leaves behind (e.g. `TRUE AND x`), matching spec.md §4.D step 7.
fn simplify(query: &mut Query) {
    let _ = walk_predicates(query, &mut simplify_expr);
}

fn walk_predicates(query: &mut Query, f: &mut impl FnMut(&mut Expr)) -> PlanResult<()> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            walk_predicates(&mut cte.query, f)?;
        }
    }
    walk_predicates_set_expr(&mut query.body, f)
}

fn walk_predicates_set_expr(set_expr: &mut SetExpr, f: &mut impl FnMut(&mut Expr)) -> PlanResult<()> {
    match set_expr {
        SetExpr::Select(select) => {
            if let Some(e) = &mut select.selection {
                f(e);
            }
            if let Some(e) = &mut select.having {
                f(e);
            }
            Ok(())
        }
        SetExpr::Query(q) => walk_predicates(q, f),
        SetExpr::SetOperation { left, right, .. } => {
            walk_predicates_set_expr(left, f)?;
            walk_predicates_set_expr(right, f)
        }
        _ => Ok(()),
    }
}

fn simplify_expr(expr: &mut Expr) {
    if let Expr::BinaryOp { left, op: BinaryOperator::And, right } = expr {
        simplify_expr(left);
        simplify_expr(right);
        if is_true_literal(left) {
            *expr = (**right).clone();
        } else if is_true_literal(right) {
            *expr = (**left).clone();
        }
    }
}

fn is_true_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Value(sqlparser::ast::Value::Boolean(true))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use planforge_macro::MacroRegistry;
    use planforge_schemas::{Model, ModelKind};
    use std::path::Path;

    fn build_model(src: &str) -> Model {
        Model::load(Path::new("m.sql"), src).unwrap()
    }

    #[test]
    fn renders_full_model_query() {
        let model = build_model("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a, b FROM raw.t");
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        assert!(query.to_string().to_uppercase().contains("SELECT"));
    }

    #[test]
    fn injects_incremental_predicate_into_where() {
        let src = "MODEL(\n  name = events,\n  kind = INCREMENTAL_BY_TIME,\n  cron = '@daily',\n  time_column = ds\n)\nSELECT ds, a FROM raw.events";
        let model = build_model(src);
        assert_eq!(model.kind, ModelKind::IncrementalByTime);
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        let rendered = query.to_string();
        assert!(rendered.to_uppercase().contains("BETWEEN"));
        assert!(rendered.to_uppercase().contains("WHERE"));
    }

    #[test]
    fn injects_incremental_predicate_into_having_when_grouped() {
        let src = "MODEL(\n  name = events,\n  kind = INCREMENTAL_BY_TIME,\n  cron = '@daily',\n  time_column = ds\n)\nSELECT ds, COUNT(*) AS c FROM raw.events GROUP BY ds";
        let model = build_model(src);
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        let rendered = query.to_string();
        assert!(rendered.to_uppercase().contains("HAVING"));
    }

    #[test]
    fn casts_time_column_when_format_is_not_native_date() {
        let src = "MODEL(\n  name = events,\n  kind = INCREMENTAL_BY_TIME,\n  cron = '@daily',\n  time_column = (ds, '%Y%m%d')\n)\nSELECT ds, a FROM raw.events";
        let model = build_model(src);
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        let rendered = query.to_string();
        assert!(rendered.contains("CAST(ds AS TEXT) BETWEEN '19700101' AND '19700101'"));
    }

    #[test]
    fn referenced_table_names_collects_joins() {
        let model = build_model(
            "MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a FROM raw.orders o JOIN raw.customers c ON o.customer_id = c.id",
        );
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        let names = referenced_table_names(&query);
        assert!(names.contains("raw.orders"));
        assert!(names.contains("raw.customers"));
    }

    #[test]
    fn substitutes_physical_table_names() {
        let model = build_model("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a FROM raw.source");
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let mut ctx = RenderContext::default();
        ctx.physical_tables.insert("raw.source".to_string(), "sqlmesh__raw.source__abc123".to_string());
        let models: BTreeMap<String, &Model> = BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        assert!(query.to_string().contains("sqlmesh__raw.source__abc123"));
    }
}
