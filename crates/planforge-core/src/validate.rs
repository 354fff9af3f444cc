//! AST-level model validation (spec.md §3 invariants that require a
//! rendered query): explicit casts, no `SELECT *`, unique/inferrable
//! projection names, partition columns present as projections.
//!
//! Structural checks that don't need a rendered query (kind validity,
//! `time_column` presence, `partitioned_by` dedup) live on
//! `planforge_schemas::Model::load` instead.

use std::collections::BTreeSet;

use sqlparser::ast::{Expr, Query, Select, SelectItem, SetExpr};

use planforge_error::{PlanError, PlanResult};
use planforge_schemas::Model;

pub fn validate_model(model: &Model, rendered: &Query) -> PlanResult<()> {
    let select = top_level_select(rendered).ok_or_else(|| {
        PlanError::config(&model.path, 1, "model query must resolve to a SELECT/UNION")
    })?;

    check_no_star(model, select)?;
    check_explicit_casts(model, select)?;
    let names = check_projection_names(model, select)?;
    check_partition_columns_projected(model, &names)?;
    Ok(())
}

fn top_level_select(query: &Query) -> Option<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Some(select),
        SetExpr::SetOperation { left, .. } => match left.as_ref() {
            SetExpr::Select(select) => Some(select),
            _ => None,
        },
        _ => None,
    }
}

fn check_no_star(model: &Model, select: &Select) -> PlanResult<()> {
    for item in &select.projection {
        if matches!(item, SelectItem::Wildcard(..) | SelectItem::QualifiedWildcard(..)) {
            return Err(PlanError::config(
                &model.path,
                1,
                format!("model '{}' uses SELECT * — every projection must be explicit", model.name),
            ));
        }
    }
    Ok(())
}

/// Every outer projection, after unwrapping its alias, must be an
/// explicit `CAST` — models declare their output types rather than
/// inheriting whatever the source column happens to be.
fn check_explicit_casts(model: &Model, select: &Select) -> PlanResult<()> {
    for item in &select.projection {
        let expr = match item {
            SelectItem::ExprWithAlias { expr, .. } => expr,
            SelectItem::UnnamedExpr(expr) => expr,
            SelectItem::Wildcard(..) | SelectItem::QualifiedWildcard(..) => unreachable!("checked above"),
        };
        if !matches!(expr, Expr::Cast { .. }) {
            return Err(PlanError::config(
                &model.path,
                1,
                format!(
                    "model '{}' has a projection that is not an explicit CAST: {expr}",
                    model.name
                ),
            ));
        }
    }
    Ok(())
}

fn check_projection_names(model: &Model, select: &Select) -> PlanResult<Vec<String>> {
    let mut names = Vec::with_capacity(select.projection.len());
    let mut seen = BTreeSet::new();
    for item in &select.projection {
        let name = match item {
            SelectItem::ExprWithAlias { alias, .. } => alias.value.clone(),
            SelectItem::UnnamedExpr(expr) => infer_name(expr).ok_or_else(|| {
                PlanError::config(
                    &model.path,
                    1,
                    format!(
                        "model '{}' has a projection with no inferrable name: {expr}",
                        model.name
                    ),
                )
            })?,
            SelectItem::Wildcard(..) | SelectItem::QualifiedWildcard(..) => unreachable!("checked above"),
        };
        if !seen.insert(name.clone()) {
            return Err(PlanError::config(
                &model.path,
                1,
                format!("model '{}' has a duplicate projection name '{name}'", model.name),
            ));
        }
        names.push(name);
    }
    Ok(names)
}

fn infer_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()),
        Expr::Cast { expr, .. } => infer_name(expr),
        _ => None,
    }
}

fn check_partition_columns_projected(model: &Model, projected: &[String]) -> PlanResult<()> {
    for col in model.effective_partitioned_by() {
        if !projected.iter().any(|p| p.eq_ignore_ascii_case(&col)) {
            return Err(PlanError::config(
                &model.path,
                1,
                format!(
                    "model '{}' declares partition column '{col}' which is not a projection",
                    model.name
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{QueryRenderer, RenderContext, RenderWindow};
    use planforge_macro::MacroRegistry;
    use std::path::Path;

    fn render(src: &str) -> (Model, Query) {
        let model = Model::load(Path::new("m.sql"), src).unwrap();
        let mut renderer = QueryRenderer::new(MacroRegistry::new());
        let ctx = RenderContext::default();
        let models = std::collections::BTreeMap::new();
        let query = renderer.render(&model, RenderWindow::epoch(), &ctx, &models).unwrap();
        (model, query)
    }

    #[test]
    fn rejects_select_star() {
        let (model, query) = render("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT * FROM raw.t");
        let err = validate_model(&model, &query).unwrap_err();
        assert!(err.to_string().contains("SELECT *"));
    }

    #[test]
    fn accepts_explicit_projections() {
        let (model, query) = render(
            "MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT CAST(a AS INT), CAST(b AS TEXT) AS c FROM raw.t",
        );
        validate_model(&model, &query).unwrap();
    }

    #[test]
    fn rejects_projection_without_explicit_cast() {
        let (model, query) = render("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a, b AS c FROM raw.t");
        let err = validate_model(&model, &query).unwrap_err();
        assert!(err.to_string().contains("explicit CAST"));
    }

    #[test]
    fn rejects_missing_partition_column() {
        let (model, query) = render(
            "MODEL(\n  name = t,\n  kind = FULL,\n  partitioned_by = region\n)\nSELECT CAST(a AS INT) FROM raw.t",
        );
        let err = validate_model(&model, &query).unwrap_err();
        assert!(err.to_string().contains("partition column"));
    }
}
