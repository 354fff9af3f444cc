//! Model fingerprinting (spec.md §4.E).

use itertools::Itertools;

use planforge_error::PlanResult;
use planforge_macro::{MacroNode, MacroRegistry};
use planforge_schemas::digest::digest;
use planforge_schemas::{Fingerprint, Model};

use crate::render::{QueryRenderer, RenderContext, RenderWindow};

/// Computes `fingerprint(m)` given its already-computed parent data
/// hashes. Parents are expected pre-sorted by name (DAG-topological,
/// name-tie-broken) per spec.md §4.E.
pub fn compute_fingerprint(
    model: &Model,
    parents_data_hashes: &[(String, String)],
    registry: &MacroRegistry,
    models_by_name: &std::collections::BTreeMap<String, &Model>,
) -> PlanResult<Fingerprint> {
    let mut renderer = QueryRenderer::new(registry.clone());
    let ctx = RenderContext::default();

    let rendered = match &model.query {
        planforge_schemas::ModelQuery::Sql(_) => {
            let query = renderer.render(model, RenderWindow::epoch(), &ctx, models_by_name)?;
            query.to_string()
        }
        planforge_schemas::ModelQuery::Python { entrypoint } => entrypoint.clone(),
        planforge_schemas::ModelQuery::Seed(seed) => {
            planforge_schemas::seed::seed_content_digest(&seed.csv_path)?
        }
    };

    let pre_statements_canonical = canonical_pre_statements(&model.extra_statements);

    let data_hash = digest([
        rendered.as_str(),
        pre_statements_canonical.as_str(),
        model_kind_str(model),
        model.time_column.as_ref().map(|t| t.name.as_str()).unwrap_or(""),
        &model.partitioned_by.join(","),
        model.storage_format.as_deref().unwrap_or(""),
        model.dialect.as_str(),
    ]);

    let metadata_hash = digest([
        model.owner.as_deref().unwrap_or(""),
        model.description.as_deref().unwrap_or(""),
        model.cron.as_ref().map(|c| c.raw.as_str()).unwrap_or(""),
        &model.batch_size.map(|n| n.to_string()).unwrap_or_default(),
        model.start.as_deref().unwrap_or(""),
        model.stamp.as_deref().unwrap_or(""),
        &model.audits.iter().sorted().join(","),
    ]);

    let parent_data_hash = digest(
        parents_data_hashes
            .iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, h)| h.as_str()),
    );

    Ok(Fingerprint {
        data_hash,
        metadata_hash,
        parent_data_hash,
    })
}

fn model_kind_str(model: &Model) -> &'static str {
    use planforge_schemas::ModelKind;
    match model.kind {
        ModelKind::IncrementalByTime => "INCREMENTAL_BY_TIME",
        ModelKind::IncrementalByKey => "INCREMENTAL_BY_KEY",
        ModelKind::Full => "FULL",
        ModelKind::Snapshot => "SNAPSHOT",
        ModelKind::View => "VIEW",
        ModelKind::Embedded => "EMBEDDED",
        ModelKind::Seed => "SEED",
    }
}

/// Canonical text for the model's non-`@DEF` pre-statements. Debug
/// formatting of the macro AST is used rather than a SQL pretty-printer:
/// determinism, not readability, is the only property `data_hash` needs
/// from this input.
fn canonical_pre_statements(statements: &[MacroNode]) -> String {
    statements
        .iter()
        .filter(|s| !matches!(s, MacroNode::Def { .. }))
        .map(|s| format!("{s:?}"))
        .join("\u{0}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn model(src: &str) -> Model {
        Model::load(Path::new("m.sql"), src).unwrap()
    }

    #[test]
    fn stable_across_repeated_calls() {
        let m = model("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a FROM raw.t");
        let registry = MacroRegistry::new();
        let models = std::collections::BTreeMap::new();
        let fp1 = compute_fingerprint(&m, &[], &registry, &models).unwrap();
        let fp2 = compute_fingerprint(&m, &[], &registry, &models).unwrap();
        assert_eq!(fp1.data_hash, fp2.data_hash);
        assert_eq!(fp1.metadata_hash, fp2.metadata_hash);
    }

    #[test]
    fn metadata_only_change_leaves_data_hash_invariant() {
        let a = model("MODEL(\n  name = t,\n  kind = FULL,\n  owner = alice\n)\nSELECT a FROM raw.t");
        let b = model("MODEL(\n  name = t,\n  kind = FULL,\n  owner = bob\n)\nSELECT a FROM raw.t");
        let registry = MacroRegistry::new();
        let models = std::collections::BTreeMap::new();
        let fp_a = compute_fingerprint(&a, &[], &registry, &models).unwrap();
        let fp_b = compute_fingerprint(&b, &[], &registry, &models).unwrap();
        assert_eq!(fp_a.data_hash, fp_b.data_hash);
        assert_ne!(fp_a.metadata_hash, fp_b.metadata_hash);
    }

    #[test]
    fn query_change_changes_data_hash() {
        let a = model("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a FROM raw.t");
        let b = model("MODEL(\n  name = t,\n  kind = FULL\n)\nSELECT a, b FROM raw.t");
        let registry = MacroRegistry::new();
        let models = std::collections::BTreeMap::new();
        let fp_a = compute_fingerprint(&a, &[], &registry, &models).unwrap();
        let fp_b = compute_fingerprint(&b, &[], &registry, &models).unwrap();
        assert_ne!(fp_a.data_hash, fp_b.data_hash);
    }
}
