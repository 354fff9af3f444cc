//! `PlanEngine`: the top-level facade wiring configuration, macro
//! registry, rendering, fingerprinting, diffing and promotion into one
//! entry point (SPEC_FULL.md §7 `[ADD]`). Everything it does is a thin,
//! ordered composition of the other modules in this crate — it owns no
//! state of its own beyond the config and registry a host application
//! hands it once at startup.

use std::collections::BTreeMap;

use planforge_common::config::EngineConfig;
use planforge_dag::Dag;
use planforge_error::PlanResult;
use planforge_macro::MacroRegistry;
use planforge_schemas::{Environment, Fingerprint, Model, ModelQuery, Snapshot};

use crate::driver::{EngineDriver, StateReader, StateWriter};
use crate::render::{referenced_table_names, QueryRenderer, RenderContext, RenderWindow};
use crate::validate::validate_model;
use crate::{build_context_diff, compute_fingerprint, ContextDiff};

pub struct PlanEngine {
    config: EngineConfig,
    registry: MacroRegistry,
}

impl PlanEngine {
    /// Builds an engine from its config and macro registry. Initializes
    /// the process-global tracing subscriber (idempotent) so every
    /// operation below logs through `tracing` rather than stdout.
    pub fn new(config: EngineConfig, registry: MacroRegistry) -> Self {
        planforge_common::logging::init_tracing("info");
        PlanEngine { config, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    /// Builds the model-name dependency DAG by rendering every SQL
    /// model once and intersecting its referenced table names against
    /// `models`. Models with no SQL query (seeds, Python entrypoints)
    /// are still added as nodes so they sort correctly, just with no
    /// discovered edges.
    ///
    /// Each rendered SQL model is also validated here (explicit casts,
    /// no `SELECT *`, projection/partition-column invariants) so a
    /// model that fails validation is rejected before its fingerprint
    /// or snapshot is ever computed.
    pub fn build_dependency_dag(&self, models: &BTreeMap<String, Model>) -> PlanResult<Dag<String>> {
        let mut dag = Dag::new();
        let mut renderer = QueryRenderer::new(self.registry.clone());
        let ctx = RenderContext::default();
        let models_by_name: BTreeMap<String, &Model> =
            models.iter().map(|(name, model)| (name.clone(), model)).collect();

        for (name, model) in models {
            dag.add_node(name.clone());
            if !matches!(model.query, ModelQuery::Sql(_)) {
                continue;
            }
            let query = renderer.render(model, RenderWindow::epoch(), &ctx, &models_by_name)?;
            validate_model(model, &query)?;
            for referenced in referenced_table_names(&query) {
                if referenced != *name && models.contains_key(&referenced) {
                    dag.add_edge(name.clone(), referenced);
                }
            }
        }
        Ok(dag)
    }

    /// Computes every model's fingerprint in dependency order, so each
    /// model's `parent_data_hash` is built from already-computed parent
    /// `data_hash`es (spec.md §4.E).
    pub fn fingerprint_all(&self, models: &BTreeMap<String, Model>) -> PlanResult<BTreeMap<String, Fingerprint>> {
        let dag = self.build_dependency_dag(models)?;
        let models_by_name: BTreeMap<String, &Model> =
            models.iter().map(|(name, model)| (name.clone(), model)).collect();

        let mut fingerprints: BTreeMap<String, Fingerprint> = BTreeMap::new();
        for name in dag.topological_order()? {
            let Some(model) = models.get(&name) else {
                continue;
            };
            let parents: Vec<(String, String)> = dag
                .parents_of(&name)
                .filter_map(|parent| fingerprints.get(parent).map(|fp| (parent.clone(), fp.data_hash.clone())))
                .collect();
            let fp = compute_fingerprint(model, &parents, &self.registry, &models_by_name)?;
            tracing::debug!(model = %name, data_hash = %fp.data_hash, "computed fingerprint");
            fingerprints.insert(name, fp);
        }
        Ok(fingerprints)
    }

    /// Fingerprints every model and wraps each result in a freshly
    /// minted `Snapshot`, in dependency order so parent `SnapshotId`s
    /// exist before a child references them.
    pub fn snapshots_for(&self, models: &BTreeMap<String, Model>) -> PlanResult<BTreeMap<String, Snapshot>> {
        let dag = self.build_dependency_dag(models)?;
        let models_by_name: BTreeMap<String, &Model> =
            models.iter().map(|(name, model)| (name.clone(), model)).collect();

        let mut fingerprints: BTreeMap<String, Fingerprint> = BTreeMap::new();
        let mut snapshots: BTreeMap<String, Snapshot> = BTreeMap::new();
        for name in dag.topological_order()? {
            let Some(model) = models.get(&name) else {
                continue;
            };
            let parent_names: Vec<String> = dag.parents_of(&name).cloned().collect();
            let parents_data_hashes: Vec<(String, String)> = parent_names
                .iter()
                .filter_map(|p| fingerprints.get(p).map(|fp| (p.clone(), fp.data_hash.clone())))
                .collect();
            let fp = compute_fingerprint(model, &parents_data_hashes, &self.registry, &models_by_name)?;
            let parent_ids = parent_names
                .iter()
                .filter_map(|p| snapshots.get(p).map(Snapshot::snapshot_id))
                .collect();
            fingerprints.insert(name.clone(), fp.clone());
            snapshots.insert(name.clone(), Snapshot::new(name, fp, parent_ids, 0));
        }
        Ok(snapshots)
    }

    /// Diffs locally-built snapshots against `env_name`'s remote state
    /// (spec.md §4.G).
    pub fn diff(
        &self,
        env_name: &str,
        local_snapshots: &BTreeMap<String, Snapshot>,
        state: &dyn StateReader,
        now: i64,
    ) -> PlanResult<ContextDiff> {
        build_context_diff(env_name, local_snapshots, state, now)
    }

    /// Promotes `snapshots` into `env`, creating physical tables from
    /// `rendered_queries` as needed (spec.md §4.H).
    pub fn promote(
        &self,
        env: &Environment,
        snapshots: &[Snapshot],
        rendered_queries: &BTreeMap<String, String>,
        no_gaps: bool,
        driver: &dyn EngineDriver,
        writer: &dyn StateWriter,
    ) -> PlanResult<()> {
        crate::promote::promote(env, snapshots, rendered_queries, &self.config.physical_schema, no_gaps, driver, writer)
    }

    /// Drops environment views for models no longer present.
    pub fn demote(&self, env: &Environment, dropped_model_names: &[String], driver: &dyn EngineDriver) -> PlanResult<()> {
        crate::promote::demote(env, dropped_model_names, &self.config.physical_schema, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn model(name_and_src: &str) -> Model {
        Model::load(Path::new("m.sql"), name_and_src).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            physical_schema: "sqlmesh".to_string(),
            default_dialect: "generic".to_string(),
            default_start: None,
            macro_registry_modules: Vec::new(),
        }
    }

    #[test]
    fn fingerprints_respect_dependency_order() {
        let mut models = BTreeMap::new();
        models.insert(
            "a".to_string(),
            model("MODEL(\n  name = a,\n  kind = FULL\n)\nSELECT CAST(x AS INT) FROM raw.src"),
        );
        models.insert(
            "b".to_string(),
            model("MODEL(\n  name = b,\n  kind = FULL\n)\nSELECT CAST(x AS INT) FROM a"),
        );

        let engine = PlanEngine::new(config(), MacroRegistry::new());
        let fingerprints = engine.fingerprint_all(&models).unwrap();

        assert!(fingerprints.contains_key("a"));
        assert!(fingerprints.contains_key("b"));
        assert_ne!(fingerprints["a"].parent_data_hash, fingerprints["b"].parent_data_hash);
    }

    #[test]
    fn snapshots_for_links_parent_snapshot_ids() {
        let mut models = BTreeMap::new();
        models.insert(
            "a".to_string(),
            model("MODEL(\n  name = a,\n  kind = FULL\n)\nSELECT CAST(x AS INT) FROM raw.src"),
        );
        models.insert(
            "b".to_string(),
            model("MODEL(\n  name = b,\n  kind = FULL\n)\nSELECT CAST(x AS INT) FROM a"),
        );

        let engine = PlanEngine::new(config(), MacroRegistry::new());
        let snapshots = engine.snapshots_for(&models).unwrap();

        let b = &snapshots["b"];
        assert_eq!(b.parents.len(), 1);
        assert_eq!(b.parents[0], snapshots["a"].snapshot_id());
    }

    #[test]
    fn detects_cyclic_model_references() {
        let mut models = BTreeMap::new();
        models.insert(
            "a".to_string(),
            model("MODEL(\n  name = a,\n  kind = FULL\n)\nSELECT x FROM b"),
        );
        models.insert(
            "b".to_string(),
            model("MODEL(\n  name = b,\n  kind = FULL\n)\nSELECT x FROM a"),
        );

        let engine = PlanEngine::new(config(), MacroRegistry::new());
        assert!(engine.fingerprint_all(&models).is_err());
    }
}
