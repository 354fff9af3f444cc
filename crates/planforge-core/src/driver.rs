//! State reader/writer and execution-engine traits (spec.md §6,
//! SPEC_FULL.md §6 `[ADD]`). All synchronous and blocking: the core owns
//! no async runtime (spec.md §5).

use std::collections::BTreeMap;

use planforge_error::PlanResult;
use planforge_schemas::{Environment, Snapshot, SnapshotId};

pub trait StateReader {
    fn get_environment(&self, name: &str) -> PlanResult<Option<Environment>>;
    fn get_snapshots(&self, ids: &[SnapshotId]) -> PlanResult<BTreeMap<SnapshotId, Snapshot>>;
    /// Returns every known snapshot for each name. `exclude_external`
    /// drops snapshots belonging to models outside the current project
    /// (spec.md §6). Plain `Vec`, not a set: `Snapshot` does not carry a
    /// total order (its `Fingerprint`/version fields are content, not
    /// sort keys) and forcing one would be artificial.
    fn get_snapshots_by_name(&self, names: &[String], exclude_external: bool) -> PlanResult<Vec<Snapshot>>;
}

pub trait StateWriter {
    fn push_snapshots(&self, snapshots: &[Snapshot]) -> PlanResult<()>;
    fn promote(&self, env: &Environment, no_gaps: bool) -> PlanResult<()>;
    fn delete_environment(&self, name: &str) -> PlanResult<()>;
}

/// A scoped transaction: commits when dropped normally, rolls back if
/// `rollback()` was called first (spec.md §6).
pub trait EngineTransaction {
    fn execute(&mut self, sql: &str) -> PlanResult<()>;
    fn rollback(&mut self);
}

pub trait EngineDriver {
    fn execute(&self, sql: &str) -> PlanResult<()>;
    fn create_table(&self, name: &str, columns: &[(String, String)], properties: &BTreeMap<String, String>) -> PlanResult<()>;
    fn create_view(&self, name: &str, query: &str) -> PlanResult<()>;
    fn create_schema(&self, name: &str) -> PlanResult<()>;
    fn drop_table(&self, name: &str) -> PlanResult<()>;
    fn drop_view(&self, name: &str) -> PlanResult<()>;
    fn table_exists(&self, name: &str) -> PlanResult<bool>;
    fn insert_append(&self, name: &str, query: &str) -> PlanResult<()>;
    fn insert_overwrite(&self, name: &str, query: &str) -> PlanResult<()>;
    fn transaction(&self) -> PlanResult<Box<dyn EngineTransaction + '_>>;
}
