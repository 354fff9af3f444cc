//! Environments: named views over a set of snapshots (spec.md §3, §4.H).

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotId;

/// One snapshot's membership record within an environment: which
/// snapshot, and the view name it is promoted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTableInfo {
    pub name: String,
    pub snapshot_id: SnapshotId,
    pub view_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub snapshots: Vec<SnapshotTableInfo>,
    pub start: String,
    pub end: Option<String>,
    pub plan_id: String,
    pub previous_plan_id: Option<String>,
}

impl Environment {
    /// Normalizes an environment name the way spec.md §6 names views:
    /// lower-cased, since `{schema}__{env}` participates in a physical
    /// identifier.
    pub fn normalize_name(name: &str) -> String {
        name.trim().to_ascii_lowercase()
    }

    pub fn is_production(&self) -> bool {
        Self::normalize_name(&self.name) == "prod"
    }

    /// `"{schema}__{env}.{view_name}"`, except production uses the
    /// schema verbatim with no `__env` suffix (spec.md §6).
    pub fn view_schema(&self, model_schema: &str) -> String {
        if self.is_production() {
            model_schema.to_string()
        } else {
            format!("{model_schema}__{}", Self::normalize_name(&self.name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Environment {
        Environment {
            name: name.to_string(),
            snapshots: Vec::new(),
            start: "2021-01-01".to_string(),
            end: None,
            plan_id: "p1".to_string(),
            previous_plan_id: None,
        }
    }

    #[test]
    fn production_schema_has_no_suffix() {
        assert_eq!(env("prod").view_schema("sales"), "sales");
    }

    #[test]
    fn dev_schema_gets_env_suffix() {
        assert_eq!(env("dev").view_schema("sales"), "sales__dev");
    }
}
