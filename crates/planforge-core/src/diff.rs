//! Context diff: reconciling locally-built snapshots with a remote
//! environment (spec.md §4.G).

use std::collections::BTreeMap;

use planforge_error::PlanResult;
use planforge_schemas::{data_hash_matches, Environment, Snapshot, SnapshotId};

use crate::driver::StateReader;

#[derive(Debug, Clone)]
pub struct ContextDiff {
    pub environment: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// name -> (new snapshot, old snapshot).
    pub modified_snapshots: BTreeMap<String, (Snapshot, Snapshot)>,
    pub snapshots: BTreeMap<String, Snapshot>,
    pub new_snapshots: Vec<Snapshot>,
    pub previous_plan_id: Option<String>,
}

impl ContextDiff {
    /// `directly_modified(name) ⇔ name ∈ modified ∧ ¬data_hash_matches(new, old)`.
    pub fn directly_modified(&self, name: &str) -> bool {
        match self.modified_snapshots.get(name) {
            Some((new, old)) => !data_hash_matches(&new.fingerprint, &old.fingerprint),
            None => false,
        }
    }

    pub fn indirectly_modified(&self, name: &str) -> bool {
        self.modified_snapshots.contains_key(name) && !self.directly_modified(name)
    }
}

/// A child's stored indirect-version history, tagged with the
/// `created_ts` of the parent snapshot it was observed under — used to
/// pick the most recent observation when reconciling (spec.md §4.G step 7).
struct IndirectRemote {
    versions: Vec<planforge_schemas::DataVersion>,
    created_ts: i64,
}

/// Builds the `ContextDiff` for `local_snapshots` against `env_name` in
/// `state`, per spec.md §4.G steps 1-9. `now` supplies `created_ts` for
/// snapshots persisted for the first time by this diff (the caller
/// stamps it; the core does not read the clock itself).
pub fn build_context_diff(
    env_name: &str,
    local_snapshots: &BTreeMap<String, Snapshot>,
    state: &dyn StateReader,
    now: i64,
) -> PlanResult<ContextDiff> {
    let env = state.get_environment(env_name)?;
    let existing_info: BTreeMap<String, Snapshot> = match &env {
        Some(e) => e
            .snapshots
            .iter()
            .filter_map(|info| {
                state
                    .get_snapshots(std::slice::from_ref(&info.snapshot_id))
                    .ok()
                    .and_then(|m| m.get(&info.snapshot_id).cloned())
                    .map(|s| (info.name.clone(), s))
            })
            .collect(),
        None => BTreeMap::new(),
    };

    let added: Vec<String> = local_snapshots
        .keys()
        .filter(|name| !existing_info.contains_key(*name))
        .cloned()
        .collect();

    let removed: Vec<String> = existing_info
        .keys()
        .filter(|name| !local_snapshots.contains_key(*name))
        .cloned()
        .collect();

    let modified_info: BTreeMap<String, Snapshot> = local_snapshots
        .iter()
        .filter(|(name, snap)| {
            !added.contains(name)
                && existing_info
                    .get(*name)
                    .map(|old| old.fingerprint != snap.fingerprint)
                    .unwrap_or(false)
        })
        .filter_map(|(name, _)| existing_info.get(name).map(|old| (name.clone(), old.clone())))
        .collect();

    let mut stored_ids: Vec<SnapshotId> = modified_info.values().map(Snapshot::snapshot_id).collect();
    for snap in local_snapshots.values() {
        stored_ids.push(snap.snapshot_id());
    }
    let stored = state.get_snapshots(&stored_ids)?;

    let mut merged: BTreeMap<String, Snapshot> = BTreeMap::new();
    let mut modified: BTreeMap<String, (Snapshot, Snapshot)> = BTreeMap::new();
    let mut new_snapshots: Vec<Snapshot> = Vec::new();
    let mut indirect_remote: BTreeMap<String, IndirectRemote> = BTreeMap::new();

    for (name, snap) in local_snapshots {
        let prev = modified_info.get(name);
        let existing = stored.get(&snap.snapshot_id());

        if let Some(existing) = existing {
            merged.insert(name.clone(), existing.clone());
            if let Some(prev) = prev {
                if let Some(prev_stored) = stored.get(&prev.snapshot_id()) {
                    modified.insert(name.clone(), (existing.clone(), prev_stored.clone()));
                }
                for (child, versions) in &existing.indirect_versions {
                    let replace = match indirect_remote.get(child) {
                        Some(cur) => cur.created_ts < existing.created_ts,
                        None => true,
                    };
                    if replace {
                        indirect_remote.insert(
                            child.clone(),
                            IndirectRemote {
                                versions: versions.clone(),
                                created_ts: existing.created_ts,
                            },
                        );
                    }
                }
            }
        } else {
            let mut new_snap = snap.clone();
            new_snap.created_ts = now;
            if let Some(prev) = prev {
                new_snap.previous_versions = prev.all_versions();
                if let Some(prev_stored) = stored.get(&prev.snapshot_id()) {
                    modified.insert(name.clone(), (new_snap.clone(), prev_stored.clone()));
                }
            }
            merged.insert(name.clone(), new_snap.clone());
            new_snapshots.push(new_snap);
        }
    }

    // Step 8: indirect-change version reuse.
    for snap in &mut new_snapshots {
        let prev_version = match snap.previous_version() {
            Some(v) => v.clone(),
            None => continue,
        };
        if prev_version.data_hash != snap.fingerprint.data_hash {
            continue;
        }
        let remote = match indirect_remote.get(&snap.name) {
            Some(r) => r,
            None => continue,
        };
        let remote_head = match remote.versions.last() {
            Some(v) => v.version.clone(),
            None => continue,
        };
        let local_head = prev_version.version.clone();

        let local_contains_remote_head = snap
            .previous_versions
            .iter()
            .any(|v| v.version == remote_head);
        let remote_contains_local_head = remote.versions.iter().any(|v| v.version == local_head);

        let new_version = if local_contains_remote_head {
            local_head
        } else if remote_contains_local_head {
            remote_head
        } else {
            snap.fresh_version()
        };
        snap.version = new_version.clone();
        if let Some(entry) = merged.get_mut(&snap.name) {
            entry.version = new_version.clone();
        }
        if let Some((new_snap, _)) = modified.get_mut(&snap.name) {
            new_snap.version = new_version;
        }
    }

    Ok(ContextDiff {
        environment: env_name.to_string(),
        added,
        removed,
        modified_snapshots: modified,
        snapshots: merged,
        new_snapshots,
        previous_plan_id: env.map(|e| e.plan_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use planforge_schemas::Fingerprint;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeState {
        env: Option<Environment>,
        snapshots: Mutex<BTreeMap<SnapshotId, Snapshot>>,
    }

    impl StateReader for FakeState {
        fn get_environment(&self, _name: &str) -> PlanResult<Option<Environment>> {
            Ok(self.env.clone())
        }
        fn get_snapshots(&self, ids: &[SnapshotId]) -> PlanResult<BTreeMap<SnapshotId, Snapshot>> {
            let store = self.snapshots.lock().unwrap();
            Ok(ids.iter().filter_map(|id| store.get(id).cloned().map(|s| (id.clone(), s))).collect())
        }
        fn get_snapshots_by_name(&self, _names: &[String], _exclude_external: bool) -> PlanResult<Vec<Snapshot>> {
            Ok(self.snapshots.lock().unwrap().values().cloned().collect())
        }
    }

    fn fp(data: &str) -> Fingerprint {
        Fingerprint {
            data_hash: data.to_string(),
            metadata_hash: "m".to_string(),
            parent_data_hash: "p".to_string(),
        }
    }

    #[test]
    fn added_model_with_no_remote_environment() {
        let state = FakeState {
            env: None,
            snapshots: Mutex::new(BTreeMap::new()),
        };
        let mut local = BTreeMap::new();
        local.insert("a".to_string(), Snapshot::new("a", fp("h1"), vec![], 0));

        let diff = build_context_diff("prod", &local, &state, 100).unwrap();
        assert_eq!(diff.added, vec!["a".to_string()]);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.new_snapshots.len(), 1);
        assert_eq!(diff.snapshots["a"].version, "h1");
    }

    #[test]
    fn directly_modified_model_changes_data_hash() {
        let old_snap = Snapshot::new("a", fp("h1"), vec![], 0);
        let mut store = BTreeMap::new();
        store.insert(old_snap.snapshot_id(), old_snap.clone());

        let env = Environment {
            name: "prod".to_string(),
            snapshots: vec![planforge_schemas::SnapshotTableInfo {
                name: "a".to_string(),
                snapshot_id: old_snap.snapshot_id(),
                view_name: "a".to_string(),
            }],
            start: "2021-01-01".to_string(),
            end: None,
            plan_id: "p0".to_string(),
            previous_plan_id: None,
        };
        let state = FakeState {
            env: Some(env),
            snapshots: Mutex::new(store),
        };

        let mut local = BTreeMap::new();
        local.insert("a".to_string(), Snapshot::new("a", fp("h2"), vec![], 0));

        let diff = build_context_diff("prod", &local, &state, 100).unwrap();
        assert!(diff.directly_modified("a"));
        assert_eq!(diff.new_snapshots.len(), 1);
    }

    #[test]
    fn modified_snapshot_version_stays_in_sync_after_indirect_reuse() {
        let parent_old = Snapshot::new("parent", fp("p_old"), vec![], 0);
        let mut parent_new = Snapshot::new("parent", fp("p_new"), vec![], 40);
        parent_new.indirect_versions.insert(
            "child".to_string(),
            vec![planforge_schemas::DataVersion {
                data_hash: "c_old".to_string(),
                version: "v_old_child".to_string(),
            }],
        );

        let mut child_old = Snapshot::new("child", fp("c_old"), vec![], 0);
        child_old.version = "v_old_child".to_string();

        let mut store = BTreeMap::new();
        store.insert(parent_old.snapshot_id(), parent_old.clone());
        store.insert(parent_new.snapshot_id(), parent_new.clone());
        store.insert(child_old.snapshot_id(), child_old.clone());

        let env = Environment {
            name: "prod".to_string(),
            snapshots: vec![
                planforge_schemas::SnapshotTableInfo {
                    name: "parent".to_string(),
                    snapshot_id: parent_old.snapshot_id(),
                    view_name: "parent".to_string(),
                },
                planforge_schemas::SnapshotTableInfo {
                    name: "child".to_string(),
                    snapshot_id: child_old.snapshot_id(),
                    view_name: "child".to_string(),
                },
            ],
            start: "2021-01-01".to_string(),
            end: None,
            plan_id: "p0".to_string(),
            previous_plan_id: None,
        };

        let state = FakeState {
            env: Some(env),
            snapshots: Mutex::new(store),
        };

        let mut local = BTreeMap::new();
        local.insert("parent".to_string(), Snapshot::new("parent", fp("p_new"), vec![], 0));
        let mut child_fp = fp("c_old");
        child_fp.metadata_hash = "m2".to_string();
        local.insert("child".to_string(), Snapshot::new("child", child_fp, vec![], 0));

        let diff = build_context_diff("prod", &local, &state, 100).unwrap();

        let synced_version = diff.snapshots["child"].version.clone();
        assert_eq!(synced_version, "v_old_child");
        assert_eq!(diff.modified_snapshots["child"].0.version, synced_version);
    }
}
