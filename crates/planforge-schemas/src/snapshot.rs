//! Snapshot identity (spec.md §3, §4.E, §4.F).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `(data_hash, metadata_hash, parent_data_hash)`, each a 64-char hex
/// BLAKE3 digest (see [`crate::digest`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub data_hash: String,
    pub metadata_hash: String,
    pub parent_data_hash: String,
}

/// Compares only the `data_hash` component — the distinction load-bearing
/// for indirect-change version reuse in the context diff (spec.md §4.G).
pub fn data_hash_matches(a: &Fingerprint, b: &Fingerprint) -> bool {
    a.data_hash == b.data_hash
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId {
    pub name: String,
    pub data_hash: String,
    pub metadata_hash: String,
    pub parent_data_hash: String,
}

impl SnapshotId {
    pub fn new(name: impl Into<String>, fingerprint: &Fingerprint) -> Self {
        SnapshotId {
            name: name.into(),
            data_hash: fingerprint.data_hash.clone(),
            metadata_hash: fingerprint.metadata_hash.clone(),
            parent_data_hash: fingerprint.parent_data_hash.clone(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            data_hash: self.data_hash.clone(),
            metadata_hash: self.metadata_hash.clone(),
            parent_data_hash: self.parent_data_hash.clone(),
        }
    }
}

/// A version a model has held at some point: the physical-table key
/// (`version`) paired with the `data_hash` that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVersion {
    pub data_hash: String,
    pub version: String,
}

/// A closed `[start, end]` span of backfilled days, in days-since-CE
/// (`chrono::NaiveDate::num_days_from_ce`) so ranges compare and merge
/// without reference to any particular epoch.
pub type Interval = (i64, i64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub version: String,
    pub previous_versions: Vec<DataVersion>,
    pub indirect_versions: BTreeMap<String, Vec<DataVersion>>,
    pub parents: Vec<SnapshotId>,
    pub created_ts: i64,
    pub unpaused_ts: Option<i64>,
    /// Merged, non-overlapping ranges this snapshot's physical table has
    /// actually been backfilled for (spec.md §4.H step 5).
    pub intervals: Vec<Interval>,
}

impl Snapshot {
    /// Builds a freshly-minted snapshot for a model seen for the first
    /// time, per spec.md §4.F: `version` starts out equal to `data_hash`.
    pub fn new(name: impl Into<String>, fingerprint: Fingerprint, parents: Vec<SnapshotId>, created_ts: i64) -> Self {
        let name = name.into();
        let version = fingerprint.data_hash.clone();
        Snapshot {
            name,
            fingerprint,
            version,
            previous_versions: Vec::new(),
            indirect_versions: BTreeMap::new(),
            parents,
            created_ts,
            unpaused_ts: None,
            intervals: Vec::new(),
        }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(&self.name, &self.fingerprint)
    }

    pub fn data_hash_matches(&self, other: &Fingerprint) -> bool {
        data_hash_matches(&self.fingerprint, other)
    }

    /// The most recent data version this snapshot descended from, if any.
    pub fn previous_version(&self) -> Option<&DataVersion> {
        self.previous_versions.last()
    }

    /// `previous_versions` plus this snapshot's own current version,
    /// in chronological order — the full revival candidate list.
    pub fn all_versions(&self) -> Vec<DataVersion> {
        let mut v = self.previous_versions.clone();
        v.push(DataVersion {
            data_hash: self.fingerprint.data_hash.clone(),
            version: self.version.clone(),
        });
        v
    }

    /// `"{physical_schema}.{name_with_dots_to_underscores}__{version}"`
    /// (spec.md §4.F / §6).
    pub fn table_name(&self, physical_schema: &str) -> String {
        let flattened = self.name.replace('.', "__");
        format!("{physical_schema}.{flattened}__{}", self.version)
    }

    /// Forces a brand new physical table identity when neither side of a
    /// diverged indirect-modification history dominates the other
    /// (spec.md §4.G step 8, `fresh()`). Hashed over the full fingerprint
    /// rather than just `data_hash` so a fresh version can never
    /// collide with one `data_hash` alone would have produced.
    pub fn fresh_version(&self) -> String {
        crate::digest::digest([
            self.name.as_str(),
            self.fingerprint.data_hash.as_str(),
            self.fingerprint.metadata_hash.as_str(),
            self.fingerprint.parent_data_hash.as_str(),
            "fresh",
        ])
    }

    /// Records `[start, end]` as backfilled, coalescing it with any
    /// overlapping or adjacent interval already recorded.
    pub fn add_interval(&mut self, start: i64, end: i64) {
        self.intervals.push((start, end));
        self.intervals.sort_by_key(|i| i.0);
        let mut merged: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for &(s, e) in &self.intervals {
            match merged.last_mut() {
                Some(last) if s <= last.1 + 1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.intervals = merged;
    }

    /// Whether the merged intervals contain one contiguous span that
    /// fully covers `[start, end]`.
    pub fn covers(&self, start: i64, end: i64) -> bool {
        self.intervals.iter().any(|&(s, e)| s <= start && end <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(data: &str) -> Fingerprint {
        Fingerprint {
            data_hash: data.to_string(),
            metadata_hash: "m".to_string(),
            parent_data_hash: "p".to_string(),
        }
    }

    #[test]
    fn fresh_version_new_snapshot_equals_data_hash() {
        let s = Snapshot::new("a", fp("h1"), vec![], 0);
        assert_eq!(s.version, "h1");
    }

    #[test]
    fn data_hash_matches_ignores_other_components() {
        let a = fp("h1");
        let mut b = fp("h1");
        b.metadata_hash = "different".to_string();
        assert!(data_hash_matches(&a, &b));
    }

    #[test]
    fn fresh_version_is_deterministic_and_distinct_from_data_hash() {
        let s = Snapshot::new("a", fp("h1"), vec![], 0);
        let fresh = s.fresh_version();
        assert_eq!(fresh, s.fresh_version());
        assert_ne!(fresh, s.version);
    }

    #[test]
    fn add_interval_merges_adjacent_and_overlapping_ranges() {
        let mut s = Snapshot::new("a", fp("h1"), vec![], 0);
        s.add_interval(1, 5);
        s.add_interval(6, 10);
        s.add_interval(3, 4);
        assert_eq!(s.intervals, vec![(1, 10)]);
    }

    #[test]
    fn add_interval_keeps_disjoint_ranges_separate() {
        let mut s = Snapshot::new("a", fp("h1"), vec![], 0);
        s.add_interval(1, 5);
        s.add_interval(10, 15);
        assert_eq!(s.intervals, vec![(1, 5), (10, 15)]);
    }

    #[test]
    fn covers_requires_a_single_contiguous_span() {
        let mut s = Snapshot::new("a", fp("h1"), vec![], 0);
        s.add_interval(1, 5);
        s.add_interval(10, 15);
        assert!(!s.covers(1, 15));
        assert!(s.covers(1, 5));
        assert!(!s.covers(1, 6));
    }
}
