//! Model, snapshot and environment data model, plus the fingerprint
//! digest primitive they all build on (spec.md §3, §4.E/F).

pub mod audit;
pub mod cron;
pub mod digest;
pub mod environment;
pub mod model;
pub mod seed;
pub mod snapshot;

pub use audit::Audit;
pub use environment::{Environment, SnapshotTableInfo};
pub use model::{Model, ModelKind, ModelQuery, SeedSource, TimeColumn};
pub use snapshot::{data_hash_matches, DataVersion, Fingerprint, Interval, Snapshot, SnapshotId};
