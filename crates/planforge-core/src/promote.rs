//! Environment transition (spec.md §4.H).

use std::collections::BTreeMap;

use chrono::NaiveDate;

use planforge_error::{PlanError, PlanResult};
use planforge_schemas::{Environment, Snapshot};

use crate::driver::{EngineDriver, StateWriter};

const ENV_DATE_FORMAT: &str = "%Y-%m-%d";

fn epoch_day(date: &str) -> Option<i64> {
    NaiveDate::parse_from_str(date.trim(), ENV_DATE_FORMAT)
        .ok()
        .map(|d| d.num_days_from_ce() as i64)
}

/// `promote(env, snapshots, no_gaps)`.
///
/// Creates any missing physical tables (CTAS from `rendered_queries`,
/// the model's rendered query keyed by name), (re)creates each
/// snapshot's environment view, demotes views for snapshots no longer
/// present, then upserts the environment record. View promotion/
/// demotion for one environment is observed atomically by readers: all
/// of steps 2-4 happen inside one `EngineTransaction`.
pub fn promote(
    env: &Environment,
    snapshots: &[Snapshot],
    rendered_queries: &BTreeMap<String, String>,
    physical_schema: &str,
    no_gaps: bool,
    driver: &dyn EngineDriver,
    writer: &dyn StateWriter,
) -> PlanResult<()> {
    if no_gaps {
        check_no_gaps(env, snapshots)?;
    }

    let mut txn = driver.transaction()?;
    let result = (|| -> PlanResult<()> {
        for snapshot in snapshots {
            let table = snapshot.table_name(physical_schema);
            if !driver.table_exists(&table)? {
                let query = rendered_queries.get(&snapshot.name).ok_or_else(|| {
                    PlanError::state(snapshot.name.clone(), "no rendered query available to create its physical table")
                })?;
                txn.execute(&format!("CREATE TABLE {table} AS {query} WHERE FALSE"))?;
            }
        }
        for snapshot in snapshots {
            let table = snapshot.table_name(physical_schema);
            let view_schema = env.view_schema(physical_schema);
            let view_name = format!("{view_schema}.{}", snapshot.name.replace('.', "__"));
            txn.execute(&format!("CREATE OR REPLACE VIEW {view_name} AS SELECT * FROM {table}"))?;
        }
        Ok(())
    })();

    if result.is_err() {
        txn.rollback();
    }
    result?;

    writer.promote(env, no_gaps)?;
    Ok(())
}

/// Removes views for snapshots dropped from the environment.
pub fn demote(
    env: &Environment,
    dropped_model_names: &[String],
    physical_schema: &str,
    driver: &dyn EngineDriver,
) -> PlanResult<()> {
    let view_schema = env.view_schema(physical_schema);
    let mut txn = driver.transaction()?;
    for name in dropped_model_names {
        let view_name = format!("{view_schema}.{}", name.replace('.', "__"));
        txn.execute(&format!("DROP VIEW IF EXISTS {view_name}"))?;
    }
    Ok(())
}

/// Refuses promotion unless every snapshot's recorded intervals contain
/// one contiguous span covering `[env.start, env.end]` (spec.md §4.H
/// step 5).
fn check_no_gaps(env: &Environment, snapshots: &[Snapshot]) -> PlanResult<()> {
    let Some(end) = &env.end else {
        return Ok(());
    };
    let start_day = epoch_day(&env.start).ok_or_else(|| {
        PlanError::state(env.name.clone(), format!("environment start '{}' is not a valid date", env.start))
    })?;
    let end_day = epoch_day(end).ok_or_else(|| {
        PlanError::state(env.name.clone(), format!("environment end '{end}' is not a valid date"))
    })?;

    for snapshot in snapshots {
        if !snapshot.covers(start_day, end_day) {
            return Err(PlanError::state(
                snapshot.name.clone(),
                format!(
                    "no_gaps promotion requires a contiguous interval covering [{}, {end}]",
                    env.start
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use crate::driver::EngineTransaction;
    use planforge_schemas::Fingerprint;

    struct FakeTxn;
    impl EngineTransaction for FakeTxn {
        fn execute(&mut self, _sql: &str) -> PlanResult<()> {
            Ok(())
        }
        fn rollback(&mut self) {}
    }

    #[derive(Default)]
    struct FakeDriver {
        existing_tables: Mutex<BTreeSet<String>>,
    }
    impl EngineDriver for FakeDriver {
        fn execute(&self, _sql: &str) -> PlanResult<()> {
            Ok(())
        }
        fn create_table(&self, _name: &str, _columns: &[(String, String)], _properties: &BTreeMap<String, String>) -> PlanResult<()> {
            Ok(())
        }
        fn create_view(&self, _name: &str, _query: &str) -> PlanResult<()> {
            Ok(())
        }
        fn create_schema(&self, _name: &str) -> PlanResult<()> {
            Ok(())
        }
        fn drop_table(&self, _name: &str) -> PlanResult<()> {
            Ok(())
        }
        fn drop_view(&self, _name: &str) -> PlanResult<()> {
            Ok(())
        }
        fn table_exists(&self, name: &str) -> PlanResult<bool> {
            Ok(self.existing_tables.lock().unwrap().contains(name))
        }
        fn insert_append(&self, _name: &str, _query: &str) -> PlanResult<()> {
            Ok(())
        }
        fn insert_overwrite(&self, _name: &str, _query: &str) -> PlanResult<()> {
            Ok(())
        }
        fn transaction(&self) -> PlanResult<Box<dyn EngineTransaction + '_>> {
            Ok(Box::new(FakeTxn))
        }
    }

    struct FakeWriter;
    impl StateWriter for FakeWriter {
        fn push_snapshots(&self, _snapshots: &[Snapshot]) -> PlanResult<()> {
            Ok(())
        }
        fn promote(&self, _env: &Environment, _no_gaps: bool) -> PlanResult<()> {
            Ok(())
        }
        fn delete_environment(&self, _name: &str) -> PlanResult<()> {
            Ok(())
        }
    }

    fn fp() -> Fingerprint {
        Fingerprint {
            data_hash: "h1".to_string(),
            metadata_hash: "m".to_string(),
            parent_data_hash: "p".to_string(),
        }
    }

    fn env(start: &str, end: &str) -> Environment {
        Environment {
            name: "prod".to_string(),
            snapshots: Vec::new(),
            start: start.to_string(),
            end: Some(end.to_string()),
            plan_id: "p1".to_string(),
            previous_plan_id: None,
        }
    }

    #[test]
    fn no_gaps_refuses_promotion_when_snapshot_has_no_recorded_interval() {
        let snapshot = Snapshot::new("a", fp(), vec![], 0);
        let e = env("2021-01-01", "2021-01-31");
        let err = check_no_gaps(&e, std::slice::from_ref(&snapshot)).unwrap_err();
        assert!(err.to_string().contains("contiguous interval"));
    }

    #[test]
    fn no_gaps_refuses_promotion_when_interval_has_a_gap() {
        let mut snapshot = Snapshot::new("a", fp(), vec![], 0);
        snapshot.add_interval(epoch_day("2021-01-01").unwrap(), epoch_day("2021-01-10").unwrap());
        snapshot.add_interval(epoch_day("2021-01-20").unwrap(), epoch_day("2021-01-31").unwrap());
        let e = env("2021-01-01", "2021-01-31");
        assert!(check_no_gaps(&e, std::slice::from_ref(&snapshot)).is_err());
    }

    #[test]
    fn no_gaps_allows_promotion_when_interval_fully_covers_the_window() {
        let mut snapshot = Snapshot::new("a", fp(), vec![], 0);
        snapshot.add_interval(epoch_day("2021-01-01").unwrap(), epoch_day("2021-01-31").unwrap());
        let e = env("2021-01-01", "2021-01-31");
        assert!(check_no_gaps(&e, std::slice::from_ref(&snapshot)).is_ok());
    }

    #[test]
    fn promote_succeeds_end_to_end_when_no_gaps_check_passes() {
        let mut snapshot = Snapshot::new("a", fp(), vec![], 0);
        snapshot.add_interval(epoch_day("2021-01-01").unwrap(), epoch_day("2021-01-31").unwrap());
        let e = env("2021-01-01", "2021-01-31");
        let mut rendered = BTreeMap::new();
        rendered.insert("a".to_string(), "SELECT 1".to_string());
        let driver = FakeDriver::default();
        let writer = FakeWriter;

        let result = promote(&e, &[snapshot], &rendered, "sqlmesh", true, &driver, &writer);
        assert!(result.is_ok());
    }

    #[test]
    fn promote_fails_end_to_end_when_no_gaps_check_fails() {
        let snapshot = Snapshot::new("a", fp(), vec![], 0);
        let e = env("2021-01-01", "2021-01-31");
        let rendered = BTreeMap::new();
        let driver = FakeDriver::default();
        let writer = FakeWriter;

        let result = promote(&e, &[snapshot], &rendered, "sqlmesh", true, &driver, &writer);
        assert!(result.is_err());
    }
}
