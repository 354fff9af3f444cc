//! Model definitions (spec.md §3/§4.A, §4.C, SPEC_FULL.md [ADD] Seed).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use planforge_error::{PlanError, PlanResult};
use planforge_macro::{parse_property_block, parse_query_template, MacroNode, PropValue};

use crate::cron::{CronSchedule, IntervalUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    IncrementalByTime,
    IncrementalByKey,
    Full,
    Snapshot,
    View,
    Embedded,
    Seed,
}

impl ModelKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INCREMENTAL_BY_TIME" => Some(ModelKind::IncrementalByTime),
            "INCREMENTAL_BY_KEY" => Some(ModelKind::IncrementalByKey),
            "FULL" => Some(ModelKind::Full),
            "SNAPSHOT" => Some(ModelKind::Snapshot),
            "VIEW" => Some(ModelKind::View),
            "EMBEDDED" => Some(ModelKind::Embedded),
            "SEED" => Some(ModelKind::Seed),
            _ => None,
        }
    }

    pub fn requires_time_column(self) -> bool {
        matches!(self, ModelKind::IncrementalByTime)
    }

    /// Models whose output is not materialized as its own physical table
    /// (spec.md §3: embedded models inline into every direct consumer).
    pub fn is_embedded(self) -> bool {
        matches!(self, ModelKind::Embedded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeColumn {
    pub name: String,
    pub format: String,
}

/// How a model produces its rows.
#[derive(Debug, Clone)]
pub enum ModelQuery {
    /// The macro-templated `SELECT` body, not yet rendered.
    Sql(MacroNode),
    /// A reference into external code; planforge does not execute this,
    /// per spec.md's Non-goals around embedding a host language runtime.
    Python { entrypoint: String },
    /// `kind SEED` models load rows from a CSV file instead of a query.
    Seed(SeedSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSource {
    pub csv_path: PathBuf,
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub kind: ModelKind,
    pub dialect: String,
    pub cron: Option<CronSchedule>,
    pub time_column: Option<TimeColumn>,
    pub partitioned_by: Vec<String>,
    pub unique_key: Vec<String>,
    pub query: ModelQuery,
    pub extra_statements: Vec<MacroNode>,
    pub path: PathBuf,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub storage_format: Option<String>,
    pub batch_size: Option<u32>,
    pub start: Option<String>,
    /// Manual cache-buster: bumping it changes `metadata_hash` with no
    /// other edits, forcing a plan to re-notice the model.
    pub stamp: Option<String>,
    /// Names of audits attached to this model; participates in
    /// `metadata_hash` (SPEC_FULL.md [ADD]).
    pub audits: Vec<String>,
    /// Column name -> human description. Documentation only: excluded
    /// from both `data_hash` and `metadata_hash` per SPEC_FULL.md [ADD].
    pub column_descriptions: BTreeMap<String, String>,
}

impl Model {
    /// Parses a `MODEL(...)` property block plus trailing query text from
    /// a single `.sql` model file's contents.
    pub fn load(path: &Path, source: &str) -> PlanResult<Self> {
        let (comment, header, body) = split_header(source).ok_or_else(|| {
            PlanError::config(path, 1, "model file must start with a MODEL(...) block")
        })?;

        let block = parse_property_block(header)
            .map_err(|e| PlanError::config(path, 1, format!("invalid MODEL block: {e}")))?;
        if !block.kind.eq_ignore_ascii_case("MODEL") {
            return Err(PlanError::config(
                path,
                1,
                format!("expected MODEL(...), found {}(...)", block.kind),
            ));
        }

        let mut props: BTreeMap<String, PropValue> = BTreeMap::new();
        for (k, v) in block.properties {
            props.insert(k.to_ascii_lowercase(), v);
        }

        let name = props
            .get("name")
            .and_then(PropValue::as_str)
            .ok_or_else(|| PlanError::config(path, 1, "MODEL(...) is missing 'name'"))?
            .to_string();

        let kind_name = props
            .get("kind")
            .and_then(PropValue::as_str)
            .ok_or_else(|| PlanError::config(path, 1, "MODEL(...) is missing 'kind'"))?;
        let kind = ModelKind::from_name(kind_name).ok_or_else(|| {
            PlanError::config(path, 1, format!("unknown model kind '{kind_name}'"))
        })?;

        let dialect = props
            .get("dialect")
            .and_then(PropValue::as_str)
            .unwrap_or("generic")
            .to_string();

        let start = props.get("start").and_then(PropValue::as_str).map(str::to_string);
        let start_anchor = start.as_deref().and_then(crate::cron::parse_start_date);

        let cron = match props.get("cron").and_then(PropValue::as_str) {
            Some(expr) => Some(CronSchedule::parse(expr, start_anchor)?),
            None => None,
        };

        let time_column = match props.get("time_column") {
            Some(PropValue::Tuple(items)) if items.len() == 2 => Some(TimeColumn {
                name: items[0].as_str().unwrap_or_default().to_string(),
                format: items[1].as_str().unwrap_or_default().to_string(),
            }),
            Some(other) => Some(TimeColumn {
                name: other.as_str().unwrap_or_default().to_string(),
                format: "%Y-%m-%d".to_string(),
            }),
            None => None,
        };

        if kind.requires_time_column() && time_column.is_none() {
            return Err(PlanError::config(
                path,
                1,
                format!("model '{name}' is INCREMENTAL_BY_TIME but declares no time_column"),
            ));
        }

        let partitioned_by = props
            .get("partitioned_by")
            .map(|v| v.as_tuple().iter().filter_map(PropValue::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let partitioned_by = dedup_preserve_order(partitioned_by);

        let unique_key = props
            .get("unique_key")
            .map(|v| v.as_tuple().iter().filter_map(PropValue::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        if kind == ModelKind::IncrementalByKey && unique_key.is_empty() {
            return Err(PlanError::config(
                path,
                1,
                format!("model '{name}' is INCREMENTAL_BY_KEY but declares no unique_key"),
            ));
        }

        // An explicit `description` property wins; otherwise fall back to
        // the leading `--` comment attached to the MODEL(...) block
        // (spec.md line 232).
        let description = props
            .get("description")
            .and_then(PropValue::as_str)
            .map(str::to_string)
            .or(comment);
        let owner = props.get("owner").and_then(PropValue::as_str).map(str::to_string);
        let storage_format = props.get("storage_format").and_then(PropValue::as_str).map(str::to_string);
        let batch_size = match props.get("batch_size") {
            Some(PropValue::Number(n)) => Some(*n as u32),
            _ => None,
        };
        let stamp = props.get("stamp").and_then(PropValue::as_str).map(str::to_string);
        let audits = props
            .get("audits")
            .map(|v| v.as_tuple().iter().filter_map(PropValue::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let query = if kind == ModelKind::Seed {
            let csv_path = PathBuf::from(
                props
                    .get("path")
                    .and_then(PropValue::as_str)
                    .ok_or_else(|| PlanError::config(path, 1, "SEED model is missing 'path'"))?,
            );
            let seed = crate::seed::load_seed(&csv_path)?;
            ModelQuery::Seed(SeedSource {
                csv_path,
                columns: seed.config.columns,
            })
        } else if let Some(entrypoint) = props.get("entrypoint").and_then(PropValue::as_str) {
            ModelQuery::Python {
                entrypoint: entrypoint.to_string(),
            }
        } else {
            let template = parse_query_template(body.trim())
                .map_err(|e| PlanError::config(path, 1, format!("invalid query template: {e}")))?;
            ModelQuery::Sql(template)
        };

        Ok(Model {
            name,
            kind,
            dialect,
            cron,
            time_column,
            partitioned_by,
            unique_key,
            query,
            extra_statements: Vec::new(),
            path: path.to_path_buf(),
            description,
            owner,
            storage_format,
            batch_size,
            start,
            stamp,
            audits,
            column_descriptions: BTreeMap::new(),
        })
    }

    /// `partitioned_by` with the time column implicitly prepended
    /// (spec.md §3), deduplicated.
    pub fn effective_partitioned_by(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(tc) = &self.time_column {
            out.push(tc.name.clone());
        }
        for col in &self.partitioned_by {
            if !out.contains(col) {
                out.push(col.clone());
            }
        }
        out
    }

    pub fn interval_unit(&self) -> Option<IntervalUnit> {
        self.cron.as_ref().map(|c| c.interval_unit)
    }

    /// Physical table name: dots in the model *name* become underscores,
    /// the physical schema prefix is never touched (spec.md §4.F).
    pub fn table_name(&self, physical_schema: &str, fingerprint_suffix: &str) -> String {
        let flattened = self.name.replace('.', "__");
        format!("{physical_schema}.{flattened}__{fingerprint_suffix}")
    }
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Splits a model file into an optional leading comment, its
/// `MODEL(...)` block, and the remaining query text that follows it.
fn split_header(source: &str) -> Option<(Option<String>, &str, &str)> {
    let start = source.find("MODEL")?;
    let open = source[start..].find('(')? + start;
    let mut depth = 0i32;
    let mut close = None;
    for (i, ch) in source[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    let comment = leading_comment(&source[..start]);
    Some((comment, &source[start..=close], &source[close + 1..]))
}

/// Collects the contiguous run of `--`-prefixed lines immediately above
/// the `MODEL(...)` block, joined by newline with markers stripped
/// (spec.md line 232's "description via leading comment").
fn leading_comment(before: &str) -> Option<String> {
    let mut lines: Vec<&str> = before.lines().collect();
    while let Some(last) = lines.last() {
        if last.trim().is_empty() {
            lines.pop();
        } else {
            break;
        }
    }

    let mut comment_lines = Vec::new();
    while let Some(last) = lines.last() {
        match last.trim().strip_prefix("--") {
            Some(text) => {
                comment_lines.push(text.trim().to_string());
                lines.pop();
            }
            None => break,
        }
    }

    if comment_lines.is_empty() {
        return None;
    }
    comment_lines.reverse();
    Some(comment_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_full_model_with_query() {
        let src = "MODEL(\n  name = sales.by_region,\n  kind = FULL\n)\nSELECT region, amount FROM sales.raw";
        let model = Model::load(Path::new("sales/by_region.sql"), src).unwrap();
        assert_eq!(model.name, "sales.by_region");
        assert_eq!(model.kind, ModelKind::Full);
        assert!(matches!(model.query, ModelQuery::Sql(_)));
    }

    #[test]
    fn incremental_by_time_requires_time_column() {
        let src = "MODEL(\n  name = events,\n  kind = INCREMENTAL_BY_TIME,\n  cron = '@daily'\n)\nSELECT * FROM raw.events";
        let err = Model::load(Path::new("events.sql"), src).unwrap_err();
        assert!(err.to_string().contains("time_column"));
    }

    #[test]
    fn table_name_only_flattens_model_name() {
        let src = "MODEL(\n  name = sales.by_region,\n  kind = FULL\n)\nSELECT 1";
        let model = Model::load(Path::new("m.sql"), src).unwrap();
        assert_eq!(
            model.table_name("sqlmesh__sales", "abcd1234"),
            "sqlmesh__sales.sales__by_region__abcd1234"
        );
    }

    #[test]
    fn description_falls_back_to_leading_comment() {
        let src = "-- Revenue by region, daily grain.\n-- Owned by analytics.\nMODEL(\n  name = t,\n  kind = FULL\n)\nSELECT 1";
        let model = Model::load(Path::new("m.sql"), src).unwrap();
        assert_eq!(
            model.description.as_deref(),
            Some("Revenue by region, daily grain.\nOwned by analytics.")
        );
    }

    #[test]
    fn explicit_description_property_overrides_comment() {
        let src = "-- ignored\nMODEL(\n  name = t,\n  kind = FULL,\n  description = 'explicit'\n)\nSELECT 1";
        let model = Model::load(Path::new("m.sql"), src).unwrap();
        assert_eq!(model.description.as_deref(), Some("explicit"));
    }
}
