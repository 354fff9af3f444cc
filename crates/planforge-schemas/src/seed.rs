//! `SEED` model support (SPEC_FULL.md [ADD]): a CSV file plus a sibling
//! YAML declaring column types and batch size.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use planforge_error::{PlanError, PlanResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub columns: BTreeMap<String, String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_batch_size() -> u32 {
    1000
}

#[derive(Debug, Clone)]
pub struct SeedData {
    pub config: SeedConfig,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Loads `{csv_path}` and its sibling `{csv_path}.yaml` (or `.yml`).
pub fn load_seed(csv_path: &Path) -> PlanResult<SeedData> {
    let yaml_path = sibling_yaml_path(csv_path)?;
    let yaml_text = fs::read_to_string(&yaml_path)
        .map_err(|e| PlanError::config(&yaml_path, 1, format!("failed to read seed config: {e}")))?;
    let config: SeedConfig = serde_yaml::from_str(&yaml_text)
        .map_err(|e| PlanError::config(&yaml_path, 1, format!("invalid seed config: {e}")))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(csv_path)
        .map_err(|e| PlanError::config(csv_path, 1, format!("failed to read seed csv: {e}")))?;

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| PlanError::config(csv_path, 1, format!("failed to read csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    for col in config.columns.keys() {
        if !header.contains(col) {
            return Err(PlanError::config(
                csv_path,
                1,
                format!("seed config declares column '{col}' not present in csv header"),
            ));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PlanError::config(csv_path, 1, format!("malformed csv row: {e}")))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(SeedData { config, header, rows })
}

fn sibling_yaml_path(csv_path: &Path) -> PlanResult<std::path::PathBuf> {
    let yaml = csv_path.with_extension("yaml");
    if yaml.exists() {
        return Ok(yaml);
    }
    let yml = csv_path.with_extension("yml");
    if yml.exists() {
        return Ok(yml);
    }
    Err(PlanError::config(
        csv_path,
        1,
        "seed csv has no sibling .yaml/.yml config file",
    ))
}

/// Content digest input for a seed model's `data_hash`: the full file
/// bytes, since any row change is data-affecting (SPEC_FULL.md [ADD]).
pub fn seed_content_digest(csv_path: &Path) -> PlanResult<String> {
    let bytes = fs::read(csv_path)
        .map_err(|e| PlanError::config(csv_path, 1, format!("failed to read seed csv: {e}")))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_config_column_missing_from_header() {
        let dir = std::env::temp_dir().join(format!("planforge-seed-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let csv_path = dir.join("t.csv");
        let mut f = fs::File::create(&csv_path).unwrap();
        writeln!(f, "a,b\n1,2").unwrap();
        let yaml_path = dir.join("t.yaml");
        fs::write(&yaml_path, "columns:\n  c: int\n").unwrap();

        let err = load_seed(&csv_path).unwrap_err();
        assert!(err.to_string().contains("not present in csv header"));

        let _ = fs::remove_dir_all(&dir);
    }
}
