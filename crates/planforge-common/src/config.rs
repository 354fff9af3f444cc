//! Minimal engine configuration, loadable from YAML or JSON.

use std::path::Path;

use planforge_error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};

/// Configuration the planning engine needs to resolve physical names and
/// defaults. Everything else (connection strings, scheduler wiring, CLI
/// flags) belongs to the layers this workspace treats as external
/// collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Schema physical tables are created under, e.g. `"sqlmesh"`.
    pub physical_schema: String,
    /// Dialect used when a model omits its own.
    #[serde(default = "default_dialect")]
    pub default_dialect: String,
    /// Default `start` for models that omit one, as an inclusive date
    /// string (`%Y-%m-%d`).
    pub default_start: Option<String>,
    /// Names of registries the host application should load user macros
    /// from before calling `Model::load` / `QueryRenderer::new`.
    #[serde(default)]
    pub macro_registry_modules: Vec<String>,
}

fn default_dialect() -> String {
    "generic".to_string()
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> PlanResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| PlanError::config("<config>", 0, format!("invalid config: {e}")))
    }

    pub fn from_yaml_file(path: &Path) -> PlanResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlanError::config(path, 0, format!("cannot read config: {e}")))?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            PlanError::Config { message, .. } => PlanError::config(path, 0, message),
            other => other,
        })
    }

    pub fn from_json_str(text: &str) -> PlanResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PlanError::config("<config>", 0, format!("invalid config: {e}")))
    }

    pub fn from_json_file(path: &Path) -> PlanResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlanError::config(path, 0, format!("cannot read config: {e}")))?;
        Self::from_json_str(&text).map_err(|e| match e {
            PlanError::Config { message, .. } => PlanError::config(path, 0, message),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let cfg = EngineConfig::from_yaml_str("physical_schema: sqlmesh\n").unwrap();
        assert_eq!(cfg.physical_schema, "sqlmesh");
        assert_eq!(cfg.default_dialect, "generic");
        assert!(cfg.macro_registry_modules.is_empty());
    }

    #[test]
    fn parses_json_with_overrides() {
        let cfg = EngineConfig::from_json_str(
            r#"{"physical_schema": "sqlmesh", "default_dialect": "postgres", "macro_registry_modules": ["acme"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.default_dialect, "postgres");
        assert_eq!(cfg.macro_registry_modules, vec!["acme".to_string()]);
    }
}
