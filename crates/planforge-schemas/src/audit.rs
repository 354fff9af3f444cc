//! Named, parameterized boolean queries attached to models (SPEC_FULL.md
//! [ADD]). An audit's query is expected to return zero rows when the
//! model's data is sound; `blocking` audits fail the plan, non-blocking
//! ones only warn.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use planforge_error::{PlanError, PlanResult};
use planforge_macro::{parse_property_block, parse_query_template, MacroNode, PropValue};

#[derive(Debug, Clone)]
pub struct Audit {
    pub name: String,
    pub query: MacroNode,
    pub blocking: bool,
    pub default_params: BTreeMap<String, String>,
    pub path: PathBuf,
}

impl Audit {
    pub fn load(path: &Path, source: &str) -> PlanResult<Self> {
        let start = source.find("AUDIT").ok_or_else(|| {
            PlanError::config(path, 1, "audit file must start with an AUDIT(...) block")
        })?;
        let open = source[start..]
            .find('(')
            .ok_or_else(|| PlanError::config(path, 1, "malformed AUDIT(...) block"))?
            + start;
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
        let close = close.ok_or_else(|| PlanError::config(path, 1, "unterminated AUDIT(...) block"))?;
        let header = &source[start..=close];
        let body = &source[close + 1..];

        let block = parse_property_block(header)
            .map_err(|e| PlanError::config(path, 1, format!("invalid AUDIT block: {e}")))?;
        if !block.kind.eq_ignore_ascii_case("AUDIT") {
            return Err(PlanError::config(
                path,
                1,
                format!("expected AUDIT(...), found {}(...)", block.kind),
            ));
        }

        let mut props: BTreeMap<String, PropValue> = BTreeMap::new();
        for (k, v) in block.properties {
            props.insert(k.to_ascii_lowercase(), v);
        }

        let name = props
            .get("name")
            .and_then(PropValue::as_str)
            .ok_or_else(|| PlanError::config(path, 1, "AUDIT(...) is missing 'name'"))?
            .to_string();

        let blocking = match props.get("blocking") {
            Some(PropValue::Bool(b)) => *b,
            _ => true,
        };

        let mut default_params = BTreeMap::new();
        if let Some(PropValue::Tuple(items)) = props.get("params") {
            for item in items {
                if let PropValue::Tuple(pair) = item {
                    if pair.len() == 2 {
                        if let (Some(k), Some(v)) = (pair[0].as_str(), pair[1].as_str()) {
                            default_params.insert(k.to_string(), v.to_string());
                        }
                    }
                }
            }
        }

        let query = parse_query_template(body.trim())
            .map_err(|e| PlanError::config(path, 1, format!("invalid audit query: {e}")))?;

        Ok(Audit {
            name,
            query,
            blocking,
            default_params,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn loads_blocking_audit() {
        let src = "AUDIT(\n  name = not_null_id,\n  blocking = true\n)\nSELECT * FROM @this_model WHERE id IS NULL";
        let audit = Audit::load(Path::new("not_null_id.sql"), src).unwrap();
        assert_eq!(audit.name, "not_null_id");
        assert!(audit.blocking);
    }
}
