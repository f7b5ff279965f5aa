//! Plan document load/save (`.devloop/plan.yaml`) with schema validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::plan::Plan;

const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));

static PLAN_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).map_err(|err| err.to_string())?;
    validator_for(&schema).map_err(|err| err.to_string())
});

/// Load the persisted plan if one exists.
///
/// Only parsing is performed; the dependency graph is taken as-is.
pub fn load_plan(path: &Path) -> Result<Option<Plan>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan = Plan::from_yaml(&raw).with_context(|| format!("parse plan {}", path.display()))?;
    debug!(path = %path.display(), features = plan.features.len(), "plan loaded");
    Ok(Some(plan))
}

/// Persist the plan document exactly as received.
pub fn write_plan_raw(path: &Path, raw: &str) -> Result<()> {
    let mut buf = raw.trim_end().to_string();
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Check a YAML plan document against the bundled schema.
///
/// Returns every violation, so callers can report them together.
pub fn schema_errors(raw: &str) -> Result<Vec<String>> {
    let value: Value = serde_yaml::from_str(raw).context("parse plan yaml")?;
    let validator = PLAN_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid plan schema: {err}"))?;
    Ok(validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect())
}

/// Read a plan document and return its schema violations.
pub fn check_plan_file(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    schema_errors(&raw)
}
