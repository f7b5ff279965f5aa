//! Checks behind `devloop check`: layout, config, plan schema and plan
//! graph, progress document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::diagnostics::plan_diagnostics;
use crate::core::types::ProgressState;
use crate::io::config::load_config;
use crate::io::init::DevloopPaths;
use crate::io::plan_store::{check_plan_file, load_plan};

/// Findings that do not stop the tool from running but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    /// False when no plan has been generated yet.
    pub plan_present: bool,
    pub problems: Vec<String>,
}

impl ValidateOutcome {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Validate `.devloop/` in `root`.
///
/// Missing layout or an unreadable config is an error; plan and progress
/// problems are collected into the outcome.
pub fn validate_devloop(root: &Path) -> Result<ValidateOutcome> {
    let paths = DevloopPaths::new(root);
    ensure_dir(&paths.devloop_dir)?;
    ensure_file(&paths.config_path)?;
    load_config(&paths.config_path).context("load config.toml")?;

    let mut problems = Vec::new();
    let plan_present = paths.plan_path.exists();
    if plan_present {
        let schema = check_plan_file(&paths.plan_path).context("check plan.yaml")?;
        problems.extend(schema.into_iter().map(|err| format!("plan schema: {err}")));
        match load_plan(&paths.plan_path) {
            Ok(Some(plan)) => problems.extend(plan_diagnostics(&plan)),
            Ok(None) => {}
            Err(err) => problems.push(format!("{err:#}")),
        }
    }

    if paths.progress_path.exists() {
        let raw = fs::read_to_string(&paths.progress_path)
            .with_context(|| format!("read {}", paths.progress_path.display()))?;
        if let Err(err) = serde_json::from_str::<ProgressState>(&raw) {
            problems.push(format!("progress document is unreadable and will be reset: {err}"));
        }
    }

    Ok(ValidateOutcome {
        plan_present,
        problems,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!(
            "missing directory {} (run `devloop init`)",
            path.display()
        ));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    Ok(())
}
