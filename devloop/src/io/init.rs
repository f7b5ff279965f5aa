//! Canonical `.devloop/` paths and scaffolding for `devloop init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{DevloopConfig, write_config};

/// All canonical paths within `.devloop/` for a project directory.
#[derive(Debug, Clone)]
pub struct DevloopPaths {
    pub root: PathBuf,
    pub devloop_dir: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub project_path: PathBuf,
    pub plan_path: PathBuf,
    pub progress_path: PathBuf,
}

impl DevloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let devloop_dir = root.join(".devloop");
        let state_dir = devloop_dir.join("state");
        Self {
            root: root.clone(),
            devloop_dir: devloop_dir.clone(),
            state_dir: state_dir.clone(),
            gitignore_path: devloop_dir.join(".gitignore"),
            config_path: devloop_dir.join("config.toml"),
            project_path: devloop_dir.join("PROJECT.md"),
            plan_path: devloop_dir.join("plan.yaml"),
            progress_path: state_dir.join("progress.json"),
        }
    }

    /// Read the project description used when a plan must be generated.
    pub fn read_project_description(&self) -> Result<String> {
        if !self.project_path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.project_path)
            .with_context(|| format!("read {}", self.project_path.display()))
    }
}

/// Options for `init_devloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing devloop-owned files.
    pub force: bool,
}

/// Create `.devloop/` scaffolding in `root`.
///
/// Fails if `.devloop/` already exists unless `options.force` is set. The
/// plan and progress documents are never written here; the first cycle
/// creates them.
pub fn init_devloop(root: &Path, options: &InitOptions) -> Result<DevloopPaths> {
    let paths = DevloopPaths::new(root);
    if paths.devloop_dir.exists() && !paths.devloop_dir.is_dir() {
        return Err(anyhow!(
            "devloop init: .devloop exists but is not a directory"
        ));
    }
    if paths.devloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "devloop init: .devloop already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.devloop_dir)?;
    create_dir(&paths.state_dir)?;
    write_file(&paths.gitignore_path, DEVLOOP_GITIGNORE)?;
    write_file(&paths.project_path, PROJECT_PLACEHOLDER)?;
    write_config(&paths.config_path, &DevloopConfig::default())?;

    info!(dir = %paths.devloop_dir.display(), "initialized devloop");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const PROJECT_PLACEHOLDER: &str = "# Project\n\nDescribe what should be built. This text is sent to the reasoning service when no plan exists yet.\n";
const DEVLOOP_GITIGNORE: &str = "state/\n";
