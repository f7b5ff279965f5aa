//! Wiring: build a live engine for a project directory from its config.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cycle::{CycleEngine, CycleSettings};
use crate::io::config::{DevloopConfig, ToolsMode, load_config};
use crate::io::init::DevloopPaths;
use crate::io::notify::{Notifier, notifier_from_config};
use crate::io::progress_store::ProgressStore;
use crate::io::reasoner::CommandReasoner;
use crate::io::remote_tools::HttpToolbox;
use crate::io::toolbox::{LocalToolbox, Toolbox};
use crate::planner::load_or_generate;

pub type DynToolbox = Box<dyn Toolbox + Send + Sync>;
pub type DynNotifier = Box<dyn Notifier + Send + Sync>;

/// Engine with the configured production collaborators.
pub type LiveEngine = CycleEngine<CommandReasoner, DynToolbox, DynNotifier>;

pub fn toolbox_from_config(cfg: &DevloopConfig, root: &Path) -> DynToolbox {
    match cfg.tools.mode {
        ToolsMode::Local => {
            let marker = cfg
                .verify
                .failure_markers
                .iter()
                .find(|marker| !marker.trim().is_empty())
                .map_or("FAILED", String::as_str);
            Box::new(LocalToolbox::new(root, &cfg.tools, marker))
        }
        ToolsMode::Remote => Box::new(HttpToolbox::from_config(&cfg.tools, root)),
    }
}

/// Load config, obtain the plan (generating it if needed) and build the
/// engine. Plan errors are fatal here.
pub fn build_engine(root: &Path) -> Result<LiveEngine> {
    let paths = DevloopPaths::new(root);
    let config = load_config(&paths.config_path).context("load config")?;
    let reasoner = CommandReasoner::from_config(&config.reasoner);
    let toolbox = toolbox_from_config(&config, &paths.root);
    let notifier = notifier_from_config(&config.notify);

    let description = paths.read_project_description()?;
    let plan = load_or_generate(&paths, &config, &reasoner, &toolbox, &description)
        .context("obtain plan")?;
    let store = ProgressStore::load(&paths.progress_path);
    info!(
        features = plan.features.len(),
        tasks = plan.task_count(),
        mode = ?config.tools.mode,
        "engine ready"
    );
    CycleEngine::new(
        plan,
        store,
        reasoner,
        toolbox,
        notifier,
        CycleSettings::from_config(&config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::init::{InitOptions, init_devloop};
    use crate::io::plan_store::write_plan_raw;

    #[test]
    fn engine_builds_from_persisted_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
        write_plan_raw(
            &paths.plan_path,
            "features:\n  - id: a\n    name: A\n    tasks:\n      - id: t1\n        description: First\n",
        )
        .expect("plan");

        let engine = build_engine(temp.path()).expect("engine");
        assert_eq!(engine.plan().task_count(), 1);
        assert!(!engine.gate().is_running());
        assert_eq!(engine.status().overall_percent, 0);
    }
}
