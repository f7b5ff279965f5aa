//! Durable progress document (`.devloop/state/progress.json`).
//!
//! The whole document is rewritten after every mutation via temp file +
//! rename, so a crash leaves either the old or the new version on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::core::types::{ActivityKind, ProgressState, task_key};

/// Owner of the progress document. Every mutating method saves before
/// returning.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: ProgressState,
}

impl ProgressStore {
    /// Load progress from disk.
    ///
    /// A missing or unreadable document yields a fresh state; corruption is
    /// logged and the next save overwrites it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_state(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %path.display(), "no progress document, starting fresh");
                ProgressState::new(Utc::now())
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "progress document unreadable, starting fresh"
                );
                ProgressState::new(Utc::now())
            }
        };
        Self { path, state }
    }

    /// Replace the in-memory state with what is on disk now, picking up
    /// writes made by other engines. An unreadable document keeps the
    /// current state.
    pub fn reload(&mut self) {
        match read_state(&self.path) {
            Ok(Some(state)) => self.state = state,
            Ok(None) => {
                debug!(path = %self.path.display(), "progress document gone, starting fresh");
                self.state = ProgressState::new(Utc::now());
            }
            Err(err) => warn!(
                path = %self.path.display(),
                error = %format!("{err:#}"),
                "progress document unreadable, keeping loaded state"
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Stamp `last_update_time` and atomically overwrite the document.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_update_time = Utc::now();
        write_progress(&self.path, &self.state)
    }

    /// Record the unit of work now in progress.
    pub fn set_current_work(&mut self, feature_id: &str, task_id: &str) -> Result<()> {
        self.state.current_feature_id = Some(feature_id.to_string());
        self.state.current_task_id = Some(task_id.to_string());
        self.state.push_activity(
            ActivityKind::Task,
            format!("Started task {task_id} of feature {feature_id}"),
            Utc::now(),
        );
        self.save()
    }

    /// Mark a task completed. Returns `false` (and writes nothing) when it
    /// already was.
    pub fn mark_task_completed(&mut self, feature_id: &str, task_id: &str) -> Result<bool> {
        if !self
            .state
            .completed_task_keys
            .insert(task_key(feature_id, task_id))
        {
            return Ok(false);
        }
        self.state.push_activity(
            ActivityKind::Task,
            format!("Completed task {task_id} of feature {feature_id}"),
            Utc::now(),
        );
        self.save()?;
        Ok(true)
    }

    /// Mark a feature completed. Returns `false` (and writes nothing) when it
    /// already was.
    pub fn mark_feature_completed(&mut self, feature_id: &str) -> Result<bool> {
        if !self
            .state
            .completed_feature_ids
            .insert(feature_id.to_string())
        {
            return Ok(false);
        }
        self.state
            .feature_progress
            .insert(feature_id.to_string(), 100);
        self.state.push_activity(
            ActivityKind::Feature,
            format!("Feature {feature_id} completed"),
            Utc::now(),
        );
        self.save()?;
        Ok(true)
    }

    pub fn record_feature_progress(&mut self, feature_id: &str, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        if self.state.feature_progress.get(feature_id) == Some(&percent) {
            return Ok(());
        }
        self.state
            .feature_progress
            .insert(feature_id.to_string(), percent);
        self.save()
    }

    pub fn log_activity(
        &mut self,
        kind: ActivityKind,
        description: impl Into<String>,
    ) -> Result<()> {
        self.state
            .push_activity(kind, description.into(), Utc::now());
        self.save()
    }
}

fn read_state(path: &Path) -> Result<Option<ProgressState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read progress {}", path.display()))?;
    let state = serde_json::from_str(&contents)
        .with_context(|| format!("parse progress {}", path.display()))?;
    Ok(Some(state))
}

/// Atomically write progress to disk (pretty JSON, trailing newline).
pub fn write_progress(path: &Path, state: &ProgressState) -> Result<()> {
    debug!(
        path = %path.display(),
        completed_tasks = state.completed_task_keys.len(),
        completed_features = state.completed_feature_ids.len(),
        "writing progress"
    );
    let mut buf = serde_json::to_string_pretty(state).context("serialize progress")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
