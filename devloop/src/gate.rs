//! Single-flight gate: at most one cycle runs at a time.
//!
//! A trigger that finds the gate running is answered with "busy" rather than
//! queued. The gate returns to idle when the [`RunPermit`] is dropped, which
//! also happens while unwinding from a panic.
//!
//! A gate built with [`RunGate::with_lock_file`] also holds an advisory
//! exclusive lock on that file for the life of the permit, so engines in
//! other processes sharing the same progress document see it as busy too.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::types::CyclePhase;

/// Lock file kept next to the progress document.
pub const CYCLE_LOCK_FILE: &str = "cycle.lock";

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    Idle,
    Running {
        phase: CyclePhase,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct RunGate {
    state: Arc<Mutex<GateState>>,
    lock_path: Option<PathBuf>,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGate {
    /// Gate local to this process.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::Idle)),
            lock_path: None,
        }
    }

    /// Gate that is also exclusive across processes locking `path`.
    pub fn with_lock_file(path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    /// Move to running, or return `None` if a cycle already holds the gate,
    /// here or in another process.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        let mut state = lock(&self.state);
        if matches!(*state, GateState::Running { .. }) {
            debug!("gate busy");
            return None;
        }
        let lock_file = match &self.lock_path {
            Some(path) => Some(try_lock_file(path)?),
            None => None,
        };
        *state = GateState::Running {
            phase: CyclePhase::SelectingWork,
            since: Utc::now(),
        };
        Some(RunPermit {
            state: Arc::clone(&self.state),
            _lock_file: lock_file,
        })
    }

    pub fn state(&self) -> GateState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), GateState::Running { .. })
    }

    /// Current phase while running.
    pub fn phase(&self) -> Option<CyclePhase> {
        match self.state() {
            GateState::Running { phase, .. } => Some(phase),
            GateState::Idle => None,
        }
    }
}

/// Proof of holding the gate. Dropping it sets the gate back to idle.
#[derive(Debug)]
pub struct RunPermit {
    state: Arc<Mutex<GateState>>,
    // Closing the handle releases the advisory lock.
    _lock_file: Option<File>,
}

impl RunPermit {
    /// Record the phase the holder has entered.
    pub fn enter(&self, phase: CyclePhase) {
        let mut state = lock(&self.state);
        if let GateState::Running { since, .. } = *state {
            *state = GateState::Running { phase, since };
            debug!(phase = phase.as_str(), "cycle phase");
        }
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        *lock(&self.state) = GateState::Idle;
    }
}

fn try_lock_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        warn!(path = %path.display(), error = %err, "cannot create lock directory");
        return None;
    }
    let file = match OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot open lock file");
            return None;
        }
    };
    match file.try_lock_exclusive() {
        Ok(()) => Some(file),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            debug!(path = %path.display(), "lock held by another engine");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot lock");
            None
        }
    }
}

// A panic while holding the lock leaves a plain value behind; it is still valid.
fn lock(state: &Mutex<GateState>) -> MutexGuard<'_, GateState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn second_acquire_is_refused_until_release() {
        let gate = RunGate::new();
        let permit = gate.try_acquire().expect("first");
        assert!(gate.try_acquire().is_none());
        assert!(gate.is_running());
        drop(permit);
        assert_eq!(gate.state(), GateState::Idle);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn phase_is_observable_through_clones() {
        let gate = RunGate::new();
        let observer = gate.clone();
        let permit = gate.try_acquire().expect("acquire");
        permit.enter(CyclePhase::Verifying);
        assert_eq!(observer.phase(), Some(CyclePhase::Verifying));
    }

    #[test]
    fn panic_while_holding_releases_the_gate() {
        let gate = RunGate::new();
        let inner = gate.clone();
        let result = catch_unwind(AssertUnwindSafe(move || {
            let _permit = inner.try_acquire().expect("acquire");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!gate.is_running());
    }

    #[test]
    fn lock_file_excludes_a_second_gate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("cycle.lock");
        let here = RunGate::with_lock_file(&path);
        let elsewhere = RunGate::with_lock_file(&path);

        let permit = here.try_acquire().expect("first");
        assert!(path.is_file());
        assert!(elsewhere.try_acquire().is_none());
        assert!(!elsewhere.is_running());

        drop(permit);
        let permit = elsewhere.try_acquire().expect("after release");
        assert!(here.try_acquire().is_none());
        drop(permit);
    }
}
