//! Shared application state for the UI server.

use std::sync::Arc;

use devloop::app::LiveEngine;
use devloop::io::init::DevloopPaths;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Events broadcast to SSE clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ProgressChanged,
    PlanChanged,
    ConfigChanged,
    CycleStarted,
    CycleFinished { summary: String },
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub paths: DevloopPaths,
    pub engine: Arc<LiveEngine>,
    /// Broadcast sender for change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(paths: DevloopPaths, engine: LiveEngine) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            paths,
            engine: Arc::new(engine),
            event_tx: Arc::new(event_tx),
        }
    }

    /// Start a cycle on the blocking pool unless one is already running.
    ///
    /// Returns `false` when the gate is busy. The permit is taken before the
    /// task is spawned, so two triggers can never both report success.
    pub fn trigger_cycle(&self) -> bool {
        let Some(permit) = self.engine.gate().try_acquire() else {
            info!("cycle trigger ignored: already running");
            return false;
        };
        let _ = self.event_tx.send(ChangeEvent::CycleStarted);

        let engine = Arc::clone(&self.engine);
        let event_tx = Arc::clone(&self.event_tx);
        tokio::task::spawn_blocking(move || {
            let report = engine.run_with_permit(permit);
            if report.is_aborted() {
                warn!(summary = %report.summary(), "cycle aborted");
            }
            let _ = event_tx.send(ChangeEvent::CycleFinished {
                summary: report.summary(),
            });
        });
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use devloop::app::build_engine;
    use devloop::io::init::{InitOptions, init_devloop};
    use devloop::io::plan_store::write_plan_raw;
    use devloop::io::progress_store::ProgressStore;

    use super::AppState;

    pub const ONE_TASK_PLAN: &str = "features:
  - id: core
    name: Core
    tasks:
      - id: t1
        description: Write the entry point
";

    /// State over an initialized project whose only task is already done, so
    /// a triggered cycle finishes without calling any collaborator.
    pub fn completed_project_state(dir: &Path) -> AppState {
        let paths = init_devloop(dir, &InitOptions { force: false }).expect("init");
        write_plan_raw(&paths.plan_path, ONE_TASK_PLAN).expect("plan");
        let mut store = ProgressStore::load(&paths.progress_path);
        store.mark_task_completed("core", "t1").expect("task");
        store.mark_feature_completed("core").expect("feature");
        let engine = build_engine(dir).expect("engine");
        AppState::new(paths, engine)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::completed_project_state;
    use super::*;

    #[tokio::test]
    async fn trigger_runs_cycle_and_reports_finish() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = completed_project_state(temp.path());
        let mut rx = state.event_tx.subscribe();

        assert!(state.trigger_cycle());
        assert_eq!(rx.recv().await.expect("started"), ChangeEvent::CycleStarted);
        let finished = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("cycle finished in time")
            .expect("finished event");
        assert!(matches!(
            finished,
            ChangeEvent::CycleFinished { ref summary } if summary.contains("all features complete")
        ));
        assert!(!state.engine.gate().is_running());
    }

    #[tokio::test]
    async fn trigger_while_running_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = completed_project_state(temp.path());
        let mut rx = state.event_tx.subscribe();

        let permit = state.engine.gate().try_acquire().expect("permit");
        assert!(!state.trigger_cycle());
        assert!(rx.try_recv().is_err());
        drop(permit);
    }
}
