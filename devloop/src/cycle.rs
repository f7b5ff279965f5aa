//! The development cycle: pick work, ask for a solution, apply it, verify,
//! correct once, commit, record progress.
//!
//! [`CycleEngine`] owns the plan, the progress store, the three external
//! collaborators and the [`RunGate`]. One call to [`CycleEngine::run_cycle`]
//! drains the plan until it is done, blocked, hits the configured task limit,
//! or a task aborts.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::scheduler::{feature_percent, next_feature, next_task, pending_features};
use crate::core::solution::{FileWrite, ParseOptions, SolutionParseError, parse_solution};
use crate::core::types::{ActivityKind, CyclePhase, ProgressState, Verdict};
use crate::core::verification::{judge_output, output_tail};
use crate::gate::{CYCLE_LOCK_FILE, RunGate, RunPermit};
use crate::io::config::DevloopConfig;
use crate::io::notify::{Notification, Notifier};
use crate::io::progress_store::ProgressStore;
use crate::io::prompt::{PromptBuilder, TaskPromptInputs};
use crate::io::reasoner::{AskRequest, Reasoner, ask_or_fallback};
use crate::io::toolbox::{ToolCall, Toolbox};
use crate::plan::{Feature, Plan, Task};
use crate::status::{PlanView, StatusReport};

/// Reasons a cycle stops early. The task in flight stays pending.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("prompt generation failed: {0}")]
    PromptGeneration(String),
    #[error(transparent)]
    SolutionParse(#[from] SolutionParseError),
    #[error("could not write {path}: {reason}")]
    Apply { path: String, reason: String },
    #[error("task {task} of feature {feature} failed verification after one correction")]
    DoubleVerificationFailure { feature: String, task: String },
    #[error("progress could not be saved: {0:#}")]
    Store(anyhow::Error),
}

/// Why a cycle ended.
#[derive(Debug)]
pub enum CycleStop {
    /// Every feature is complete.
    Done,
    /// Incomplete features remain but none is schedulable.
    Blocked { pending: Vec<String> },
    /// `cycle.max_tasks` tasks were completed.
    TaskLimit,
    Aborted(CycleError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub tasks_completed: usize,
    pub features_completed: usize,
    /// A collaborator answered with fallback or simulated output at least once.
    pub degraded: bool,
    pub stop: CycleStop,
}

impl CycleReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.stop, CycleStop::Aborted(_))
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let outcome = match &self.stop {
            CycleStop::Done => "all features complete".to_string(),
            CycleStop::Blocked { pending } => format!("blocked on {}", pending.join(", ")),
            CycleStop::TaskLimit => "task limit reached".to_string(),
            CycleStop::Aborted(err) => format!("aborted: {err}"),
        };
        let degraded = if self.degraded { " (degraded)" } else { "" };
        format!(
            "{} task(s), {} feature(s) completed; {outcome}{degraded}",
            self.tasks_completed, self.features_completed
        )
    }
}

/// Result of asking for a cycle.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// Another cycle holds the gate; nothing was done.
    Busy,
    Finished(CycleReport),
}

/// Knobs the engine reads from configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub project_root: String,
    pub generated_dir: String,
    pub test_command: String,
    pub failure_markers: Vec<String>,
    pub failure_excerpt_bytes: usize,
    /// 0 means no limit.
    pub max_tasks: usize,
    pub prompt_budget_bytes: usize,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub fallback_response: String,
}

impl CycleSettings {
    pub fn from_config(cfg: &DevloopConfig) -> Self {
        Self {
            project_root: cfg.project.root.clone(),
            generated_dir: cfg.project.generated_dir.clone(),
            test_command: cfg.verify.test_command.clone(),
            failure_markers: cfg.verify.failure_markers.clone(),
            failure_excerpt_bytes: cfg.verify.failure_excerpt_bytes,
            max_tasks: cfg.cycle.max_tasks,
            prompt_budget_bytes: cfg.cycle.prompt_budget_bytes,
            system_prompt: cfg.reasoner.system_prompt.clone(),
            max_tokens: cfg.reasoner.max_tokens,
            fallback_response: cfg.reasoner.fallback_response.clone(),
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from_config(&DevloopConfig::default())
    }
}

struct Verification {
    verdict: Verdict,
    output: String,
}

pub struct CycleEngine<R, T, N> {
    plan: Plan,
    store: Mutex<ProgressStore>,
    reasoner: R,
    toolbox: T,
    notifier: N,
    prompts: PromptBuilder,
    settings: CycleSettings,
    gate: RunGate,
}

impl<R, T, N> CycleEngine<R, T, N>
where
    R: Reasoner,
    T: Toolbox,
    N: Notifier,
{
    pub fn new(
        plan: Plan,
        store: ProgressStore,
        reasoner: R,
        toolbox: T,
        notifier: N,
        settings: CycleSettings,
    ) -> anyhow::Result<Self> {
        let gate = RunGate::with_lock_file(store.path().with_file_name(CYCLE_LOCK_FILE));
        Ok(Self {
            plan,
            store: Mutex::new(store),
            reasoner,
            toolbox,
            notifier,
            prompts: PromptBuilder::new(settings.prompt_budget_bytes)?,
            settings,
            gate,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    pub fn toolbox(&self) -> &T {
        &self.toolbox
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Copy of the current progress state.
    pub fn snapshot(&self) -> ProgressState {
        self.store().state().clone()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::build(&self.plan, &self.snapshot(), self.gate.state())
    }

    pub fn plan_view(&self) -> PlanView {
        PlanView::build(&self.plan, &self.snapshot())
    }

    /// Send the current status report through the notifier.
    pub fn send_status_report(&self) -> anyhow::Result<()> {
        let report = self.status();
        self.notifier.notify(&Notification::info(
            format!("Progress report: {}%", report.overall_percent),
            report.render_text(),
        ))
    }

    /// Announce that a long-running engine is up.
    pub fn send_startup_notice(&self) {
        let report = self.status();
        self.send(Notification::info(
            "devloop started",
            format!(
                "{} feature(s), {}% complete",
                self.plan.features.len(),
                report.overall_percent
            ),
        ));
    }

    /// Run a cycle unless one is already running.
    pub fn run_cycle(&self) -> TriggerOutcome {
        match self.gate.try_acquire() {
            Some(permit) => TriggerOutcome::Finished(self.run_with_permit(permit)),
            None => {
                info!("cycle already running, trigger ignored");
                TriggerOutcome::Busy
            }
        }
    }

    /// Run a cycle under a permit the caller already acquired from
    /// [`Self::gate`]. The gate is released when this returns.
    #[instrument(skip_all)]
    pub fn run_with_permit(&self, permit: RunPermit) -> CycleReport {
        info!("cycle started");
        // Another engine may have advanced the document since the last cycle.
        self.store().reload();
        self.send(Notification::info(
            "Cycle started",
            format!("{}% complete", self.status().overall_percent),
        ));
        let mut report = CycleReport {
            tasks_completed: 0,
            features_completed: 0,
            degraded: false,
            stop: CycleStop::Done,
        };

        let stop = loop {
            permit.enter(CyclePhase::SelectingWork);
            let state = self.snapshot();
            let Some(feature) = next_feature(&self.plan, &state) else {
                let pending: Vec<String> = pending_features(&self.plan, &state)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                break if pending.is_empty() {
                    CycleStop::Done
                } else {
                    CycleStop::Blocked { pending }
                };
            };
            let Some(task) = next_task(feature, &state) else {
                match self.complete_feature(feature) {
                    Ok(true) => report.features_completed += 1,
                    Ok(false) => {}
                    Err(err) => break CycleStop::Aborted(err),
                }
                continue;
            };
            if self.settings.max_tasks > 0 && report.tasks_completed >= self.settings.max_tasks {
                break CycleStop::TaskLimit;
            }
            if let Err(err) = self.run_task(&permit, feature, task, &mut report) {
                break CycleStop::Aborted(err);
            }
            report.tasks_completed += 1;
        };
        report.stop = stop;

        permit.enter(CyclePhase::Reporting);
        self.report_stop(&report);
        info!(summary = %report.summary(), "cycle finished");
        report
    }

    fn run_task(
        &self,
        permit: &RunPermit,
        feature: &Feature,
        task: &Task,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        info!(feature = %feature.id, task = %task.id, "starting task");
        self.store()
            .set_current_work(&feature.id, &task.id)
            .map_err(CycleError::Store)?;
        self.send(Notification::info(
            format!("Task started: {}", task.id),
            format!("{} (feature {})", task.description, feature.name),
        ));

        permit.enter(CyclePhase::GeneratingPrompt);
        let structure = self.list_project()?;
        let inputs = TaskPromptInputs {
            feature,
            task,
            project_root: &self.settings.project_root,
            structure: &structure,
        };
        let prompt = self
            .prompts
            .render_task(&inputs)
            .map_err(|err| CycleError::PromptGeneration(format!("{err:#}")))?;
        self.solve(permit, prompt, report)?;

        permit.enter(CyclePhase::Verifying);
        let first = self.verify(task, report);
        if first.verdict == Verdict::Fail {
            warn!(task = %task.id, "verification failed, attempting one correction");
            permit.enter(CyclePhase::Correcting);
            let tail = output_tail(&first.output, self.settings.failure_excerpt_bytes);
            let prompt = self
                .prompts
                .render_correction(&inputs, tail)
                .map_err(|err| CycleError::PromptGeneration(format!("{err:#}")))?;
            self.solve(permit, prompt, report)?;

            permit.enter(CyclePhase::Verifying);
            if self.verify(task, report).verdict == Verdict::Fail {
                return Err(CycleError::DoubleVerificationFailure {
                    feature: feature.id.clone(),
                    task: task.id.clone(),
                });
            }
        }

        if self.complete_task(feature, task)? {
            report.features_completed += 1;
        }

        permit.enter(CyclePhase::Committing);
        self.commit(task);

        permit.enter(CyclePhase::Reporting);
        self.send(Notification::info(
            format!("Task completed: {}", task.id),
            format!("{} (feature {})", task.description, feature.name),
        ));
        Ok(())
    }

    fn list_project(&self) -> Result<String, CycleError> {
        let call = ToolCall::ListDirectory {
            path: self.settings.project_root.clone(),
            recursive: true,
        };
        self.toolbox
            .invoke(&call)
            .map(|reply| reply.text().to_string())
            .map_err(|err| CycleError::PromptGeneration(format!("project listing failed: {err:#}")))
    }

    /// Ask for a solution and apply it.
    fn solve(
        &self,
        permit: &RunPermit,
        prompt: String,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        permit.enter(CyclePhase::AwaitingSolution);
        let request = AskRequest {
            prompt,
            system: self.settings.system_prompt.clone(),
            max_tokens: self.settings.max_tokens,
        };
        let reply = ask_or_fallback(&self.reasoner, &request, &self.settings.fallback_response);
        if reply.is_degraded() {
            report.degraded = true;
        }

        permit.enter(CyclePhase::ApplyingSolution);
        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let writes = parse_solution(
            reply.text(),
            &ParseOptions {
                project_root: &self.settings.project_root,
                generated_dir: &self.settings.generated_dir,
                stamp: &stamp,
            },
        )?;
        for write in &writes {
            self.apply(write, report)?;
        }
        info!(files = writes.len(), "solution applied");
        self.scan();
        Ok(())
    }

    fn apply(&self, write: &FileWrite, report: &mut CycleReport) -> Result<(), CycleError> {
        let call = ToolCall::WriteFile {
            path: write.path.clone(),
            content: write.content.clone(),
            description: format!("Write {}", write.path),
        };
        let failure = |reason: String| CycleError::Apply {
            path: write.path.clone(),
            reason,
        };
        let reply = self
            .toolbox
            .invoke(&call)
            .map_err(|err| failure(format!("{err:#}")))?;
        if reply.text().trim().is_empty() {
            return Err(failure("tool returned an empty reply".to_string()));
        }
        if reply.is_degraded() {
            report.degraded = true;
        }
        debug!(path = %write.path, source = ?write.source, "file written");
        Ok(())
    }

    fn scan(&self) {
        let call = ToolCall::ScanProject {
            path: self.settings.project_root.clone(),
        };
        if let Err(err) = self.toolbox.invoke(&call) {
            warn!(error = %format!("{err:#}"), "project scan failed");
        }
    }

    fn verify(&self, task: &Task, report: &mut CycleReport) -> Verification {
        let command = task
            .verification_command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .unwrap_or(&self.settings.test_command);
        info!(command = %command, "verifying");
        let call = ToolCall::RunCommand {
            command: command.to_string(),
            workdir: self.settings.project_root.clone(),
        };
        match self.toolbox.invoke(&call) {
            Ok(reply) => {
                if reply.is_degraded() {
                    report.degraded = true;
                }
                let verdict = judge_output(reply.text(), &self.settings.failure_markers);
                debug!(?verdict, "verification judged");
                Verification {
                    verdict,
                    output: reply.text().to_string(),
                }
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "verification could not run");
                Verification {
                    verdict: Verdict::Fail,
                    output: format!("verification command could not run: {err:#}"),
                }
            }
        }
    }

    /// Record the task and the feature's new percentage. Returns whether the
    /// feature became complete.
    fn complete_task(&self, feature: &Feature, task: &Task) -> Result<bool, CycleError> {
        let percent = {
            let mut store = self.store();
            store
                .mark_task_completed(&feature.id, &task.id)
                .map_err(CycleError::Store)?;
            let percent = feature_percent(feature, store.state());
            store
                .record_feature_progress(&feature.id, percent)
                .map_err(CycleError::Store)?;
            percent
        };
        info!(feature = %feature.id, task = %task.id, percent, "task completed");
        self.push_feature_progress(feature, percent);
        if percent < 100 {
            return Ok(false);
        }
        self.complete_feature(feature)
    }

    /// Mark a feature complete. Returns `false` if it already was.
    fn complete_feature(&self, feature: &Feature) -> Result<bool, CycleError> {
        let newly = self
            .store()
            .mark_feature_completed(&feature.id)
            .map_err(CycleError::Store)?;
        if newly {
            info!(feature = %feature.id, "feature completed");
            self.push_feature_progress(feature, 100);
            self.send(Notification::info(
                format!("Feature completed: {}", feature.name),
                format!("All tasks of feature {} are done", feature.id),
            ));
        }
        Ok(newly)
    }

    fn push_feature_progress(&self, feature: &Feature, percent: u8) {
        let call = ToolCall::UpdateFeature {
            id: feature.id.clone(),
            name: feature.name.clone(),
            description: feature.description.clone(),
            progress: percent,
        };
        if let Err(err) = self.toolbox.invoke(&call) {
            warn!(feature = %feature.id, error = %format!("{err:#}"), "feature progress update failed");
        }
    }

    fn commit(&self, task: &Task) {
        let call = ToolCall::CommitPush {
            message: format!("Complete task {}: {}", task.id, task.description),
        };
        match self.toolbox.invoke(&call) {
            Ok(reply) => debug!(reply = %reply.text(), "commit"),
            Err(err) => warn!(error = %format!("{err:#}"), "commit failed"),
        }
    }

    fn report_stop(&self, report: &CycleReport) {
        match &report.stop {
            CycleStop::Done if report.tasks_completed > 0 || report.features_completed > 0 => {
                self.send(Notification::info(
                    "All features completed",
                    report.summary(),
                ));
            }
            CycleStop::Done | CycleStop::TaskLimit => {}
            CycleStop::Blocked { pending } => {
                warn!(pending = ?pending, "no schedulable feature");
                self.send(Notification::error(
                    "Plan blocked",
                    format!("No feature can start; pending: {}", pending.join(", ")),
                ));
            }
            CycleStop::Aborted(err) => {
                error!(error = %err, "cycle aborted");
                if let Err(store_err) = self
                    .store()
                    .log_activity(ActivityKind::System, format!("Cycle aborted: {err}"))
                {
                    warn!(error = %format!("{store_err:#}"), "could not record abort");
                }
                self.send(Notification::error("Cycle aborted", err.to_string()));
            }
        }
    }

    fn send(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(&notification) {
            warn!(title = %notification.title, error = %format!("{err:#}"), "notification failed");
        }
    }

    fn store(&self) -> MutexGuard<'_, ProgressStore> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
