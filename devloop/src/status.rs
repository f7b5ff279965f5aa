//! Read-only views over the plan and progress: the status report and the
//! annotated plan.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::scheduler::{feature_percent, overall_percent};
use crate::core::types::{Activity, ProgressState};
use crate::gate::GateState;
use crate::plan::Plan;

/// Activities included in a status report.
pub const RECENT_ACTIVITY_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub overall_percent: u8,
    pub completed_features: usize,
    pub total_features: usize,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub current_feature: Option<String>,
    pub current_task: Option<String>,
    /// Newest first.
    pub recent_activity: Vec<Activity>,
    pub gate: GateState,
}

impl StatusReport {
    pub fn build(plan: &Plan, state: &ProgressState, gate: GateState) -> Self {
        let completed_features = plan
            .features
            .iter()
            .filter(|feature| state.is_feature_completed(&feature.id))
            .count();
        let completed_tasks = plan
            .features
            .iter()
            .flat_map(|feature| {
                feature
                    .tasks
                    .iter()
                    .map(move |task| (feature.id.as_str(), task.id.as_str()))
            })
            .filter(|(feature_id, task_id)| state.is_task_completed(feature_id, task_id))
            .count();
        let current_feature = state
            .current_feature_id
            .as_deref()
            .map(|id| match plan.feature(id) {
                Some(feature) => format!("{} ({id})", feature.name),
                None => id.to_string(),
            });
        let current_task = match (&state.current_feature_id, &state.current_task_id) {
            (Some(feature_id), Some(task_id)) => Some(
                match plan.feature(feature_id).and_then(|f| f.task(task_id)) {
                    Some(task) => format!("{} ({task_id})", task.description),
                    None => task_id.clone(),
                },
            ),
            (None, Some(task_id)) => Some(task_id.clone()),
            _ => None,
        };

        Self {
            overall_percent: overall_percent(plan, state),
            completed_features,
            total_features: plan.features.len(),
            completed_tasks,
            total_tasks: plan.task_count(),
            current_feature,
            current_task,
            recent_activity: state
                .recent_activities(RECENT_ACTIVITY_LIMIT)
                .into_iter()
                .cloned()
                .collect(),
            gate,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Overall progress: {}% ({}/{} features, {}/{} tasks)",
            self.overall_percent,
            self.completed_features,
            self.total_features,
            self.completed_tasks,
            self.total_tasks
        );
        let _ = writeln!(
            out,
            "Current feature: {}",
            self.current_feature.as_deref().unwrap_or("none")
        );
        let _ = writeln!(
            out,
            "Current task: {}",
            self.current_task.as_deref().unwrap_or("none")
        );
        match self.gate {
            GateState::Idle => out.push_str("Cycle: idle\n"),
            GateState::Running { phase, since } => {
                let _ = writeln!(
                    out,
                    "Cycle: running ({}) since {}",
                    phase.as_str(),
                    since.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        if !self.recent_activity.is_empty() {
            out.push_str("\nRecent activity:\n");
            for activity in &self.recent_activity {
                let _ = writeln!(
                    out,
                    "- {} {}",
                    activity.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    activity.description
                );
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureView {
    pub id: String,
    pub name: String,
    pub dependencies: Vec<String>,
    pub percent: u8,
    pub completed: bool,
    pub tasks: Vec<TaskView>,
}

/// The plan annotated with completion.
#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub features: Vec<FeatureView>,
}

impl PlanView {
    pub fn build(plan: &Plan, state: &ProgressState) -> Self {
        let features = plan
            .features
            .iter()
            .map(|feature| FeatureView {
                id: feature.id.clone(),
                name: feature.name.clone(),
                dependencies: feature.dependencies.clone(),
                percent: feature_percent(feature, state),
                completed: state.is_feature_completed(&feature.id),
                tasks: feature
                    .tasks
                    .iter()
                    .map(|task| TaskView {
                        id: task.id.clone(),
                        description: task.description.clone(),
                        completed: state.is_task_completed(&feature.id, &task.id),
                    })
                    .collect(),
            })
            .collect();
        Self { features }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for feature in &self.features {
            let _ = write!(
                out,
                "{} {} {} ({}%)",
                marker(feature.completed),
                feature.id,
                feature.name,
                feature.percent
            );
            if !feature.dependencies.is_empty() {
                let _ = write!(out, " after {}", feature.dependencies.join(", "));
            }
            out.push('\n');
            for task in &feature.tasks {
                let _ = writeln!(
                    out,
                    "    {} {} {}",
                    marker(task.completed),
                    task.id,
                    task.description
                );
            }
        }
        out
    }
}

fn marker(done: bool) -> &'static str {
    if done { "[x]" } else { "[ ]" }
}
