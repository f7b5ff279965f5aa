//! Core types shared by the scheduler, the cycle executor, and the store.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of activities retained in the progress document.
pub const ACTIVITY_LOG_CAP: usize = 100;

/// Build the composite key identifying a task across the whole plan.
pub fn task_key(feature_id: &str, task_id: &str) -> String {
    format!("{feature_id}:{task_id}")
}

/// Category of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Feature,
    Task,
    System,
}

/// One timestamped entry in the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub description: String,
}

/// Durable record of completed work and recent activity.
///
/// Completion sets are ordered so the serialized document is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub current_feature_id: Option<String>,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub completed_feature_ids: BTreeSet<String>,
    #[serde(default)]
    pub completed_task_keys: BTreeSet<String>,
    #[serde(default)]
    pub feature_progress: BTreeMap<String, u8>,
    #[serde(default)]
    pub activity_log: VecDeque<Activity>,
    pub last_update_time: DateTime<Utc>,
}

impl ProgressState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_feature_id: None,
            current_task_id: None,
            completed_feature_ids: BTreeSet::new(),
            completed_task_keys: BTreeSet::new(),
            feature_progress: BTreeMap::new(),
            activity_log: VecDeque::new(),
            last_update_time: now,
        }
    }

    pub fn is_feature_completed(&self, feature_id: &str) -> bool {
        self.completed_feature_ids.contains(feature_id)
    }

    pub fn is_task_completed(&self, feature_id: &str, task_id: &str) -> bool {
        self.completed_task_keys
            .contains(&task_key(feature_id, task_id))
    }

    /// Append an activity and evict the oldest entries beyond the cap.
    ///
    /// The timestamp never goes backwards relative to the newest entry.
    pub fn push_activity(&mut self, kind: ActivityKind, description: String, now: DateTime<Utc>) {
        let timestamp = match self.activity_log.back() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.activity_log.push_back(Activity {
            timestamp,
            kind,
            description,
        });
        while self.activity_log.len() > ACTIVITY_LOG_CAP {
            self.activity_log.pop_front();
        }
    }

    /// Newest-first view of at most `limit` activities.
    pub fn recent_activities(&self, limit: usize) -> Vec<&Activity> {
        self.activity_log.iter().rev().take(limit).collect()
    }
}

/// Outcome of judging verification output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Phase of an in-flight cycle, observable through the run gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    SelectingWork,
    GeneratingPrompt,
    AwaitingSolution,
    ApplyingSolution,
    Verifying,
    Correcting,
    Committing,
    Reporting,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::SelectingWork => "selecting_work",
            CyclePhase::GeneratingPrompt => "generating_prompt",
            CyclePhase::AwaitingSolution => "awaiting_solution",
            CyclePhase::ApplyingSolution => "applying_solution",
            CyclePhase::Verifying => "verifying",
            CyclePhase::Correcting => "correcting",
            CyclePhase::Committing => "committing",
            CyclePhase::Reporting => "reporting",
        }
    }
}
