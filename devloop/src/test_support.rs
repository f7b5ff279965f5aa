//! Test-only builders and scripted collaborators.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};

use crate::core::types::ProgressState;
use crate::cycle::{CycleEngine, CycleSettings};
use crate::io::notify::{Notification, Notifier};
use crate::io::progress_store::ProgressStore;
use crate::io::reasoner::{AskRequest, Reasoner};
use crate::io::toolbox::{ToolCall, ToolReply, Toolbox};
use crate::plan::{Feature, Plan, Task};

/// Task with a deterministic description and no verification command.
pub fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        description: format!("{id} task"),
        details: None,
        verification_command: None,
    }
}

pub fn task_with_check(id: &str, command: &str) -> Task {
    Task {
        verification_command: Some(command.to_string()),
        ..task(id)
    }
}

pub fn feature(id: &str, dependencies: &[&str], tasks: Vec<Task>) -> Feature {
    Feature {
        id: id.to_string(),
        name: format!("{id} feature"),
        description: String::new(),
        dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
        tasks,
    }
}

pub fn plan(features: Vec<Feature>) -> Plan {
    Plan { features }
}

/// Empty progress state at a fixed instant.
pub fn fresh_state() -> ProgressState {
    ProgressState::new(
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp"),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns queued replies in order and records every prompt. Fails once the
/// queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Reasoner for ScriptedReasoner {
    fn ask(&self, request: &AskRequest) -> Result<String> {
        lock(&self.prompts).push(request.prompt.clone());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted reasoner has no reply left"))
    }
}

/// Records every call and answers from canned text.
///
/// `run_command` replies are taken from a queue; once it is empty the
/// command "passes".
#[derive(Debug)]
pub struct ScriptedToolbox {
    calls: Mutex<Vec<ToolCall>>,
    run_outputs: Mutex<VecDeque<String>>,
    listing: String,
    fail_listing: bool,
    fail_writes: bool,
}

impl Default for ScriptedToolbox {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            run_outputs: Mutex::new(VecDeque::new()),
            listing: "[FILE] main.py\n".to_string(),
            fail_listing: false,
            fail_writes: false,
        }
    }
}

impl ScriptedToolbox {
    pub fn with_run_outputs<I, S>(self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.run_outputs) = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.name() == name)
            .collect()
    }
}

impl Toolbox for ScriptedToolbox {
    fn invoke(&self, call: &ToolCall) -> Result<ToolReply> {
        lock(&self.calls).push(call.clone());
        let text = match call {
            ToolCall::ListDirectory { .. } if self.fail_listing => {
                return Err(anyhow!("listing unavailable"));
            }
            ToolCall::ListDirectory { .. } => self.listing.clone(),
            ToolCall::WriteFile { .. } if self.fail_writes => {
                return Err(anyhow!("disk full"));
            }
            ToolCall::WriteFile { path, content, .. } => {
                format!("Created {path} ({} bytes)", content.len())
            }
            ToolCall::RunCommand { .. } => lock(&self.run_outputs)
                .pop_front()
                .unwrap_or_else(|| "1 passed".to_string()),
            ToolCall::CommitPush { .. } => "Committed abc1234".to_string(),
            _ => "ok".to_string(),
        };
        Ok(ToolReply::Nominal(text))
    }
}

/// Keeps every notification it is sent.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .map(|notification| notification.title)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

pub type ScriptedEngine<R = ScriptedReasoner> = CycleEngine<R, ScriptedToolbox, RecordingNotifier>;

/// Engine over scripted collaborators with progress stored at `progress_path`.
pub fn scripted_engine<R: Reasoner>(
    plan: Plan,
    progress_path: &Path,
    reasoner: R,
    toolbox: ScriptedToolbox,
) -> ScriptedEngine<R> {
    scripted_engine_with(
        plan,
        progress_path,
        reasoner,
        toolbox,
        CycleSettings::default(),
    )
}

pub fn scripted_engine_with<R: Reasoner>(
    plan: Plan,
    progress_path: &Path,
    reasoner: R,
    toolbox: ScriptedToolbox,
    settings: CycleSettings,
) -> ScriptedEngine<R> {
    CycleEngine::new(
        plan,
        ProgressStore::load(progress_path),
        reasoner,
        toolbox,
        RecordingNotifier::default(),
        settings,
    )
    .expect("engine")
}

/// A solution reply that writes one file.
pub fn solution_for(path: &str, body: &str) -> String {
    format!("Create `{path}`:\n\n```python\n{body}\n```\n")
}
