//! Engine configuration stored under `.devloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, so
/// an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DevloopConfig {
    pub project: ProjectConfig,
    pub reasoner: ReasonerConfig,
    pub tools: ToolsConfig,
    pub verify: VerifyConfig,
    pub cycle: CycleConfig,
    pub notify: NotifyConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Subtree (relative to the project directory) that receives every write.
    pub root: String,
    /// Directory under `root` for files whose path could not be determined.
    pub generated_dir: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: "code".to_string(),
            generated_dir: "generated".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Command to run; the prompt is written to its stdin and the reply read
    /// from stdout. `{system}` and `{max_tokens}` are substituted when present.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub output_limit_bytes: usize,
    /// Instructions sent alongside every prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Text used in place of a reply when the reasoner fails.
    pub fallback_response: String,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "--print".to_string()],
            timeout_secs: 120,
            max_tokens: 4000,
            output_limit_bytes: 400_000,
            system_prompt: None,
            fallback_response: "The reasoning service is unavailable; no solution was produced."
                .to_string(),
        }
    }
}

impl ReasonerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where tool calls are executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolsMode {
    /// Filesystem, shell, and git in the project directory.
    #[default]
    Local,
    /// A tool server reached over HTTP.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub mode: ToolsMode,
    /// Base URL of the tool server in `remote` mode.
    pub endpoint: String,
    pub request_timeout_secs: u64,
    /// Per-command bound for `run_command` in `local` mode.
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Push after committing in `local` mode.
    pub push: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mode: ToolsMode::Local,
            endpoint: "http://localhost:4000".to_string(),
            request_timeout_secs: 60,
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            push: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Project-wide test command used when a task declares none.
    pub test_command: String,
    /// Substrings that mark verification output as failed.
    pub failure_markers: Vec<String>,
    /// Bytes of failing output quoted in the correction prompt.
    pub failure_excerpt_bytes: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            test_command: "python -m pytest".to_string(),
            failure_markers: vec!["FAILED".to_string()],
            failure_excerpt_bytes: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleConfig {
    /// Tasks completed per invocation before yielding; 0 drains all ready work.
    pub max_tasks: usize,
    /// Maximum bytes for a rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_tasks: 0,
            prompt_budget_bytes: 40_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NotifyConfig {
    /// Receives a JSON POST per notification. Notifications are only logged
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cycle_interval_secs: u64,
    pub status_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60 * 60,
            status_interval_secs: 30 * 60,
        }
    }
}

impl DevloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reasoner.command.is_empty() || self.reasoner.command[0].trim().is_empty() {
            return Err(anyhow!("reasoner.command must be a non-empty array"));
        }
        if self.reasoner.timeout_secs == 0 {
            return Err(anyhow!("reasoner.timeout_secs must be > 0"));
        }
        if self.reasoner.output_limit_bytes == 0 {
            return Err(anyhow!("reasoner.output_limit_bytes must be > 0"));
        }
        if self.tools.command_timeout_secs == 0 || self.tools.request_timeout_secs == 0 {
            return Err(anyhow!("tools timeouts must be > 0"));
        }
        if self.tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        if self.tools.mode == ToolsMode::Remote && self.tools.endpoint.trim().is_empty() {
            return Err(anyhow!("tools.endpoint is required in remote mode"));
        }
        if self.verify.test_command.trim().is_empty() {
            return Err(anyhow!("verify.test_command must not be empty"));
        }
        if !self
            .verify
            .failure_markers
            .iter()
            .any(|marker| !marker.trim().is_empty())
        {
            return Err(anyhow!(
                "verify.failure_markers must contain at least one non-empty marker"
            ));
        }
        if self.cycle.prompt_budget_bytes == 0 {
            return Err(anyhow!("cycle.prompt_budget_bytes must be > 0"));
        }
        if self.schedule.cycle_interval_secs == 0 || self.schedule.status_interval_secs == 0 {
            return Err(anyhow!("schedule intervals must be > 0"));
        }
        if self.project.root.split('/').any(|segment| segment == "..") {
            return Err(anyhow!("project.root must stay inside the project directory"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevloopConfig> {
    if !path.exists() {
        let cfg = DevloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
