//! Tool calls used by the cycle to touch the project: listing, reading and
//! writing files, running commands, committing.
//!
//! [`Toolbox`] is the seam; [`LocalToolbox`] performs calls directly in the
//! project directory and [`crate::io::remote_tools::HttpToolbox`] forwards
//! them to a tool server.

use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::io::config::ToolsConfig;
use crate::io::git::Git;
use crate::io::process::{Bounds, run_bounded};

/// Directory names never shown in project listings.
const SKIPPED_DIRS: [&str; 6] = [
    ".git",
    ".devloop",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
];

/// A typed tool invocation. Serializes to the call's JSON parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolCall {
    ListDirectory {
        path: String,
        recursive: bool,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
        description: String,
    },
    MoveFile {
        from: String,
        to: String,
    },
    RunCommand {
        command: String,
        workdir: String,
    },
    CommitPush {
        message: String,
    },
    ScanProject {
        path: String,
    },
    UpdateFeature {
        id: String,
        name: String,
        description: String,
        progress: u8,
    },
}

impl ToolCall {
    /// Wire name of the tool.
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ListDirectory { .. } => "list_directory",
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::MoveFile { .. } => "move_file",
            ToolCall::RunCommand { .. } => "run_command",
            ToolCall::CommitPush { .. } => "commit_push",
            ToolCall::ScanProject { .. } => "scan_project",
            ToolCall::UpdateFeature { .. } => "update_feature",
        }
    }

    /// JSON parameters for the call.
    pub fn params(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Text returned by a tool. `Degraded` replies were produced without the
/// real tool (e.g. simulated while a server was unreachable) and should not
/// be trusted as evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReply {
    Nominal(String),
    Degraded(String),
}

impl ToolReply {
    pub fn text(&self) -> &str {
        match self {
            ToolReply::Nominal(text) | ToolReply::Degraded(text) => text.as_str(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ToolReply::Degraded(_))
    }
}

/// Abstraction over tool backends.
pub trait Toolbox {
    fn invoke(&self, call: &ToolCall) -> Result<ToolReply>;
}

impl<T: Toolbox + ?Sized> Toolbox for Box<T> {
    fn invoke(&self, call: &ToolCall) -> Result<ToolReply> {
        (**self).invoke(call)
    }
}

/// Executes tool calls against the local filesystem, shell, and git.
///
/// Paths are resolved relative to the workspace and may not escape it.
#[derive(Debug, Clone)]
pub struct LocalToolbox {
    workspace: PathBuf,
    command_timeout: Duration,
    output_limit_bytes: usize,
    failure_marker: String,
    push: bool,
}

impl LocalToolbox {
    pub fn new(workspace: impl Into<PathBuf>, cfg: &ToolsConfig, failure_marker: &str) -> Self {
        Self {
            workspace: workspace.into(),
            command_timeout: Duration::from_secs(cfg.command_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            failure_marker: failure_marker.to_string(),
            push: cfg.push,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if path.is_absolute() {
            bail!("absolute path not allowed: {relative}");
        }
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            bail!("path escapes the workspace: {relative}");
        }
        Ok(self.workspace.join(path))
    }

    fn list_directory(&self, relative: &str, recursive: bool) -> Result<String> {
        let dir = self.resolve(relative)?;
        if !dir.exists() {
            return Ok(format!("{relative} does not exist yet\n"));
        }
        if !dir.is_dir() {
            bail!("not a directory: {relative}");
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut listing = String::new();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && SKIPPED_DIRS
                        .iter()
                        .any(|skip| entry.file_name() == *skip))
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("list {relative}"))?;
            let indent = "  ".repeat(entry.depth() - 1);
            let name = entry.file_name().to_string_lossy();
            let kind = if entry.file_type().is_dir() { "[DIR]" } else { "[FILE]" };
            let _ = writeln!(listing, "{indent}{kind} {name}");
        }
        if listing.is_empty() {
            listing.push_str("(empty directory)\n");
        }
        Ok(listing)
    }

    fn write_file(&self, relative: &str, content: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut body = content.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        let verb = if existed { "Modified" } else { "Created" };
        Ok(format!("{verb} {relative} ({} bytes)", content.len()))
    }

    fn move_file(&self, from: &str, to: &str) -> Result<String> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::rename(&source, &target)
            .with_context(|| format!("move {} to {}", source.display(), target.display()))?;
        Ok(format!("Moved {from} to {to}"))
    }

    /// Run through `sh -c`. Non-zero exits and timeouts append the failure
    /// marker so verification sees them as failures.
    fn run_command(&self, command: &str, workdir: &str) -> Result<String> {
        let dir = self.resolve(workdir)?;
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&dir);
        let bounds = Bounds {
            timeout: self.command_timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, None, bounds).with_context(|| format!("run `{command}`"))?;

        let mut text = output.transcript();
        if output.timed_out {
            let _ = write!(
                text,
                "\n{}: command timed out after {}s\n",
                self.failure_marker,
                self.command_timeout.as_secs()
            );
        } else if !output.status.success() {
            let _ = write!(
                text,
                "\n{}: command exited with status {:?}\n",
                self.failure_marker,
                output.status.code()
            );
        }
        Ok(text)
    }

    fn commit_push(&self, message: &str) -> Result<String> {
        Ok(Git::new(&self.workspace)
            .commit_all(message, self.push)?
            .describe())
    }

    fn scan_project(&self, relative: &str) -> Result<String> {
        let dir = self.resolve(relative)?;
        if !dir.is_dir() {
            return Ok(format!("{relative} does not exist yet"));
        }
        let files = WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|entry| {
                !SKIPPED_DIRS
                    .iter()
                    .any(|skip| entry.file_name() == *skip)
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .count();
        Ok(format!("Scanned {relative}: {files} files"))
    }
}

impl Toolbox for LocalToolbox {
    #[instrument(skip_all, fields(tool = call.name()))]
    fn invoke(&self, call: &ToolCall) -> Result<ToolReply> {
        debug!("invoking local tool");
        let text = match call {
            ToolCall::ListDirectory { path, recursive } => self.list_directory(path, *recursive)?,
            ToolCall::ReadFile { path } => {
                let resolved = self.resolve(path)?;
                fs::read_to_string(&resolved)
                    .with_context(|| format!("read {}", resolved.display()))?
            }
            ToolCall::WriteFile { path, content, .. } => self.write_file(path, content)?,
            ToolCall::MoveFile { from, to } => self.move_file(from, to)?,
            ToolCall::RunCommand { command, workdir } => self.run_command(command, workdir)?,
            ToolCall::CommitPush { message } => self.commit_push(message)?,
            ToolCall::ScanProject { path } => self.scan_project(path)?,
            ToolCall::UpdateFeature { id, progress, .. } => {
                // Progress lives in the progress document; nothing else to update locally.
                info!(feature = %id, progress, "feature progress");
                format!("Feature {id} at {progress}%")
            }
        };
        if text.trim().is_empty() {
            warn!("tool returned no output");
        }
        Ok(ToolReply::Nominal(text))
    }
}
