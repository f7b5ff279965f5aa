//! Reasoning-service abstraction.
//!
//! The [`Reasoner`] trait decouples the cycle from the backend that turns a
//! prompt into text. [`CommandReasoner`] spawns a configured CLI; tests use
//! scripted reasoners that return canned replies without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ReasonerConfig;
use crate::io::process::{Bounds, run_bounded};

/// A single request to the reasoning service.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
}

/// Abstraction over reasoning backends.
pub trait Reasoner {
    /// Return the service's text reply to `request`.
    fn ask(&self, request: &AskRequest) -> Result<String>;
}

impl<R: Reasoner + ?Sized> Reasoner for Box<R> {
    fn ask(&self, request: &AskRequest) -> Result<String> {
        (**self).ask(request)
    }
}

/// Reply as seen by the cycle: either the service's answer or the fixed
/// fallback text substituted after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nominal(String),
    Degraded { text: String, reason: String },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Nominal(text) | Reply::Degraded { text, .. } => text.as_str(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reply::Degraded { .. })
    }
}

/// Ask once; on failure substitute `fallback` instead of propagating.
#[instrument(skip_all, fields(prompt_bytes = request.prompt.len()))]
pub fn ask_or_fallback<R: Reasoner + ?Sized>(
    reasoner: &R,
    request: &AskRequest,
    fallback: &str,
) -> Reply {
    match reasoner.ask(request) {
        Ok(text) => {
            debug!(reply_bytes = text.len(), "reasoner replied");
            Reply::Nominal(text)
        }
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(error = %reason, "reasoner unavailable, using fallback text");
            Reply::Degraded {
                text: fallback.to_string(),
                reason,
            }
        }
    }
}

/// Reasoner that runs a command with the prompt on stdin and reads the reply
/// from stdout (e.g. `claude --print`).
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandReasoner {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &ReasonerConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.timeout(), cfg.output_limit_bytes)
    }

    /// Argument vector with placeholders substituted, plus the stdin payload.
    ///
    /// When the command has no `{system}` placeholder, the system text is
    /// prepended to the prompt instead.
    fn invocation(&self, request: &AskRequest) -> (Vec<String>, String) {
        let system = request.system.as_deref().unwrap_or_default();
        let has_system_slot = self.command.iter().any(|arg| arg.contains("{system}"));
        let argv = self
            .command
            .iter()
            .map(|arg| {
                arg.replace("{system}", system)
                    .replace("{max_tokens}", &request.max_tokens.to_string())
            })
            .collect();
        let stdin = if has_system_slot || system.is_empty() {
            request.prompt.clone()
        } else {
            format!("{system}\n\n{}", request.prompt)
        };
        (argv, stdin)
    }
}

impl Reasoner for CommandReasoner {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn ask(&self, request: &AskRequest) -> Result<String> {
        let (argv, stdin) = self.invocation(request);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("reasoner command is empty"))?;
        info!(program = %program, "asking reasoner");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let bounds = Bounds {
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, Some(stdin.as_bytes()), bounds)
            .with_context(|| format!("run reasoner {program}"))?;

        if output.timed_out {
            return Err(anyhow!("reasoner timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "reasoner failed with status {:?}: {}",
                output.status.code(),
                output.stderr.text().trim()
            ));
        }
        let reply = output.stdout.text().trim().to_string();
        if reply.is_empty() {
            return Err(anyhow!("reasoner returned an empty reply"));
        }
        Ok(reply)
    }
}
