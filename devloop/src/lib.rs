//! Plan-driven development loop.
//!
//! A plan of features and tasks is worked through one task at a time: the
//! engine asks a reasoning service for a solution, writes the files it
//! names, verifies the result, retries once, and records progress.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, solution parsing,
//!   verdicts, plan diagnostics). No I/O.
//! - **[`io`]**: Side effects (config, plan and progress documents, process
//!   execution, git, reasoner, toolbox, notifications, prompts).
//!
//! Orchestration modules ([`planner`], [`cycle`], [`gate`], [`status`],
//! [`validate`], [`app`]) combine the two to implement the CLI commands and
//! the HTTP adapter in `devloop-ui`.

pub mod app;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod plan;
pub mod planner;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
