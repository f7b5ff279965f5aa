//! `devloop` command-line interface.
//!
//! Works on the project in the current directory; state lives in `.devloop/`.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use devloop::app::{build_engine, toolbox_from_config};
use devloop::cycle::{CycleStop, TriggerOutcome};
use devloop::exit_codes;
use devloop::gate::GateState;
use devloop::io::config::load_config;
use devloop::io::init::{DevloopPaths, InitOptions, init_devloop};
use devloop::io::notify::{Notification, Notifier, notifier_from_config};
use devloop::io::plan_store::load_plan;
use devloop::io::progress_store::ProgressStore;
use devloop::io::reasoner::CommandReasoner;
use devloop::logging;
use devloop::planner::load_or_generate;
use devloop::status::{PlanView, StatusReport};
use devloop::validate::validate_devloop;

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Plan-driven development loop: ask, apply, verify, commit"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.devloop/` with a default config and PROJECT.md.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Work through pending tasks until done, blocked, or a task aborts.
    Cycle,
    /// Print overall progress, current work and recent activity.
    Status {
        /// Also send the report through the configured notifier.
        #[arg(long)]
        notify: bool,
    },
    /// Print the plan with completion markers, generating it if missing.
    Plan,
    /// Check config, plan schema, plan dependencies and progress document.
    Check,
    /// Run cycles and status reports on the configured intervals.
    Watch,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = Path::new(".");
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Cycle => cmd_cycle(root),
        Command::Status { notify } => cmd_status(root, notify),
        Command::Plan => cmd_plan(root),
        Command::Check => cmd_check(root),
        Command::Watch => cmd_watch(root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_devloop(root, &InitOptions { force })?;
    println!(
        "initialized {}; describe the project in {}",
        paths.devloop_dir.display(),
        paths.project_path.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_cycle(root: &Path) -> Result<i32> {
    let engine = build_engine(root)?;
    let report = match engine.run_cycle() {
        TriggerOutcome::Finished(report) => report,
        TriggerOutcome::Busy => {
            println!("busy: a cycle is already running");
            return Ok(exit_codes::BUSY);
        }
    };
    println!("{}", report.summary());
    Ok(match report.stop {
        CycleStop::Done if report.tasks_completed == 0 => exit_codes::COMPLETE,
        CycleStop::Done | CycleStop::TaskLimit => exit_codes::OK,
        CycleStop::Blocked { .. } => exit_codes::BLOCKED,
        CycleStop::Aborted(_) => exit_codes::ABORTED,
    })
}

fn cmd_status(root: &Path, notify: bool) -> Result<i32> {
    let paths = DevloopPaths::new(root);
    let Some(plan) = load_plan(&paths.plan_path)? else {
        println!("no plan yet; run `devloop plan` or `devloop cycle`");
        return Ok(exit_codes::OK);
    };
    let store = ProgressStore::load(&paths.progress_path);
    let report = StatusReport::build(&plan, store.state(), GateState::Idle);
    let text = report.render_text();
    print!("{text}");
    if notify {
        let config = load_config(&paths.config_path)?;
        notifier_from_config(&config.notify)
            .notify(&Notification::info(
                format!("Progress report: {}%", report.overall_percent),
                text,
            ))
            .context("send status report")?;
    }
    Ok(exit_codes::OK)
}

fn cmd_plan(root: &Path) -> Result<i32> {
    let paths = DevloopPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let reasoner = CommandReasoner::from_config(&config.reasoner);
    let toolbox = toolbox_from_config(&config, &paths.root);
    let description = paths.read_project_description()?;
    let plan = load_or_generate(&paths, &config, &reasoner, &toolbox, &description)?;
    let store = ProgressStore::load(&paths.progress_path);
    print!("{}", PlanView::build(&plan, store.state()).render_text());
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path) -> Result<i32> {
    let outcome = validate_devloop(root)?;
    if !outcome.plan_present {
        println!("no plan yet");
    }
    for problem in &outcome.problems {
        println!("- {problem}");
    }
    if outcome.is_clean() {
        println!("ok");
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::INVALID)
    }
}

fn cmd_watch(root: &Path) -> Result<i32> {
    let paths = DevloopPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let engine = build_engine(root)?;
    engine.send_startup_notice();
    let cycle_every = Duration::from_secs(config.schedule.cycle_interval_secs);
    let status_every = Duration::from_secs(config.schedule.status_interval_secs);
    info!(
        cycle_secs = cycle_every.as_secs(),
        status_secs = status_every.as_secs(),
        "watching"
    );

    let mut next_cycle = Instant::now();
    let mut next_status = Instant::now() + status_every;
    loop {
        let now = Instant::now();
        if now >= next_cycle {
            if let TriggerOutcome::Finished(report) = engine.run_cycle() {
                println!("{}", report.summary());
            }
            next_cycle = Instant::now() + cycle_every;
        }
        if now >= next_status {
            if let Err(err) = engine.send_status_report() {
                warn!(error = %format!("{err:#}"), "status report failed");
            }
            next_status = Instant::now() + status_every;
        }
        let wake = next_cycle.min(next_status);
        thread::sleep(wake.saturating_duration_since(Instant::now()));
    }
}
