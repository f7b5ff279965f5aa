//! CLI tests for the `devloop` binary.
//!
//! Spawns the binary in a temporary project and checks exit codes and the
//! text it prints.

use std::path::Path;
use std::process::{Command, Output};

use devloop::exit_codes;
use devloop::io::init::{DevloopPaths, InitOptions, init_devloop};
use devloop::io::plan_store::write_plan_raw;
use devloop::io::progress_store::ProgressStore;

const ONE_TASK_PLAN: &str = "features:
  - id: core
    name: Core
    tasks:
      - id: t1
        description: Write the entry point
";

fn devloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run devloop")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_creates_layout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = devloop(temp.path(), &["init"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let paths = DevloopPaths::new(temp.path());
    assert!(paths.config_path.is_file());
    assert!(paths.project_path.is_file());
    assert!(!paths.plan_path.exists());
}

#[test]
fn second_init_without_force_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(devloop(temp.path(), &["init"]).status.code(), Some(exit_codes::OK));

    let output = devloop(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("already exists"));

    let forced = devloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn check_without_init_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = devloop(temp.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn check_after_init_is_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_devloop(temp.path(), &InitOptions { force: false }).expect("init");

    let output = devloop(temp.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("no plan yet"));
    assert!(text.contains("ok"));
}

#[test]
fn check_reports_schema_problems() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan_raw(&paths.plan_path, "features:\n  - id: core\n").expect("plan");

    let output = devloop(temp.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(stdout(&output).contains("plan schema:"));
}

#[test]
fn status_without_plan_says_so() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_devloop(temp.path(), &InitOptions { force: false }).expect("init");

    let output = devloop(temp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("no plan yet"));
}

#[test]
fn status_prints_progress_for_persisted_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan_raw(&paths.plan_path, ONE_TASK_PLAN).expect("plan");

    let output = devloop(temp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).starts_with("Overall progress: 0% (0/1 features, 0/1 tasks)"));
}

#[test]
fn cycle_on_completed_plan_exits_complete() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan_raw(&paths.plan_path, ONE_TASK_PLAN).expect("plan");
    let mut store = ProgressStore::load(&paths.progress_path);
    store.mark_task_completed("core", "t1").expect("task");
    store.mark_feature_completed("core").expect("feature");

    let output = devloop(temp.path(), &["cycle"]);
    assert_eq!(output.status.code(), Some(exit_codes::COMPLETE));
    assert!(stdout(&output).contains("all features complete"));
}

#[test]
fn plan_prints_persisted_plan_with_markers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
    write_plan_raw(&paths.plan_path, ONE_TASK_PLAN).expect("plan");

    let output = devloop(temp.path(), &["plan"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("[ ] core Core (0%)"));
    assert!(text.contains("[ ] t1 Write the entry point"));
}
