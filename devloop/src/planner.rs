//! Plan loading: use the persisted plan, or ask the reasoner for one.

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::diagnostics::plan_diagnostics;
use crate::core::solution::code_blocks;
use crate::io::config::DevloopConfig;
use crate::io::init::DevloopPaths;
use crate::io::plan_store::{load_plan, schema_errors, write_plan_raw};
use crate::io::prompt::PromptBuilder;
use crate::io::reasoner::{AskRequest, Reasoner, ask_or_fallback};
use crate::io::toolbox::{ToolCall, Toolbox};
use crate::plan::Plan;

/// Listing text used when the project subtree cannot be listed.
pub const NEW_PROJECT_STRUCTURE: &str = "(project appears to be new; no files yet)";

/// Fatal problems obtaining a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan storage failed: {0:#}")]
    Io(anyhow::Error),
    #[error("plan document could not be parsed: {0}")]
    Parse(String),
    #[error("plan reply contains no ```yaml block")]
    MissingYamlBlock,
    #[error("plan violates the schema: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("plan contains no features")]
    Empty,
}

/// Return the persisted plan, generating and persisting one first if none
/// exists. `description` seeds generation.
#[instrument(skip_all, fields(plan = %paths.plan_path.display()))]
pub fn load_or_generate<R, T>(
    paths: &DevloopPaths,
    config: &DevloopConfig,
    reasoner: &R,
    toolbox: &T,
    description: &str,
) -> Result<Plan, PlanError>
where
    R: Reasoner + ?Sized,
    T: Toolbox + ?Sized,
{
    if let Some(plan) = load_plan(&paths.plan_path).map_err(PlanError::Io)? {
        info!(features = plan.features.len(), "using persisted plan");
        log_diagnostics(&plan);
        return Ok(plan);
    }

    info!("no plan found, generating one");
    let structure = project_structure(toolbox, &config.project.root);
    let prompt = PromptBuilder::new(config.cycle.prompt_budget_bytes)
        .and_then(|builder| builder.render_plan(description, &structure))
        .map_err(PlanError::Io)?;
    let request = AskRequest {
        prompt,
        system: config.reasoner.system_prompt.clone(),
        max_tokens: config.reasoner.max_tokens,
    };
    let reply = ask_or_fallback(reasoner, &request, &config.reasoner.fallback_response);
    if reply.is_degraded() {
        warn!("plan generation used the fallback reply");
    }

    let raw = extract_plan_yaml(reply.text())?;
    let plan = parse_generated(&raw)?;
    write_plan_raw(&paths.plan_path, &raw).map_err(PlanError::Io)?;
    info!(
        features = plan.features.len(),
        tasks = plan.task_count(),
        "generated plan saved"
    );
    log_diagnostics(&plan);
    Ok(plan)
}

/// Body of the first ```yaml block in `reply`.
pub fn extract_plan_yaml(reply: &str) -> Result<String, PlanError> {
    let mut yaml_blocks = code_blocks(reply)
        .into_iter()
        .filter(|block| matches!(block.language.as_deref(), Some("yaml" | "yml")));
    let first = yaml_blocks.next().ok_or(PlanError::MissingYamlBlock)?;
    let extra = yaml_blocks.count();
    if extra > 0 {
        warn!(extra, "plan reply has several yaml blocks, using the first");
    }
    Ok(first.body)
}

fn parse_generated(raw: &str) -> Result<Plan, PlanError> {
    let violations = schema_errors(raw).map_err(|err| PlanError::Parse(format!("{err:#}")))?;
    let parsed = Plan::from_yaml(raw);
    if matches!(&parsed, Ok(plan) if plan.features.is_empty()) {
        return Err(PlanError::Empty);
    }
    if !violations.is_empty() {
        return Err(PlanError::Schema(violations));
    }
    parsed.map_err(|err| PlanError::Parse(err.to_string()))
}

/// Recursive listing of the project subtree, or a placeholder when the
/// listing fails.
pub fn project_structure<T: Toolbox + ?Sized>(toolbox: &T, project_root: &str) -> String {
    let call = ToolCall::ListDirectory {
        path: project_root.to_string(),
        recursive: true,
    };
    match toolbox.invoke(&call) {
        Ok(reply) => reply.text().to_string(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "project listing failed");
            NEW_PROJECT_STRUCTURE.to_string()
        }
    }
}

fn log_diagnostics(plan: &Plan) {
    for problem in plan_diagnostics(plan) {
        warn!(problem = %problem, "plan diagnostic");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedReasoner, ScriptedToolbox};
    use std::fs;

    const PLAN_REPLY: &str = "Here is the plan:\n\n```yaml\nfeatures:\n  - id: core\n    name: Core\n    tasks:\n      - id: setup\n        description: Set up the package\n```\n";

    fn setup() -> (tempfile::TempDir, DevloopPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = DevloopPaths::new(temp.path());
        (temp, paths)
    }

    #[test]
    fn persisted_plan_is_used_without_asking() {
        let (_temp, paths) = setup();
        write_plan_raw(
            &paths.plan_path,
            "features:\n  - id: a\n    name: A\n    dependencies: [missing]\n",
        )
        .expect("write");
        let reasoner = ScriptedReasoner::new(Vec::<String>::new());

        let plan = load_or_generate(
            &paths,
            &DevloopConfig::default(),
            &reasoner,
            &ScriptedToolbox::default(),
            "",
        )
        .expect("plan");
        assert_eq!(plan.features[0].dependencies, vec!["missing"]);
        assert!(reasoner.prompts().is_empty());
    }

    #[test]
    fn generated_plan_is_validated_and_saved() {
        let (_temp, paths) = setup();
        let reasoner = ScriptedReasoner::new([PLAN_REPLY]);

        let plan = load_or_generate(
            &paths,
            &DevloopConfig::default(),
            &reasoner,
            &ScriptedToolbox::default(),
            "A packaging tool",
        )
        .expect("plan");
        assert_eq!(plan.features[0].id, "core");
        let saved = fs::read_to_string(&paths.plan_path).expect("saved");
        assert!(saved.starts_with("features:\n  - id: core"));
        let prompts = reasoner.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("A packaging tool"));
    }

    #[test]
    fn reply_without_yaml_is_fatal() {
        let (_temp, paths) = setup();
        let reasoner = ScriptedReasoner::new(["I cannot help with that."]);
        let err = load_or_generate(
            &paths,
            &DevloopConfig::default(),
            &reasoner,
            &ScriptedToolbox::default(),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::MissingYamlBlock));
        assert!(!paths.plan_path.exists());
    }

    #[test]
    fn empty_feature_list_is_fatal() {
        let (_temp, paths) = setup();
        let reasoner = ScriptedReasoner::new(["```yaml\nfeatures: []\n```"]);
        let err = load_or_generate(
            &paths,
            &DevloopConfig::default(),
            &reasoner,
            &ScriptedToolbox::default(),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Empty));
    }

    #[test]
    fn schema_violations_are_reported() {
        let raw = "```yaml\nfeatures:\n  - id: a\n    tasks: []\n```";
        let err = parse_generated(&extract_plan_yaml(raw).expect("yaml")).unwrap_err();
        assert!(matches!(err, PlanError::Schema(ref v) if v.iter().any(|e| e.contains("name"))));
    }

    #[test]
    fn first_of_several_yaml_blocks_wins() {
        let reply = "```yaml\nfeatures: [first]\n```\n\n```yml\nfeatures: [second]\n```";
        assert!(extract_plan_yaml(reply).expect("yaml").contains("first"));
    }

    #[test]
    fn failed_listing_reads_as_new_project() {
        let toolbox = ScriptedToolbox::default().failing_listing();
        assert_eq!(project_structure(&toolbox, "code"), NEW_PROJECT_STRUCTURE);
    }
}
