//! Prompt rendering for task, correction and plan requests.
//!
//! Templates carry `<!-- section:KEY required|droppable -->` markers. After
//! rendering, droppable sections are removed in a fixed order until the
//! prompt fits the byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::plan::{Feature, Task};

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");

const DROP_ORDER: [&str; 2] = ["structure", "failure"];
const TRUNCATION_NOTE: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

/// Everything a task prompt needs.
#[derive(Debug, Clone, Copy)]
pub struct TaskPromptInputs<'a> {
    pub feature: &'a Feature,
    pub task: &'a Task,
    pub project_root: &'a str,
    pub structure: &'a str,
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Renders prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task template")?;
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        Ok(Self { env, budget_bytes })
    }

    /// First-attempt prompt for a task.
    pub fn render_task(&self, inputs: &TaskPromptInputs<'_>) -> Result<String> {
        self.render_task_inner(inputs, None)
    }

    /// Follow-up prompt after a failed verification; `failure_tail` is the
    /// end of the failing output.
    pub fn render_correction(
        &self,
        inputs: &TaskPromptInputs<'_>,
        failure_tail: &str,
    ) -> Result<String> {
        let tail = failure_tail.trim();
        let note = if tail.is_empty() {
            "(the verification produced no output)"
        } else {
            tail
        };
        self.render_task_inner(inputs, Some(note))
    }

    /// Prompt asking for a new plan.
    pub fn render_plan(&self, description: &str, structure: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("plan")?
            .render(context! {
                description => description.trim(),
                structure => structure.trim(),
            })
            .context("render plan prompt")?;
        Ok(self.fit(&rendered))
    }

    fn render_task_inner(
        &self,
        inputs: &TaskPromptInputs<'_>,
        failure: Option<&str>,
    ) -> Result<String> {
        let rendered = self
            .env
            .get_template("task")?
            .render(context! {
                feature => inputs.feature,
                task => inputs.task,
                project_root => inputs.project_root,
                structure => inputs.structure.trim(),
                failure => failure,
            })
            .with_context(|| format!("render prompt for task {}", inputs.task.id))?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim();
        if content.is_empty() {
            continue;
        }
        sections.push(Section {
            key: key.as_str().to_string(),
            required: kind.as_str() == "required",
            content: content.to_string(),
        });
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    // Still too large: cut the longest section.
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let allowed = longest
        .content
        .len()
        .saturating_sub(total - budget)
        .saturating_sub(TRUNCATION_NOTE.len());
    let cut = floor_char_boundary(&longest.content, allowed);
    debug!(section = %longest.key, before_len = longest.content.len(), after_len = cut, "truncated section for budget");
    longest.content.truncate(cut);
    longest.content.push_str(TRUNCATION_NOTE);
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feature, task, task_with_check};

    fn render(task: &Task, structure: &str, budget: usize) -> String {
        let feature = feature("auth", &[], vec![task.clone()]);
        PromptBuilder::new(budget)
            .expect("builder")
            .render_task(&TaskPromptInputs {
                feature: &feature,
                task,
                project_root: "code",
                structure,
            })
            .expect("render")
    }

    #[test]
    fn task_prompt_names_task_feature_and_structure() {
        let prompt = render(&task("login"), "[FILE] main.py", 10_000);
        assert!(prompt.contains("(id: `login`)"));
        assert!(prompt.contains("(id: `auth`)"));
        assert!(prompt.contains("[FILE] main.py"));
        assert!(prompt.contains("No additional details for this task."));
        assert!(!prompt.contains("### Verification"));
        assert!(!prompt.contains("### Previous Attempt Failed"));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn verification_command_is_included_when_present() {
        let prompt = render(&task_with_check("login", "pytest tests/test_login.py"), "", 10_000);
        assert!(prompt.contains("### Verification"));
        assert!(prompt.contains("pytest tests/test_login.py"));
    }

    #[test]
    fn correction_prompt_carries_failure_tail() {
        let task = task("login");
        let feature = feature("auth", &[], vec![task.clone()]);
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .render_correction(
                &TaskPromptInputs {
                    feature: &feature,
                    task: &task,
                    project_root: "code",
                    structure: "",
                },
                "FAILED test_login - AssertionError",
            )
            .expect("render");
        assert!(prompt.contains("### Previous Attempt Failed"));
        assert!(prompt.contains("AssertionError"));
    }

    #[test]
    fn budget_drops_structure_before_required_sections() {
        let prompt = render(&task("login"), &"[FILE] x.py\n".repeat(500), 1_200);
        assert!(!prompt.contains("### Current Project Structure"));
        assert!(prompt.contains("### Instructions"));
        assert!(prompt.contains("### Task Details"));
    }

    #[test]
    fn oversized_required_section_is_truncated() {
        let mut long = task("login");
        long.details = Some("é".repeat(2_000));
        let prompt = render(&long, "", 1_000);
        assert!(prompt.len() <= 1_000 + "\n\n".len() * 4);
        assert!(prompt.contains("[truncated]"));
    }

    #[test]
    fn plan_prompt_asks_for_a_yaml_block() {
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .render_plan("A todo app", "(project appears to be new)")
            .expect("render");
        assert!(prompt.starts_with("### Project Description\n\nA todo app"));
        assert!(prompt.contains("```yaml"));
        assert!(prompt.contains("(project appears to be new)"));
    }
}
