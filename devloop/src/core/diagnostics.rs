//! Plan checks the scheduler does not enforce.
//!
//! The scheduler tolerates unknown dependency ids and dependency cycles by
//! never selecting the affected features. These checks surface such plans
//! up front instead of letting them stall silently.

use std::collections::{HashMap, HashSet};

use crate::plan::Plan;

/// Report problems in a plan's structure:
/// - duplicate feature ids
/// - duplicate task ids within a feature
/// - dependencies on unknown features
/// - dependency cycles
pub fn plan_diagnostics(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for feature in &plan.features {
        if !seen.insert(feature.id.as_str()) {
            errors.push(format!("duplicate feature id '{}'", feature.id));
        }
        let mut task_ids = HashSet::new();
        for task in &feature.tasks {
            if !task_ids.insert(task.id.as_str()) {
                errors.push(format!(
                    "{}: duplicate task id '{}'",
                    feature.id, task.id
                ));
            }
        }
    }

    for feature in &plan.features {
        for dep in &feature.dependencies {
            if !seen.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{}'", feature.id, dep));
            }
        }
    }

    for cycle in dependency_cycles(plan) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }
    errors
}

/// Find dependency cycles. Each cycle is reported once, starting and ending
/// at the same feature id.
pub fn dependency_cycles(plan: &Plan) -> Vec<Vec<String>> {
    let edges: HashMap<&str, Vec<&str>> = plan
        .features
        .iter()
        .map(|feature| {
            (
                feature.id.as_str(),
                feature.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut cycles = Vec::new();
    let mut finished: HashSet<&str> = HashSet::new();
    for feature in &plan.features {
        let mut stack = Vec::new();
        visit(
            feature.id.as_str(),
            &edges,
            &mut stack,
            &mut finished,
            &mut cycles,
        );
    }
    cycles
}

fn visit<'a>(
    id: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    stack: &mut Vec<&'a str>,
    finished: &mut HashSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    if finished.contains(id) {
        return;
    }
    if let Some(start) = stack.iter().position(|entry| *entry == id) {
        let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
        cycle.push(id.to_string());
        cycles.push(cycle);
        return;
    }
    let Some(deps) = edges.get(id) else {
        return;
    };
    stack.push(id);
    for dep in deps {
        visit(dep, edges, stack, finished, cycles);
    }
    stack.pop();
    finished.insert(id);
}
