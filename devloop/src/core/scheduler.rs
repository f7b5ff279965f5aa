//! Deterministic selection of the next feature and task.

use crate::core::types::ProgressState;
use crate::plan::{Feature, Plan, Task};

/// First incomplete feature, in declaration order, whose dependencies are all
/// completed.
///
/// Falls back to the first incomplete feature with no dependencies. Returns
/// `None` when every feature is complete or every remaining one is blocked.
pub fn next_feature<'a>(plan: &'a Plan, state: &ProgressState) -> Option<&'a Feature> {
    let mut incomplete = plan
        .features
        .iter()
        .filter(|feature| !state.is_feature_completed(&feature.id));

    if let Some(ready) = incomplete.clone().find(|feature| {
        feature
            .dependencies
            .iter()
            .all(|dep| state.is_feature_completed(dep))
    }) {
        return Some(ready);
    }

    incomplete.find(|feature| feature.dependencies.is_empty())
}

/// First task of `feature` whose composite key is not completed.
pub fn next_task<'a>(feature: &'a Feature, state: &ProgressState) -> Option<&'a Task> {
    feature
        .tasks
        .iter()
        .find(|task| !state.is_task_completed(&feature.id, &task.id))
}

/// Ids of features not yet completed, in declaration order.
///
/// Distinguishes "all work done" from "remaining work is blocked" when
/// [`next_feature`] returns `None`.
pub fn pending_features<'a>(plan: &'a Plan, state: &ProgressState) -> Vec<&'a str> {
    plan.features
        .iter()
        .filter(|feature| !state.is_feature_completed(&feature.id))
        .map(|feature| feature.id.as_str())
        .collect()
}

/// Completion percentage of a feature, rounded to the nearest integer.
///
/// A feature with no tasks counts as fully complete.
pub fn feature_percent(feature: &Feature, state: &ProgressState) -> u8 {
    let total = feature.tasks.len();
    if total == 0 {
        return 100;
    }
    let done = feature
        .tasks
        .iter()
        .filter(|task| state.is_task_completed(&feature.id, &task.id))
        .count();
    ((done as f64 / total as f64) * 100.0).round() as u8
}

/// Share of completed features across the plan, rounded.
pub fn overall_percent(plan: &Plan, state: &ProgressState) -> u8 {
    let total = plan.features.len();
    if total == 0 {
        return 0;
    }
    let done = plan
        .features
        .iter()
        .filter(|feature| state.is_feature_completed(&feature.id))
        .count();
    ((done as f64 / total as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::task_key;
    use crate::test_support::{feature, fresh_state, plan, task};

    #[test]
    fn fresh_state_picks_first_feature_and_task() {
        let plan = plan(vec![feature("f1", &[], vec![task("t1")])]);
        let state = fresh_state();

        let selected = next_feature(&plan, &state).expect("feature");
        assert_eq!(selected.id, "f1");
        assert_eq!(next_task(selected, &state).expect("task").id, "t1");
    }

    #[test]
    fn dependent_feature_waits_for_its_prerequisite() {
        let plan = plan(vec![
            feature("api", &["auth"], vec![task("t1")]),
            feature("auth", &[], vec![task("t1")]),
        ]);
        let mut state = fresh_state();

        assert_eq!(next_feature(&plan, &state).expect("feature").id, "auth");

        state.completed_feature_ids.insert("auth".to_string());
        assert_eq!(next_feature(&plan, &state).expect("feature").id, "api");
    }

    #[test]
    fn never_returns_a_feature_with_unmet_dependencies() {
        let plan = plan(vec![
            feature("c", &["a", "b"], vec![task("t1")]),
            feature("b", &["a"], vec![task("t1")]),
            feature("a", &[], vec![task("t1")]),
        ]);
        let mut state = fresh_state();
        let mut order = Vec::new();
        while let Some(selected) = next_feature(&plan, &state) {
            assert!(
                selected
                    .dependencies
                    .iter()
                    .all(|dep| state.is_feature_completed(dep))
            );
            order.push(selected.id.clone());
            state.completed_feature_ids.insert(selected.id.clone());
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_dependency_blocks_forever() {
        let plan = plan(vec![feature("f1", &["ghost"], vec![task("t1")])]);
        let state = fresh_state();
        assert!(next_feature(&plan, &state).is_none());
        assert_eq!(pending_features(&plan, &state), vec!["f1"]);
    }

    #[test]
    fn dependency_cycle_yields_nothing() {
        let plan = plan(vec![
            feature("a", &["b"], vec![task("t1")]),
            feature("b", &["a"], vec![task("t1")]),
        ]);
        assert!(next_feature(&plan, &fresh_state()).is_none());
    }

    #[test]
    fn next_task_skips_completed_keys() {
        let f = feature("f1", &[], vec![task("t1"), task("t2")]);
        let mut state = fresh_state();
        state.completed_task_keys.insert(task_key("f1", "t1"));
        assert_eq!(next_task(&f, &state).expect("task").id, "t2");

        state.completed_task_keys.insert(task_key("f1", "t2"));
        assert!(next_task(&f, &state).is_none());
    }

    #[test]
    fn selection_is_idempotent() {
        let plan = plan(vec![
            feature("f1", &[], vec![task("t1")]),
            feature("f2", &[], vec![task("t1")]),
        ]);
        let state = fresh_state();
        let first = next_feature(&plan, &state).map(|f| f.id.clone());
        let second = next_feature(&plan, &state).map(|f| f.id.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn percentages_round_to_nearest() {
        let f = feature("f1", &[], vec![task("t1"), task("t2"), task("t3")]);
        let mut state = fresh_state();
        state.completed_task_keys.insert(task_key("f1", "t1"));
        assert_eq!(feature_percent(&f, &state), 33);
        state.completed_task_keys.insert(task_key("f1", "t2"));
        assert_eq!(feature_percent(&f, &state), 67);

        let empty = feature("f2", &[], Vec::new());
        assert_eq!(feature_percent(&empty, &state), 100);

        let p = plan(vec![f, empty]);
        state.completed_feature_ids.insert("f2".to_string());
        assert_eq!(overall_percent(&p, &state), 50);
    }
}
