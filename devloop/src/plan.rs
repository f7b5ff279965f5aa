//! Plan data model: features, their dependencies, and ordered tasks.
//!
//! A plan is read once per run and never mutated afterwards. Completion is
//! tracked outside the plan, in [`crate::core::types::ProgressState`].

use serde::{Deserialize, Serialize};

/// A single unit of work inside a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Command whose output decides whether the task passed. Falls back to
    /// the project test command when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
}

/// A named group of tasks with prerequisites on other features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Feature {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

/// Ordered list of features. Declaration order breaks scheduling ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl Plan {
    pub fn feature(&self, feature_id: &str) -> Option<&Feature> {
        self.features
            .iter()
            .find(|feature| feature.id == feature_id)
    }

    pub fn task_count(&self) -> usize {
        self.features.iter().map(|feature| feature.tasks.len()).sum()
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
