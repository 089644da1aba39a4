//! Plan data model: a project with an ordered list of user stories.
//!
//! The on-disk format (`prd.json`, camelCase) is owned by the plan store in
//! [`crate::io::plan_store`]; this module holds the pure types and helpers.

use serde::{Deserialize, Serialize};

/// One work item in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Lower value means more urgent.
    #[serde(default)]
    pub priority: i64,
    pub passes: bool,
}

/// The full work plan the agent iterates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub project: String,
    #[serde(default)]
    pub description: String,
    pub user_stories: Vec<Story>,
}

impl Plan {
    /// Whether every story in the plan passes.
    pub fn all_passing(&self) -> bool {
        self.user_stories.iter().all(|story| story.passes)
    }

    /// The most urgent story that does not pass yet (lowest priority value,
    /// plan order breaking ties).
    pub fn next_open_story(&self) -> Option<&Story> {
        self.user_stories
            .iter()
            .filter(|story| !story.passes)
            .min_by_key(|story| story.priority)
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|story| story.id == id)
    }
}

/// Check plan invariants beyond the schema: unique story ids.
///
/// Returns one message per violation; empty means valid.
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for story in &plan.user_stories {
        if !seen.insert(story.id.as_str()) {
            errors.push(format!("duplicate story id {}", story.id));
        }
    }
    errors
}

/// Starter plan written by `chief init`.
pub fn default_plan(project: &str) -> Plan {
    Plan {
        project: project.to_string(),
        description: String::new(),
        user_stories: vec![Story {
            id: "US-001".to_string(),
            title: "Describe the first user story".to_string(),
            description: "Replace this with what the agent should build.".to_string(),
            acceptance_criteria: vec!["Define at least one acceptance criterion".to_string()],
            priority: 1,
            passes: false,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan_with, story};

    #[test]
    fn next_open_story_prefers_lowest_priority() {
        let mut plan = plan_with(vec![
            story("US-001", false),
            story("US-002", false),
            story("US-003", true),
        ]);
        plan.user_stories[0].priority = 5;
        plan.user_stories[1].priority = 1;

        let next = plan.next_open_story().expect("open story");
        assert_eq!(next.id, "US-002");
    }

    #[test]
    fn next_open_story_is_none_when_all_pass() {
        let plan = plan_with(vec![story("US-001", true)]);
        assert!(plan.next_open_story().is_none());
        assert!(plan.all_passing());
    }

    #[test]
    fn plan_order_breaks_priority_ties() {
        let plan = plan_with(vec![story("US-001", false), story("US-002", false)]);
        assert_eq!(plan.next_open_story().expect("open").id, "US-001");
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let plan = plan_with(vec![story("US-001", false), story("US-001", true)]);
        let errors = validate_invariants(&plan);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate story id US-001"));
    }

    #[test]
    fn camel_case_format_round_trips() {
        let plan = plan_with(vec![story("US-001", false)]);
        let raw = serde_json::to_string(&plan).expect("serialize");
        assert!(raw.contains("\"userStories\""));
        assert!(raw.contains("\"acceptanceCriteria\""));
        let back: Plan = serde_json::from_str(&raw).expect("parse");
        assert_eq!(back, plan);
    }
}
