//! Iteration prompt rendering.
//!
//! The prompt restates the plan contract each iteration: which stories exist,
//! which already pass, and how the agent must report progress (status tags,
//! the `passes` flag, the completion marker).

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::plan::{Plan, Story};

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

/// Story fields exposed to the template.
#[derive(Debug, Clone, Serialize)]
struct StoryContext {
    id: String,
    title: String,
    description: String,
    acceptance_criteria: Vec<String>,
    priority: i64,
    passes: bool,
}

impl StoryContext {
    fn from_story(story: &Story) -> Self {
        Self {
            id: story.id.clone(),
            title: story.title.clone(),
            description: story.description.clone(),
            acceptance_criteria: story.acceptance_criteria.clone(),
            priority: story.priority,
            passes: story.passes,
        }
    }
}

/// Render the prompt for one loop iteration against the current plan.
pub fn render_iteration_prompt(plan: &Plan, plan_path: &Path) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("iteration", ITERATION_TEMPLATE)
        .expect("iteration template should be valid");
    let template = env.get_template("iteration").context("load template")?;

    let stories: Vec<StoryContext> = plan
        .user_stories
        .iter()
        .map(StoryContext::from_story)
        .collect();
    let description = plan.description.trim();

    let rendered = template
        .render(context! {
            project => plan.project.trim(),
            description => (!description.is_empty()).then_some(description),
            plan_path => plan_path.display().to_string(),
            stories => stories,
        })
        .context("render iteration prompt")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::{COMPLETION_MARKER, STATUS_TAG_CLOSE, STATUS_TAG_OPEN};
    use crate::test_support::{plan_with, story};

    #[test]
    fn prompt_lists_every_story_with_pass_state() {
        let plan = plan_with(vec![story("US-001", true), story("US-002", false)]);
        let prompt =
            render_iteration_prompt(&plan, Path::new(".chief/prds/main/prd.json")).expect("render");

        assert!(prompt.contains("[x] US-001"));
        assert!(prompt.contains("[ ] US-002"));
        assert!(prompt.contains(".chief/prds/main/prd.json"));
    }

    #[test]
    fn prompt_states_the_reporting_contract() {
        let plan = plan_with(vec![story("US-001", false)]);
        let prompt = render_iteration_prompt(&plan, Path::new("prd.json")).expect("render");

        assert!(prompt.contains(COMPLETION_MARKER));
        assert!(prompt.contains(STATUS_TAG_OPEN));
        assert!(prompt.contains(STATUS_TAG_CLOSE));
    }

    #[test]
    fn acceptance_criteria_are_rendered() {
        let mut plan = plan_with(vec![story("US-001", false)]);
        plan.user_stories[0].acceptance_criteria =
            vec!["criterion one".to_string(), "criterion two".to_string()];
        let prompt = render_iteration_prompt(&plan, Path::new("prd.json")).expect("render");

        assert!(prompt.contains("AC: criterion one"));
        assert!(prompt.contains("AC: criterion two"));
    }

    #[test]
    fn empty_description_is_omitted() {
        let plan = plan_with(vec![story("US-001", false)]);
        let prompt = render_iteration_prompt(&plan, Path::new("prd.json")).expect("render");
        assert!(!prompt.contains("Project description:"));
    }
}
