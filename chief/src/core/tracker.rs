//! Pass/fail bookkeeping for plan stories during a run.
//!
//! The tracker is the loop's source of truth for whether work remains.
//! Statuses are seeded from the plan's `passes` flags at construction and
//! afterwards mutated only through [`StoryTracker::mark_completed`]; statuses
//! are never removed, and repeated reports for the same story overwrite the
//! previous one. Ids outside the original plan are accepted as-is: protocol
//! events are not validated against the plan schema at this layer.

use std::collections::BTreeMap;

use crate::plan::Plan;

#[derive(Debug, Clone, Default)]
pub struct StoryTracker {
    /// Story ids from the plan, in plan order.
    planned: Vec<String>,
    /// Latest reported status per story id. Absent means never reported.
    statuses: BTreeMap<String, bool>,
}

impl StoryTracker {
    /// Build a tracker over the plan's stories. Stories already passing are
    /// seeded as recorded successes, so they are not reported as newly
    /// passing later.
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            planned: plan
                .user_stories
                .iter()
                .map(|story| story.id.clone())
                .collect(),
            statuses: plan
                .user_stories
                .iter()
                .filter(|story| story.passes)
                .map(|story| (story.id.clone(), true))
                .collect(),
        }
    }

    /// Record the latest completion report for a story.
    pub fn mark_completed(&mut self, story_id: &str, success: bool) {
        self.statuses.insert(story_id.to_string(), success);
    }

    /// Latest reported status, or `None` if the story was never reported.
    pub fn status_of(&self, story_id: &str) -> Option<bool> {
        self.statuses.get(story_id).copied()
    }

    /// True once every story in the plan has a recorded success.
    pub fn is_all_passing(&self) -> bool {
        self.planned
            .iter()
            .all(|id| self.statuses.get(id) == Some(&true))
    }

    /// Ids whose `passes` flag in `plan` is true but which have no recorded
    /// success yet. The loop turns these into StoryCompleted events after
    /// each iteration, since the agent reports completion by editing the
    /// plan file rather than through a dedicated stream message.
    pub fn newly_passing<'a>(&self, plan: &'a Plan) -> Vec<&'a str> {
        plan.user_stories
            .iter()
            .filter(|story| story.passes && self.status_of(&story.id) != Some(true))
            .map(|story| story.id.as_str())
            .collect()
    }

    /// Fold recorded statuses back into the plan's `passes` flags.
    ///
    /// Only recorded stories are touched; unreported stories keep whatever
    /// the plan says.
    pub fn apply_to(&self, plan: &mut Plan) {
        for story in &mut plan.user_stories {
            if let Some(passed) = self.status_of(&story.id) {
                story.passes = passed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan_with, story};

    #[test]
    fn unreported_story_is_unknown_not_false() {
        let plan = plan_with(vec![story("US-001", false)]);
        let tracker = StoryTracker::from_plan(&plan);
        assert_eq!(tracker.status_of("US-001"), None);
    }

    #[test]
    fn stories_passing_at_construction_are_recorded_successes() {
        let plan = plan_with(vec![story("US-001", true), story("US-002", false)]);
        let tracker = StoryTracker::from_plan(&plan);

        assert_eq!(tracker.status_of("US-001"), Some(true));
        assert_eq!(tracker.status_of("US-002"), None);
        assert!(tracker.newly_passing(&plan).is_empty());
    }

    #[test]
    fn repeated_reports_overwrite() {
        let plan = plan_with(vec![story("US-001", false)]);
        let mut tracker = StoryTracker::from_plan(&plan);

        tracker.mark_completed("US-001", true);
        assert_eq!(tracker.status_of("US-001"), Some(true));
        tracker.mark_completed("US-001", false);
        assert_eq!(tracker.status_of("US-001"), Some(false));
    }

    #[test]
    fn all_passing_requires_success_for_every_plan_story() {
        let plan = plan_with(vec![story("US-001", false), story("US-002", false)]);
        let mut tracker = StoryTracker::from_plan(&plan);
        assert!(!tracker.is_all_passing());

        tracker.mark_completed("US-001", true);
        assert!(!tracker.is_all_passing());

        tracker.mark_completed("US-002", true);
        assert!(tracker.is_all_passing());
    }

    #[test]
    fn unknown_story_ids_are_recorded_but_do_not_satisfy_the_plan() {
        let plan = plan_with(vec![story("US-001", false)]);
        let mut tracker = StoryTracker::from_plan(&plan);

        tracker.mark_completed("US-999", true);
        assert_eq!(tracker.status_of("US-999"), Some(true));
        assert!(!tracker.is_all_passing());
    }

    #[test]
    fn newly_passing_reports_only_unrecorded_successes() {
        let before = plan_with(vec![story("US-001", false), story("US-002", false)]);
        let mut tracker = StoryTracker::from_plan(&before);

        let after = plan_with(vec![story("US-001", true), story("US-002", false)]);
        assert_eq!(tracker.newly_passing(&after), vec!["US-001"]);

        tracker.mark_completed("US-001", true);
        assert!(tracker.newly_passing(&after).is_empty());
    }

    #[test]
    fn apply_to_only_touches_reported_stories() {
        let mut plan = plan_with(vec![story("US-001", false), story("US-002", false)]);
        let mut tracker = StoryTracker::from_plan(&plan);
        tracker.mark_completed("US-001", true);

        // US-002 flipped outside the tracker's view; it keeps the plan value.
        plan.user_stories[1].passes = true;
        tracker.apply_to(&mut plan);
        assert!(plan.story("US-001").expect("US-001").passes);
        assert!(plan.story("US-002").expect("US-002").passes);
    }

    #[test]
    fn empty_plan_is_trivially_all_passing() {
        let tracker = StoryTracker::from_plan(&plan_with(Vec::new()));
        assert!(tracker.is_all_passing());
    }
}
