//! Typed domain events parsed from the agent's stream-json output.
//!
//! Events are transient: one per parsed line, created by the parser (or the
//! loop for terminal signals), stamped with an iteration number by the loop,
//! forwarded to the observer, and discarded. A field is only populated for
//! kinds it belongs to; observers must switch on [`EventKind`], never on the
//! display label.

use serde_json::{Map, Value};

/// Kind of a parsed domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Start of an agent iteration (`system`/`init` message).
    IterationStart,
    /// Plain assistant narration.
    AssistantText,
    /// The agent invoked a tool.
    ToolStart,
    /// A tool returned a result.
    ToolResult,
    /// The agent declared which story it is working on.
    StoryStarted,
    /// A story's pass/fail status was reported.
    StoryCompleted,
    /// The agent signaled that all work is finished.
    Complete,
    /// The loop hit its iteration limit without completing.
    MaxIterationsReached,
    /// The run failed.
    Error,
}

impl EventKind {
    /// Human-readable label for diagnostics and log lines only.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::IterationStart => "IterationStart",
            EventKind::AssistantText => "AssistantText",
            EventKind::ToolStart => "ToolStart",
            EventKind::ToolResult => "ToolResult",
            EventKind::StoryStarted => "StoryStarted",
            EventKind::StoryCompleted => "StoryCompleted",
            EventKind::Complete => "Complete",
            EventKind::MaxIterationsReached => "MaxIterationsReached",
            EventKind::Error => "Error",
        }
    }
}

/// One parsed unit of agent output.
///
/// `iteration` is `0` when produced by the parser; the loop stamps the real
/// iteration number before forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub iteration: u32,
    /// Raw or extracted text payload, for text-bearing kinds.
    pub text: Option<String>,
    /// Tool name, `ToolStart` only.
    pub tool: Option<String>,
    /// Structured tool input, `ToolStart` only.
    pub tool_input: Option<Map<String, Value>>,
    /// Referenced plan story, `StoryStarted`/`StoryCompleted` only.
    pub story_id: Option<String>,
    /// Whether the completion succeeded, `StoryCompleted` only.
    pub story_passed: Option<bool>,
    /// Failure detail, `Error` only.
    pub error: Option<String>,
}

impl Event {
    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            iteration: 0,
            text: None,
            tool: None,
            tool_input: None,
            story_id: None,
            story_passed: None,
            error: None,
        }
    }

    pub fn iteration_start() -> Self {
        Self::bare(EventKind::IterationStart)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(EventKind::AssistantText)
        }
    }

    pub fn tool_start(tool: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            tool: Some(tool.into()),
            tool_input: Some(input),
            ..Self::bare(EventKind::ToolStart)
        }
    }

    pub fn tool_result(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(EventKind::ToolResult)
        }
    }

    pub fn story_started(story_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            story_id: Some(story_id.into()),
            text: Some(text.into()),
            ..Self::bare(EventKind::StoryStarted)
        }
    }

    pub fn story_completed(story_id: impl Into<String>, passed: bool) -> Self {
        Self {
            story_id: Some(story_id.into()),
            story_passed: Some(passed),
            ..Self::bare(EventKind::StoryCompleted)
        }
    }

    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(EventKind::Complete)
        }
    }

    pub fn max_iterations_reached(max: u32) -> Self {
        Self {
            text: Some(format!("reached maximum of {max} iterations")),
            ..Self::bare(EventKind::MaxIterationsReached)
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            error: Some(detail.into()),
            ..Self::bare(EventKind::Error)
        }
    }

    /// Copy of this event stamped with the given iteration number.
    pub fn at_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_only_populate_relevant_fields() {
        let start = Event::iteration_start();
        assert_eq!(start.kind, EventKind::IterationStart);
        assert_eq!(start.iteration, 0);
        assert!(start.text.is_none());
        assert!(start.tool.is_none());
        assert!(start.story_id.is_none());
        assert!(start.error.is_none());

        let tool = Event::tool_start("Bash", Map::new());
        assert_eq!(tool.kind, EventKind::ToolStart);
        assert_eq!(tool.tool.as_deref(), Some("Bash"));
        assert!(tool.tool_input.is_some());
        assert!(tool.text.is_none());

        let completed = Event::story_completed("US-001", true);
        assert_eq!(completed.kind, EventKind::StoryCompleted);
        assert_eq!(completed.story_id.as_deref(), Some("US-001"));
        assert_eq!(completed.story_passed, Some(true));
        assert!(completed.text.is_none());
    }

    #[test]
    fn at_iteration_stamps_without_changing_payload() {
        let event = Event::assistant_text("hello").at_iteration(3);
        assert_eq!(event.iteration, 3);
        assert_eq!(event.text.as_deref(), Some("hello"));
    }

    #[test]
    fn labels_are_distinct() {
        let kinds = [
            EventKind::IterationStart,
            EventKind::AssistantText,
            EventKind::ToolStart,
            EventKind::ToolResult,
            EventKind::StoryStarted,
            EventKind::StoryCompleted,
            EventKind::Complete,
            EventKind::MaxIterationsReached,
            EventKind::Error,
        ];
        let labels: std::collections::BTreeSet<&str> =
            kinds.iter().map(|kind| kind.label()).collect();
        assert_eq!(labels.len(), kinds.len());
    }
}
