//! Line parser for the agent's stream-json output.
//!
//! Each line of agent stdout is either blank or a single JSON envelope.
//! [`parse_line`] maps a line to at most one [`Event`]. Anything malformed or
//! unrecognized is dropped silently: the agent may emit message types this
//! parser has never seen, and none of them may break the loop. The parser is
//! pure and stateless; iteration stamping happens in the loop.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::event::Event;

/// Literal marker the agent emits when every story passes.
pub const COMPLETION_MARKER: &str = "<chief-complete/>";
/// Tag pair wrapping the id of the story the agent is working on.
pub const STATUS_TAG_OPEN: &str = "<ralph-status>";
pub const STATUS_TAG_CLOSE: &str = "</ralph-status>";

/// Top-level stream-json envelope.
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

/// Body of an `assistant` message.
#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Map<String, Value>>,
}

/// Body of a `user` message (tool results echoed back to the agent).
#[derive(Debug, Deserialize)]
struct UserMessage {
    #[serde(default)]
    content: Vec<ToolResultBlock>,
}

#[derive(Debug, Deserialize)]
struct ToolResultBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<Value>,
}

/// Parse one line of stream-json output into at most one event.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let msg: StreamMessage = serde_json::from_str(line).ok()?;
    match msg.kind.as_str() {
        "system" => (msg.subtype.as_deref() == Some("init")).then(Event::iteration_start),
        "assistant" => parse_assistant_message(msg.message?),
        "user" => parse_user_message(msg.message?),
        // `result` closes an iteration; the loop infers that from process
        // exit instead, so it carries no event.
        _ => None,
    }
}

/// First content block that yields an event wins. A message mixing narration
/// and tool calls therefore produces a single event for whichever block comes
/// first; remaining blocks are dropped.
fn parse_assistant_message(raw: Value) -> Option<Event> {
    let msg: AssistantMessage = serde_json::from_value(raw).ok()?;

    for block in msg.content {
        match block.kind.as_str() {
            "text" => {
                let text = block.text.unwrap_or_default();
                if text.contains(COMPLETION_MARKER) {
                    return Some(Event::complete(text));
                }
                if let Some(story_id) = extract_story_id(&text, STATUS_TAG_OPEN, STATUS_TAG_CLOSE)
                {
                    return Some(Event::story_started(story_id, text));
                }
                return Some(Event::assistant_text(text));
            }
            "tool_use" => {
                return Some(Event::tool_start(
                    block.name.unwrap_or_default(),
                    block.input.unwrap_or_default(),
                ));
            }
            _ => {}
        }
    }

    None
}

fn parse_user_message(raw: Value) -> Option<Event> {
    let msg: UserMessage = serde_json::from_value(raw).ok()?;

    msg.content
        .into_iter()
        .find(|block| block.kind == "tool_result")
        .map(|block| Event::tool_result(flatten_tool_result(block.content)))
}

/// Tool result content arrives either as a plain string or as an array of
/// text blocks; flatten both shapes to one string.
fn flatten_tool_result(content: Option<Value>) -> String {
    match content {
        Some(Value::String(text)) => text,
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Extract the trimmed id between `open` and `close`.
///
/// Returns `None` when the open tag is absent, the close tag never follows
/// it, or the interior trims to empty.
fn extract_story_id(text: &str, open: &str, close: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)?;
    let id = text[start..start + end].trim();
    (!id.is_empty()).then(|| id.to_string())
}
