//! Plan persistence: `prd.json` under `.chief/prds/<name>/`.
//!
//! Files are validated against the embedded JSON Schema before
//! deserialization, then checked for semantic invariants (unique ids).
//! Writes are atomic (temp file + rename) so a crash mid-write never leaves
//! a half-written plan for the next iteration's agent to read.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::plan::{Plan, validate_invariants};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan/v1.schema.json");

/// Resolve a CLI plan argument to a file path.
///
/// A value ending in `.json` is used verbatim; anything else is treated as a
/// plan name under `.chief/prds/`. `None` selects the default plan, `main`.
pub fn resolve_plan_path(root: &Path, name_or_path: Option<&str>) -> PathBuf {
    match name_or_path {
        Some(arg) if arg.ends_with(".json") => root.join(arg),
        Some(name) => root.join(".chief").join("prds").join(name).join("prd.json"),
        None => root
            .join(".chief")
            .join("prds")
            .join("main")
            .join("prd.json"),
    }
}

/// Load, schema-validate, and invariant-check a plan.
pub fn load_plan(path: &Path) -> Result<Plan> {
    debug!(path = %path.display(), "loading plan");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let instance: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    validate_schema(&instance)?;
    let plan: Plan = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {} as v1 struct", path.display()))?;
    let errors = validate_invariants(&plan);
    if !errors.is_empty() {
        bail!("plan invariant violations:\n- {}", errors.join("\n- "));
    }
    debug!(stories = plan.user_stories.len(), "plan loaded");
    Ok(plan)
}

/// Atomically write a plan to disk (temp file + rename).
pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    debug!(path = %path.display(), stories = plan.user_stories.len(), "writing plan");
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');

    let parent = path
        .parent()
        .with_context(|| format!("plan path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp plan {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace plan {}", path.display()))?;
    Ok(())
}

/// Validate a plan document against the embedded Draft 2020-12 schema.
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile plan schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("plan schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan_with, story};

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prd.json");
        let plan = plan_with(vec![story("US-001", false), story("US-002", true)]);

        write_plan(&path, &plan).expect("write");
        let loaded = load_plan(&path).expect("load");
        assert_eq!(loaded, plan);
    }

    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prd.json");
        fs::write(&path, r#"{"project":"p","userStories":[{"id":"US-001"}]}"#).expect("write");

        let err = load_plan(&path).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn load_rejects_duplicate_story_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prd.json");
        let plan = plan_with(vec![story("US-001", false), story("US-001", false)]);
        let mut buf = serde_json::to_string_pretty(&plan).expect("serialize");
        buf.push('\n');
        fs::write(&path, buf).expect("write");

        let err = load_plan(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate story id"));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prd.json");
        fs::write(&path, "{not json").expect("write");

        assert!(load_plan(&path).is_err());
    }

    #[test]
    fn resolve_plan_path_handles_names_and_paths() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_plan_path(root, None),
            Path::new("/work/.chief/prds/main/prd.json")
        );
        assert_eq!(
            resolve_plan_path(root, Some("auth")),
            Path::new("/work/.chief/prds/auth/prd.json")
        );
        assert_eq!(
            resolve_plan_path(root, Some("plans/custom.json")),
            Path::new("/work/plans/custom.json")
        );
    }
}
