//! Plan-driven agent loop CLI.
//!
//! Drives an autonomous coding agent through a plan of user stories
//! (`.chief/prds/<name>/prd.json`). `chief run` loops the agent until every
//! story passes, the agent declares completion, or the iteration limit is
//! reached; parsed agent events are rendered one per line as they arrive.

use std::path::Path;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use chief::core::event::{Event, EventKind};
use chief::exit_codes;
use chief::io::config::{ChiefConfig, load_config, write_config};
use chief::io::plan_store::{load_plan, resolve_plan_path, write_plan};
use chief::io::process::ClaudeLauncher;
use chief::looping::{CancelToken, RunStatus, run_loop};
use chief::plan::default_plan;

#[derive(Parser)]
#[command(name = "chief", version, about = "Autonomous plan-driven agent loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent loop against a plan.
    Run {
        /// Plan name under `.chief/prds/`, or a path to a `prd.json`.
        plan: Option<String>,
        /// Override the configured iteration limit.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Scaffold `.chief/prds/<name>/prd.json` and a default config.
    Init {
        /// Plan name (default: main).
        name: Option<String>,
        /// Overwrite an existing plan.
        #[arg(short, long)]
        force: bool,
    },
    /// Check a plan against the schema and invariants.
    Validate {
        /// Plan name under `.chief/prds/`, or a path to a `prd.json`.
        plan: Option<String>,
    },
}

fn main() {
    chief::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Run {
            plan,
            max_iterations,
        } => cmd_run(&root, plan.as_deref(), max_iterations),
        Command::Init { name, force } => cmd_init(&root, name.as_deref(), force),
        Command::Validate { plan } => cmd_validate(&root, plan.as_deref()),
    }
}

fn cmd_run(root: &Path, plan_arg: Option<&str>, max_iterations: Option<u32>) -> Result<i32> {
    let plan_path = resolve_plan_path(root, plan_arg);
    let mut config = load_config(&root.join(".chief").join("config.toml"))?;
    if let Some(max) = max_iterations {
        config.max_iterations = max;
        config.validate()?;
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install ctrl-c handler")?;

    let (tx, rx) = mpsc::channel::<Event>();
    let observer = thread::spawn(move || {
        for event in rx {
            println!("{}", render_event(&event));
        }
    });

    let outcome = run_loop(root, &plan_path, &ClaudeLauncher, &config, &tx, &cancel)?;
    drop(tx);
    if observer.join().is_err() {
        eprintln!("event observer thread panicked");
    }

    match outcome.status {
        RunStatus::Completed => {
            println!("run completed after {} iteration(s)", outcome.iterations);
            Ok(exit_codes::OK)
        }
        RunStatus::MaxIterationsExceeded => {
            println!(
                "stopped after {} iteration(s) with work remaining",
                outcome.iterations
            );
            Ok(exit_codes::MAX_ITERATIONS)
        }
        RunStatus::Failed => {
            eprintln!(
                "run failed: {}",
                outcome.last_error.as_deref().unwrap_or("unknown error")
            );
            Ok(exit_codes::FAILED)
        }
        RunStatus::Cancelled => {
            println!("run cancelled after {} iteration(s)", outcome.iterations);
            Ok(exit_codes::CANCELLED)
        }
        RunStatus::Idle | RunStatus::Running => {
            bail!("run ended in non-terminal status {:?}", outcome.status)
        }
    }
}

fn cmd_init(root: &Path, name: Option<&str>, force: bool) -> Result<i32> {
    let name = name.unwrap_or("main");
    if !is_valid_plan_name(name) {
        bail!(
            "invalid plan name {name:?}: must contain only letters, numbers, hyphens, and underscores"
        );
    }

    let plan_path = resolve_plan_path(root, Some(name));
    if plan_path.exists() && !force {
        bail!(
            "plan already exists at {} (use --force to overwrite)",
            plan_path.display()
        );
    }
    write_plan(&plan_path, &default_plan(name))?;

    let config_path = root.join(".chief").join("config.toml");
    if !config_path.exists() {
        write_config(&config_path, &ChiefConfig::default())?;
    }

    println!("created {}", plan_path.display());
    println!("edit the plan, then start the loop with `chief run {name}`");
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path, plan_arg: Option<&str>) -> Result<i32> {
    let plan_path = resolve_plan_path(root, plan_arg);
    let plan = load_plan(&plan_path)?;
    let passing = plan.user_stories.iter().filter(|story| story.passes).count();
    println!(
        "{}: {} stories, {} passing",
        plan_path.display(),
        plan.user_stories.len(),
        passing
    );
    Ok(exit_codes::OK)
}

/// One log line per event: iteration, label, and the payload that matters
/// for that kind.
fn render_event(event: &Event) -> String {
    let body = match event.kind {
        EventKind::ToolStart => {
            let keys = event
                .tool_input
                .as_ref()
                .map(|input| input.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            format!("{} ({keys})", event.tool.as_deref().unwrap_or_default())
        }
        EventKind::StoryStarted => event.story_id.clone().unwrap_or_default(),
        EventKind::StoryCompleted => format!(
            "{} {}",
            event.story_id.as_deref().unwrap_or_default(),
            if event.story_passed == Some(true) {
                "passed"
            } else {
                "not passing"
            }
        ),
        EventKind::Error => event.error.clone().unwrap_or_default(),
        _ => first_line(event.text.as_deref().unwrap_or_default()),
    };
    format!("[{:>2}] {:<20} {}", event.iteration, event.kind.label(), body)
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.len() > 120 {
        let cut = line
            .char_indices()
            .take_while(|(idx, _)| *idx < 120)
            .last()
            .map(|(idx, ch)| idx + ch.len_utf8())
            .unwrap_or(0);
        format!("{}...", &line[..cut])
    } else {
        line.to_string()
    }
}

fn is_valid_plan_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["chief", "run"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                plan: None,
                max_iterations: None
            }
        ));
    }

    #[test]
    fn parse_run_with_plan_and_limit() {
        let cli = Cli::parse_from(["chief", "run", "auth", "--max-iterations", "5"]);
        match cli.command {
            Command::Run {
                plan,
                max_iterations,
            } => {
                assert_eq!(plan.as_deref(), Some("auth"));
                assert_eq!(max_iterations, Some(5));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["chief", "init", "auth", "--force"]);
        match cli.command {
            Command::Init { name, force } => {
                assert_eq!(name.as_deref(), Some("auth"));
                assert!(force);
            }
            _ => panic!("expected init command"),
        }
    }

    #[test]
    fn plan_names_are_restricted() {
        assert!(is_valid_plan_name("main"));
        assert!(is_valid_plan_name("auth-v2"));
        assert!(!is_valid_plan_name(""));
        assert!(!is_valid_plan_name("../escape"));
        assert!(!is_valid_plan_name("with space"));
    }

    #[test]
    fn render_event_shows_story_outcome() {
        let line = render_event(&Event::story_completed("US-001", true).at_iteration(2));
        assert!(line.contains("StoryCompleted"));
        assert!(line.contains("US-001 passed"));
        assert!(line.contains("[ 2]"));
    }

    #[test]
    fn render_event_truncates_long_text() {
        let line = render_event(&Event::assistant_text("x".repeat(500)).at_iteration(1));
        assert!(line.len() < 200);
        assert!(line.ends_with("..."));
    }

    #[test]
    fn init_scaffolds_plan_and_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let code = cmd_init(root, Some("demo"), false).expect("init");
        assert_eq!(code, exit_codes::OK);
        assert!(root.join(".chief/prds/demo/prd.json").is_file());
        assert!(root.join(".chief/config.toml").is_file());

        // Second init without --force refuses to clobber.
        assert!(cmd_init(root, Some("demo"), false).is_err());
        assert!(cmd_init(root, Some("demo"), true).is_ok());
    }

    #[test]
    fn validate_reports_story_counts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        cmd_init(root, Some("demo"), false).expect("init");

        let code = cmd_validate(root, Some("demo")).expect("validate");
        assert_eq!(code, exit_codes::OK);
        assert!(cmd_validate(root, Some("missing")).is_err());
    }
}
