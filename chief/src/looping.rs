//! The bounded iteration loop that drives the agent against a plan.
//!
//! Each iteration spawns one agent invocation and drains its stream-json
//! stdout on a helper thread, turning lines into events, stamping them with
//! the iteration number, and forwarding them over an unbounded channel so the
//! reader never waits on the observer. The control side polls the
//! cancellation token between lines and on a short timeout, so a cancellation
//! request interrupts the run even while the agent is silent. Control
//! decisions (continue, stop, fail) come from event kinds and the story
//! tracker, never from event text.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::event::{Event, EventKind};
use crate::core::parser::parse_line;
use crate::core::tracker::StoryTracker;
use crate::io::config::ChiefConfig;
use crate::io::plan_store::{load_plan, write_plan};
use crate::io::process::{AgentExit, AgentHandle, AgentLauncher, LaunchRequest};
use crate::io::prompt::render_iteration_prompt;
use crate::plan::Plan;

/// How often the control side re-checks the cancellation token while the
/// agent produces no output.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Where a run ended up. `Idle` is the pre-start state; the other five are
/// the terminal statuses. A run reaches exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    /// The agent signaled completion, or every plan story passed.
    Completed,
    /// The iteration limit was reached with work remaining.
    MaxIterationsExceeded,
    /// The agent failed to launch, exited abnormally, or its stream broke.
    Failed,
    /// An external cancellation request stopped the run.
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Agent invocations actually started.
    pub iterations: u32,
    /// Failure detail when `status` is `Failed`.
    pub last_error: Option<String>,
}

/// Cooperative cancellation flag, checked before each launch and while
/// draining agent output. Safe to flip from any thread at any point in the
/// run; a mid-stream cancellation stops the agent itself, so a read blocked
/// on a silent agent unblocks on stream close.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run the agent for up to `config.max_iterations` iterations, stopping early
/// on completion, failure, or cancellation.
///
/// Events are delivered in parse order with monotonically non-decreasing
/// iteration stamps. A dropped receiver does not stop the run; delivery is
/// fire-and-forget.
pub fn run_loop<L: AgentLauncher>(
    workdir: &Path,
    plan_path: &Path,
    launcher: &L,
    config: &ChiefConfig,
    events: &Sender<Event>,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let mut plan = load_plan(plan_path)
        .with_context(|| format!("load plan {}", plan_path.display()))?;
    let mut tracker = StoryTracker::from_plan(&plan);
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let max = config.max_iterations;

    if tracker.is_all_passing() {
        info!("every story already passes, nothing to run");
        return Ok(RunOutcome {
            status: RunStatus::Completed,
            iterations: 0,
            last_error: None,
        });
    }

    let mut status = RunStatus::Running;
    let mut iterations_run = 0u32;
    let mut last_error: Option<String> = None;

    let mut iteration = 0u32;
    while iteration < max {
        iteration += 1;

        if cancel.is_cancelled() {
            status = RunStatus::Cancelled;
            break;
        }

        let prompt = render_iteration_prompt(&plan, plan_path)?;
        let request = LaunchRequest {
            workdir: workdir.to_path_buf(),
            prompt,
            command: config.agent.command.clone(),
            stderr_limit_bytes: config.stderr_limit_bytes,
        };

        let mut handle = match launcher.launch(&request) {
            Ok(handle) => handle,
            Err(err) => {
                let detail = format!("launch agent: {err:#}");
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
        };
        iterations_run += 1;
        info!(iteration, max, "iteration started");

        let reader = match handle.take_output() {
            Ok(reader) => reader,
            Err(err) => {
                shutdown_quietly(&mut handle, grace);
                let detail = format!("take agent output: {err:#}");
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
        };

        let completed = match consume_stream(reader, &mut handle, events, cancel, iteration, grace)
        {
            StreamEnd::Eof => None,
            StreamEnd::Completed(event) => Some(event),
            StreamEnd::Cancelled => {
                status = RunStatus::Cancelled;
                break;
            }
            StreamEnd::Failed(detail) => {
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
        };

        if cancel.is_cancelled() {
            shutdown_quietly(&mut handle, grace);
            status = RunStatus::Cancelled;
            break;
        }

        match handle.wait() {
            Ok(AgentExit::Clean) => {}
            Ok(AgentExit::Failed { detail }) => {
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
            Err(err) => {
                let detail = format!("wait for agent: {err:#}");
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
        }

        if let Some(complete_event) = completed {
            // Announce stories that flipped during the final iteration first,
            // so the completion event stays the last event of the run.
            match load_plan(plan_path) {
                Ok(latest) => emit_newly_passing(&latest, &mut tracker, events, iteration),
                Err(err) => warn!(err = %err, "skipping final plan diff, plan unreadable"),
            }
            let _ = events.send(complete_event.at_iteration(iteration));
            status = RunStatus::Completed;
            break;
        }

        // The agent reports story completion by editing the plan file, not
        // through a dedicated stream message: reload and diff.
        plan = match load_plan(plan_path) {
            Ok(plan) => plan,
            Err(err) => {
                let detail = format!("reload plan after iteration {iteration}: {err:#}");
                let _ = events.send(Event::error(detail.clone()).at_iteration(iteration));
                status = RunStatus::Failed;
                last_error = Some(detail);
                break;
            }
        };
        emit_newly_passing(&plan, &mut tracker, events, iteration);

        if tracker.is_all_passing() {
            info!(iteration, "all stories pass, finishing run");
            status = RunStatus::Completed;
            break;
        }
    }

    if status == RunStatus::Running {
        let _ = events.send(Event::max_iterations_reached(max).at_iteration(iteration));
        status = RunStatus::MaxIterationsExceeded;
    }

    persist_tracker(plan_path, &tracker);
    info!(?status, iterations = iterations_run, "run finished");

    Ok(RunOutcome {
        status,
        iterations: iterations_run,
        last_error,
    })
}

/// How one invocation's output stream ended.
enum StreamEnd {
    /// Stream closed without a completion marker.
    Eof,
    /// Completion marker seen. Carries the unsent event; the loop emits it
    /// after the final plan diff so it stays the last event of the run.
    Completed(Event),
    Cancelled,
    Failed(String),
}

/// Drain one invocation's stdout into events.
///
/// Reading happens on a helper thread so a cancellation request takes effect
/// even while the agent produces no output: the control side polls the token
/// between lines and on a short timeout, and stops the agent itself so a
/// blocked read unblocks on stream close.
fn consume_stream<H: AgentHandle>(
    reader: Box<dyn BufRead + Send>,
    handle: &mut H,
    events: &Sender<Event>,
    cancel: &CancelToken,
    iteration: u32,
    grace: Duration,
) -> StreamEnd {
    let (line_tx, line_rx) = mpsc::channel();
    let reader_thread = thread::spawn(move || {
        for line in reader.lines() {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let end = loop {
        if cancel.is_cancelled() {
            shutdown_quietly(handle, grace);
            break StreamEnd::Cancelled;
        }

        match line_rx.recv_timeout(CANCEL_POLL) {
            Ok(Ok(line)) => {
                let Some(event) = parse_line(&line) else {
                    continue;
                };
                if event.kind == EventKind::Complete {
                    // The agent declared all work finished; no point letting
                    // the invocation run on.
                    shutdown_quietly(handle, grace);
                    break StreamEnd::Completed(event);
                }
                // Receiver may be gone (observer shut down); the run carries on.
                let _ = events.send(event.at_iteration(iteration));
            }
            Ok(Err(err)) => {
                shutdown_quietly(handle, grace);
                break StreamEnd::Failed(format!("read agent output: {err}"));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break StreamEnd::Eof,
        }
    };

    // A stopped agent closes its stream, so the reader thread sees EOF;
    // dropping the receiver covers a reader caught mid-send.
    drop(line_rx);
    if reader_thread.join().is_err() {
        warn!("agent output reader thread panicked");
    }
    end
}

/// Turn `passes` flags that flipped since the last look at the plan into
/// StoryCompleted events and record them in the tracker.
fn emit_newly_passing(
    plan: &Plan,
    tracker: &mut StoryTracker,
    events: &Sender<Event>,
    iteration: u32,
) {
    let newly_passing: Vec<String> = tracker
        .newly_passing(plan)
        .into_iter()
        .map(str::to_string)
        .collect();
    for story_id in newly_passing {
        debug!(story_id = %story_id, iteration, "story passed");
        let _ = events.send(Event::story_completed(&story_id, true).at_iteration(iteration));
        tracker.mark_completed(&story_id, true);
    }
}

/// Hand the tracker's view back to the plan store once, at run end.
///
/// Best-effort: a run that already failed should still report its outcome
/// even when the plan file is unreadable at this point.
fn persist_tracker(plan_path: &Path, tracker: &StoryTracker) {
    match load_plan(plan_path) {
        Ok(mut plan) => {
            tracker.apply_to(&mut plan);
            if let Err(err) = write_plan(plan_path, &plan) {
                warn!(err = %err, "failed to persist story statuses");
            }
        }
        Err(err) => warn!(err = %err, "skipping status persistence, plan unreadable"),
    }
}

fn shutdown_quietly<H: AgentHandle>(handle: &mut H, grace: Duration) {
    if let Err(err) = handle.shutdown(grace) {
        warn!(err = %err, "agent shutdown failed");
    }
}
