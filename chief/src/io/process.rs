//! Agent subprocess control.
//!
//! The [`AgentLauncher`]/[`AgentHandle`] traits decouple the loop from the
//! actual agent backend (currently the `claude` CLI in stream-json mode).
//! Tests use scripted handles that replay canned output lines without
//! spawning processes. The loop treats a handle as an opaque line stream
//! plus an exit classification plus a shutdown operation.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Parameters for launching one agent iteration.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text for this iteration.
    pub prompt: String,
    /// Agent executable and leading arguments.
    pub command: Vec<String>,
    /// Truncate captured stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,
}

/// How an agent invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    /// Exited cleanly, or was deliberately shut down by the loop.
    Clean,
    /// Abnormal exit; `detail` carries the status and a stderr tail.
    Failed { detail: String },
}

/// Abstraction over agent backends.
pub trait AgentLauncher {
    type Handle: AgentHandle;

    fn launch(&self, request: &LaunchRequest) -> Result<Self::Handle>;
}

/// A running agent invocation.
pub trait AgentHandle {
    /// Take the agent's protocol stream (stdout). May only be taken once.
    fn take_output(&mut self) -> Result<Box<dyn BufRead + Send>>;

    /// Wait for the agent to exit and classify the result.
    fn wait(&mut self) -> Result<AgentExit>;

    /// Stop the agent: close its stdin, give it `grace` to exit on its own,
    /// then kill and reap it.
    fn shutdown(&mut self, grace: Duration) -> Result<()>;
}

/// Launcher that spawns the `claude` CLI in stream-json mode.
#[derive(Debug, Clone, Default)]
pub struct ClaudeLauncher;

impl AgentLauncher for ClaudeLauncher {
    type Handle = ClaudeHandle;

    fn launch(&self, request: &LaunchRequest) -> Result<ClaudeHandle> {
        let program = request
            .command
            .first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        info!(agent = %program, workdir = %request.workdir.display(), "launching agent");

        let mut cmd = Command::new(program);
        cmd.args(&request.command[1..])
            .arg("--dangerously-skip-permissions")
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn agent {program}"))?;

        let stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("agent stderr was not piped"))?;
        let limit = request.stderr_limit_bytes;
        let stderr_reader = thread::spawn(move || read_stream_limited(stderr, limit));

        debug!("agent spawned");
        Ok(ClaudeHandle {
            child,
            stdin,
            stderr_reader: Some(stderr_reader),
            shut_down: false,
        })
    }
}

/// Handle to a spawned `claude` process.
pub struct ClaudeHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_reader: Option<JoinHandle<Result<(Vec<u8>, usize)>>>,
    shut_down: bool,
}

impl AgentHandle for ClaudeHandle {
    fn take_output(&mut self) -> Result<Box<dyn BufRead + Send>> {
        let stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("agent stdout already taken or not piped"))?;
        Ok(Box::new(BufReader::new(stdout)))
    }

    fn wait(&mut self) -> Result<AgentExit> {
        let status = self.child.wait().context("wait for agent")?;
        debug!(exit_code = ?status.code(), shut_down = self.shut_down, "agent exited");

        // A shutdown the loop asked for is expected termination, whatever
        // status the kill produced.
        if status.success() || self.shut_down {
            return Ok(AgentExit::Clean);
        }

        let stderr_tail = self
            .stderr_reader
            .take()
            .map(|handle| match handle.join() {
                Ok(Ok((bytes, truncated))) => {
                    let mut text = String::from_utf8_lossy(&bytes).into_owned();
                    if truncated > 0 {
                        text.push_str(&format!("\n[stderr truncated {truncated} bytes]"));
                    }
                    text
                }
                _ => String::new(),
            })
            .unwrap_or_default();

        let mut detail = format!("agent exited with status {status}");
        let stderr_tail = stderr_tail.trim();
        if !stderr_tail.is_empty() {
            detail.push_str(": ");
            detail.push_str(stderr_tail);
        }
        warn!(exit_code = ?status.code(), "agent failed");
        Ok(AgentExit::Failed { detail })
    }

    fn shutdown(&mut self, grace: Duration) -> Result<()> {
        self.shut_down = true;

        // Closing stdin is the graceful signal; the CLI exits on EOF.
        drop(self.stdin.take());

        match self
            .child
            .wait_timeout(grace)
            .context("wait for agent shutdown")?
        {
            Some(status) => {
                debug!(exit_code = ?status.code(), "agent stopped within grace period");
            }
            None => {
                warn!(grace_secs = grace.as_secs(), "agent ignored shutdown, killing");
                self.child.kill().context("kill agent")?;
                self.child.wait().context("reap agent after kill")?;
            }
        }
        Ok(())
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes and counting the rest.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read agent stderr")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
