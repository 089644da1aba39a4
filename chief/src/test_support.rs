//! Test-only helpers: plan builders and a scripted agent backend.

use std::collections::VecDeque;
use std::io::{BufRead, Cursor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::io::plan_store::write_plan;
use crate::io::process::{AgentExit, AgentHandle, AgentLauncher, LaunchRequest};
use crate::plan::{Plan, Story};

/// Create a deterministic story with default fields.
pub fn story(id: &str, passes: bool) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        acceptance_criteria: vec![format!("{id} criterion")],
        priority: 1,
        passes,
    }
}

/// Create a plan named "demo" with the given stories.
pub fn plan_with(stories: Vec<Story>) -> Plan {
    Plan {
        project: "demo".to_string(),
        description: String::new(),
        user_stories: stories,
    }
}

/// One scripted agent invocation.
pub struct ScriptedAgent {
    /// Lines the fake agent prints on stdout.
    pub lines: Vec<String>,
    /// Exit classification reported by `wait`.
    pub exit: AgentExit,
    /// Plan written to the plan path when the agent exits, simulating the
    /// agent editing the plan file during the iteration.
    pub plan_after: Option<Plan>,
}

/// Launcher that replays scripted invocations in order.
///
/// `launch` fails once the script runs out, which doubles as a fake for
/// subprocess launch failure.
pub struct ScriptedLauncher {
    plan_path: PathBuf,
    scripts: Mutex<VecDeque<ScriptedAgent>>,
    launches: AtomicU32,
    shutdowns: Arc<AtomicU32>,
}

impl ScriptedLauncher {
    pub fn new(plan_path: PathBuf, scripts: Vec<ScriptedAgent>) -> Self {
        Self {
            plan_path,
            scripts: Mutex::new(scripts.into()),
            launches: AtomicU32::new(0),
            shutdowns: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of invocations launched so far.
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of shutdown requests across all invocations.
    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl AgentLauncher for ScriptedLauncher {
    type Handle = ScriptedHandle;

    fn launch(&self, _request: &LaunchRequest) -> Result<ScriptedHandle> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted agent left"))?;
        self.launches.fetch_add(1, Ordering::SeqCst);

        let mut output = script.lines.join("\n");
        output.push('\n');
        Ok(ScriptedHandle {
            output: Some(Cursor::new(output.into_bytes())),
            exit: script.exit,
            plan_after: script.plan_after,
            plan_path: self.plan_path.clone(),
            shutdowns: Arc::clone(&self.shutdowns),
        })
    }
}

pub struct ScriptedHandle {
    output: Option<Cursor<Vec<u8>>>,
    exit: AgentExit,
    plan_after: Option<Plan>,
    plan_path: PathBuf,
    shutdowns: Arc<AtomicU32>,
}

impl AgentHandle for ScriptedHandle {
    fn take_output(&mut self) -> Result<Box<dyn BufRead + Send>> {
        let output = self
            .output
            .take()
            .ok_or_else(|| anyhow!("scripted output already taken"))?;
        Ok(Box::new(output))
    }

    fn wait(&mut self) -> Result<AgentExit> {
        if let Some(plan) = self.plan_after.take() {
            write_plan(&self.plan_path, &plan)?;
        }
        Ok(self.exit.clone())
    }

    fn shutdown(&mut self, _grace: Duration) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
