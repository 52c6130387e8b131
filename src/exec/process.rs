//! Process Runner - one shell command under a wall-clock ceiling and an
//! optional memory watchdog
//!
//! The child gets its own process group so the whole subtree can be signalled.
//! Output goes to anonymous temp files rather than pipes, so a chatty child can
//! never block on a full pipe while we poll.

use super::terminate::select_terminator;
use super::tree::ProcessTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Poll interval for completion, timeout and memory checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit code reported when the child was never reaped with a status
pub const KILLED_EXIT_CODE: i32 = -9;

/// Why the runner killed the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    None,
    Timeout,
    MemoryExceeded,
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Timeout => write!(f, "timeout"),
            Self::MemoryExceeded => write!(f, "memory_exceeded"),
        }
    }
}

/// Result of a single invocation, produced fresh every time
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub killed: bool,
    pub kill_reason: KillReason,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.killed
    }
}

/// What to run and under which ceilings
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Passed to `/bin/sh -c`
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub grace: Duration,
    /// Memory ceiling for the whole tree; `None` disables the watchdog
    pub mem_watch_mb: Option<u64>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, timeout: Duration, grace: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            timeout,
            grace,
            mem_watch_mb: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn mem_watch_mb(mut self, limit: Option<u64>) -> Self {
        self.mem_watch_mb = limit;
        self
    }
}

fn read_spool(file: &mut File) -> String {
    let mut buf = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Runs shell commands on the local host
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run to completion, timeout or memory breach.
    ///
    /// Ordinary command failure is reported in the result; `Err` only means
    /// the command could not be launched at all.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        let started = Instant::now();
        let mut out_spool = tempfile::tempfile().context("cannot create stdout spool")?;
        let mut err_spool = tempfile::tempfile().context("cannot create stderr spool")?;

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out_spool.try_clone()?))
            .stderr(Stdio::from(err_spool.try_clone()?))
            .process_group(0)
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("cannot spawn shell in {:?}", spec.cwd))?;
        let pid = child.id();

        let mut table = spec.mem_watch_mb.map(|_| ProcessTable::new());
        let mut kill_reason = KillReason::None;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }

            if started.elapsed() > spec.timeout {
                kill_reason = KillReason::Timeout;
            } else if let (Some(limit), Some(table), Some(pid)) =
                (spec.mem_watch_mb, table.as_mut(), pid)
            {
                table.refresh();
                let rss = table.tree_rss_bytes(pid);
                if rss > limit * 1024 * 1024 {
                    log::warn!(
                        "process tree {} uses {} MB, above the {} MB ceiling",
                        pid,
                        rss / (1024 * 1024),
                        limit
                    );
                    kill_reason = KillReason::MemoryExceeded;
                }
            }

            if kill_reason != KillReason::None {
                if let Some(pid) = pid {
                    let terminator = select_terminator(pid);
                    log::info!(
                        "terminating pid {} ({}) via {}",
                        pid,
                        kill_reason,
                        terminator.name()
                    );
                    terminator.terminate(&mut child, spec.grace).await;
                }
                break child.wait().await.ok();
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let exit_code = status
            .and_then(|s| s.code())
            .unwrap_or(KILLED_EXIT_CODE);
        let killed = kill_reason != KillReason::None;

        Ok(ProcessResult {
            exit_code,
            stdout: read_spool(&mut out_spool),
            stderr: read_spool(&mut err_spool),
            duration: started.elapsed(),
            killed,
            kill_reason,
        })
    }
}
