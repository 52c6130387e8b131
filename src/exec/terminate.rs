//! Process-tree termination - graceful signal, grace period, forceful kill
//!
//! Two strategies behind one interface:
//! - [`GroupTerminator`] signals the whole process group at once
//! - [`TreeTerminator`] walks the process tree and signals each member
//!
//! [`select_terminator`] checks at runtime whether the group may be signalled
//! (a child that switched users, e.g. under `sudo`, cannot be) and picks one.

use super::tree::ProcessTable;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a signal-0 existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    Gone,
    Denied,
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn liveness(result: io::Result<()>) -> Liveness {
    match result {
        Ok(()) => Liveness::Alive,
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Liveness::Gone,
        Err(_) => Liveness::Denied,
    }
}

/// What a group terminator does after checking on its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupAction {
    Finished,
    Wait,
    /// Group signalling is refused (EPERM); signal members one by one
    WalkTree,
}

fn group_action(state: Liveness) -> GroupAction {
    match state {
        Liveness::Gone => GroupAction::Finished,
        Liveness::Alive => GroupAction::Wait,
        Liveness::Denied => GroupAction::WalkTree,
    }
}

fn signal_group(pgid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions
    check(unsafe { libc::killpg(pgid, sig) })
}

fn signal_pid(pid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    // SAFETY: kill has no memory-safety preconditions
    check(unsafe { libc::kill(pid, sig) })
}

/// Terminates a running child and everything it spawned
#[async_trait]
pub trait Terminator: Send + Sync {
    fn name(&self) -> &'static str;

    /// SIGTERM, wait up to `grace` for the tree to disappear, then SIGKILL
    async fn terminate(&self, child: &mut Child, grace: Duration);
}

/// Signals the child's process group
pub struct GroupTerminator {
    pgid: libc::pid_t,
}

impl GroupTerminator {
    pub fn new(pgid: libc::pid_t) -> Self {
        Self { pgid }
    }
}

#[async_trait]
impl Terminator for GroupTerminator {
    fn name(&self) -> &'static str {
        "process-group"
    }

    async fn terminate(&self, child: &mut Child, grace: Duration) {
        let deadline = Instant::now() + grace;
        let mut action = group_action(liveness(signal_group(self.pgid, libc::SIGTERM)));

        while action == GroupAction::Wait && Instant::now() < deadline {
            sleep(POLL_INTERVAL).await;
            // reap the leader so a zombie does not keep the group "alive"
            let _ = child.try_wait();
            action = group_action(liveness(signal_group(self.pgid, 0)));
        }

        match action {
            GroupAction::Finished => {}
            GroupAction::WalkTree => {
                log::warn!("signalling process group {} not permitted, walking the tree", self.pgid);
                let remaining = deadline.saturating_duration_since(Instant::now());
                TreeTerminator.terminate(child, remaining).await;
            }
            GroupAction::Wait => {
                log::warn!("process group {} survived grace period, sending SIGKILL", self.pgid);
                let _ = signal_group(self.pgid, libc::SIGKILL);
            }
        }
    }
}

/// Signals each member of the process tree individually
pub struct TreeTerminator;

impl TreeTerminator {
    fn signal_all(pids: &[u32], sig: libc::c_int) {
        for pid in pids {
            let _ = signal_pid(*pid as libc::pid_t, sig);
        }
    }

    fn any_alive(child: &mut Child, pids: &[u32]) -> bool {
        let root_alive = matches!(child.try_wait(), Ok(None));
        root_alive
            || pids[1..]
                .iter()
                .any(|pid| liveness(signal_pid(*pid as libc::pid_t, 0)) == Liveness::Alive)
    }
}

#[async_trait]
impl Terminator for TreeTerminator {
    fn name(&self) -> &'static str {
        "process-tree"
    }

    async fn terminate(&self, child: &mut Child, grace: Duration) {
        let Some(root) = child.id() else {
            return;
        };

        // snapshot before signalling; orphans get reparented afterwards
        let mut table = ProcessTable::new();
        table.refresh();
        let mut pids = vec![root];
        pids.extend(table.descendants(root));

        // children first, then the root
        Self::signal_all(&pids[1..], libc::SIGTERM);
        Self::signal_all(&pids[..1], libc::SIGTERM);

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !Self::any_alive(child, &pids) {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }

        log::warn!("process tree of {} survived grace period, sending SIGKILL", root);
        Self::signal_all(&pids[1..], libc::SIGKILL);
        let _ = child.start_kill();
    }
}

/// Pick a terminator for `pid` by probing whether its group may be signalled
pub fn select_terminator(pid: u32) -> Box<dyn Terminator> {
    // SAFETY: getpgid has no memory-safety preconditions
    let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
    if pgid <= 0 {
        return Box::new(TreeTerminator);
    }
    match liveness(signal_group(pgid, 0)) {
        Liveness::Denied => {
            log::debug!("no permission to signal group {}, walking the tree", pgid);
            Box::new(TreeTerminator)
        }
        Liveness::Alive | Liveness::Gone => Box::new(GroupTerminator::new(pgid)),
    }
}
