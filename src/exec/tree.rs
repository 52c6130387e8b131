//! Process table snapshots - descendants and resident memory of a subtree

use std::collections::{HashMap, HashSet, VecDeque};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Reusable process table; refresh before each query
pub struct ProcessTable {
    sys: System,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    pub fn refresh(&mut self) {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
    }

    /// All live descendants of `root`, parents before children
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in self.sys.processes() {
            // threads show up as tasks on Linux; they share the parent's memory
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([Pid::from_u32(root)]);
        while let Some(pid) = queue.pop_front() {
            for child in children.get(&pid).into_iter().flatten() {
                if seen.insert(*child) {
                    out.push(child.as_u32());
                    queue.push_back(*child);
                }
            }
        }
        out
    }

    /// Summed RSS of `root` and every live descendant, in bytes
    pub fn tree_rss_bytes(&self, root: u32) -> u64 {
        let own = self
            .sys
            .process(Pid::from_u32(root))
            .map(|p| p.memory())
            .unwrap_or(0);
        own + self
            .descendants(root)
            .into_iter()
            .filter_map(|pid| self.sys.process(Pid::from_u32(pid)))
            .map(|p| p.memory())
            .sum::<u64>()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
