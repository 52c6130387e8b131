//! Run snapshot - `.ghostflow/last_run.json`, and rerun selection from it

use crate::core::result::{StepMeta, StepStatus, WorkflowRunResult};
use crate::core::workflow::{StepRef, Workflow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_DIR: &str = ".ghostflow";
const SNAPSHOT_FILE: &str = "last_run.json";

/// Snapshot spelling of a step's final status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Ok,
    SoftOk,
    Failed,
    Skipped,
}

impl From<StepStatus> for SnapshotStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Ok => Self::Ok,
            StepStatus::SoftFail => Self::SoftOk,
            StepStatus::Fail => Self::Failed,
            StepStatus::Skipped => Self::Skipped,
        }
    }
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub name: String,
    pub status: SnapshotStatus,
    pub ok: bool,
    pub exit_code: i32,
    pub duration_sec: f64,
    pub target: Option<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub meta: StepMeta,
}

/// Everything the rerun commands need from the previous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub workflow_name: String,
    pub file_path: Option<PathBuf>,
    pub yaml_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub steps: Vec<StepSnapshot>,
    /// Fingerprint of every step of the workflow file, executed or not
    #[serde(default)]
    pub step_fingerprints: BTreeMap<String, String>,
}

impl RunSnapshot {
    /// `workflow` is the full document; `run` may cover a subset of it
    pub fn from_run(workflow: &Workflow, run: &WorkflowRunResult) -> Self {
        let step_fingerprints: BTreeMap<String, String> = workflow
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.fingerprint()))
            .collect();

        let steps = run
            .steps
            .iter()
            .map(|r| StepSnapshot {
                name: r.step.clone(),
                status: r.status().into(),
                ok: r.ok,
                exit_code: r.exit_code,
                duration_sec: r.duration.as_secs_f64(),
                target: r.backend.as_ref().map(|b| b.to_string()),
                stdout_path: r.stdout_path.clone(),
                stderr_path: r.stderr_path.clone(),
                fingerprint: step_fingerprints.get(&r.step).cloned(),
                meta: r.meta.clone(),
            })
            .collect();

        Self {
            run_id: run.run_id.clone(),
            workflow_name: workflow.name.clone(),
            file_path: workflow.source.as_ref().map(|s| s.path.clone()),
            yaml_sha256: workflow.source.as_ref().map(|s| s.sha256.clone()),
            started_at: run.started_at,
            finished_at: run.finished_at,
            ok: run.ok(),
            steps,
            step_fingerprints,
        }
    }

    /// `.ghostflow/last_run.json` under `root`
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
        log::debug!("snapshot saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("no previous run at {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("cannot parse {}", path.display()))
    }

    /// The workflow file changed since this snapshot was taken
    pub fn is_stale(&self, workflow: &Workflow) -> bool {
        match (&self.yaml_sha256, workflow.source.as_ref()) {
            (Some(old), Some(source)) => *old != source.sha256,
            _ => false,
        }
    }
}

/// Which steps to run again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunMode {
    Failed { include_soft: bool },
    Changed { with_deps: bool },
    From(StepRef),
}

/// Selected steps with the reason each was picked
#[derive(Debug, Clone)]
pub struct RerunPlan {
    pub workflow: Workflow,
    pub reasons: Vec<(String, &'static str)>,
}

impl RerunPlan {
    pub fn is_empty(&self) -> bool {
        self.workflow.steps.is_empty()
    }
}

fn plan(workflow: &Workflow, label: &str, picked: &BTreeMap<String, &'static str>) -> RerunPlan {
    let subset = workflow.subset(label, |s| picked.contains_key(&s.name));
    let reasons = subset
        .steps
        .iter()
        .filter_map(|s| picked.get(&s.name).map(|r| (s.name.clone(), *r)))
        .collect();
    RerunPlan {
        workflow: subset,
        reasons,
    }
}

/// Pick steps from `workflow` according to `mode` and the previous run
pub fn select(workflow: &Workflow, snapshot: &RunSnapshot, mode: &RerunMode) -> Result<RerunPlan> {
    let mut picked: BTreeMap<String, &'static str> = BTreeMap::new();
    let label = match mode {
        RerunMode::Failed { include_soft } => {
            for step in &snapshot.steps {
                match step.status {
                    SnapshotStatus::Failed => {
                        picked.insert(step.name.clone(), "failed");
                    }
                    SnapshotStatus::SoftOk if *include_soft => {
                        picked.insert(step.name.clone(), "soft_fail");
                    }
                    _ => {}
                }
            }
            if *include_soft {
                "rerun failed +soft"
            } else {
                "rerun failed"
            }
        }
        RerunMode::Changed { with_deps } => {
            for step in &workflow.steps {
                if snapshot.step_fingerprints.get(&step.name) != Some(&step.fingerprint()) {
                    picked.insert(step.name.clone(), "changed");
                }
            }
            if *with_deps {
                let mut pending: Vec<String> = picked.keys().cloned().collect();
                let mut seen: HashSet<String> = pending.iter().cloned().collect();
                while let Some(name) = pending.pop() {
                    let Some(step) = workflow.get_step(&name) else {
                        continue;
                    };
                    for dep in &step.needs {
                        if seen.insert(dep.clone()) {
                            picked.entry(dep.clone()).or_insert("dep");
                            pending.push(dep.clone());
                        }
                    }
                }
                "rerun changed +deps"
            } else {
                "rerun changed"
            }
        }
        RerunMode::From(from) => {
            let start = workflow.resolve(from)?;
            for step in &workflow.steps[start..] {
                picked.insert(step.name.clone(), "from");
            }
            return Ok(plan(workflow, &format!("rerun from {}", from), &picked));
        }
    };
    Ok(plan(workflow, label, &picked))
}
