//! Run results - one StepRunResult per attempt, one WorkflowRunResult per run

use crate::backend::BackendKind;
use crate::exec::{KillReason, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Failed-dependency skip
pub const EXIT_NEEDS_SKIPPED: i32 = 200;
/// Condition-false skip
pub const EXIT_CONDITION_SKIPPED: i32 = 201;
/// Sudo password could not be read
pub const EXIT_SUDO_PROMPT_FAILED: i32 = 996;
/// Host script could not be written
pub const EXIT_SCRIPT_WRITE_FAILED: i32 = 997;
/// Unexpected fault while dispatching
pub const EXIT_DISPATCH_EXCEPTION: i32 = 999;

/// Final status of a step as shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Ok,
    SoftFail,
    Fail,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::SoftFail => write!(f, "SOFT_FAIL"),
            Self::Fail => write!(f, "FAIL"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Why a step did not run to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    FailedDependency,
    ConditionFalse,
    SudoAuthFailed,
}

/// One attempt inside the retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub attempt: u32,
    pub exit_code: i32,
    pub duration_sec: f64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Free-form details attached to a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub soft_fail: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptTrace>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exception: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_reason: Option<KillReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_hint: Option<String>,
}

/// Outcome of one step (or one attempt of it)
#[derive(Debug, Clone, PartialEq)]
pub struct StepRunResult {
    pub step: String,
    pub ok: bool,
    pub exit_code: i32,
    pub duration: Duration,
    /// `None` when nothing was dispatched
    pub backend: Option<BackendKind>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub meta: StepMeta,
    pub error: Option<String>,
}

impl StepRunResult {
    pub fn new(step: impl Into<String>, ok: bool, exit_code: i32) -> Self {
        Self {
            step: step.into(),
            ok,
            exit_code,
            duration: Duration::ZERO,
            backend: None,
            stdout_path: None,
            stderr_path: None,
            meta: StepMeta::default(),
            error: None,
        }
    }

    /// A skip outcome; not ok, but `status()` keeps it out of the failures
    pub fn skipped(
        step: impl Into<String>,
        kind: SkipKind,
        reason: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        let mut result = Self::new(step, false, exit_code);
        result.meta.skipped = Some(kind);
        result.meta.reason = Some(reason.into());
        result
    }

    /// A dispatch fault converted into a failed result
    pub fn exception(step: impl Into<String>, exit_code: i32, error: &anyhow::Error) -> Self {
        let mut result = Self::new(step, false, exit_code);
        result.meta.exception = true;
        result.meta.trace = Some(format!("{:?}", error));
        result.error = Some(error.to_string());
        result
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Success reported, original exit code and artifacts retained
    pub fn into_soft_fail(mut self) -> Self {
        self.ok = true;
        self.meta.soft_fail = true;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.meta.skipped.is_some()
    }

    pub fn status(&self) -> StepStatus {
        if self.is_skipped() {
            StepStatus::Skipped
        } else if self.meta.soft_fail {
            StepStatus::SoftFail
        } else if self.ok {
            StepStatus::Ok
        } else {
            StepStatus::Fail
        }
    }

    /// A hard failure, or a skip caused by one, blocks dependents
    pub fn blocks_dependents(&self) -> bool {
        self.status() == StepStatus::Fail
            || self.meta.skipped == Some(SkipKind::FailedDependency)
    }
}

/// Totals for the summary line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ok: usize,
    pub soft_fail: usize,
    pub fail: usize,
    pub skipped: usize,
    pub total_duration: Duration,
    pub longest: Option<(String, Duration)>,
}

/// All results of one run, in execution order
#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    pub workflow: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepRunResult>,
}

impl WorkflowRunResult {
    pub fn new(workflow: impl Into<String>, run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow: workflow.into(),
            run_id: run_id.into(),
            started_at: now,
            finished_at: now,
            steps: Vec::new(),
        }
    }

    /// Every step succeeded (soft fails count, skips do not); an empty run
    /// is not a success
    pub fn ok(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.ok)
    }

    pub fn get(&self, step: &str) -> Option<&StepRunResult> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for step in &self.steps {
            match step.status() {
                StepStatus::Ok => summary.ok += 1,
                StepStatus::SoftFail => summary.soft_fail += 1,
                StepStatus::Fail => summary.fail += 1,
                StepStatus::Skipped => summary.skipped += 1,
            }
            summary.total_duration += step.duration;
            let longer = summary
                .longest
                .as_ref()
                .map_or(true, |(_, d)| step.duration > *d);
            if longer && !step.duration.is_zero() {
                summary.longest = Some((step.step.clone(), step.duration));
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        let ok = StepRunResult::new("a", true, 0);
        assert_eq!(ok.status(), StepStatus::Ok);

        let failed = StepRunResult::new("b", false, 3);
        assert_eq!(failed.status(), StepStatus::Fail);
        assert!(failed.blocks_dependents());

        let soft = failed.clone().into_soft_fail();
        assert_eq!(soft.status(), StepStatus::SoftFail);
        assert_eq!(soft.exit_code, 3);
        assert!(soft.ok);
        assert!(!soft.blocks_dependents());

        let skipped = StepRunResult::skipped("c", SkipKind::ConditionFalse, "condition false", 201);
        assert_eq!(skipped.status(), StepStatus::Skipped);
        assert!(!skipped.blocks_dependents());

        let cascaded = StepRunResult::skipped("d", SkipKind::FailedDependency, "failed dependency: b", 200);
        assert!(cascaded.blocks_dependents());
    }

    #[test]
    fn test_skipped_run_is_not_ok() {
        let mut run = WorkflowRunResult::new("wf", "run-1");
        run.steps.push(StepRunResult::skipped("only", SkipKind::ConditionFalse, "condition false", 201));
        assert!(!run.steps[0].ok);
        assert_eq!(run.steps[0].status(), StepStatus::Skipped);
        assert!(!run.ok());

        let summary = run.summary();
        assert_eq!((summary.fail, summary.skipped), (0, 1));

        let mut sudo = WorkflowRunResult::new("wf", "run-2");
        sudo.steps.push(StepRunResult::new("a", true, 0));
        sudo.steps.push(StepRunResult::skipped("b", SkipKind::SudoAuthFailed, "sudo auth failed", 1));
        assert!(!sudo.steps[1].blocks_dependents());
        assert!(!sudo.ok());
    }

    #[test]
    fn test_empty_run_is_not_ok() {
        let run = WorkflowRunResult::new("wf", "run-1");
        assert!(!run.ok());
    }

    #[test]
    fn test_summary_counts() {
        let mut run = WorkflowRunResult::new("wf", "run-1");
        run.steps.push(StepRunResult::new("a", true, 0).with_duration(Duration::from_secs(2)));
        run.steps.push(
            StepRunResult::new("b", false, 1)
                .with_duration(Duration::from_secs(5))
                .into_soft_fail(),
        );
        run.steps.push(StepRunResult::new("c", false, 1).with_duration(Duration::from_secs(1)));
        run.steps.push(StepRunResult::skipped("d", SkipKind::FailedDependency, "failed dependency: c", 200));

        let summary = run.summary();
        assert_eq!((summary.ok, summary.soft_fail, summary.fail, summary.skipped), (1, 1, 1, 1));
        assert_eq!(summary.total_duration, Duration::from_secs(8));
        assert_eq!(summary.longest, Some(("b".to_string(), Duration::from_secs(5))));
        assert!(!run.ok());
    }

    #[test]
    fn test_exception_result() {
        let err = anyhow::anyhow!("boom").context("dispatch failed");
        let result = StepRunResult::exception("x", EXIT_DISPATCH_EXCEPTION, &err);
        assert!(!result.ok);
        assert!(result.meta.exception);
        assert!(result.meta.trace.as_deref().unwrap().contains("boom"));
        assert_eq!(result.error.as_deref(), Some("dispatch failed"));
    }
}
