//! Step Scheduler - sequential run loop with needs-skipping, guards, retries
//!
//! Steps run strictly in declared order, one at a time. `needs` only decides
//! whether a step is skipped, never when it runs.

use super::executor::{ExecContext, StepExecutor};
use super::result::{
    AttemptTrace, SkipKind, StepRunResult, StepStatus, WorkflowRunResult, EXIT_CONDITION_SKIPPED,
    EXIT_DISPATCH_EXCEPTION, EXIT_NEEDS_SKIPPED,
};
use super::runtime::{capture_outputs, load_secrets, RuntimeContext};
use super::workflow::{Step, Workflow};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Run progress, in the order things happen
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workflow: String,
        total: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        step: String,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFailed {
        step: String,
        attempt: u32,
        exit_code: i32,
        error: Option<String>,
    },
    RetryScheduled {
        step: String,
        next_attempt: u32,
        delay: Duration,
    },
    /// Final result of a step, with its captured outputs and display masks
    StepFinished {
        index: usize,
        result: StepRunResult,
        outputs: BTreeMap<String, String>,
        masks: Vec<String>,
    },
    Halted {
        step: String,
    },
}

/// Drives one workflow run end to end
pub struct Scheduler {
    executor: Arc<dyn StepExecutor>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            events: None,
        }
    }

    /// Scheduler plus the receiving end of its event stream
    pub fn with_events(executor: Arc<dyn StepExecutor>) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                executor,
                events: Some(tx),
            },
            rx,
        )
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run with a fresh run id
    pub async fn run(&self, workflow: &Workflow) -> WorkflowRunResult {
        self.run_with_id(workflow, uuid::Uuid::new_v4().to_string())
            .await
    }

    pub async fn run_with_id(&self, workflow: &Workflow, run_id: String) -> WorkflowRunResult {
        let secrets = workflow
            .secrets_path()
            .map(|p| load_secrets(&p))
            .unwrap_or_default();
        let mut ctx = RuntimeContext::new(&workflow.name, &workflow.env, secrets);
        let mut run = WorkflowRunResult::new(&workflow.name, &run_id);
        let total = workflow.steps.len();

        log::info!("run {} of '{}': {} steps", run_id, workflow.name, total);
        self.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            workflow: workflow.name.clone(),
            total,
        });

        // steps whose outcome makes their dependents skip
        let mut blocked: HashSet<String> = HashSet::new();
        let secret_keys: BTreeSet<String> = ctx.secrets().keys().cloned().collect();

        for (i, step) in workflow.steps.iter().enumerate() {
            let exec_ctx = ExecContext {
                run_id: run_id.clone(),
                workflow: workflow.name.clone(),
                step_index: i + 1,
                step_total: total,
                attempt: 1,
                secret_keys: secret_keys.clone(),
            };

            if let Some(result) = dependency_skip(step, &blocked) {
                log::info!("skipping '{}': {}", step.name, result.meta.reason.as_deref().unwrap_or(""));
                self.record(&mut run, &mut ctx, &mut blocked, step, i + 1, result, BTreeMap::new());
                continue;
            }

            if let Some(result) = self.guard_skip(workflow, step, &ctx, &exec_ctx).await {
                self.record(&mut run, &mut ctx, &mut blocked, step, i + 1, result, BTreeMap::new());
                continue;
            }

            let mut result = self.attempt_loop(workflow, step, &ctx, exec_ctx).await;
            if !result.ok && !result.is_skipped() && step.continue_on_error {
                log::warn!("step '{}' failed, continuing (continue_on_error)", step.name);
                result = result.into_soft_fail();
            }

            let outputs = if result.is_skipped() {
                BTreeMap::new()
            } else {
                capture_outputs(&step.capture, &read_artifact(result.stdout_path.as_deref()))
            };
            let hard_failure = result.status() == StepStatus::Fail;
            self.record(&mut run, &mut ctx, &mut blocked, step, i + 1, result, outputs);

            if hard_failure {
                log::error!("step '{}' failed, halting run", step.name);
                self.emit(RunEvent::Halted {
                    step: step.name.clone(),
                });
                for (j, rest) in workflow.steps.iter().enumerate().skip(i + 1) {
                    if let Some(result) = dependency_skip(rest, &blocked) {
                        self.record(&mut run, &mut ctx, &mut blocked, rest, j + 1, result, BTreeMap::new());
                    }
                }
                break;
            }
        }

        run.finished_at = Utc::now();
        run
    }

    /// Evaluate the step's guard; `Some` means the step is skipped
    async fn guard_skip(
        &self,
        workflow: &Workflow,
        step: &Step,
        ctx: &RuntimeContext,
        exec_ctx: &ExecContext,
    ) -> Option<StepRunResult> {
        step.if_expr.as_ref()?;
        let rendered = ctx.render_step(step, ctx.merged_env(&workflow.env, step));
        let expr = rendered.if_expr.clone().unwrap_or_default();

        let reason = match self.executor.check_condition(&rendered, &expr, exec_ctx).await {
            Ok(true) => return None,
            Ok(false) => "condition false".to_string(),
            Err(e) => {
                log::warn!("condition of step '{}' could not be evaluated: {:#}", step.name, e);
                format!("condition error: {}", e)
            }
        };
        log::info!("skipping '{}': {}", step.name, reason);
        Some(StepRunResult::skipped(
            &step.name,
            SkipKind::ConditionFalse,
            reason,
            EXIT_CONDITION_SKIPPED,
        ))
    }

    /// Attempts until success, a sudo-auth skip or the retry budget runs out
    async fn attempt_loop(
        &self,
        workflow: &Workflow,
        step: &Step,
        ctx: &RuntimeContext,
        mut exec_ctx: ExecContext,
    ) -> StepRunResult {
        let max_attempts = step.retries.total_attempts();
        let mut trace = Vec::new();
        let mut attempt = 1;

        let mut result = loop {
            exec_ctx.attempt = attempt;
            // fresh render per attempt; the stored step is never touched
            let rendered = ctx.render_step(step, ctx.merged_env(&workflow.env, step));
            self.emit(RunEvent::StepStarted {
                index: exec_ctx.step_index,
                total: exec_ctx.step_total,
                step: step.name.clone(),
                attempt,
                max_attempts,
            });

            let result = self.spawn_attempt(rendered, exec_ctx.clone()).await;
            trace.push(AttemptTrace {
                attempt,
                exit_code: result.exit_code,
                duration_sec: result.duration.as_secs_f64(),
                ok: result.ok,
                error: result.error.clone(),
            });

            if result.ok || result.meta.skipped == Some(SkipKind::SudoAuthFailed) {
                break result;
            }
            self.emit(RunEvent::AttemptFailed {
                step: step.name.clone(),
                attempt,
                exit_code: result.exit_code,
                error: result.error.clone(),
            });
            if attempt >= max_attempts {
                break result;
            }

            let delay = step.retries.delay_after(attempt);
            log::info!(
                "retrying '{}' in {:.1}s (attempt {}/{})",
                step.name,
                delay.as_secs_f64(),
                attempt + 1,
                max_attempts
            );
            self.emit(RunEvent::RetryScheduled {
                step: step.name.clone(),
                next_attempt: attempt + 1,
                delay,
            });
            tokio::time::sleep(delay).await;
            attempt += 1;
        };

        result.meta.attempts = trace;
        result
    }

    /// Run one attempt on its own task so errors and panics become results
    async fn spawn_attempt(&self, step: Step, ctx: ExecContext) -> StepRunResult {
        let executor = self.executor.clone();
        let name = step.name.clone();
        let handle = tokio::spawn(async move { executor.execute(&step, &ctx).await });

        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                log::error!("step '{}' dispatch error: {:#}", name, e);
                StepRunResult::exception(name, EXIT_DISPATCH_EXCEPTION, &e)
            }
            Err(e) => {
                // join error: the dispatch task panicked or was cancelled
                log::error!("step '{}' dispatch task failed: {}", name, e);
                let e = anyhow::anyhow!("dispatch task failed: {}", e);
                StepRunResult::exception(name, EXIT_DISPATCH_EXCEPTION, &e)
            }
        }
    }

    /// Register a final result; a blocking one joins `blocked`
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        run: &mut WorkflowRunResult,
        ctx: &mut RuntimeContext,
        blocked: &mut HashSet<String>,
        step: &Step,
        index: usize,
        result: StepRunResult,
        outputs: BTreeMap<String, String>,
    ) {
        if result.blocks_dependents() {
            blocked.insert(step.name.clone());
        }
        ctx.register_step(&step.name, result.status(), &outputs);
        let masks = ctx.masks_for(&ctx.render_step(step, BTreeMap::new()).mask);
        log::info!(
            "step '{}' {} (exit {}, {:.2}s)",
            step.name,
            result.status(),
            result.exit_code,
            result.duration.as_secs_f64()
        );
        self.emit(RunEvent::StepFinished {
            index,
            result: result.clone(),
            outputs,
            masks,
        });
        run.steps.push(result);
    }
}

/// Failed-dependency skip if any `needs` entry is blocked
fn dependency_skip(step: &Step, blocked: &HashSet<String>) -> Option<StepRunResult> {
    let dep = step.needs.iter().find(|d| blocked.contains(*d))?;
    Some(StepRunResult::skipped(
        &step.name,
        SkipKind::FailedDependency,
        format!("failed dependency: {}", dep),
        EXIT_NEEDS_SKIPPED,
    ))
}

fn read_artifact(path: Option<&std::path::Path>) -> String {
    path.and_then(|p| std::fs::read(p).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::RetryPolicy;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted executor: `exit N` fails with N, `panic` panics, `error`
    /// returns Err, `flaky:K` fails until the Kth call, `sudo-denied` is a
    /// sudo auth skip; everything else passes
    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<(String, Instant)>>,
        counts: Mutex<HashMap<String, u32>>,
        stdout_dir: Option<std::path::PathBuf>,
    }

    impl FakeExecutor {
        fn calls_for(&self, step: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| s == step)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    #[async_trait]
    impl StepExecutor for FakeExecutor {
        async fn execute(&self, step: &Step, _ctx: &ExecContext) -> Result<StepRunResult> {
            self.calls
                .lock()
                .unwrap()
                .push((step.name.clone(), Instant::now()));
            let count = {
                let mut counts = self.counts.lock().unwrap();
                let c = counts.entry(step.name.clone()).or_default();
                *c += 1;
                *c
            };

            let run = step.run.trim();
            if run == "sudo-denied" {
                return Ok(StepRunResult::skipped(
                    &step.name,
                    SkipKind::SudoAuthFailed,
                    "sudo auth failed",
                    1,
                ));
            }
            if run == "panic" {
                panic!("executor blew up");
            }
            if run == "error" {
                anyhow::bail!("backend unavailable");
            }
            let code = if let Some(k) = run.strip_prefix("flaky:") {
                if count >= k.parse::<u32>().unwrap() { 0 } else { 1 }
            } else if let Some(n) = run.strip_prefix("exit ") {
                n.parse().unwrap()
            } else {
                0
            };

            let mut result = StepRunResult::new(&step.name, code == 0, code)
                .with_duration(Duration::from_millis(10));
            if let (Some(dir), Some(text)) = (&self.stdout_dir, run.strip_prefix("print:")) {
                let path = dir.join(format!("{}.out", step.name));
                std::fs::write(&path, text).unwrap();
                result.stdout_path = Some(path);
            }
            Ok(result)
        }

        async fn check_condition(&self, _step: &Step, expr: &str, _ctx: &ExecContext) -> Result<bool> {
            Ok(expr.trim() == "true")
        }
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        Workflow {
            name: "test".to_string(),
            steps,
            env: BTreeMap::new(),
            secrets_from: None,
            source: None,
        }
    }

    fn needs(mut step: Step, deps: &[&str]) -> Step {
        step.needs = deps.iter().map(|d| d.to_string()).collect();
        step
    }

    async fn run(executor: Arc<FakeExecutor>, wf: &Workflow) -> WorkflowRunResult {
        Scheduler::new(executor).run(wf).await
    }

    #[tokio::test]
    async fn test_failed_dependency_is_never_executed() {
        let executor = Arc::new(FakeExecutor::default());
        let wf = workflow(vec![
            Step::new("a", "exit 1"),
            needs(Step::new("b", "echo hi"), &["a"]),
        ]);
        let result = run(executor.clone(), &wf).await;

        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].status(), StepStatus::Fail);
        assert_eq!(result.steps[1].status(), StepStatus::Skipped);
        assert_eq!(result.steps[1].exit_code, EXIT_NEEDS_SKIPPED);
        assert!(result.steps[1].meta.reason.as_deref().unwrap().contains('a'));
        assert!(executor.calls_for("b").is_empty());
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn test_hard_failure_halts_run() {
        let executor = Arc::new(FakeExecutor::default());
        let wf = workflow(vec![
            Step::new("a", "exit 2"),
            Step::new("b", "true"),
            needs(Step::new("c", "true"), &["b"]),
        ]);
        let result = run(executor.clone(), &wf).await;
        assert_eq!(result.steps.len(), 1);
        assert!(executor.calls_for("b").is_empty());
    }

    #[tokio::test]
    async fn test_transitive_dependents_recorded_after_halt() {
        let executor = Arc::new(FakeExecutor::default());
        let wf = workflow(vec![
            Step::new("a", "exit 1"),
            needs(Step::new("b", "true"), &["a"]),
            Step::new("unrelated", "true"),
            needs(Step::new("c", "true"), &["b"]),
        ]);
        let result = run(executor, &wf).await;
        let names: Vec<&str> = result.steps.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(result.steps[2].status(), StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_soft_fail_keeps_exit_code() {
        let executor = Arc::new(FakeExecutor::default());
        let mut flaky = Step::new("lint", "exit 3");
        flaky.continue_on_error = true;
        flaky.retries = RetryPolicy {
            max: 1,
            delay: Duration::ZERO,
            backoff: 1.0,
        };
        let wf = workflow(vec![flaky, needs(Step::new("after", "true"), &["lint"])]);
        let result = run(executor.clone(), &wf).await;

        let lint = &result.steps[0];
        assert!(lint.ok);
        assert!(lint.meta.soft_fail);
        assert_eq!(lint.exit_code, 3);
        assert_eq!(lint.meta.attempts.len(), 2);
        assert_eq!(lint.status(), StepStatus::SoftFail);
        assert_eq!(result.steps[1].status(), StepStatus::Ok);
        assert_eq!(executor.calls_for("after").len(), 1);
        assert!(result.ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_timing() {
        let executor = Arc::new(FakeExecutor::default());
        let mut step = Step::new("net", "exit 1");
        step.retries = RetryPolicy {
            max: 2,
            delay: Duration::from_secs(1),
            backoff: 2.0,
        };
        let result = run(executor.clone(), &workflow(vec![step])).await;

        let calls = executor.calls_for("net");
        assert_eq!(calls.len(), 3);
        let tolerance = Duration::from_millis(50);
        let first = calls[1] - calls[0];
        let second = calls[2] - calls[1];
        assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(1) + tolerance);
        assert!(second >= Duration::from_secs(2) && second < Duration::from_secs(2) + tolerance);
        assert_eq!(result.steps[0].meta.attempts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_first_success() {
        let executor = Arc::new(FakeExecutor::default());
        let mut step = Step::new("flaky", "flaky:2");
        step.retries = RetryPolicy {
            max: 5,
            delay: Duration::from_secs(1),
            backoff: 1.0,
        };
        let result = run(executor.clone(), &workflow(vec![step])).await;
        assert_eq!(executor.calls_for("flaky").len(), 2);
        assert!(result.steps[0].ok);
        assert!(!result.steps[0].meta.attempts[0].ok);
        assert!(result.steps[0].meta.attempts[1].ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sudo_auth_skip_is_not_retried() {
        let executor = Arc::new(FakeExecutor::default());
        let mut admin = Step::new("admin", "sudo-denied");
        admin.continue_on_error = true;
        admin.retries = RetryPolicy {
            max: 3,
            delay: Duration::from_secs(1),
            backoff: 1.0,
        };
        let wf = workflow(vec![admin, needs(Step::new("after", "true"), &["admin"])]);
        let (scheduler, mut events) = Scheduler::with_events(executor.clone());
        let result = scheduler.run(&wf).await;

        assert_eq!(executor.calls_for("admin").len(), 1);
        let admin = &result.steps[0];
        assert_eq!(admin.status(), StepStatus::Skipped);
        assert_eq!(admin.meta.skipped, Some(SkipKind::SudoAuthFailed));
        assert!(!admin.meta.soft_fail);
        assert_eq!(admin.meta.attempts.len(), 1);

        // not a failure: the dependent still runs and the run is not halted
        assert_eq!(result.steps[1].status(), StepStatus::Ok);
        assert_eq!(executor.calls_for("after").len(), 1);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event,
                RunEvent::RetryScheduled { .. } | RunEvent::Halted { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_cascaded_skip_blocks_its_own_dependents() {
        let executor = Arc::new(FakeExecutor::default());
        let mut first = Step::new("first", "exit 1");
        first.continue_on_error = true;
        let mut guarded = Step::new("guarded", "true");
        guarded.if_expr = Some("false".to_string());
        let wf = workflow(vec![
            first,
            guarded,
            needs(Step::new("a", "true"), &["guarded"]),
            Step::new("b", "exit 1"),
            needs(Step::new("c", "true"), &["b"]),
            needs(Step::new("d", "true"), &["c"]),
        ]);
        let result = run(executor.clone(), &wf).await;

        let status = |name: &str| result.get(name).map(|r| r.status());
        assert_eq!(status("first"), Some(StepStatus::SoftFail));
        assert_eq!(status("a"), Some(StepStatus::Ok));
        assert_eq!(status("b"), Some(StepStatus::Fail));
        assert_eq!(result.get("d").unwrap().meta.skipped, Some(SkipKind::FailedDependency));
        assert!(result.get("d").unwrap().meta.reason.as_deref().unwrap().ends_with(": c"));
        assert!(executor.calls_for("d").is_empty());
    }

    #[tokio::test]
    async fn test_condition_false_does_not_block() {
        let executor = Arc::new(FakeExecutor::default());
        let mut guarded = Step::new("guarded", "true");
        guarded.if_expr = Some("false".to_string());
        let wf = workflow(vec![guarded, needs(Step::new("next", "true"), &["guarded"])]);
        let result = run(executor.clone(), &wf).await;

        assert_eq!(result.steps[0].status(), StepStatus::Skipped);
        assert_eq!(result.steps[0].exit_code, EXIT_CONDITION_SKIPPED);
        assert!(executor.calls_for("guarded").is_empty());
        assert_eq!(result.steps[1].status(), StepStatus::Ok);
        assert_eq!(result.summary().fail, 0);
        // a skipped step means the run as a whole did not succeed
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn test_guard_is_rendered() {
        let executor = Arc::new(FakeExecutor::default());
        let mut guarded = Step::new("guarded", "true");
        guarded.if_expr = Some("${{ env.ENABLED }}".to_string());
        let mut wf = workflow(vec![guarded]);
        wf.env.insert("ENABLED".to_string(), "true".to_string());
        let result = run(executor.clone(), &wf).await;
        assert_eq!(result.steps[0].status(), StepStatus::Ok);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_results() {
        let executor = Arc::new(FakeExecutor::default());
        let mut boom = Step::new("boom", "panic");
        boom.continue_on_error = true;
        let wf = workflow(vec![boom, Step::new("err", "error")]);
        let result = run(executor, &wf).await;

        assert_eq!(result.steps[0].exit_code, EXIT_DISPATCH_EXCEPTION);
        assert!(result.steps[0].meta.exception);
        assert!(result.steps[0].meta.soft_fail);
        assert_eq!(result.steps[1].exit_code, EXIT_DISPATCH_EXCEPTION);
        assert!(result.steps[1].meta.trace.as_deref().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_captured_outputs_feed_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor {
            stdout_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let mut build = Step::new("build", "print:version: 1.2.3\n");
        build.capture.insert(
            "version".to_string(),
            crate::core::workflow::CaptureRule {
                regex: r"version: (\S+)".to_string(),
            },
        );
        let mut check = Step::new("check", "true");
        check.if_expr = Some("${{ steps.build.outputs.version }}".to_string());

        let (scheduler, mut events) = Scheduler::with_events(executor.clone());
        let result = scheduler.run(&workflow(vec![build, check])).await;

        // guard renders to "1.2.3", which the fake treats as false
        assert_eq!(result.steps[1].status(), StepStatus::Skipped);

        let mut captured = None;
        while let Ok(event) = events.try_recv() {
            if let RunEvent::StepFinished { result, outputs, .. } = event {
                if result.step == "build" {
                    captured = outputs.get("version").cloned();
                }
            }
        }
        assert_eq!(captured.as_deref(), Some("1.2.3"));
    }

    #[tokio::test]
    async fn test_event_order() {
        let executor = Arc::new(FakeExecutor::default());
        let (scheduler, mut events) = Scheduler::with_events(executor);
        scheduler.run(&workflow(vec![Step::new("only", "true")])).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                RunEvent::RunStarted { .. } => "run",
                RunEvent::StepStarted { .. } => "start",
                RunEvent::StepFinished { .. } => "finish",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["run", "start", "finish"]);
    }
}
