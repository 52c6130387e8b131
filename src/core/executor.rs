//! Step executor - the seam between the run loop and the backends
//!
//! The scheduler only sees [`StepExecutor`]. [`Dispatcher`] is the production
//! implementation: it classifies the script, picks a backend, runs it and
//! writes stdout/stderr artifacts.

use super::result::{SkipKind, StepRunResult, EXIT_DISPATCH_EXCEPTION};
use super::workflow::{expand_tilde, Step};
use crate::backend::{
    shell::quote, Backend, BackendKind, BackendRun, ContainerBackend, HostBackend, Invocation,
    RemoteBackend,
};
use crate::config::ExecConfig;
use crate::error::DispatchError;
use crate::exec::{classify, CommandSpec, ProcessRunner, RiskTier};
use crate::prompt::SecretPrompt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Where an attempt sits in the run
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub run_id: String,
    pub workflow: String,
    /// 1-based position in the workflow
    pub step_index: usize,
    pub step_total: usize,
    pub attempt: u32,
    /// Env keys whose values come from the secrets file
    pub secret_keys: BTreeSet<String>,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run one attempt of a rendered step
    async fn execute(&self, step: &Step, ctx: &ExecContext) -> Result<StepRunResult>;

    /// Evaluate a rendered guard expression; `true` means run the step
    async fn check_condition(&self, step: &Step, expr: &str, ctx: &ExecContext) -> Result<bool>;
}

/// Absolute local working directory for a rendered step
pub fn resolve_cwd(cwd: Option<&str>) -> Result<PathBuf> {
    let base = std::env::current_dir().context("cannot determine current directory")?;
    Ok(match cwd.map(str::trim).filter(|c| !c.is_empty()) {
        Some(dir) => {
            let expanded = expand_tilde(Path::new(dir));
            if expanded.is_absolute() {
                expanded
            } else {
                base.join(expanded)
            }
        }
        None => base,
    })
}

/// Production executor over the host, container and remote backends
pub struct Dispatcher {
    config: Arc<ExecConfig>,
    runner: ProcessRunner,
    host: HostBackend,
    container: ContainerBackend,
}

impl Dispatcher {
    pub fn new(config: Arc<ExecConfig>, prompt: Arc<dyn SecretPrompt>) -> Self {
        let runner = ProcessRunner::new();
        Self {
            host: HostBackend::new(config.clone(), runner.clone(), prompt),
            container: ContainerBackend::new(config.clone(), runner.clone()),
            config,
            runner,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    fn write_artifact(&self, name: &str, content: &str) -> Option<PathBuf> {
        if content.is_empty() {
            return None;
        }
        let path = self.config.artifacts_dir.join(name);
        let written = std::fs::create_dir_all(&self.config.artifacts_dir)
            .and_then(|_| std::fs::write(&path, content));
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                log::warn!("cannot write artifact {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Run on the backend for `kind`; returns what that backend reports as its kind
    async fn dispatch(
        &self,
        step: &Step,
        kind: &BackendKind,
        risk: RiskTier,
        label: &str,
        secret_keys: &BTreeSet<String>,
    ) -> Result<(BackendKind, BackendRun)> {
        let cwd = resolve_cwd(step.cwd.as_deref())?;
        let remote;
        let backend: &dyn Backend = match kind {
            BackendKind::Host => &self.host,
            BackendKind::Container => &self.container,
            BackendKind::Remote(alias) => {
                let host = self.config.hosts.resolve(alias)?;
                remote = RemoteBackend::new(self.config.clone(), self.runner.clone(), host);
                &remote
            }
        };
        let run = backend
            .run(&Invocation {
                step,
                cwd: &cwd,
                risk,
                label,
                secret_keys,
            })
            .await?;
        Ok((backend.kind(), run))
    }

    fn finish(&self, step: &Step, kind: BackendKind, risk: RiskTier, label: &str, run: BackendRun) -> StepRunResult {
        let process = run.process;
        if run.sudo_auth_failed {
            let mut result =
                StepRunResult::skipped(&step.name, SkipKind::SudoAuthFailed, "sudo auth failed", process.exit_code)
                    .with_backend(kind)
                    .with_duration(process.duration);
            result.meta.risk = Some(risk);
            result.error = Some("sudo password incorrect".to_string());
            return result;
        }

        let ok = process.exit_code == 0 && !process.killed;
        let mut result = StepRunResult::new(&step.name, ok, process.exit_code)
            .with_backend(kind)
            .with_duration(process.duration);
        result.stdout_path = self.write_artifact(&format!("{}.out", label), &process.stdout);
        result.stderr_path = self.write_artifact(&format!("{}.err", label), &process.stderr);
        result.meta.risk = Some(risk);
        if process.killed {
            result.meta.kill_reason = Some(process.kill_reason);
        }
        if let Some(diagnosis) = run.diagnosis {
            result.meta.remote_error = Some(diagnosis.label.to_string());
            result.meta.remote_hint = Some(diagnosis.hint.to_string());
        }
        if !ok {
            result.error = Some(if process.killed {
                format!("killed ({})", process.kill_reason)
            } else {
                format!("non-zero exit ({})", process.exit_code)
            });
        }
        result
    }
}

#[async_trait]
impl StepExecutor for Dispatcher {
    async fn execute(&self, step: &Step, ctx: &ExecContext) -> Result<StepRunResult> {
        let started = Instant::now();
        let risk = classify(&step.run);
        let kind = BackendKind::resolve(&step.target, risk);
        let short_run: String = ctx.run_id.chars().take(8).collect();
        let label = format!(
            "{}_{}_{}",
            short_run,
            ctx.step_index,
            chrono::Utc::now().timestamp_millis()
        );
        log::info!(
            "[{}/{}] {} on {} ({}), attempt {}",
            ctx.step_index,
            ctx.step_total,
            step.name,
            kind,
            risk.label(),
            ctx.attempt
        );

        match self.dispatch(step, &kind, risk, &label, &ctx.secret_keys).await {
            Ok((backend, run)) => Ok(self.finish(step, backend, risk, &label, run)),
            Err(e) => {
                let code = e
                    .downcast_ref::<DispatchError>()
                    .map_or(EXIT_DISPATCH_EXCEPTION, DispatchError::exit_code);
                log::error!("dispatch of step '{}' failed: {:#}", step.name, e);
                let mut result = StepRunResult::exception(&step.name, code, &e)
                    .with_backend(kind)
                    .with_duration(started.elapsed());
                result.meta.risk = Some(risk);
                Ok(result)
            }
        }
    }

    async fn check_condition(&self, step: &Step, expr: &str, _ctx: &ExecContext) -> Result<bool> {
        let limits = self.config.limits.for_risk(RiskTier::ReadOnly);
        let spec = CommandSpec::new(
            format!("bash -c {}", quote(expr)),
            limits.timeout(),
            limits.grace(),
        )
        .env(step.env.clone());
        // a remote step's cwd only exists on the remote side
        let spec = if step.remote_alias().is_some() {
            spec
        } else {
            spec.cwd(resolve_cwd(step.cwd.as_deref())?)
        };
        let result = self.runner.run(&spec).await?;
        Ok(result.success())
    }
}
