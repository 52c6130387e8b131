//! Container backend - runs the raw script inside a locked-down `docker run`

use super::shell::{join, normalize_script};
use super::{Backend, BackendKind, BackendRun, Invocation};
use crate::config::ExecConfig;
use crate::exec::{is_write_like, CommandSpec, ProcessRunner, ResourceLimits};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

const TMPFS_MB: u32 = 64;

/// `docker run` argv derived purely from the limits and the script
pub fn docker_args(
    image: &str,
    script: &str,
    limits: &ResourceLimits,
    env: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "docker",
        "run",
        "--rm",
        "--cap-drop",
        "ALL",
        "--security-opt",
        "no-new-privileges",
        "-e",
        "LANG=C.UTF-8",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    // values come from the client's own environment
    for name in env.keys() {
        args.push("-e".to_string());
        args.push(name.clone());
    }

    if let Some(pids) = limits.pids {
        args.push("--pids-limit".to_string());
        args.push(pids.to_string());
    }
    if let Some(mb) = limits.memory_mb {
        args.extend([
            "--memory".to_string(),
            format!("{}m", mb),
            "--memory-swap".to_string(),
            format!("{}m", mb),
        ]);
    }
    if let Some(cpus) = limits.cpus {
        args.push("--cpus".to_string());
        args.push(cpus.to_string());
    }

    args.push("--network".to_string());
    args.push(if limits.no_network { "none" } else { "bridge" }.to_string());
    args.push("--tmpfs".to_string());
    args.push(format!("/tmp:rw,noexec,nosuid,size={}m", TMPFS_MB));

    if !is_write_like(script) {
        args.push("--read-only".to_string());
    }

    args.extend([
        image.to_string(),
        "/bin/bash".to_string(),
        "-lc".to_string(),
        script.to_string(),
    ]);
    args
}

pub struct ContainerBackend {
    config: Arc<ExecConfig>,
    runner: ProcessRunner,
}

impl ContainerBackend {
    pub fn new(config: Arc<ExecConfig>, runner: ProcessRunner) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<BackendRun> {
        let step = invocation.step;
        let limits = self
            .config
            .limits
            .for_risk(invocation.risk)
            .with_timeout(step.timeout);
        let script = normalize_script(&step.run);
        let args = docker_args(&self.config.sandbox_image, &script, &limits, &step.env);
        log::debug!(
            "container for step '{}': image {}, {} flags",
            step.name,
            self.config.sandbox_image,
            args.len()
        );

        // docker enforces the memory ceiling itself
        let spec = CommandSpec::new(join(&args), limits.timeout(), limits.grace())
            .cwd(invocation.cwd)
            .env(step.env.clone());
        let process = self.runner.run(&spec).await?;
        Ok(BackendRun::completed(process))
    }
}
