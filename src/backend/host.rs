//! Host backend - runs the step as a bash script on this machine

use super::shell::{normalize_script, quote};
use super::{Backend, BackendKind, BackendRun, Invocation};
use crate::config::ExecConfig;
use crate::error::DispatchError;
use crate::exec::{needs_sudo, CommandSpec, ProcessRunner};
use crate::prompt::SecretPrompt;
use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

/// Carries the sudo password from `printf` to `sudo -S`, never on argv
const SUDO_PASSWORD_VAR: &str = "GHOSTFLOW_SUDO_PASSWORD";

const SUDO_AUTH_FAILURES: [&str; 3] = [
    "incorrect password",
    "a password is required",
    "password is required",
];

/// stderr of a rejected `sudo -S`
pub fn is_sudo_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    SUDO_AUTH_FAILURES.iter().any(|sig| lower.contains(sig))
}

/// Script text with the strict-mode header
pub fn script_text(body: &str, debug: bool) -> String {
    let header = if debug {
        "#!/usr/bin/env bash\nset -euxo pipefail\n"
    } else {
        "#!/usr/bin/env bash\nset -eo pipefail\n"
    };
    format!("{}{}", header, normalize_script(body))
}

enum ScriptFile {
    Temporary(TempPath),
    Kept(PathBuf),
}

impl ScriptFile {
    fn path(&self) -> &Path {
        match self {
            Self::Temporary(p) => &**p,
            Self::Kept(p) => p.as_path(),
        }
    }
}

pub struct HostBackend {
    config: Arc<ExecConfig>,
    runner: ProcessRunner,
    prompt: Arc<dyn SecretPrompt>,
}

impl HostBackend {
    pub fn new(config: Arc<ExecConfig>, runner: ProcessRunner, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            config,
            runner,
            prompt,
        }
    }

    fn write_script(&self, label: &str, text: &str) -> Result<ScriptFile, DispatchError> {
        let dir = self.config.artifacts_dir.join("scripts");
        let fail = |source| DispatchError::ScriptWrite {
            path: dir.clone(),
            source,
        };
        std::fs::create_dir_all(&dir).map_err(fail)?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}_", label))
            .suffix(".sh")
            .tempfile_in(&dir)
            .map_err(fail)?;
        file.write_all(text.as_bytes()).map_err(fail)?;
        file.flush().map_err(fail)?;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o700))
            .map_err(fail)?;

        let path = file.into_temp_path();
        if self.config.debug_script {
            let kept = path.keep().map_err(|e| fail(e.error))?;
            log::debug!("host script kept at {}", kept.display());
            Ok(ScriptFile::Kept(kept))
        } else {
            Ok(ScriptFile::Temporary(path))
        }
    }

    async fn ask_password(&self, step: &str) -> Result<String, DispatchError> {
        let prompt = self.prompt.clone();
        let label = format!("sudo password for step '{}' (not stored)", step);
        tokio::task::spawn_blocking(move || prompt.ask(&label))
            .await
            .map_err(|e| DispatchError::SudoPrompt(e.to_string()))?
            .map_err(|e| DispatchError::SudoPrompt(e.to_string()))
    }
}

#[async_trait]
impl Backend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<BackendRun> {
        let step = invocation.step;
        let limits = self
            .config
            .limits
            .for_risk(invocation.risk)
            .with_timeout(step.timeout);

        let text = script_text(&step.run, self.config.debug_script);
        let script = self.write_script(invocation.label, &text)?;
        let script_arg = quote(&script.path().to_string_lossy());

        let sudo = needs_sudo(&step.run);
        let mut env = step.env.clone();
        let command = if sudo {
            log::info!("step '{}' needs sudo on the host", step.name);
            let password = self.ask_password(&step.name).await?;
            env.insert(SUDO_PASSWORD_VAR.to_string(), password);
            format!(
                "printf '%s\\n' \"${}\" | sudo -S -p '' /usr/bin/env bash {}",
                SUDO_PASSWORD_VAR, script_arg
            )
        } else {
            format!("/usr/bin/env bash {}", script_arg)
        };

        let spec = CommandSpec::new(command, limits.timeout(), limits.grace())
            .cwd(invocation.cwd)
            .env(env)
            .mem_watch_mb(limits.memory_mb);
        let process = self.runner.run(&spec).await?;
        drop(script);

        let sudo_auth_failed =
            sudo && process.exit_code != 0 && is_sudo_auth_failure(&process.stderr);
        if sudo_auth_failed {
            log::warn!("sudo rejected the password for step '{}'", step.name);
        }

        Ok(BackendRun {
            process,
            sudo_auth_failed,
            diagnosis: None,
        })
    }
}
