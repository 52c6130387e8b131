//! Remote backend - runs the script over a non-interactive ssh session
//!
//! The local ssh client always runs under the read-only tier; what the remote
//! script does is the remote host's business.

use super::shell::{join, quote};
use super::{Backend, BackendKind, BackendRun, Invocation};
use crate::config::{ExecConfig, ResolvedHost};
use crate::exec::{CommandSpec, ProcessRunner, RiskTier};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Human label and remediation hint for a failed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDiagnosis {
    pub label: &'static str,
    pub hint: &'static str,
}

const SSH_ERRORS: &[(&[&str], &str, &str)] = &[
    (
        &["permission denied"],
        "Permission denied",
        "check user and identity_file (chmod 600) and access on the server",
    ),
    (
        &["no route to host", "network is unreachable", "could not resolve hostname"],
        "Host unreachable",
        "check host/ip, DNS, port and firewall",
    ),
    (
        &["timed out"],
        "Connection timed out",
        "check the port, the firewall and that sshd is listening",
    ),
    (
        &["connection refused"],
        "Connection refused",
        "nothing listens on that port or the connection is blocked",
    ),
    (
        &["host key verification failed", "man-in-the-middle"],
        "Host key verification failed",
        "set strict_host_key_checking: accept-new or add the key to known_hosts",
    ),
    (
        &["kex_exchange_identification"],
        "Key exchange failed",
        "often a ban or rate limit; check fail2ban, sshd_config and connection limits",
    ),
];

/// Match common ssh failures in stderr; first class wins
pub fn classify_ssh_error(stderr: &str) -> Option<SshDiagnosis> {
    let lower = stderr.to_lowercase();
    SSH_ERRORS
        .iter()
        .find(|(needles, _, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|&(_, label, hint)| SshDiagnosis { label, hint })
}

/// `script` mentions `$key` or `${key...}`
fn references_var(script: &str, key: &str) -> bool {
    Regex::new(&format!(r"\$\{{?{}\b", regex::escape(key)))
        .map(|re| re.is_match(script))
        .unwrap_or(true)
}

/// Env to export on the remote side. The export line travels on the local
/// ssh argv, so a secret is only included when the script names it.
pub fn remote_env(
    script: &str,
    env: &BTreeMap<String, String>,
    secret_keys: &BTreeSet<String>,
) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(key, _)| !secret_keys.contains(*key) || references_var(script, key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Remote command: exports, optional `cd`, then the script under `bash -lc`
pub fn remote_command(script: &str, env: &BTreeMap<String, String>, cwd: Option<&str>) -> String {
    let mut command = String::new();
    for (key, value) in env {
        command.push_str(&format!("export {}={}; ", key, quote(value)));
    }
    if let Some(cwd) = cwd.filter(|c| !c.is_empty()) {
        command.push_str(&format!("cd {} && ", quote(cwd)));
    }
    command.push_str(&format!("bash -lc {}", quote(script)));
    command
}

/// `ssh` argv with fail-fast connection options
pub fn ssh_args(host: &ResolvedHost, remote: String) -> Vec<String> {
    let mut args: Vec<String> = [
        "ssh",
        "-o",
        "BatchMode=yes",
        "-o",
        "ConnectTimeout=5",
        "-o",
        "ServerAliveInterval=5",
        "-o",
        "ServerAliveCountMax=1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push("-p".to_string());
    args.push(host.port.to_string());
    if !host.strict_host_key_checking.is_empty() {
        args.push("-o".to_string());
        args.push(format!("StrictHostKeyChecking={}", host.strict_host_key_checking));
    }
    if let Some(identity) = &host.identity_file {
        args.push("-i".to_string());
        args.push(identity.to_string_lossy().into_owned());
    }
    args.push(host.destination());
    args.push("--".to_string());
    args.push(remote);
    args
}

pub struct RemoteBackend {
    config: Arc<ExecConfig>,
    runner: ProcessRunner,
    host: ResolvedHost,
}

impl RemoteBackend {
    pub fn new(config: Arc<ExecConfig>, runner: ProcessRunner, host: ResolvedHost) -> Self {
        Self {
            config,
            runner,
            host,
        }
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote(self.host.alias.clone())
    }

    async fn run(&self, invocation: &Invocation<'_>) -> Result<BackendRun> {
        let step = invocation.step;
        let limits = self
            .config
            .limits
            .for_risk(RiskTier::ReadOnly)
            .with_timeout(step.timeout);

        let env = remote_env(&step.run, &step.env, invocation.secret_keys);
        let withheld = step.env.len() - env.len();
        if withheld > 0 {
            log::debug!("{} unreferenced secret(s) not sent to {}", withheld, self.host.alias);
        }
        let remote = remote_command(&step.run, &env, step.cwd.as_deref());
        let args = ssh_args(&self.host, remote);
        log::debug!(
            "ssh to {} (port {}) for step '{}'",
            self.host.destination(),
            self.host.port,
            step.name
        );

        let spec = CommandSpec::new(join(&args), limits.timeout(), limits.grace());
        let process = self.runner.run(&spec).await?;

        let diagnosis = if process.exit_code != 0 {
            classify_ssh_error(&process.stderr)
        } else {
            None
        };
        if let Some(d) = &diagnosis {
            log::warn!("[ssh {}] {}: {}", self.host.alias, d.label, d.hint);
        }

        Ok(BackendRun {
            process,
            sudo_auth_failed: false,
            diagnosis,
        })
    }
}
