//! Execution backends - host process, isolated container, remote shell
//!
//! Each backend turns a rendered step into one Process Runner invocation.
//! Ordinary command failure comes back inside `BackendRun`; `Err` means the
//! invocation could not be built or launched.

pub mod container;
pub mod host;
pub mod remote;
pub mod shell;

pub use container::ContainerBackend;
pub use host::HostBackend;
pub use remote::{classify_ssh_error, RemoteBackend, SshDiagnosis};

use crate::core::workflow::{Step, Target};
use crate::exec::{ProcessResult, RiskTier};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// The backend a step actually ran on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Host,
    Container,
    Remote(String),
}

impl BackendKind {
    /// Explicit targets win; `auto` sends dangerous scripts to the container
    pub fn resolve(target: &Target, risk: RiskTier) -> Self {
        match target {
            Target::Host => Self::Host,
            Target::Container => Self::Container,
            Target::Remote(alias) => Self::Remote(alias.clone()),
            Target::Auto if risk == RiskTier::Dangerous => Self::Container,
            Target::Auto => Self::Host,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
            Self::Remote(alias) => write!(f, "remote:{}", alias),
        }
    }
}

/// One dispatch of a rendered step
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Rendered execution copy, env already merged
    pub step: &'a Step,
    /// Absolute local working directory
    pub cwd: &'a Path,
    pub risk: RiskTier,
    /// Unique per attempt, used to name scratch files
    pub label: &'a str,
    /// Env keys holding secret values
    pub secret_keys: &'a BTreeSet<String>,
}

/// What a backend observed
#[derive(Debug, Clone)]
pub struct BackendRun {
    pub process: ProcessResult,
    /// sudo rejected the password; the step counts as skipped
    pub sudo_auth_failed: bool,
    pub diagnosis: Option<SshDiagnosis>,
}

impl BackendRun {
    pub fn completed(process: ProcessResult) -> Self {
        Self {
            process,
            sudo_auth_failed: false,
            diagnosis: None,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn run(&self, invocation: &Invocation<'_>) -> Result<BackendRun>;
}
