//! Error types for workflow loading and configuration
//!
//! Everything that happens after a workflow loads is recovered into a
//! `StepRunResult`; only these errors abort before a step runs.

use std::path::PathBuf;
use thiserror::Error;

/// Load/validation errors - fatal, reject the whole workflow document
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot read workflow {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step '{step}' has invalid target '{target}' (expected auto|host|container|remote:<alias>)")]
    InvalidTarget { step: String, target: String },

    #[error("step '{step}' needs unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("no step matches '{0}'")]
    UnknownStep(String),
}

/// Configuration errors - limits and remote host profiles
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("limits configuration has no '{0}' tier")]
    MissingTier(&'static str),

    #[error("remote alias '{0}' is not defined in the ssh section of the user config")]
    UnknownHostAlias(String),

    #[error("remote alias '{0}' has no 'host' field")]
    MissingHost(String),
}

/// Dispatch faults that carry their own synthetic exit code
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot write host script {path}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sudo prompt failed: {0}")]
    SudoPrompt(String),
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ScriptWrite { .. } => crate::core::result::EXIT_SCRIPT_WRITE_FAILED,
            Self::SudoPrompt(_) => crate::core::result::EXIT_SUDO_PROMPT_FAILED,
        }
    }
}
