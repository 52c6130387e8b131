//! Ghostflow - local workflow executor
//!
//! Runs the shell steps of a YAML workflow one after another on the host, in
//! a locked-down container or over ssh, with needs-based skipping, guards,
//! retries, output capture and secret masking. Every process goes through the
//! Process Runner, which enforces timeouts and a memory watchdog and kills the
//! whole process group.

#[cfg(not(unix))]
compile_error!("ghostflow supervises process groups and only builds on unix");

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod exec;
pub mod lint;
pub mod prompt;
pub mod report;
pub mod snapshot;

// Re-exports
pub use config::ExecConfig;
pub use self::core::{Dispatcher, RunEvent, Scheduler, Step, StepRunResult, Workflow, WorkflowRunResult};
pub use error::{ConfigError, DispatchError, WorkflowError};
pub use snapshot::{RerunMode, RunSnapshot};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
