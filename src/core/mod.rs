//! Core engine - workflow model, runtime context, executor seam, run loop

pub mod executor;
pub mod result;
pub mod runtime;
pub mod scheduler;
pub mod workflow;

pub use executor::{Dispatcher, ExecContext, StepExecutor};
pub use result::{RunSummary, SkipKind, StepRunResult, StepStatus, WorkflowRunResult};
pub use runtime::RuntimeContext;
pub use scheduler::{RunEvent, Scheduler};
pub use workflow::{RetryPolicy, Step, StepRef, Target, Workflow};
