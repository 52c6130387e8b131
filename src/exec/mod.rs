//! Local execution - risk classification, limit policy, process supervision

pub mod limits;
pub mod process;
pub mod risk;
pub mod terminate;
mod tree;

pub use limits::{LimitPolicy, ResourceLimits};
pub use process::{CommandSpec, KillReason, ProcessResult, ProcessRunner};
pub use risk::{classify, is_write_like, needs_sudo, RiskTier};
pub use terminate::{select_terminator, GroupTerminator, Terminator, TreeTerminator};
pub use tree::ProcessTable;
