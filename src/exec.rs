//! Command execution: policy, executable lookup, process-tree kill, runner.

pub mod kill;
pub mod lookup;
pub mod policy;
pub mod runner;

pub use policy::{CommandDescriptor, CommandSpec, PolicyViolation};
pub use runner::{CommandResult, RunError, RunOptions, run_command};
