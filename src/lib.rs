//! agentgate library: scoped paths, secured process runner, search adapter and the agent tool layer.

pub mod clamp;
pub mod config;
pub mod exec;
pub mod scope;
pub mod search;
pub mod todo;
pub mod tools;
