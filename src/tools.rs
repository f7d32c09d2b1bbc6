//! Tool registry and implementations: files, search, wait, todo, command; web and image when configured.

pub mod args;
pub mod command;
pub mod context;
pub mod file;
pub mod grep;
pub mod image;
pub mod registry;
pub mod result;
pub mod todo;
pub mod wait;
pub mod web;

pub use context::ToolCtx;
pub use registry::{Tool, ToolDef, ToolRegistry, build_core_registry, tool_to_def};
pub use result::Envelope;
