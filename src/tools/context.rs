//! Execution context for tools: roots, session, limits, shared todo store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, ExecConfig, Limits};
use crate::scope::Roots;
use crate::todo::{DEFAULT_SESSION, TodoStore};

/// Context passed into each tool execution. One per session; cheap to clone.
#[derive(Clone)]
pub struct ToolCtx {
    pub roots: Roots,
    /// Session key for the todo store.
    pub session: String,
    pub limits: Arc<Limits>,
    pub exec: Arc<ExecConfig>,
    pub todos: Arc<TodoStore>,
    /// Cancels in-flight processes and waits for this session.
    pub cancel: CancellationToken,
}

impl ToolCtx {
    /// Context with default limits and a private todo store.
    pub fn new(roots: Roots) -> Self {
        Self {
            roots,
            session: DEFAULT_SESSION.to_string(),
            limits: Arc::new(Limits::default()),
            exec: Arc::new(ExecConfig::default()),
            todos: Arc::new(TodoStore::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Context for `config`, sharing `todos` across sessions.
    pub fn from_config(config: &Config, todos: Arc<TodoStore>) -> Self {
        Self {
            roots: config.roots(),
            session: DEFAULT_SESSION.to_string(),
            limits: Arc::new(config.limits.clone()),
            exec: Arc::new(config.exec.clone()),
            todos,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
