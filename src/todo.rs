//! Session-keyed todo lists shared by all sessions of one process.
//!
//! Indices are 1-based and never reused within a list until it is cleared.
//! At most `max_sessions` lists are kept; the least recently touched list is
//! evicted to make room.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// Parse a status, accepting common synonyms. Case, spaces and hyphens are ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let key: String = input
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "pending" | "todo" | "open" | "new" | "not_started" => Some(Self::Pending),
            "in_progress" | "inprogress" | "wip" | "doing" | "started" | "active" | "working" => {
                Some(Self::InProgress)
            }
            "completed" | "complete" | "done" | "finished" | "closed" | "resolved" => {
                Some(Self::Completed)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoItem {
    pub index: u32,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TodoError {
    #[error("todo content is empty")]
    EmptyContent,
    #[error("no todo item with index {0}")]
    NotFound(u32),
    #[error("invalid status '{0}'; use pending, in_progress or completed")]
    InvalidStatus(String),
}

#[derive(Debug)]
struct SessionTodos {
    items: Vec<TodoItem>,
    next_index: u32,
    last_touched: u64,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionTodos>,
    tick: u64,
}

#[derive(Debug)]
pub struct TodoStore {
    inner: Mutex<Inner>,
    max_sessions: usize,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

fn session_key(key: &str) -> &str {
    match key.trim() {
        "" => DEFAULT_SESSION,
        k => k,
    }
}

impl Inner {
    /// Session list for `key`, created (and others evicted) if needed.
    fn touch(&mut self, key: &str, max_sessions: usize) -> &mut SessionTodos {
        self.tick += 1;
        let tick = self.tick;
        if !self.sessions.contains_key(key) {
            while self.sessions.len() >= max_sessions.max(1) {
                let Some(oldest) = self
                    .sessions
                    .iter()
                    .min_by_key(|(_, s)| s.last_touched)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                tracing::debug!(session = %oldest, "evicting todo list");
                self.sessions.remove(&oldest);
            }
        }
        let session = self.sessions.entry(key.to_string()).or_insert_with(|| SessionTodos {
            items: Vec::new(),
            next_index: 1,
            last_touched: tick,
        });
        session.last_touched = tick;
        session
    }
}

impl TodoStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_sessions,
        }
    }

    fn with<T>(&self, key: &str, f: impl FnOnce(&mut SessionTodos) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(inner.touch(session_key(key), self.max_sessions))
    }

    /// Append an item; returns it and the new list length.
    pub fn add(&self, key: &str, content: &str) -> Result<(TodoItem, usize), TodoError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TodoError::EmptyContent);
        }
        Ok(self.with(key, |s| {
            let item = TodoItem {
                index: s.next_index,
                content: content.to_string(),
                status: TodoStatus::Pending,
            };
            s.next_index += 1;
            s.items.push(item.clone());
            (item, s.items.len())
        }))
    }

    pub fn update_content(&self, key: &str, index: u32, content: &str) -> Result<TodoItem, TodoError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TodoError::EmptyContent);
        }
        self.with(key, |s| {
            let item = s
                .items
                .iter_mut()
                .find(|i| i.index == index)
                .ok_or(TodoError::NotFound(index))?;
            item.content = content.to_string();
            Ok(item.clone())
        })
    }

    pub fn update_status(&self, key: &str, index: u32, status: &str) -> Result<TodoItem, TodoError> {
        let status = TodoStatus::parse(status).ok_or_else(|| TodoError::InvalidStatus(status.to_string()))?;
        self.with(key, |s| {
            let item = s
                .items
                .iter_mut()
                .find(|i| i.index == index)
                .ok_or(TodoError::NotFound(index))?;
            item.status = status;
            Ok(item.clone())
        })
    }

    /// Drop all items and restart numbering at 1.
    pub fn clear(&self, key: &str) {
        self.with(key, |s| {
            s.items.clear();
            s.next_index = 1;
        });
    }

    pub fn list(&self, key: &str) -> Vec<TodoItem> {
        self.with(key, |s| s.items.clone())
    }

    /// Number of session lists currently held.
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).sessions.len()
    }
}
