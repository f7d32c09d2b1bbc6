//! Register tools by name; name, description, JSON schema, execute(ctx, args) -> Envelope.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::tools::command::RunCommandTool;
use crate::tools::context::ToolCtx;
use crate::tools::file::{CreateDiff, CreateFile, GetFileSize, ReadFile};
use crate::tools::grep::GrepSearchTool;
use crate::tools::image::{GenerateImageTool, HttpImageProvider};
use crate::tools::result::Envelope;
use crate::tools::todo::{AddTodo, ClearTodos, ListTodos, UpdateTodoItem, UpdateTodoStatus};
use crate::tools::wait::WaitTool;
use crate::tools::web::{GoogleSearchTool, WebSearchProvider, web_client};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single tool: name, description, JSON schema for args, and execute.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope>;
}

/// Tool definition in the OpenAI function-calling shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub type_: String,
    pub function: ToolFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDef {
    pub name: String,
    pub description: String,
    /// JSON schema object, e.g. `{"type":"object","properties":{...}}`.
    pub parameters: Value,
}

impl ToolDef {
    pub fn function(name: String, description: String, parameters: Value) -> Self {
        Self {
            type_: "function".to_string(),
            function: ToolFunctionDef {
                name,
                description,
                parameters,
            },
        }
    }
}

#[inline]
pub fn tool_to_def(tool: &dyn Tool) -> ToolDef {
    ToolDef::function(
        tool.name().to_string(),
        tool.description().to_string(),
        tool.parameters(),
    )
}

/// Registry of tools by name. Thread-safe.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool by its name. Overwrites if name already exists.
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        let name = tool.name().to_string();
        self.inner
            .write()
            .expect("registry lock")
            .insert(name, Arc::new(tool));
    }

    /// Execute tool by name on its own task. Unknown tools and panics come
    /// back as `ok:false` envelopes.
    pub async fn execute(&self, ctx: &ToolCtx, name: &str, args: &Value) -> Envelope {
        let tool = {
            let guard = self.inner.read().expect("registry lock");
            guard.get(name).cloned()
        };
        let Some(tool) = tool else {
            return Envelope::error(format!("tool '{name}' not found"));
        };

        let ctx = ctx.clone();
        let args = args.clone();
        let handle = tokio::spawn(async move { tool.execute(&ctx, &args).await });
        match handle.await {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(tool = name, error = %e, "tool task failed");
                Envelope::error(format!("internal error in tool '{name}'"))
            }
        }
    }

    /// All tool definitions, sorted by name.
    pub fn to_tool_defs(&self) -> Vec<ToolDef> {
        let guard = self.inner.read().expect("registry lock");
        let mut defs: Vec<ToolDef> = guard.values().map(|t| tool_to_def(t.as_ref())).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Sorted list of tool names.
    pub fn list(&self) -> Vec<String> {
        let guard = self.inner.read().expect("registry lock");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Build the core registry: file, search, wait, todo and command tools,
/// plus web search and image generation when their providers are configured.
pub fn build_core_registry(config: &Config) -> ToolRegistry {
    let reg = ToolRegistry::new();
    reg.register(CreateFile);
    reg.register(CreateDiff);
    reg.register(ReadFile);
    reg.register(GetFileSize);
    reg.register(GrepSearchTool::default());
    reg.register(WaitTool);
    reg.register(AddTodo);
    reg.register(UpdateTodoItem);
    reg.register(UpdateTodoStatus);
    reg.register(ClearTodos);
    reg.register(ListTodos);
    reg.register(RunCommandTool);

    let client = match web_client() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "http client unavailable; web and image tools disabled");
            return reg;
        }
    };

    if let Some((key, cx)) = config.google_credentials() {
        let mut provider = WebSearchProvider::google(key, cx);
        if let Some(endpoint) = config.web.as_ref().and_then(|w| w.endpoint.as_deref()) {
            provider = provider.with_endpoint(endpoint);
        }
        reg.register(GoogleSearchTool::new(provider, client.clone()));
    }

    if let Some(provider) = config
        .image
        .as_ref()
        .and_then(|c| HttpImageProvider::from_config(c, client.clone()))
    {
        reg.register(GenerateImageTool::new(Arc::new(provider)));
    }

    reg
}
