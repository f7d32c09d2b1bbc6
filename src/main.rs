//! agentgate: serves the agent tool layer over JSON lines on stdin/stdout.
//!
//! Config: `~/.agentgate/config.toml` (or `$AGENTGATE_CONFIG`) plus env overrides.
//! Each request line is `{"tool": "...", "args": {...}, "session": "..."}`; each
//! response line is the tool's envelope. `--list` prints the tool definitions.

use std::process::ExitCode;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use agentgate::config;
use agentgate::todo::{DEFAULT_SESSION, TodoStore};
use agentgate::tools::{self, Envelope, ToolCtx, ToolRegistry};

#[derive(Debug, Deserialize)]
struct Request {
    tool: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    session: Option<String>,
    /// Echoed back so callers can pair responses with requests.
    #[serde(default)]
    id: Option<Value>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let path = config::default_config_path();
    let cfg = match config::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    let registry = tools::build_core_registry(&cfg);

    if std::env::args().skip(1).any(|a| a == "--list") {
        return match serde_json::to_string_pretty(&registry.to_tool_defs()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise tool definitions");
                ExitCode::FAILURE
            }
        };
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = %cfg.workspace_path().display(),
        tools = registry.list().len(),
        "agentgate ready"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; canceling in-flight work");
                shutdown.cancel();
            }
        });
    }

    let todos = Arc::new(TodoStore::new(cfg.todo.max_sessions));
    let base = ToolCtx::from_config(&cfg, todos).with_cancel(shutdown.clone());

    match serve(&registry, &base, &shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "stdio loop failed");
            ExitCode::FAILURE
        }
    }
}

/// Read requests until EOF or shutdown; one response line per request.
async fn serve(registry: &ToolRegistry, base: &ToolCtx, shutdown: &CancellationToken) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            l = lines.next_line() => l?,
            _ = shutdown.cancelled() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let (id, envelope) = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let session = req
                    .session
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SESSION.to_string());
                let ctx = base.clone().with_session(session);
                tracing::debug!(tool = %req.tool, session = %ctx.session, "request");
                let args = if req.args.is_null() {
                    Value::Object(Default::default())
                } else {
                    req.args
                };
                (req.id, registry.execute(&ctx, &req.tool, &args).await)
            }
            Err(e) => (None, Envelope::error(format!("invalid request: {e}"))),
        };

        let mut out = envelope.to_value();
        if let (Some(id), Some(obj)) = (id, out.as_object_mut()) {
            obj.insert("id".to_string(), id);
        }
        let mut buf = out.to_string();
        buf.push('\n');
        stdout.write_all(buf.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
