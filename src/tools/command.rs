//! `run_command`: the secured process runner exposed to the agent.

use std::time::Duration;

use serde_json::Value;

use crate::clamp::clamp_text;
use crate::exec::{CommandSpec, RunOptions, run_command};
use crate::scope::{self, Intent};
use crate::tools::args::{get_bool, get_optional_string, get_optional_string_list, get_optional_u64};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

pub struct RunCommandTool;

fn command_spec(args: &Value, shell: bool) -> Result<CommandSpec, String> {
    if let Some(argv) = get_optional_string_list(args, "argv")? {
        if args.get("command").is_some() {
            return Err("pass either 'argv' or 'command', not both".into());
        }
        // A single string in `argv` with the shell flag is a raw command line.
        if shell && argv.len() == 1 {
            return Ok(CommandSpec::Shell(argv.into_iter().next().unwrap_or_default()));
        }
        return Ok(CommandSpec::Argv(argv));
    }
    match get_optional_string(args, "command") {
        Some(cmd) if shell => Ok(CommandSpec::Shell(cmd)),
        Some(cmd) => Ok(CommandSpec::argv(cmd.split_whitespace())),
        None => Err("missing 'argv' or 'command'".into()),
    }
}

impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a program without a shell. Pass argv as an array, e.g. [\"cargo\", \"test\"]. \
         cwd defaults to the workspace root. Destructive commands are refused; shell \
         strings need shell=true and allowUnsafe=true and are only honoured when the \
         operator enabled unsafe execution."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "argv": { "type": "array", "items": { "type": "string" }, "description": "Program and arguments" },
                "command": { "type": "string", "description": "Command line; split on whitespace unless shell=true" },
                "cwd": { "type": "string", "description": "Working directory inside a root" },
                "timeoutMs": { "type": "integer", "description": "Timeout in milliseconds" },
                "shell": { "type": "boolean", "description": "Run 'command' through the platform shell" },
                "allowUnsafe": { "type": "boolean", "description": "Request unsafe execution (shell strings)" }
            }
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let shell = get_bool(args, "shell", false);
            let spec = match command_spec(args, shell) {
                Ok(s) => s,
                Err(e) => return Envelope::error(e),
            };
            let requested_unsafe = get_bool(args, "allowUnsafe", false);
            if requested_unsafe && !ctx.exec.allow_unsafe {
                tracing::debug!("allowUnsafe requested but disabled in config");
            }
            let allow_unsafe = requested_unsafe && ctx.exec.allow_unsafe;

            let cwd = match get_optional_string(args, "cwd") {
                Some(dir) => match scope::resolve(&ctx.roots, &dir, Intent::Search) {
                    Ok(r) => r.abs,
                    Err(e) => return Envelope::error(e.to_string()),
                },
                None => ctx.roots.workspace.clone(),
            };
            let max_timeout = ctx.limits.command_timeout_ms.max(1);
            let timeout_ms = match get_optional_u64(args, "timeoutMs") {
                Ok(t) => t.unwrap_or(max_timeout).clamp(1, max_timeout),
                Err(e) => return Envelope::error(e),
            };

            let mut opts = RunOptions::new(cwd)
                .with_timeout(Duration::from_millis(timeout_ms))
                .with_cancel(ctx.cancel.clone())
                .with_unsafe(shell, allow_unsafe);
            opts.max_output_bytes = ctx.limits.output_cap_bytes;
            opts.inherit_env = ctx.exec.inherit_env;
            opts.allow_env = ctx.exec.allow_env.clone();

            let result = match run_command(&spec, &opts).await {
                Ok(r) => r,
                Err(e) => return Envelope::error(e.to_string()),
            };

            let stdout = clamp_text(&result.stdout, ctx.limits.read_clamp_chars);
            let stderr = clamp_text(&result.stderr, ctx.limits.stderr_clamp_chars);
            let envelope = if result.success {
                Envelope::ok()
            } else if result.blocked {
                Envelope::error(result.stderr.trim().to_string())
            } else if result.timed_out {
                Envelope::error(format!("Command timed out after {timeout_ms}ms"))
            } else {
                Envelope::error(format!("Command exited with code {}", result.returncode))
            };
            let mut envelope = envelope
                .with("stdout", stdout.text)
                .with("stderr", stderr.text)
                .with("returncode", result.returncode)
                .with("timedOut", result.timed_out)
                .with("truncated", result.truncated || stdout.truncated || stderr.truncated)
                .with("omittedBytes", result.omitted_bytes)
                .with("omittedChars", stdout.omitted_chars + stderr.omitted_chars)
                .with("blocked", result.blocked);
            if let Some(sig) = result.signal {
                envelope = envelope.with("signal", sig);
            }
            if result.canceled {
                envelope = envelope.with("canceled", true);
            }
            envelope
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_from_args() {
        assert_eq!(
            command_spec(&json!({ "argv": ["ls", "-la"] }), false).unwrap(),
            CommandSpec::argv(["ls", "-la"])
        );
        assert_eq!(
            command_spec(&json!({ "command": "echo  hi" }), false).unwrap(),
            CommandSpec::argv(["echo", "hi"])
        );
        assert_eq!(
            command_spec(&json!({ "command": "echo hi | wc" }), true).unwrap(),
            CommandSpec::Shell("echo hi | wc".into())
        );
        assert!(command_spec(&json!({}), false).is_err());
        assert!(command_spec(&json!({ "argv": ["a"], "command": "b" }), false).is_err());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::config::{ExecConfig, Limits};
        use crate::scope::Roots;
        use std::sync::Arc;
        use tempfile::TempDir;

        #[tokio::test]
        async fn runs_in_workspace() {
            let tmp = TempDir::new().unwrap();
            std::fs::write(tmp.path().join("marker.txt"), "").unwrap();
            let ctx = ToolCtx::new(Roots::new(tmp.path()));
            let res = RunCommandTool.execute(&ctx, &json!({ "argv": ["ls"] })).await;
            assert!(res.ok, "{:?}", res.error);
            assert!(res.get("stdout").unwrap().as_str().unwrap().contains("marker.txt"));
            assert_eq!(res.get("returncode").unwrap(), 0);
            assert_eq!(res.get("blocked").unwrap(), false);
        }

        #[tokio::test]
        async fn rm_rf_is_blocked() {
            let tmp = TempDir::new().unwrap();
            std::fs::create_dir(tmp.path().join("keep")).unwrap();
            let ctx = ToolCtx::new(Roots::new(tmp.path()));
            let res = RunCommandTool
                .execute(&ctx, &json!({ "argv": ["rm", "-rf", "keep"] }))
                .await;
            assert!(!res.ok);
            assert_eq!(res.get("blocked").unwrap(), true);
            assert_eq!(res.get("returncode").unwrap(), 126);
            assert!(tmp.path().join("keep").exists());
        }

        #[tokio::test]
        async fn allow_unsafe_needs_operator_opt_in() {
            let tmp = TempDir::new().unwrap();
            let args = json!({ "command": "echo hi | tr a-z A-Z", "shell": true, "allowUnsafe": true });
            let ctx = ToolCtx::new(Roots::new(tmp.path()));
            let res = RunCommandTool.execute(&ctx, &args).await;
            assert_eq!(res.get("blocked").unwrap(), true);

            let mut ctx = ToolCtx::new(Roots::new(tmp.path()));
            ctx.exec = Arc::new(ExecConfig {
                allow_unsafe: true,
                ..ExecConfig::default()
            });
            let res = RunCommandTool.execute(&ctx, &args).await;
            assert!(res.ok, "{:?}", res.error);
            assert_eq!(res.get("stdout").unwrap(), "HI\n");
        }

        #[tokio::test]
        async fn timeout_is_capped_by_limits() {
            let tmp = TempDir::new().unwrap();
            let mut ctx = ToolCtx::new(Roots::new(tmp.path()));
            ctx.limits = Arc::new(Limits {
                command_timeout_ms: 100,
                ..Limits::default()
            });
            let res = RunCommandTool
                .execute(&ctx, &json!({ "argv": ["sleep", "10"], "timeoutMs": 60_000 }))
                .await;
            assert!(!res.ok);
            assert_eq!(res.get("timedOut").unwrap(), true);
            assert_eq!(res.get("returncode").unwrap(), 124);
        }

        #[tokio::test]
        async fn capped_output_reports_dropped_bytes() {
            let tmp = TempDir::new().unwrap();
            let mut ctx = ToolCtx::new(Roots::new(tmp.path()));
            ctx.limits = Arc::new(Limits {
                output_cap_bytes: 1000,
                ..Limits::default()
            });
            let res = RunCommandTool
                .execute(&ctx, &json!({ "argv": ["head", "-c", "100000", "/dev/zero"] }))
                .await;
            assert!(res.ok, "{:?}", res.error);
            assert_eq!(res.get("truncated").unwrap(), true);
            assert_eq!(res.get("omittedBytes").unwrap(), 99_000);
            assert_eq!(res.get("omittedChars").unwrap(), 0);
        }

        #[tokio::test]
        async fn cwd_outside_roots_is_rejected() {
            let tmp = TempDir::new().unwrap();
            let ctx = ToolCtx::new(Roots::new(tmp.path()));
            let res = RunCommandTool
                .execute(&ctx, &json!({ "argv": ["ls"], "cwd": "../.." }))
                .await;
            assert!(res.error.unwrap().contains("escapes"));
        }
    }
}
