//! `wait_tool`: bounded, cancellable sleep.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::tools::args::get_u64;
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

pub struct WaitTool;

impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait_tool"
    }

    fn description(&self) -> &str {
        "Pause for the given number of milliseconds (capped by the host). \
         Use while waiting for a background process or external change."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "durationMs": { "type": "integer", "description": "Milliseconds to wait" }
            },
            "required": ["durationMs"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let requested = match get_u64(args, "durationMs") {
                Ok(ms) => ms,
                Err(e) => return Envelope::error(e),
            };
            let max = ctx.limits.wait_max_ms;
            let effective = requested.min(max);
            let started = Instant::now();
            let canceled = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(effective)) => false,
                _ = ctx.cancel.cancelled() => true,
            };
            let waited = started.elapsed().as_millis() as u64;
            let mut env = if canceled {
                Envelope::error(format!("wait canceled after {waited}ms"))
            } else {
                Envelope::ok().with("message", format!("Waited {effective}ms"))
            };
            env = env.with("requestedMs", requested).with("waitedMs", waited);
            if effective < requested {
                env = env.with("clampedMs", effective);
            }
            env
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::scope::Roots;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(max: u64) -> ToolCtx {
        let mut ctx = ToolCtx::new(Roots::new(std::env::temp_dir()));
        ctx.limits = Arc::new(Limits {
            wait_max_ms: max,
            ..Limits::default()
        });
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn waits_requested_duration() {
        let res = WaitTool.execute(&ctx(30_000), &json!({ "durationMs": 250 })).await;
        assert!(res.ok);
        assert_eq!(res.get("requestedMs").unwrap(), 250);
        assert!(res.get("clampedMs").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clamps_to_maximum() {
        let res = WaitTool.execute(&ctx(100), &json!({ "durationMs": 5_000 })).await;
        assert!(res.ok);
        assert_eq!(res.get("clampedMs").unwrap(), 100);
        assert_eq!(res.get("requestedMs").unwrap(), 5_000);
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let ctx = ctx(60_000);
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let started = Instant::now();
        let res = WaitTool.execute(&ctx, &json!({ "durationMs": 60_000 })).await;
        assert!(!res.ok);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn invalid_duration_is_error() {
        let res = WaitTool.execute(&ctx(100), &json!({ "durationMs": "soon" })).await;
        assert!(!res.ok);
        let res = WaitTool.execute(&ctx(100), &json!({})).await;
        assert!(!res.ok);
    }
}
