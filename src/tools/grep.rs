//! `grep_search` tool: pattern search over one or both roots with bounded output.

use std::time::Duration;

use serde_json::Value;

use crate::clamp::clamp_text;
use crate::search::{self, CaseMode, SearchBackend, SearchLimits, SearchRequest, backend};
use crate::tools::args::{get_bool, get_optional_string, get_optional_u64, get_string};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

pub struct GrepSearchTool {
    backend: &'static dyn SearchBackend,
}

impl GrepSearchTool {
    pub fn new(backend: &'static dyn SearchBackend) -> Self {
        Self { backend }
    }
}

impl Default for GrepSearchTool {
    fn default() -> Self {
        Self::new(backend::for_host())
    }
}

impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents for a pattern (extended regex unless literal). \
         'files' is a directory, file or glob such as 'src/**/*.rs'; prefix with \
         'workspace:' or 'additional:' to pick a root, otherwise both roots are searched. \
         Case is smart by default: insensitive unless the pattern has an uppercase letter."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Pattern to search for" },
                "files": { "type": "string", "description": "Directory, file or glob (default '.')" },
                "caseInsensitive": { "type": "boolean", "description": "Force case-insensitive matching" },
                "matchCase": { "type": "boolean", "description": "Force case-sensitive matching" },
                "recursive": { "type": "boolean", "description": "Descend into subdirectories (implied by '**')" },
                "lineNumbers": { "type": "boolean", "description": "Prefix matches with line numbers (default true)" },
                "literal": { "type": "boolean", "description": "Treat pattern as a fixed string" },
                "noMessages": { "type": "boolean", "description": "Suppress errors about unreadable files" },
                "timeout": { "type": "integer", "description": "Timeout in milliseconds" }
            },
            "required": ["pattern"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let pattern = match get_string(args, "pattern") {
                Ok(p) if !p.is_empty() => p,
                Ok(_) => return Envelope::error("pattern is empty"),
                Err(e) => return Envelope::error(e),
            };
            let timeout_ms = match get_optional_u64(args, "timeout") {
                Ok(t) => t
                    .unwrap_or(ctx.limits.search_timeout_ms)
                    .min(ctx.limits.search_timeout_ms.max(1)),
                Err(e) => return Envelope::error(e),
            };
            let req = SearchRequest {
                pattern,
                files: get_optional_string(args, "files").unwrap_or_else(|| ".".into()),
                case: CaseMode::from_flags(
                    get_bool(args, "matchCase", false),
                    get_bool(args, "caseInsensitive", false),
                ),
                recursive: get_bool(args, "recursive", false),
                line_numbers: get_bool(args, "lineNumbers", true),
                literal: get_bool(args, "literal", false),
                no_messages: get_bool(args, "noMessages", false),
                timeout: Some(Duration::from_millis(timeout_ms)),
            };
            let limits = SearchLimits {
                max_files: ctx.limits.max_search_files,
                max_output_bytes: ctx.limits.output_cap_bytes,
                cancel: Some(ctx.cancel.clone()),
            };

            let outcome = match search::search(&ctx.roots, &req, self.backend, &limits).await {
                Ok(o) => o,
                Err(e) => return Envelope::error(e.to_string()),
            };

            let stdout = clamp_text(&outcome.stdout, ctx.limits.read_clamp_chars);
            let stderr = clamp_text(&outcome.stderr, ctx.limits.stderr_clamp_chars);
            let truncated = outcome.truncated || stdout.truncated || stderr.truncated;
            let omitted = stdout.omitted_chars + stderr.omitted_chars;
            let error_line = outcome.stderr.lines().find(|l| !l.trim().is_empty());
            let error_line = error_line.map(|l| clamp_text(l.trim(), ctx.limits.stderr_clamp_chars).text);

            let envelope = match outcome.returncode {
                0 => Envelope::ok(),
                _ if outcome.timed_out => {
                    Envelope::error(format!("Search timed out after {timeout_ms}ms"))
                }
                1 => Envelope::error("No matches found"),
                code => Envelope::error(
                    error_line.unwrap_or_else(|| format!("search failed with exit code {code}")),
                ),
            };
            envelope
                .with("stdout", stdout.text)
                .with("stderr", stderr.text)
                .with("returncode", outcome.returncode)
                .with("timedOut", outcome.timed_out)
                .with("truncated", truncated)
                .with("omittedChars", omitted)
                .with("omittedBytes", outcome.omitted_bytes)
                .with("omittedFiles", outcome.omitted_files)
                .with("bases", outcome.bases)
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::scope::Roots;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn finds_match_with_line_numbers() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha\nneedle here\n").unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let res = GrepSearchTool::default()
            .execute(&ctx, &json!({ "pattern": "needle", "files": "a.txt" }))
            .await;
        assert!(res.ok, "{:?}", res.error);
        assert_eq!(res.get("stdout").unwrap(), "a.txt:2:needle here\n");
        assert_eq!(res.get("returncode").unwrap(), 0);
    }

    #[tokio::test]
    async fn absent_pattern_is_no_matches() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha\n").unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let res = GrepSearchTool::default()
            .execute(&ctx, &json!({ "pattern": "zzz_absent", "files": ".", "recursive": true }))
            .await;
        assert!(!res.ok);
        assert_eq!(res.error.as_deref(), Some("No matches found"));
        assert_eq!(res.get("returncode").unwrap(), 1);
    }

    #[tokio::test]
    async fn file_cap_reports_omitted_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("many")).unwrap();
        for i in 0..5 {
            std::fs::write(tmp.path().join(format!("many/f{i}.txt")), "x\n").unwrap();
        }
        let mut ctx = ToolCtx::new(Roots::new(tmp.path()));
        ctx.limits = std::sync::Arc::new(crate::config::Limits {
            max_search_files: 2,
            ..crate::config::Limits::default()
        });
        let res = GrepSearchTool::default()
            .execute(&ctx, &json!({ "pattern": "x", "files": "many/*.txt" }))
            .await;
        assert!(res.ok, "{:?}", res.error);
        assert_eq!(res.get("truncated").unwrap(), true);
        assert_eq!(res.get("omittedFiles").unwrap(), 3);
        assert_eq!(res.get("omittedBytes").unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let res = GrepSearchTool::default().execute(&ctx, &json!({ "files": "." })).await;
        assert_eq!(res.error.as_deref(), Some("missing or invalid 'pattern'"));
    }

    #[tokio::test]
    async fn smart_case_and_match_case() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "Hello\n").unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let res = GrepSearchTool::default()
            .execute(&ctx, &json!({ "pattern": "hello", "files": "a.txt" }))
            .await;
        assert!(res.ok);
        let res = GrepSearchTool::default()
            .execute(&ctx, &json!({ "pattern": "hello", "files": "a.txt", "matchCase": true }))
            .await;
        assert!(!res.ok);
    }
}
