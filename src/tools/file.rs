//! create_file, create_diff, read_file, get_file_size: scope-resolved, clamped.

use std::io::Read;
use std::path::Path;

use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::clamp::clamp_text;
use crate::scope::{self, Intent, ResolvedPath};
use crate::tools::args::{get_bool, get_string};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

const PATH_HELP: &str = "Path relative to a root, optionally prefixed with 'workspace:' or 'additional:'";

fn resolve(ctx: &ToolCtx, path: &str, intent: Intent) -> Result<ResolvedPath, Envelope> {
    scope::resolve(&ctx.roots, path, intent).map_err(|e| {
        if e.is_scope_violation() {
            tracing::warn!(path, error = %e, "path rejected");
        }
        Envelope::error(e.to_string())
    })
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// create_file tool: never overwrites.
pub struct CreateFile;

impl Tool for CreateFile {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Fails if the file already exists; \
         parent directories are created as needed. Use create_diff to change existing files."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": PATH_HELP },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["filePath", "content"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let path = match get_string(args, "filePath") {
                Ok(p) => p,
                Err(e) => return Envelope::error(e),
            };
            let content = match get_string(args, "content") {
                Ok(c) => c,
                Err(e) => return Envelope::error(e),
            };
            let resolved = match resolve(ctx, &path, Intent::Write) {
                Ok(r) => r,
                Err(env) => return env,
            };
            let abs = &resolved.abs;
            if let Some(parent) = abs.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Envelope::error(format!("failed to create directories: {e}"));
                }
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(abs)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Envelope::error(format!(
                        "file already exists: {}; use create_diff to modify it",
                        abs.display()
                    ));
                }
                Err(e) => return Envelope::error(format!("failed to create file: {e}")),
            };
            if let Err(e) = file.write_all(content.as_bytes()).await {
                return Envelope::error(format!("failed to write file: {e}"));
            }
            if let Err(e) = file.flush().await {
                return Envelope::error(format!("failed to write file: {e}"));
            }
            tracing::debug!(path = %abs.display(), bytes = content.len(), "file created");
            Envelope::ok()
                .with("message", format!("Created {}", abs.display()))
                .with("path", path_str(abs))
                .with("root", resolved.root.as_str())
                .with_clamped("content", clamp_text(&content, ctx.limits.preview_clamp_chars))
        })
    }
}

/// create_diff tool: exact-text replacement in an existing file.
pub struct CreateDiff;

impl Tool for CreateDiff {
    fn name(&self) -> &str {
        "create_diff"
    }

    fn description(&self) -> &str {
        "Edit an existing file by replacing oldText with newText. oldText must match exactly. \
         Replaces every occurrence unless replaceAll is false."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": PATH_HELP },
                "oldText": { "type": "string", "description": "Exact text to find" },
                "newText": { "type": "string", "description": "Replacement text" },
                "replaceAll": { "type": "boolean", "description": "Replace every occurrence (default true)" }
            },
            "required": ["filePath", "oldText", "newText"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let path = match get_string(args, "filePath") {
                Ok(p) => p,
                Err(e) => return Envelope::error(e),
            };
            let old_text = match get_string(args, "oldText") {
                Ok(t) => t,
                Err(e) => return Envelope::error(e),
            };
            let new_text = match get_string(args, "newText") {
                Ok(t) => t,
                Err(e) => return Envelope::error(e),
            };
            let replace_all = get_bool(args, "replaceAll", true);
            if old_text.is_empty() {
                return Envelope::error("oldText must not be empty");
            }
            let resolved = match resolve(ctx, &path, Intent::Read) {
                Ok(r) => r,
                Err(env) => return env,
            };
            let abs = &resolved.abs;
            if abs.is_dir() {
                return Envelope::error(format!("{} is a directory", abs.display()));
            }
            let content = match tokio::fs::read(abs).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(_) => return Envelope::error("file is not valid UTF-8; refusing to edit"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Envelope::error(format!("file not found: {}", abs.display()));
                }
                Err(e) => return Envelope::error(format!("failed to read file: {e}")),
            };

            let occurrences = content.matches(old_text.as_str()).count();
            if occurrences == 0 {
                return Envelope::error(format!("oldText not found in {}", abs.display()));
            }
            let half = ctx.limits.preview_clamp_chars / 2;
            let old_preview = clamp_text(&old_text, half);
            let new_preview = clamp_text(&new_text, half);
            let preview_truncated = old_preview.truncated || new_preview.truncated;
            let preview = serde_json::json!({
                "oldText": old_preview.text,
                "newText": new_preview.text,
                "truncated": preview_truncated,
                "omittedChars": old_preview.omitted_chars + new_preview.omitted_chars,
            });

            if old_text == new_text {
                return Envelope::ok()
                    .with("madeChanges", false)
                    .with("message", "oldText and newText are identical; nothing to change")
                    .with("path", path_str(abs))
                    .with("replacements", 0)
                    .with("truncated", preview_truncated)
                    .with("preview", preview);
            }

            let (updated, replacements) = if replace_all {
                (content.replace(&old_text, &new_text), occurrences)
            } else {
                (content.replacen(&old_text, &new_text, 1), 1)
            };
            if let Err(e) = tokio::fs::write(abs, updated).await {
                return Envelope::error(format!("failed to write file: {e}"));
            }
            Envelope::ok()
                .with("madeChanges", true)
                .with(
                    "message",
                    format!("Replaced {replacements} occurrence(s) in {}", abs.display()),
                )
                .with("path", path_str(abs))
                .with("replacements", replacements)
                .with("truncated", preview_truncated)
                .with("preview", preview)
        })
    }
}

/// read_file tool.
pub struct ReadFile;

impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Large files are truncated; the response says how much was cut."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": PATH_HELP }
            },
            "required": ["filePath"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let path = match get_string(args, "filePath") {
                Ok(p) => p,
                Err(e) => return Envelope::error(e),
            };
            let resolved = match resolve(ctx, &path, Intent::Read) {
                Ok(r) => r,
                Err(env) => return env,
            };
            let abs = &resolved.abs;
            let meta = match tokio::fs::metadata(abs).await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Envelope::error(format!("file not found: {}", abs.display()));
                }
                Err(e) => return Envelope::error(e.to_string()),
            };
            if meta.is_dir() {
                return Envelope::error(format!("{} is a directory", abs.display()));
            }
            if meta.len() > ctx.limits.max_read_bytes {
                return Envelope::error(format!(
                    "file is too large to read ({} bytes; limit {})",
                    meta.len(),
                    ctx.limits.max_read_bytes
                ));
            }
            let bytes = match tokio::fs::read(abs).await {
                Ok(b) => b,
                Err(e) => return Envelope::error(e.to_string()),
            };
            let (text, encoding) = match String::from_utf8(bytes) {
                Ok(s) => (s, "utf-8"),
                Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), "utf-8 (lossy)"),
            };
            let clamped = clamp_text(&text, ctx.limits.read_clamp_chars);
            let original_length = clamped.original_length;
            Envelope::ok()
                .with("path", path_str(abs))
                .with("root", resolved.root.as_str())
                .with("encoding", encoding)
                .with("originalLength", original_length)
                .with_clamped("content", clamped)
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FileCounts {
    lines: u64,
    words: u64,
    bytes: u64,
    utf8: bool,
}

/// Stream a file once, counting lines, whitespace-separated words and bytes,
/// and checking UTF-8 validity across chunk boundaries.
fn count_file(path: &Path) -> std::io::Result<FileCounts> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut counts = FileCounts {
        utf8: true,
        ..FileCounts::default()
    };
    let mut in_word = false;
    let mut last = None;
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        counts.bytes += n as u64;
        for &b in chunk {
            if b == b'\n' {
                counts.lines += 1;
            }
            if b.is_ascii_whitespace() {
                in_word = false;
            } else if !in_word {
                in_word = true;
                counts.words += 1;
            }
        }
        last = chunk.last().copied();
        if counts.utf8 {
            pending.extend_from_slice(chunk);
            match std::str::from_utf8(&pending) {
                Ok(_) => pending.clear(),
                // Incomplete sequence at the end: keep it for the next chunk.
                Err(e) if e.error_len().is_none() => {
                    pending.drain(..e.valid_up_to());
                }
                Err(_) => {
                    counts.utf8 = false;
                    pending.clear();
                }
            }
        }
    }
    if !pending.is_empty() {
        counts.utf8 = false;
    }
    if last.is_some_and(|b| b != b'\n') {
        counts.lines += 1;
    }
    Ok(counts)
}

/// get_file_size tool.
pub struct GetFileSize;

impl Tool for GetFileSize {
    fn name(&self) -> &str {
        "get_file_size"
    }

    fn description(&self) -> &str {
        "Report line, word and byte counts of a file without returning its content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": PATH_HELP }
            },
            "required": ["filePath"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let path = match get_string(args, "filePath") {
                Ok(p) => p,
                Err(e) => return Envelope::error(e),
            };
            let resolved = match resolve(ctx, &path, Intent::Read) {
                Ok(r) => r,
                Err(env) => return env,
            };
            let abs = resolved.abs.clone();
            if abs.is_dir() {
                return Envelope::error(format!("{} is a directory", abs.display()));
            }
            let counted = {
                let abs = abs.clone();
                tokio::task::spawn_blocking(move || count_file(&abs)).await
            };
            let counts = match counted {
                Ok(Ok(c)) => c,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Envelope::error(format!("file not found: {}", abs.display()));
                }
                Ok(Err(e)) => return Envelope::error(e.to_string()),
                Err(e) => return Envelope::error(format!("count task error: {e}")),
            };
            Envelope::ok()
                .with("path", path_str(&abs))
                .with("lineCount", counts.lines)
                .with("wordCount", counts.words)
                .with("byteCount", counts.bytes)
                .with("encoding", if counts.utf8 { "utf-8" } else { "non-utf-8" })
        })
    }
}
