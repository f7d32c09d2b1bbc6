//! Text search over one or both roots via the platform search tool.
//!
//! A file spec is a directory, a single file, or a glob. Globs are split into
//! a literal directory prefix and a relative pattern; matching files are
//! enumerated here and handed to the backend as root-relative targets.

pub mod backend;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::{GlobBuilder, GlobMatcher};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::exec::lookup;
use crate::exec::runner::{self, RunError, RunOptions};
use crate::exec::CommandSpec;
use crate::scope::{self, Intent, ResolveError, RootKind, Roots, Scope};

pub use backend::{CaseMode, FindstrBackend, GrepBackend, Invocation, SearchBackend};

pub const DEFAULT_MAX_FILES: usize = 5_000;

const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub pattern: String,
    /// Directory, file or glob, optionally `workspace:`/`additional:` prefixed.
    pub files: String,
    pub case: CaseMode,
    pub recursive: bool,
    pub line_numbers: bool,
    pub literal: bool,
    pub no_messages: bool,
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(pattern: impl Into<String>, files: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            files: files.into(),
            case: CaseMode::Smart,
            recursive: false,
            line_numbers: true,
            literal: false,
            no_messages: false,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub max_files: usize,
    pub max_output_bytes: usize,
    pub cancel: Option<CancellationToken>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_output_bytes: runner::DEFAULT_MAX_OUTPUT_BYTES,
            cancel: None,
        }
    }
}

/// Merged result. `returncode`: 0 matches, 1 no matches, other failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub timed_out: bool,
    pub truncated: bool,
    /// Matching files left out by the file cap.
    pub omitted_files: usize,
    /// Output bytes dropped by the output cap.
    pub omitted_bytes: usize,
    /// Labels of the roots that were searched, in output order.
    pub bases: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("pattern is empty")]
    EmptyPattern,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("file enumeration failed: {0}")]
    Walk(String),
}

/// Split a path into its longest metacharacter-free directory prefix and the
/// remaining glob. `None` when the path has no glob part.
pub fn split_glob(path: &str) -> (String, Option<String>) {
    let normalized = path.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();
    let Some(first_glob) = segments.iter().position(|s| s.contains(GLOB_META)) else {
        return (path.to_string(), None);
    };
    let prefix = segments[..first_glob].join("/");
    let prefix = match prefix.as_str() {
        "" if normalized.starts_with('/') => "/".to_string(),
        "" => ".".to_string(),
        _ => prefix,
    };
    (prefix, Some(segments[first_glob..].join("/")))
}

/// Whether a glob contains a `**` segment.
pub fn has_globstar(glob: &str) -> bool {
    glob.split('/').any(|s| s == "**")
}

/// One root to search: where to run and what to search under it.
#[derive(Debug, Clone)]
struct Plan {
    kind: RootKind,
    cwd: PathBuf,
    base: PathBuf,
}

struct Pattern {
    matcher: GlobMatcher,
    /// Match file names only (glob has no directory part and recursion is on).
    name_only: bool,
    depth: usize,
}

pub async fn search(
    roots: &Roots,
    req: &SearchRequest,
    backend: &dyn SearchBackend,
    limits: &SearchLimits,
) -> Result<SearchOutcome, SearchError> {
    if req.pattern.is_empty() {
        return Err(SearchError::EmptyPattern);
    }
    let spec = match req.files.trim() {
        "" => ".",
        s => s,
    };
    let scoped = scope::parse_scoped(spec);
    let path = if scoped.path.is_empty() { "." } else { scoped.path.as_str() };
    let (prefix, glob) = split_glob(path);
    let recursive = req.recursive || glob.as_deref().is_some_and(has_globstar);
    let pattern = match glob.as_deref() {
        Some(g) => Some(Pattern {
            matcher: GlobBuilder::new(g).literal_separator(true).build()?.compile_matcher(),
            name_only: recursive && !g.contains('/'),
            depth: g.split('/').count(),
        }),
        None => None,
    };

    let program = backend.program();
    if !lookup::is_installed(program) {
        return Ok(SearchOutcome {
            stderr: format!("{program} is not installed"),
            returncode: 127,
            ..SearchOutcome::default()
        });
    }

    let plans = plan(roots, scoped.scope, &prefix)?;
    let pattern = pattern.as_ref();
    let outcomes = match plans.as_slice() {
        [one] => vec![run_plan(one, req, backend, pattern, recursive, limits).await?],
        [first, second] => {
            let (a, b) = tokio::join!(
                run_plan(first, req, backend, pattern, recursive, limits),
                run_plan(second, req, backend, pattern, recursive, limits),
            );
            vec![a?, b?]
        }
        _ => Vec::new(),
    };

    let labels = labels(&plans);
    Ok(merge(labels.into_iter().zip(outcomes).collect()))
}

fn plan(roots: &Roots, scope: Option<Scope>, prefix: &str) -> Result<Vec<Plan>, SearchError> {
    if let (None, Some(additional)) = (scope, roots.additional.as_deref()) {
        if !Path::new(prefix).is_absolute() {
            let mut plans = Vec::new();
            for (kind, root) in [
                (RootKind::Workspace, roots.workspace.as_path()),
                (RootKind::Additional, additional),
            ] {
                let base = scope::normalize(&root.join(prefix));
                if !scope::is_contained(&base, root) {
                    return Err(ResolveError::Escapes {
                        path: prefix.to_string(),
                    }
                    .into());
                }
                if base.exists() {
                    plans.push(Plan {
                        kind,
                        cwd: root.to_path_buf(),
                        base,
                    });
                }
            }
            if plans.is_empty() {
                plans.push(Plan {
                    kind: RootKind::Workspace,
                    cwd: roots.workspace.clone(),
                    base: scope::normalize(&roots.workspace.join(prefix)),
                });
            }
            return Ok(plans);
        }
    }

    let input = match scope {
        Some(Scope::Workspace) => format!("workspace:{prefix}"),
        Some(Scope::Additional) => format!("additional:{prefix}"),
        None => prefix.to_string(),
    };
    let resolved = scope::resolve(roots, &input, Intent::Search)?;
    let cwd = match roots.root(resolved.root) {
        Some(root) => root.to_path_buf(),
        None if resolved.abs.is_dir() => resolved.abs.clone(),
        None => resolved
            .abs
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| resolved.abs.clone()),
    };
    Ok(vec![Plan {
        kind: resolved.root,
        cwd,
        base: resolved.abs,
    }])
}

async fn run_plan(
    plan: &Plan,
    req: &SearchRequest,
    backend: &dyn SearchBackend,
    pattern: Option<&Pattern>,
    recursive: bool,
    limits: &SearchLimits,
) -> Result<SearchOutcome, SearchError> {
    let (targets, omitted_files, recurse_dirs) = match pattern {
        Some(p) => {
            let depth = if recursive { None } else { Some(p.depth) };
            let (files, omitted) = enumerate_blocking(plan, Some(p), depth, limits.max_files).await?;
            (files, omitted, false)
        }
        None if plan.base.is_dir() && recursive && backend.recurses_directories() => {
            (vec![relative_to(&plan.base, &plan.cwd)], 0, true)
        }
        None if plan.base.is_dir() => {
            let depth = if recursive { None } else { Some(1) };
            let (files, omitted) = enumerate_blocking(plan, None, depth, limits.max_files).await?;
            (files, omitted, false)
        }
        None => (vec![relative_to(&plan.base, &plan.cwd)], 0, false),
    };
    let mut out = SearchOutcome {
        returncode: 1,
        truncated: omitted_files > 0,
        omitted_files,
        ..SearchOutcome::default()
    };
    if targets.is_empty() {
        return Ok(out);
    }

    let mut inv = Invocation {
        pattern: &req.pattern,
        targets: &[],
        insensitive: req.case.is_insensitive(&req.pattern),
        recursive: recurse_dirs,
        line_numbers: req.line_numbers,
        literal: req.literal,
        no_messages: req.no_messages,
    };
    let batches = match backend.max_command_chars() {
        Some(limit) => batch_targets(&targets, limit.saturating_sub(command_chars(&backend.argv(&inv)))),
        None => vec![targets.as_slice()],
    };
    tracing::debug!(
        root = plan.kind.as_str(),
        targets = targets.len(),
        batches = batches.len(),
        "running search"
    );

    let started = Instant::now();
    let mut codes = Vec::with_capacity(batches.len());
    for batch in batches {
        inv.targets = batch;
        let mut opts = RunOptions::new(&plan.cwd);
        opts.timeout = req.timeout.map(|t| t.saturating_sub(started.elapsed()));
        opts.max_output_bytes = limits.max_output_bytes.saturating_sub(out.stdout.len());
        opts.cancel = limits.cancel.clone();
        let result = runner::run_command(&CommandSpec::Argv(backend.argv(&inv)), &opts).await?;
        out.stdout.push_str(&result.stdout);
        out.stderr.push_str(&result.stderr);
        out.timed_out |= result.timed_out;
        out.omitted_bytes += result.omitted_bytes;
        codes.push(result.returncode);
        if result.timed_out || result.canceled {
            break;
        }
    }
    out.returncode = combine_codes(&codes);
    out.truncated = out.omitted_files > 0 || out.omitted_bytes > 0;
    Ok(out)
}

/// Length of an argv once joined into a quoted Windows command line.
fn command_chars(argv: &[String]) -> usize {
    argv.iter().map(|a| a.len() + 3).sum()
}

/// Split targets into runs whose quoted length fits in `budget`. A target
/// longer than the budget still gets a run of its own.
fn batch_targets(targets: &[String], budget: usize) -> Vec<&[String]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, t) in targets.iter().enumerate() {
        let len = t.len() + 3;
        if i > start && used + len > budget {
            batches.push(&targets[start..i]);
            start = i;
            used = 0;
        }
        used += len;
    }
    if start < targets.len() {
        batches.push(&targets[start..]);
    }
    batches
}

/// 0 if any run matched, 1 if none did, otherwise the first failure code.
fn combine_codes(codes: &[i32]) -> i32 {
    if codes.contains(&0) {
        0
    } else if codes.iter().all(|&c| c == 1) {
        1
    } else {
        codes.iter().copied().find(|&c| c != 0 && c != 1).unwrap_or(2)
    }
}

async fn enumerate_blocking(
    plan: &Plan,
    pattern: Option<&Pattern>,
    max_depth: Option<usize>,
    cap: usize,
) -> Result<(Vec<String>, usize), SearchError> {
    let base = plan.base.clone();
    let cwd = plan.cwd.clone();
    let glob = pattern.map(|p| (p.matcher.clone(), p.name_only));
    tokio::task::spawn_blocking(move || {
        enumerate(&base, &cwd, glob.as_ref().map(|(m, n)| (m, *n)), max_depth, cap)
    })
    .await
    .map_err(|e| SearchError::Walk(e.to_string()))
}

/// Regular files under `base` (symlinks skipped), as paths relative to `cwd`.
/// Returns at most `cap` paths and the number of matching files past the cap.
fn enumerate(
    base: &Path,
    cwd: &Path,
    glob: Option<(&GlobMatcher, bool)>,
    max_depth: Option<usize>,
    cap: usize,
) -> (Vec<String>, usize) {
    let mut walker = WalkDir::new(base)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let mut out = Vec::new();
    let mut omitted = 0;
    for entry in walker.into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some((matcher, name_only)) = glob {
            let subject = if name_only {
                Path::new(entry.file_name())
            } else {
                entry.path().strip_prefix(base).unwrap_or(entry.path())
            };
            if !matcher.is_match(subject) {
                continue;
            }
        }
        if out.len() >= cap {
            omitted += 1;
            continue;
        }
        out.push(relative_to(entry.path(), cwd));
    }
    (out, omitted)
}

fn relative_to(path: &Path, cwd: &Path) -> String {
    match path.strip_prefix(cwd) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

fn labels(plans: &[Plan]) -> Vec<String> {
    let names: Vec<String> = plans
        .iter()
        .map(|p| match p.kind {
            RootKind::External => "external".to_string(),
            _ => p
                .cwd
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.cwd.to_string_lossy().into_owned()),
        })
        .collect();
    let collide = names.len() == 2 && names[0] == names[1];
    names
        .into_iter()
        .zip(plans)
        .map(|(name, p)| {
            if collide {
                format!("{name} ({})", p.kind.as_str())
            } else {
                name
            }
        })
        .collect()
}

fn merge(parts: Vec<(String, SearchOutcome)>) -> SearchOutcome {
    if parts.len() == 1 {
        let Some((label, mut only)) = parts.into_iter().next() else {
            return SearchOutcome::default();
        };
        only.bases = vec![label];
        return only;
    }
    let mut merged = SearchOutcome::default();
    for (label, part) in &parts {
        append_section(&mut merged.stdout, label, &part.stdout);
        append_section(&mut merged.stderr, label, &part.stderr);
        merged.timed_out |= part.timed_out;
        merged.truncated |= part.truncated;
        merged.omitted_files += part.omitted_files;
        merged.omitted_bytes += part.omitted_bytes;
        merged.bases.push(label.clone());
    }
    let codes: Vec<i32> = parts.iter().map(|(_, p)| p.returncode).collect();
    merged.returncode = combine_codes(&codes);
    merged
}

fn append_section(out: &mut String, label: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    out.push_str(&format!("== {label} ==\n"));
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_glob_finds_literal_prefix() {
        assert_eq!(split_glob("src"), ("src".to_string(), None));
        assert_eq!(split_glob("*.rs"), (".".to_string(), Some("*.rs".to_string())));
        assert_eq!(
            split_glob("src/**/*.rs"),
            ("src".to_string(), Some("**/*.rs".to_string()))
        );
        assert_eq!(
            split_glob("a/b/c?.txt"),
            ("a/b".to_string(), Some("c?.txt".to_string()))
        );
        assert_eq!(
            split_glob("docs/{a,b}/x.md"),
            ("docs".to_string(), Some("{a,b}/x.md".to_string()))
        );
        assert_eq!(split_glob("/*.log"), ("/".to_string(), Some("*.log".to_string())));
    }

    #[test]
    fn globstar_detection() {
        assert!(has_globstar("**/*.rs"));
        assert!(has_globstar("a/**"));
        assert!(!has_globstar("*.rs"));
        assert!(!has_globstar("a**b"));
    }

    fn outcome(code: i32, stdout: &str) -> SearchOutcome {
        SearchOutcome {
            stdout: stdout.to_string(),
            returncode: code,
            ..SearchOutcome::default()
        }
    }

    #[test]
    fn merge_orders_and_labels() {
        let merged = merge(vec![
            ("ws".into(), outcome(0, "a.txt:1:hit\n")),
            ("extra".into(), outcome(0, "b.txt:2:hit")),
        ]);
        assert_eq!(merged.stdout, "== ws ==\na.txt:1:hit\n== extra ==\nb.txt:2:hit\n");
        assert_eq!(merged.returncode, 0);
        assert_eq!(merged.bases, ["ws", "extra"]);
    }

    #[test]
    fn merge_return_codes() {
        let m = merge(vec![("a".into(), outcome(1, "")), ("b".into(), outcome(0, "x"))]);
        assert_eq!(m.returncode, 0);
        let m = merge(vec![("a".into(), outcome(1, "")), ("b".into(), outcome(1, ""))]);
        assert_eq!(m.returncode, 1);
        let m = merge(vec![("a".into(), outcome(1, "")), ("b".into(), outcome(2, ""))]);
        assert_eq!(m.returncode, 2);
        let m = merge(vec![("a".into(), outcome(124, "")), ("b".into(), outcome(2, ""))]);
        assert_eq!(m.returncode, 124);
    }

    #[test]
    fn colliding_basenames_get_suffix() {
        let plans = vec![
            Plan {
                kind: RootKind::Workspace,
                cwd: PathBuf::from("/a/proj"),
                base: PathBuf::from("/a/proj"),
            },
            Plan {
                kind: RootKind::Additional,
                cwd: PathBuf::from("/b/proj"),
                base: PathBuf::from("/b/proj"),
            },
        ];
        assert_eq!(labels(&plans), ["proj (workspace)", "proj (additional)"]);
    }

    #[test]
    fn enumerate_respects_depth_glob_and_cap() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::write(root.join("src/a.rs"), "").unwrap();
        std::fs::write(root.join("src/b.txt"), "").unwrap();
        std::fs::write(root.join("src/nested/c.rs"), "").unwrap();

        let m = GlobBuilder::new("*.rs").literal_separator(true).build().unwrap().compile_matcher();
        let base = root.join("src");
        let (files, omitted) = enumerate(&base, root, Some((&m, false)), Some(1), 100);
        assert_eq!(files, [Path::new("src").join("a.rs").to_string_lossy().into_owned()]);
        assert_eq!(omitted, 0);

        let (files, _) = enumerate(&base, root, Some((&m, true)), None, 100);
        assert_eq!(files.len(), 2);

        let (files, omitted) = enumerate(&base, root, None, None, 2);
        assert_eq!(files.len(), 2);
        assert_eq!(omitted, 1);
    }

    #[test]
    fn merge_sums_omitted_counts() {
        let part = |files, bytes| SearchOutcome {
            returncode: 0,
            truncated: true,
            omitted_files: files,
            omitted_bytes: bytes,
            ..SearchOutcome::default()
        };
        let m = merge(vec![("a".into(), part(3, 0)), ("b".into(), part(0, 10))]);
        assert!(m.truncated);
        assert_eq!(m.omitted_files, 3);
        assert_eq!(m.omitted_bytes, 10);
    }

    #[test]
    fn targets_are_batched_under_the_budget() {
        let targets: Vec<String> = (0..5_000).map(|i| format!("src\\deep\\file_{i:05}.rs")).collect();
        let budget = 32_000 - 64;
        let batches = batch_targets(&targets, budget);
        assert!(batches.len() > 1);
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), targets.len());
        for b in &batches {
            assert!(b.iter().map(|t| t.len() + 3).sum::<usize>() <= budget);
        }
        assert_eq!(batches[0][0], targets[0]);
        assert_eq!(batches.last().unwrap().last(), targets.last());

        let one = vec!["x".repeat(100)];
        assert_eq!(batch_targets(&one, 10), vec![&one[..]]);
        assert_eq!(batch_targets(&targets[..3], usize::MAX).len(), 1);
    }

    #[test]
    fn batch_codes_combine() {
        assert_eq!(combine_codes(&[1, 0, 1]), 0);
        assert_eq!(combine_codes(&[1, 1]), 1);
        assert_eq!(combine_codes(&[1, 2]), 2);
    }
}
