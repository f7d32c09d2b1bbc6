//! Path scope resolver: map agent-supplied paths (optionally prefixed with
//! `workspace:` / `additional:`) onto a permitted root and enforce containment.
//!
//! Containment is checked lexically and then on the real path, so a symlink
//! inside a root that points outside of it counts as an escape. Nothing here
//! is cached; roots may change between calls.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Bound on symlink hops followed while computing a real path.
const MAX_LINK_HOPS: usize = 40;

/// The directories a session may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub workspace: PathBuf,
    pub additional: Option<PathBuf>,
    /// Accept absolute paths outside both roots.
    pub allow_external: bool,
}

impl Roots {
    /// Roots with only a workspace. Relative roots are made absolute against the cwd.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: absolutize(workspace.into()),
            additional: None,
            allow_external: false,
        }
    }

    pub fn with_additional(mut self, root: impl Into<PathBuf>) -> Self {
        self.additional = Some(absolutize(root.into()));
        self
    }

    pub fn with_allow_external(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }

    /// Root directory for a kind. External has no root.
    pub fn root(&self, kind: RootKind) -> Option<&Path> {
        match kind {
            RootKind::Workspace => Some(&self.workspace),
            RootKind::Additional => self.additional.as_deref(),
            RootKind::External => None,
        }
    }
}

fn absolutize(p: PathBuf) -> PathBuf {
    if p.is_absolute() {
        p
    } else {
        std::path::absolute(&p).unwrap_or(p)
    }
}

/// Explicit scope tag on a path string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Workspace,
    Additional,
}

/// Parsed form of a caller-supplied path, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPath {
    pub scope: Option<Scope>,
    pub path: String,
}

/// What the caller is about to do with the path; drives auto resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
    Search,
}

/// Which root a path was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Workspace,
    Additional,
    External,
}

impl RootKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RootKind::Workspace => "workspace",
            RootKind::Additional => "additional",
            RootKind::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub abs: PathBuf,
    pub root: RootKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("path is empty")]
    Empty,
    #[error("path '{path}' escapes allowed directories")]
    Escapes { path: String },
    #[error("'additional:' scope used but no additional root is configured")]
    NoAdditionalRoot,
}

impl ResolveError {
    /// Scope violations are reported apart from plain validation errors.
    #[inline]
    pub fn is_scope_violation(&self) -> bool {
        matches!(self, ResolveError::Escapes { .. })
    }
}

/// Split an optional `workspace:` / `additional:` prefix off a trimmed path.
pub fn parse_scoped(input: &str) -> ScopedPath {
    let input = input.trim();
    for (prefix, scope) in [
        ("workspace:", Scope::Workspace),
        ("additional:", Scope::Additional),
    ] {
        if let Some(rest) = input.strip_prefix(prefix) {
            return ScopedPath {
                scope: Some(scope),
                path: rest.trim().to_string(),
            };
        }
    }
    ScopedPath {
        scope: None,
        path: input.to_string(),
    }
}

/// Resolve `input` for `intent` against `roots`.
pub fn resolve(roots: &Roots, input: &str, intent: Intent) -> Result<ResolvedPath, ResolveError> {
    let scoped = parse_scoped(input);
    if scoped.path.is_empty() && scoped.scope.is_none() {
        return Err(ResolveError::Empty);
    }
    // A bare scope tag names the root itself.
    let rel = if scoped.path.is_empty() {
        "."
    } else {
        scoped.path.as_str()
    };
    let raw = Path::new(rel);
    let display = input.trim();

    let (root, kind) = match scoped.scope {
        Some(Scope::Workspace) => (roots.workspace.as_path(), RootKind::Workspace),
        Some(Scope::Additional) => (
            roots
                .additional
                .as_deref()
                .ok_or(ResolveError::NoAdditionalRoot)?,
            RootKind::Additional,
        ),
        None if raw.is_absolute() => return classify_absolute(roots, &normalize(raw), display),
        None => auto_root(roots, raw, intent),
    };

    let abs = if raw.is_absolute() {
        normalize(raw)
    } else {
        normalize(&root.join(raw))
    };
    if is_contained(&abs, root) {
        Ok(ResolvedPath { abs, root: kind })
    } else if roots.allow_external {
        Ok(ResolvedPath {
            abs,
            root: RootKind::External,
        })
    } else {
        Err(ResolveError::Escapes {
            path: display.to_string(),
        })
    }
}

fn classify_absolute(
    roots: &Roots,
    abs: &Path,
    display: &str,
) -> Result<ResolvedPath, ResolveError> {
    let root = if is_contained(abs, &roots.workspace) {
        RootKind::Workspace
    } else if roots
        .additional
        .as_deref()
        .is_some_and(|a| is_contained(abs, a))
    {
        RootKind::Additional
    } else if roots.allow_external {
        RootKind::External
    } else {
        return Err(ResolveError::Escapes {
            path: display.to_string(),
        });
    };
    Ok(ResolvedPath {
        abs: abs.to_path_buf(),
        root,
    })
}

/// Pick a root for an unscoped relative path.
///
/// Read/search: where it exists, workspace first. Write: where it exists,
/// then where its parent exists. Workspace otherwise.
fn auto_root<'a>(roots: &'a Roots, rel: &Path, intent: Intent) -> (&'a Path, RootKind) {
    let ws = roots.workspace.as_path();
    let Some(add) = roots.additional.as_deref() else {
        return (ws, RootKind::Workspace);
    };
    let in_ws = normalize(&ws.join(rel));
    let in_add = normalize(&add.join(rel));
    if in_ws.exists() {
        return (ws, RootKind::Workspace);
    }
    if in_add.exists() {
        return (add, RootKind::Additional);
    }
    if intent == Intent::Write {
        if parent_exists(&in_ws) {
            return (ws, RootKind::Workspace);
        }
        if parent_exists(&in_add) {
            return (add, RootKind::Additional);
        }
    }
    (ws, RootKind::Workspace)
}

fn parent_exists(p: &Path) -> bool {
    p.parent().is_some_and(Path::is_dir)
}

/// Lexical normalisation: drop `.`, fold `..`. Never climbs above the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(p) => out.push(p),
        }
    }
    out
}

/// True when `path` equals `root` or lies below it, both lexically and after
/// following symlinks.
pub fn is_contained(path: &Path, root: &Path) -> bool {
    let root_lex = normalize(root);
    if !normalize(path).starts_with(&root_lex) {
        return false;
    }
    real_path(path).starts_with(real_path(&root_lex))
}

/// Real location of a possibly non-existent path: canonicalise the longest
/// existing ancestor, follow a dangling final link, re-append the rest.
pub fn real_path(path: &Path) -> PathBuf {
    let mut current = normalize(path);
    let mut rest: Vec<OsString> = Vec::new();
    let mut hops = 0;
    loop {
        if let Ok(canon) = std::fs::canonicalize(&current) {
            let mut out = canon;
            for name in rest.iter().rev() {
                out.push(name);
            }
            return out;
        }
        // Dangling symlink: continue from its target.
        if hops < MAX_LINK_HOPS {
            if let Ok(target) = std::fs::read_link(&current) {
                hops += 1;
                let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
                current = normalize(&base.join(target));
                continue;
            }
        }
        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                current = parent.to_path_buf();
            }
            _ => {
                let mut out = current;
                for name in rest.iter().rev() {
                    out.push(name);
                }
                return out;
            }
        }
    }
}
