//! Multi-root search through the host backend.
#![cfg(unix)]

use agentgate::search::{
    self, GrepBackend, Invocation, SearchBackend, SearchError, SearchLimits, SearchRequest,
};
use agentgate::scope::Roots;

mod common;
use common::TestWorkspace;

fn request(pattern: &str, files: &str) -> SearchRequest {
    SearchRequest::new(pattern, files)
}

#[tokio::test]
async fn test_two_roots_merge_with_headers() {
    let ws = TestWorkspace::with_additional();
    ws.write("src/a.rs", "let needle = 1;\n");
    ws.write_additional("src/b.rs", "needle again\n");

    let mut req = request("needle", "src");
    req.recursive = true;
    let out = search::search(&ws.roots(), &req, &GrepBackend, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 0);
    assert_eq!(out.bases, vec!["project".to_string(), "shared".to_string()]);
    let project = out.stdout.find("== project ==").expect("workspace header");
    let shared = out.stdout.find("== shared ==").expect("additional header");
    assert!(project < shared);
    assert!(out.stdout.contains("src/a.rs:1:let needle = 1;"));
    assert!(out.stdout.contains("src/b.rs:1:needle again"));
}

#[tokio::test]
async fn test_match_in_one_root_only_is_success() {
    let ws = TestWorkspace::with_additional();
    ws.write("notes.txt", "nothing here\n");
    ws.write_additional("notes.txt", "found it\n");

    let out = search::search(
        &ws.roots(),
        &request("found", "notes.txt"),
        &GrepBackend,
        &SearchLimits::default(),
    )
    .await
    .unwrap();
    assert_eq!(out.returncode, 0);
    assert!(out.stdout.contains("found it"));
    assert!(!out.stdout.contains("nothing here"));
}

#[tokio::test]
async fn test_missing_in_one_root_searches_the_other() {
    let ws = TestWorkspace::with_additional();
    ws.write_additional("lib/only_here.txt", "shared needle\n");

    let mut req = request("needle", "lib");
    req.recursive = true;
    let out = search::search(&ws.roots(), &req, &GrepBackend, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 0);
    assert_eq!(out.bases, vec!["shared".to_string()]);
    assert!(!out.stdout.contains("=="));
}

#[tokio::test]
async fn test_same_basename_roots_get_kind_suffix() {
    let tmp = tempfile::TempDir::new().unwrap();
    let ws = tmp.path().join("a").join("repo");
    let add = tmp.path().join("b").join("repo");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::create_dir_all(&add).unwrap();
    std::fs::write(ws.join("x.txt"), "hit\n").unwrap();
    std::fs::write(add.join("x.txt"), "hit\n").unwrap();

    let roots = Roots::new(&ws).with_additional(&add);
    let out = search::search(&roots, &request("hit", "x.txt"), &GrepBackend, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(
        out.bases,
        vec!["repo (workspace)".to_string(), "repo (additional)".to_string()]
    );
    assert!(out.stdout.contains("== repo (workspace) =="));
}

#[tokio::test]
async fn test_globstar_recurses_and_filters() {
    let ws = TestWorkspace::new();
    ws.write("src/deep/nested/m.rs", "fn target() {}\n");
    ws.write("src/deep/nested/m.txt", "fn target() {}\n");
    ws.write("src/top.rs", "fn target() {}\n");

    let out = search::search(
        &ws.roots(),
        &request("target", "src/**/*.rs"),
        &GrepBackend,
        &SearchLimits::default(),
    )
    .await
    .unwrap();
    assert_eq!(out.returncode, 0);
    assert!(out.stdout.contains("src/deep/nested/m.rs"));
    assert!(out.stdout.contains("src/top.rs"));
    assert!(!out.stdout.contains("m.txt"));
}

#[tokio::test]
async fn test_file_cap_marks_truncated() {
    let ws = TestWorkspace::new();
    for i in 0..5 {
        ws.write(&format!("many/f{i}.txt"), "x\n");
    }
    let limits = SearchLimits {
        max_files: 2,
        ..SearchLimits::default()
    };
    let out = search::search(&ws.roots(), &request("x", "many/*.txt"), &GrepBackend, &limits)
        .await
        .unwrap();
    assert!(out.truncated);
    assert_eq!(out.omitted_files, 3);
    assert_eq!(out.stdout.lines().count(), 2);
}

#[tokio::test]
async fn test_output_cap_counts_dropped_bytes() {
    let ws = TestWorkspace::new();
    ws.write("big.txt", &"needle line\n".repeat(1_000));
    let limits = SearchLimits {
        max_output_bytes: 100,
        ..SearchLimits::default()
    };
    let out = search::search(&ws.roots(), &request("needle", "big.txt"), &GrepBackend, &limits)
        .await
        .unwrap();
    assert_eq!(out.returncode, 0);
    assert!(out.truncated);
    assert_eq!(out.stdout.len(), 100);
    assert!(out.omitted_bytes > 0);
    assert_eq!(out.omitted_files, 0);
}

/// grep with a tiny command-line limit, so targets are split across runs.
struct ShortLineGrep;

impl SearchBackend for ShortLineGrep {
    fn program(&self) -> &'static str {
        "grep"
    }

    fn recurses_directories(&self) -> bool {
        false
    }

    fn max_command_chars(&self) -> Option<usize> {
        Some(120)
    }

    fn argv(&self, inv: &Invocation<'_>) -> Vec<String> {
        GrepBackend.argv(inv)
    }
}

#[tokio::test]
async fn test_long_target_lists_run_in_batches() {
    let ws = TestWorkspace::new();
    for i in 0..40 {
        let body = if i % 10 == 3 { "hit\n" } else { "miss\n" };
        ws.write(&format!("batch/file_{i:02}.txt"), body);
    }
    let mut req = request("hit", "batch");
    req.recursive = true;
    let out = search::search(&ws.roots(), &req, &ShortLineGrep, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 0, "stderr: {}", out.stderr);
    assert!(!out.truncated);
    let hits: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(hits.len(), 4);
    assert!(hits[0].contains("file_03.txt"));
    assert!(hits[3].contains("file_33.txt"));
}

#[tokio::test]
async fn test_batched_search_without_matches_is_one() {
    let ws = TestWorkspace::new();
    for i in 0..30 {
        ws.write(&format!("batch/file_{i:02}.txt"), "miss\n");
    }
    let mut req = request("hit", "batch");
    req.recursive = true;
    let out = search::search(&ws.roots(), &req, &ShortLineGrep, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 1);
}

struct UninstalledTool;

impl SearchBackend for UninstalledTool {
    fn program(&self) -> &'static str {
        "agentgate-no-such-search-tool"
    }

    fn recurses_directories(&self) -> bool {
        true
    }

    fn argv(&self, inv: &Invocation<'_>) -> Vec<String> {
        let mut argv = vec![self.program().to_string(), inv.pattern.to_string()];
        argv.extend(inv.targets.iter().cloned());
        argv
    }
}

#[tokio::test]
async fn test_missing_search_tool_is_127() {
    let ws = TestWorkspace::new();
    ws.write("a.txt", "x\n");
    let out = search::search(&ws.roots(), &request("x", "a.txt"), &UninstalledTool, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 127);
    assert!(out.stderr.contains("is not installed"));
}

#[tokio::test]
async fn test_no_match_in_either_root_is_one() {
    let ws = TestWorkspace::with_additional();
    ws.write("a.txt", "alpha\n");
    ws.write_additional("a.txt", "beta\n");
    let out = search::search(&ws.roots(), &request("gamma", "a.txt"), &GrepBackend, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(out.returncode, 1);
    assert!(out.stdout.is_empty());
}

#[tokio::test]
async fn test_escaping_target_is_rejected() {
    let ws = TestWorkspace::with_additional();
    let err = search::search(&ws.roots(), &request("x", "../../etc"), &GrepBackend, &SearchLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(&err, SearchError::Resolve(e) if e.is_scope_violation()));
}

#[tokio::test]
async fn test_empty_pattern_is_rejected() {
    let ws = TestWorkspace::new();
    let err = search::search(&ws.roots(), &request("", "."), &GrepBackend, &SearchLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::EmptyPattern));
}
