//! Secured process runner: policy check, sanitised environment, bounded
//! capture, timeout and cancellation with process-tree teardown.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::kill::{Signal, kill_tree};
use super::lookup::{LookupError, resolve_executable};
use super::policy::{self, CommandDescriptor, CommandSpec, EnvPolicy};

/// Per-stream capture cap used when callers do not pick one.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 5 * 1024 * 1024;

/// How long pipes may keep draining after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);
/// Time between SIGTERM and SIGKILL on timeout or cancel.
const TERM_GRACE: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
    /// Caller asked for the command to be run through a shell.
    pub shell: bool,
    pub allow_unsafe: bool,
    pub inherit_env: bool,
    /// Extra variables merged over the sanitised parent environment.
    pub env: Vec<(String, String)>,
    /// Variable names kept even when they look sensitive.
    pub allow_env: Vec<String>,
    pub max_output_bytes: usize,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeout: None,
            shell: false,
            allow_unsafe: false,
            inherit_env: false,
            env: Vec::new(),
            allow_env: Vec::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_unsafe(mut self, shell: bool, allow_unsafe: bool) -> Self {
        self.shell = shell;
        self.allow_unsafe = allow_unsafe;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub success: bool,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    pub truncated: bool,
    /// Bytes dropped by the output cap, stdout and stderr together.
    pub omitted_bytes: usize,
    pub canceled: bool,
    pub blocked: bool,
}

impl CommandResult {
    fn failed(returncode: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            returncode,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Default)]
struct Capture {
    buf: Vec<u8>,
    omitted: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Canceled,
}

/// Run `spec` under the command policy. Expected failures (blocked, missing
/// executable, timeout, cancel) come back as a [`CommandResult`].
pub async fn run_command(spec: &CommandSpec, opts: &RunOptions) -> Result<CommandResult, RunError> {
    let is_empty = match spec {
        CommandSpec::Argv(argv) => argv.first().is_none_or(|p| p.trim().is_empty()),
        CommandSpec::Shell(raw) => raw.trim().is_empty(),
    };
    let desc = CommandDescriptor::new(spec, opts.shell);
    if is_empty {
        audit_reject(&desc, opts, "empty command");
        return Ok(CommandResult::failed(1, "empty command"));
    }
    if let Err(violation) = policy::check(&desc, opts.allow_unsafe) {
        let reason = violation.to_string();
        audit_reject(&desc, opts, &reason);
        return Ok(CommandResult {
            blocked: true,
            ..CommandResult::failed(126, reason)
        });
    }
    if !opts.cwd.is_dir() {
        let reason = format!("working directory does not exist: {}", opts.cwd.display());
        audit_reject(&desc, opts, &reason);
        return Ok(CommandResult::failed(1, reason));
    }

    let env = policy::sanitize_env(
        std::env::vars_os(),
        &opts.env,
        &EnvPolicy {
            inherit: opts.inherit_env,
            allow_names: opts.allow_env.clone(),
            allow_unsafe: opts.allow_unsafe,
        },
    );

    let (program, args): (String, Vec<String>) = match spec {
        CommandSpec::Argv(argv) => (argv[0].clone(), argv[1..].to_vec()),
        CommandSpec::Shell(raw) if cfg!(windows) => ("cmd".into(), vec!["/C".into(), raw.clone()]),
        CommandSpec::Shell(raw) => ("sh".into(), vec!["-c".into(), raw.clone()]),
    };
    let path_var = env.get("PATH").map(std::ffi::OsStr::new);
    let exe = match resolve_executable(&program, path_var, &opts.cwd) {
        Ok(p) => p,
        Err(e @ LookupError::NotFound(_)) => {
            let reason = e.to_string();
            audit_reject(&desc, opts, &reason);
            return Ok(CommandResult::failed(127, reason));
        }
    };

    tracing::info!(
        target: "agentgate::audit",
        argv = ?desc.display_argv(),
        executable = %exe.display(),
        cwd = %opts.cwd.display(),
        timeout_ms = opts.timeout.map(|t| t.as_millis() as u64),
        allow_unsafe = opts.allow_unsafe,
        decision = "accepted",
        "command accepted"
    );

    let mut cmd = Command::new(&exe);
    cmd.args(&args)
        .current_dir(&opts.cwd)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            let code = match e.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => 1,
            };
            tracing::warn!(program = %program, error = %e, "spawn failed");
            return Ok(CommandResult::failed(code, format!("failed to spawn '{program}': {e}")));
        }
    };
    let started = Instant::now();
    let pid = child.id();

    let out_cap: SharedCapture = Arc::default();
    let err_cap: SharedCapture = Arc::default();
    let mut out_task = child
        .stdout
        .take()
        .map(|p| tokio::spawn(drain(p, opts.max_output_bytes, out_cap.clone())));
    let mut err_task = child
        .stderr
        .take()
        .map(|p| tokio::spawn(drain(p, opts.max_output_bytes, err_cap.clone())));

    let cancel = opts.cancel.clone().unwrap_or_default();
    let deadline = async {
        match opts.timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };
    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = deadline => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Canceled,
    };

    let (status, timed_out, canceled) = match outcome {
        Outcome::Exited(status) => (status.map_err(RunError::Wait)?, false, false),
        Outcome::TimedOut => {
            terminate(&mut child, pid).await;
            (child.wait().await.map_err(RunError::Wait)?, true, false)
        }
        Outcome::Canceled => {
            terminate(&mut child, pid).await;
            (child.wait().await.map_err(RunError::Wait)?, false, true)
        }
    };

    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        if let Some(t) = out_task.as_mut() {
            let _ = t.await;
        }
        if let Some(t) = err_task.as_mut() {
            let _ = t.await;
        }
    })
    .await;
    if drained.is_err() {
        // Descendants still hold the pipes.
        if let Some(pid) = pid {
            let _ = signal_tree(pid, Signal::Kill).await;
        }
        for task in [out_task, err_task].into_iter().flatten() {
            task.abort();
        }
    }

    let (stdout, out_omitted) = take_capture(&out_cap);
    let (mut stderr, err_omitted) = take_capture(&err_cap);
    let omitted_bytes = out_omitted + err_omitted;
    let (mut returncode, signal) = exit_code(&status);
    if timed_out && status.code().is_none() {
        returncode = 124;
    }
    if canceled && status.code().is_none() {
        returncode = 130;
    }
    if timed_out {
        let ms = opts.timeout.map(|t| t.as_millis()).unwrap_or_default();
        push_line(&mut stderr, &format!("Command timed out after {ms}ms"));
    }
    if canceled {
        push_line(&mut stderr, "Command canceled");
    }

    tracing::debug!(
        program = %program,
        returncode,
        timed_out,
        canceled,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );

    Ok(CommandResult {
        stdout,
        stderr,
        returncode,
        success: returncode == 0 && !timed_out && !canceled,
        timed_out,
        signal,
        truncated: omitted_bytes > 0,
        omitted_bytes,
        canceled,
        blocked: false,
    })
}

fn audit_reject(desc: &CommandDescriptor, opts: &RunOptions, reason: &str) {
    tracing::warn!(
        target: "agentgate::audit",
        argv = ?desc.display_argv(),
        cwd = %opts.cwd.display(),
        timeout_ms = opts.timeout.map(|t| t.as_millis() as u64),
        allow_unsafe = opts.allow_unsafe,
        decision = "rejected",
        reason,
        "command rejected"
    );
}

async fn signal_tree(pid: u32, signal: Signal) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || kill_tree(pid, signal))
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

/// Stop the child's process tree: terminate, wait `TERM_GRACE`, then kill.
/// Falls back to the direct child when the tree cannot be signalled.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    let Some(pid) = pid else {
        let _ = child.start_kill();
        return;
    };
    if signal_tree(pid, Signal::Terminate).await.is_ok() {
        let _ = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    }
    // Sweeps descendants that outlived the leader too.
    if let Err(e) = signal_tree(pid, Signal::Kill).await {
        tracing::debug!(error = %e, "tree kill failed; killing direct child");
        let _ = child.start_kill();
    }
}

async fn drain<R>(mut pipe: R, cap: usize, capture: SharedCapture)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut c = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let room = cap.saturating_sub(c.buf.len());
        let keep = n.min(room);
        c.omitted += n - keep;
        c.buf.extend_from_slice(&chunk[..keep]);
    }
}

/// Captured text and the number of bytes the cap dropped.
fn take_capture(capture: &SharedCapture) -> (String, usize) {
    let mut c = capture.lock().unwrap_or_else(PoisonError::into_inner);
    let buf = std::mem::take(&mut c.buf);
    (String::from_utf8_lossy(&buf).into_owned(), c.omitted)
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> (i32, Option<String>) {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        return (code, None);
    }
    match status.signal() {
        Some(sig) => (128 + sig, Some(super::kill::signal_name(sig))),
        None => (1, None),
    }
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> (i32, Option<String>) {
    (status.code().unwrap_or(1), None)
}
