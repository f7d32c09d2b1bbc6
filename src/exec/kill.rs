//! Process-tree termination.
//!
//! POSIX: children are spawned as process-group leaders, so the whole tree is
//! signalled with `kill(-pgid, sig)`. Windows: `taskkill /T` walks the tree.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite request (SIGTERM / taskkill without /F).
    Terminate,
    /// Forced (SIGKILL / taskkill /F).
    Kill,
}

/// Signal `pid` and all of its descendants. A tree that is already gone is not an error.
pub fn kill_tree(pid: u32, signal: Signal) -> io::Result<()> {
    imp::kill_tree(pid, signal)
}

#[cfg(unix)]
mod imp {
    use super::Signal;
    use std::io;

    pub fn kill_tree(pid: u32, signal: Signal) -> io::Result<()> {
        let pgid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        if pgid <= 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid <= 1"));
        }
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) takes plain integers; a negative pid addresses the process group.
        let rc = unsafe { libc::kill(-pgid, sig) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::Signal;
    use std::io;
    use std::process::{Command, Stdio};

    pub fn kill_tree(pid: u32, signal: Signal) -> io::Result<()> {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string(), "/T"]);
        if signal == Signal::Kill {
            cmd.arg("/F");
        }
        let status = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status()?;
        // 128: no such process.
        if status.success() || status.code() == Some(128) {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {status}")))
        }
    }
}

/// Conventional name for a POSIX signal number.
#[cfg(unix)]
pub fn signal_name(sig: i32) -> String {
    match sig {
        libc::SIGHUP => "SIGHUP".into(),
        libc::SIGINT => "SIGINT".into(),
        libc::SIGQUIT => "SIGQUIT".into(),
        libc::SIGABRT => "SIGABRT".into(),
        libc::SIGKILL => "SIGKILL".into(),
        libc::SIGSEGV => "SIGSEGV".into(),
        libc::SIGPIPE => "SIGPIPE".into(),
        libc::SIGTERM => "SIGTERM".into(),
        other => format!("SIG{other}"),
    }
}
