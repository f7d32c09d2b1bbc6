//! Resolve a program name to an executable path before spawning.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("command not found: {0}")]
    NotFound(String),
}

/// Bare names are searched on `path_var` (PATHEXT honoured on Windows);
/// names with a separator are taken relative to `cwd` and must exist.
pub fn resolve_executable(
    program: &str,
    path_var: Option<&OsStr>,
    cwd: &Path,
) -> Result<PathBuf, LookupError> {
    if program.is_empty() {
        return Err(LookupError::NotFound(String::new()));
    }
    let as_path = Path::new(program);
    if as_path.is_absolute() || program.contains(['/', '\\']) {
        let full = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            cwd.join(as_path)
        };
        return if full.is_file() {
            Ok(full)
        } else {
            Err(LookupError::NotFound(program.to_string()))
        };
    }
    which::which_in(program, path_var, cwd).map_err(|_| LookupError::NotFound(program.to_string()))
}

/// Whether `program` can be found on the current process PATH.
pub fn is_installed(program: &str) -> bool {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_executable(program, std::env::var_os("PATH").as_deref(), &cwd).is_ok()
}
