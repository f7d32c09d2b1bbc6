//! Platform search tools behind one strategy trait.

/// How letter case is treated when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    /// Insensitive unless the pattern contains an uppercase letter.
    #[default]
    Smart,
    Insensitive,
    Sensitive,
}

impl CaseMode {
    /// `match_case` wins over `case_insensitive`; neither means smart case.
    pub fn from_flags(match_case: bool, case_insensitive: bool) -> Self {
        if match_case {
            Self::Sensitive
        } else if case_insensitive {
            Self::Insensitive
        } else {
            Self::Smart
        }
    }

    pub fn is_insensitive(self, pattern: &str) -> bool {
        match self {
            Self::Smart => !pattern.chars().any(char::is_uppercase),
            Self::Insensitive => true,
            Self::Sensitive => false,
        }
    }
}

/// Fully decided flags for one backend invocation.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub pattern: &'a str,
    /// Paths relative to the working directory of the search.
    pub targets: &'a [String],
    pub insensitive: bool,
    /// Descend into directory targets.
    pub recursive: bool,
    pub line_numbers: bool,
    pub literal: bool,
    pub no_messages: bool,
}

pub trait SearchBackend: Send + Sync {
    /// Executable looked up on PATH.
    fn program(&self) -> &'static str;

    /// Whether directory targets can be handed to the tool for recursion.
    /// When false the caller enumerates files itself.
    fn recurses_directories(&self) -> bool;

    /// Longest command line the platform accepts. Targets past it are split
    /// across several runs.
    fn max_command_chars(&self) -> Option<usize> {
        None
    }

    fn argv(&self, inv: &Invocation<'_>) -> Vec<String>;
}

/// POSIX `grep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrepBackend;

impl SearchBackend for GrepBackend {
    fn program(&self) -> &'static str {
        "grep"
    }

    fn recurses_directories(&self) -> bool {
        true
    }

    fn argv(&self, inv: &Invocation<'_>) -> Vec<String> {
        let mut argv = vec!["grep".to_string(), "-I".into(), "-H".into()];
        argv.push(if inv.literal { "-F" } else { "-E" }.into());
        if inv.insensitive {
            argv.push("-i".into());
        }
        if inv.line_numbers {
            argv.push("-n".into());
        }
        if inv.no_messages {
            argv.push("-s".into());
        }
        if inv.recursive {
            argv.push("-r".into());
        }
        argv.push("-e".into());
        argv.push(inv.pattern.to_string());
        argv.push("--".into());
        argv.extend(inv.targets.iter().cloned());
        argv
    }
}

/// Windows `findstr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FindstrBackend;

impl SearchBackend for FindstrBackend {
    fn program(&self) -> &'static str {
        "findstr"
    }

    fn recurses_directories(&self) -> bool {
        false
    }

    fn max_command_chars(&self) -> Option<usize> {
        // CreateProcess caps lpCommandLine at 32,767 UTF-16 units
        Some(32_000)
    }

    fn argv(&self, inv: &Invocation<'_>) -> Vec<String> {
        let mut argv = vec!["findstr".to_string()];
        argv.push(if inv.literal { "/L" } else { "/R" }.into());
        if inv.insensitive {
            argv.push("/I".into());
        }
        if inv.line_numbers {
            argv.push("/N".into());
        }
        if inv.recursive {
            argv.push("/S".into());
        }
        // Skip files with non-printable characters.
        argv.push("/P".into());
        argv.push(format!("/C:{}", inv.pattern));
        argv.extend(inv.targets.iter().map(|t| t.replace('/', "\\")));
        argv
    }
}

/// Backend for the platform this binary was built for.
pub fn for_host() -> &'static dyn SearchBackend {
    if cfg!(windows) {
        &FindstrBackend
    } else {
        &GrepBackend
    }
}
