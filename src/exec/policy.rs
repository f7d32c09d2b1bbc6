//! Command security policy: argv-only by default, executable denylist,
//! `rm -rf` detection, and environment sanitisation.
//!
//! Stateless; evaluated by the runner before every spawn.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::OnceLock;

use regex_lite::Regex;

/// A command request: argv (default) or a raw shell string (unsafe only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandSpec {
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }
}

/// Destructive or administrative executables, matched by basename.
const DENYLIST: &[&str] = &[
    // filesystem formatting / raw disk writes
    "mkfs", "mke2fs", "mkswap", "wipefs", "format", "dd", "shred",
    // partitioning
    "fdisk", "sfdisk", "cfdisk", "gdisk", "sgdisk", "parted", "diskpart",
    // mount
    "mount", "umount",
    // power
    "shutdown", "reboot", "halt", "poweroff", "init", "telinit",
    // services
    "systemctl", "service", "launchctl", "sc",
    // users and groups
    "useradd", "userdel", "usermod", "groupadd", "groupdel", "groupmod", "passwd", "chpasswd",
    "adduser", "deluser",
    // firewall
    "iptables", "ip6tables", "nft", "ufw", "firewall-cmd", "netsh",
    // process killing
    "kill", "killall", "pkill", "taskkill",
    // privilege escalation
    "sudo", "su", "doas", "pkexec", "runas",
];

/// Shell interpreters and the flag that makes them run an inline script.
const SHELLS: &[(&str, &[&str])] = &[
    ("sh", &["-c"]),
    ("bash", &["-c"]),
    ("zsh", &["-c"]),
    ("dash", &["-c"]),
    ("ksh", &["-c"]),
    ("fish", &["-c", "--command"]),
    ("cmd", &["/c", "/k"]),
    ("powershell", &["-c", "-command", "-encodedcommand"]),
    ("pwsh", &["-c", "-command", "-encodedcommand"]),
];

/// A launcher whose real command follows its own options.
struct Wrapper {
    name: &'static str,
    /// Options that consume the following word.
    takes_value: &'static [&'static str],
    /// Positional words before the command (`timeout DURATION cmd`).
    positional: usize,
}

const WRAPPERS: &[Wrapper] = &[
    Wrapper { name: "env", takes_value: &["-u", "--unset", "-C", "--chdir"], positional: 0 },
    Wrapper { name: "nohup", takes_value: &[], positional: 0 },
    Wrapper { name: "nice", takes_value: &["-n", "--adjustment"], positional: 0 },
    Wrapper { name: "time", takes_value: &["-f", "--format", "-o", "--output"], positional: 0 },
    Wrapper { name: "timeout", takes_value: &["-s", "--signal", "-k", "--kill-after"], positional: 1 },
    Wrapper { name: "stdbuf", takes_value: &["-i", "-o", "-e", "--input", "--output", "--error"], positional: 0 },
    Wrapper { name: "command", takes_value: &[], positional: 0 },
    Wrapper { name: "exec", takes_value: &["-a"], positional: 0 },
];

impl Wrapper {
    /// Whether option word `a` takes the next word as its value. Handles
    /// short clusters such as `-iu NAME`.
    fn consumes_next(&self, a: &str) -> bool {
        if self.takes_value.contains(&a) {
            return true;
        }
        let Some(cluster) = a.strip_prefix('-').filter(|c| !c.starts_with('-')) else {
            return false;
        };
        for (i, c) in cluster.char_indices() {
            if self.takes_value.contains(&format!("-{c}").as_str()) {
                // `-uNAME` carries its value inline
                return i + c.len_utf8() == cluster.len();
            }
        }
        false
    }
}

/// `env -S` / `--split-string`: a whole command line hidden in one word.
fn hides_command(wrapper: &Wrapper, a: &str) -> bool {
    if wrapper.name != "env" {
        return false;
    }
    if a == "--split-string" || a.starts_with("--split-string=") {
        return true;
    }
    a.strip_prefix('-')
        .filter(|c| !c.starts_with('-'))
        .is_some_and(|cluster| {
            // stop at the first value-taking letter; what follows is its value
            cluster
                .chars()
                .take_while(|c| !matches!(*c, 'u' | 'C'))
                .any(|c| c == 'S')
        })
}

const EXE_SUFFIXES: &[&str] = &[".exe", ".com", ".bat", ".cmd"];

/// Normalised view of a command request, derived once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub argv: Option<Vec<String>>,
    pub raw: Option<String>,
    /// Lower-cased basename of the program, extension stripped.
    pub executable: String,
    pub shell_requested: bool,
    pub has_path_separator: bool,
}

impl CommandDescriptor {
    pub fn new(spec: &CommandSpec, shell: bool) -> Self {
        match spec {
            CommandSpec::Argv(argv) => {
                let program = argv.first().map(String::as_str).unwrap_or("");
                Self {
                    argv: Some(argv.clone()),
                    raw: None,
                    executable: executable_name(program),
                    shell_requested: shell
                        || invokes_inline_shell(argv)
                        || unwrap_launchers(argv).is_ok_and(invokes_inline_shell),
                    has_path_separator: program.contains(['/', '\\']),
                }
            }
            CommandSpec::Shell(raw) => {
                let program = raw.split_whitespace().next().unwrap_or("");
                Self {
                    argv: None,
                    raw: Some(raw.clone()),
                    executable: executable_name(program),
                    shell_requested: true,
                    has_path_separator: program.contains(['/', '\\']),
                }
            }
        }
    }

    /// Words for the audit log.
    pub fn display_argv(&self) -> Vec<String> {
        match (&self.argv, &self.raw) {
            (Some(argv), _) => argv.clone(),
            (None, Some(raw)) => vec![raw.clone()],
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error(
        "shell commands require shell=true and allow_unsafe=true; pass an argv array instead"
    )]
    ShellNotAllowed,
    #[error("command '{0}' is blocked by security policy")]
    Denylisted(String),
    #[error("rm with '{0}' is blocked by security policy (recursive force delete)")]
    DangerousFlags(String),
    #[error("launcher option '{0}' is blocked by security policy; pass the command as argv words")]
    HiddenCommand(String),
}

/// Lower-cased basename with any Windows executable extension removed.
pub fn executable_name(program: &str) -> String {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    EXE_SUFFIXES
        .iter()
        .find_map(|ext| base.strip_suffix(ext))
        .map(str::to_string)
        .unwrap_or(base)
}

pub fn is_denylisted(name: &str) -> bool {
    let name = executable_name(name);
    // mkfs.ext4, mkfs.vfat, ...
    DENYLIST.contains(&name.as_str()) || name.starts_with("mkfs.")
}

fn invokes_inline_shell(argv: &[String]) -> bool {
    let Some(program) = argv.first() else {
        return false;
    };
    let name = executable_name(program);
    let Some((_, flags)) = SHELLS.iter().find(|(shell, _)| *shell == name) else {
        return false;
    };
    argv[1..].iter().any(|a| {
        let a = a.to_ascii_lowercase();
        flags.contains(&a.as_str())
            // bundled short flags such as `-ec` / `-xc`
            || (a.starts_with('-') && !a.starts_with("--") && flags.contains(&"-c") && a.ends_with('c'))
    })
}

/// First `rm` flag that makes the call a recursive force delete.
pub fn dangerous_rm_flag(args: &[String]) -> Option<String> {
    let mut recursive: Option<&str> = None;
    let mut force: Option<&str> = None;
    for arg in args {
        let a = arg.as_str();
        if a == "--" {
            break;
        }
        match a {
            "--no-preserve-root" => return Some(a.to_string()),
            "--recursive" => recursive = Some(a),
            "--force" => force = Some(a),
            _ if a.starts_with('-') && !a.starts_with("--") => {
                let flags = &a[1..];
                let r = flags.contains(['r', 'R']);
                let f = flags.contains('f');
                if r && f {
                    return Some(a.to_string());
                }
                if r {
                    recursive = Some(a);
                }
                if f {
                    force = Some(a);
                }
            }
            _ => {}
        }
    }
    match (recursive, force) {
        (Some(r), Some(f)) => Some(format!("{r} {f}")),
        _ => None,
    }
}

/// Skip launcher words (`env -u HOME FOO=1`, `nice -n 5`, `timeout -s TERM 10`)
/// to reach the real command. Options that smuggle a command line in a single
/// word are refused.
fn unwrap_launchers(argv: &[String]) -> Result<&[String], PolicyViolation> {
    let mut rest = argv;
    while let Some(first) = rest.first() {
        let name = executable_name(first);
        let Some(wrapper) = WRAPPERS.iter().find(|w| w.name == name) else {
            break;
        };
        let mut i = 1;
        let mut positional = wrapper.positional;
        while i < rest.len() {
            let a = rest[i].as_str();
            if a == "--" {
                i += 1;
                break;
            }
            if hides_command(wrapper, a) {
                return Err(PolicyViolation::HiddenCommand(a.to_string()));
            }
            if wrapper.consumes_next(a) {
                i += 2;
            } else if a.starts_with('-') {
                // a lone `-` is `env -i`
                i += 1;
            } else if name == "env" && a.contains('=') && !a.starts_with('=') {
                i += 1;
            } else if positional > 0 {
                positional -= 1;
                i += 1;
            } else {
                break;
            }
        }
        rest = rest.get(i..).unwrap_or(&[]);
    }
    Ok(rest)
}

/// Evaluate a command against the policy.
pub fn check(desc: &CommandDescriptor, allow_unsafe: bool) -> Result<(), PolicyViolation> {
    if desc.shell_requested && !allow_unsafe {
        return Err(PolicyViolation::ShellNotAllowed);
    }
    if is_denylisted(&desc.executable) {
        return Err(PolicyViolation::Denylisted(desc.executable.clone()));
    }
    let Some(argv) = &desc.argv else {
        return Ok(());
    };
    let inner = unwrap_launchers(argv)?;
    if let Some(program) = inner.first() {
        let name = executable_name(program);
        if is_denylisted(&name) {
            return Err(PolicyViolation::Denylisted(name));
        }
        if name == "rm" && !allow_unsafe {
            if let Some(flag) = dangerous_rm_flag(&inner[1..]) {
                return Err(PolicyViolation::DangerousFlags(flag));
            }
        }
    }
    Ok(())
}

// --- Environment ---

/// Parent variables a child receives by default.
const ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "USERNAME", "SHELL", "LANG", "LANGUAGE", "TERM", "TZ",
    "TMPDIR", "TEMP", "TMP", "SYSTEMROOT", "SYSTEMDRIVE", "COMSPEC", "PATHEXT", "WINDIR",
    "USERPROFILE",
];

fn sensitive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(key|secret|token|passw(or)?d|session|cookie|credential|auth|openai|anthropic|gemini|google|aws|azure|gcp|huggingface|^hf_|github|groq|mistral|cohere|deepseek|openrouter|^xai_)",
        )
        .expect("static regex")
    })
}

/// Whether an environment variable name looks like it carries a secret.
pub fn is_sensitive_env(key: &str) -> bool {
    sensitive_re().is_match(key)
}

fn is_default_allowed(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    upper.starts_with("LC_") || ENV_ALLOWLIST.contains(&upper.as_str())
}

/// How a child's environment is assembled.
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    /// Copy the whole parent environment instead of the allow-list.
    pub inherit: bool,
    /// Names kept even when they look sensitive.
    pub allow_names: Vec<String>,
    pub allow_unsafe: bool,
}

/// Build the child environment from `parent` plus caller `extra` vars.
pub fn sanitize_env<I>(parent: I, extra: &[(String, String)], policy: &EnvPolicy) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env = BTreeMap::new();
    for (k, v) in parent {
        let (Ok(k), Ok(v)) = (k.into_string(), v.into_string()) else {
            continue;
        };
        if policy.inherit || is_default_allowed(&k) {
            env.insert(k, v);
        }
    }
    for (k, v) in extra {
        env.insert(k.clone(), v.clone());
    }
    if !policy.allow_unsafe {
        env.retain(|k, _| {
            !is_sensitive_env(k) || policy.allow_names.iter().any(|a| a.eq_ignore_ascii_case(k))
        });
    }
    env
}
