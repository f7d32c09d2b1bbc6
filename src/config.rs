//! Config load, env overrides, validation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::scope::Roots;

/// Root config: roots, limits, exec policy, optional web and image providers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub workspace: Option<String>,
    pub additional_root: Option<String>,
    pub allow_external: Option<bool>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub todo: TodoConfig,
    pub web: Option<WebConfig>,
    pub image: Option<ImageConfig>,
}

/// Bounds applied by the tool layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Limits {
    pub wait_max_ms: u64,
    pub search_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Per-stream capture cap for spawned processes.
    pub output_cap_bytes: usize,
    pub read_clamp_chars: usize,
    pub preview_clamp_chars: usize,
    pub stderr_clamp_chars: usize,
    pub max_read_bytes: u64,
    pub max_search_files: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            wait_max_ms: 30_000,
            search_timeout_ms: 30_000,
            command_timeout_ms: 120_000,
            output_cap_bytes: 5 * 1024 * 1024,
            read_clamp_chars: 120_000,
            preview_clamp_chars: 4_000,
            stderr_clamp_chars: 8_000,
            max_read_bytes: 20 * 1024 * 1024,
            max_search_files: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExecConfig {
    /// Lets `run_command` callers opt into shell strings and `rm -rf`.
    pub allow_unsafe: bool,
    pub inherit_env: bool,
    /// Variables passed through even when they look like secrets.
    pub allow_env: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TodoConfig {
    pub max_sessions: usize,
}

impl Default for TodoConfig {
    fn default() -> Self {
        Self {
            max_sessions: crate::todo::DEFAULT_MAX_SESSIONS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebConfig {
    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    /// Override for the Custom Search endpoint (tests, proxies).
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(String),
    #[error("config parse: {0}")]
    Parse(String),
    #[error("config validation: {0}")]
    Validation(String),
}

impl Config {
    pub fn workspace_path(&self) -> PathBuf {
        PathBuf::from(self.workspace.as_deref().unwrap_or_default())
    }

    /// Session roots described by this config.
    pub fn roots(&self) -> Roots {
        let mut roots = Roots::new(self.workspace_path())
            .with_allow_external(self.allow_external.unwrap_or(false));
        if let Some(add) = self.additional_root.as_deref().filter(|a| !a.is_empty()) {
            roots = roots.with_additional(add);
        }
        roots
    }

    /// `(api_key, cx)` when Google search is fully configured.
    pub fn google_credentials(&self) -> Option<(&str, &str)> {
        let web = self.web.as_ref()?;
        let key = web.google_api_key.as_deref().filter(|k| !k.is_empty())?;
        let cx = web.google_cx.as_deref().filter(|c| !c.is_empty())?;
        Some((key, cx))
    }
}

/// `$AGENTGATE_CONFIG`, else `~/.agentgate/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Some(p) = std::env::var_os("AGENTGATE_CONFIG").filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".agentgate").join("config.toml")
}

/// Load config from `path` (missing file means defaults), apply env overrides, validate.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut cfg = match std::fs::read_to_string(path) {
        Ok(s) => parse(&s)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(ConfigError::Io(format!("{}: {e}", path.display()))),
    };
    apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
    validate(&cfg)?;
    Ok(cfg)
}

pub fn parse(s: &str) -> Result<Config, ConfigError> {
    toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Apply `AGENTGATE_*` and provider-key overrides read through `var`.
pub fn apply_env_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |k: &str| var(k).filter(|v| !v.trim().is_empty());

    if let Some(ws) = non_empty("AGENTGATE_WORKSPACE") {
        cfg.workspace = Some(ws);
    }
    if let Some(add) = non_empty("AGENTGATE_ADDITIONAL_ROOT") {
        cfg.additional_root = Some(add);
    }

    let millis = |k: &str, current: u64| -> u64 {
        match non_empty(k) {
            None => current,
            Some(v) => v.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(var = k, value = %v, "ignoring unparsable override");
                current
            }),
        }
    };
    cfg.limits.wait_max_ms = millis("AGENTGATE_WAIT_MAX_MS", cfg.limits.wait_max_ms);
    cfg.limits.search_timeout_ms = millis("AGENTGATE_SEARCH_TIMEOUT_MS", cfg.limits.search_timeout_ms);
    cfg.limits.command_timeout_ms = millis("AGENTGATE_COMMAND_TIMEOUT_MS", cfg.limits.command_timeout_ms);

    if let Some(key) = non_empty("GOOGLE_API_KEY") {
        cfg.web.get_or_insert_with(WebConfig::default).google_api_key = Some(key);
    }
    if let Some(cx) = non_empty("GOOGLE_CSE_ID") {
        cfg.web.get_or_insert_with(WebConfig::default).google_cx = Some(cx);
    }
    if let Some(key) = non_empty("IMAGE_API_KEY") {
        cfg.image.get_or_insert_with(ImageConfig::default).api_key = Some(key);
    }
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let ws = cfg.workspace.as_deref().unwrap_or("").trim();
    if ws.is_empty() {
        return Err(ConfigError::Validation(
            "workspace is not set (set `workspace` in config or AGENTGATE_WORKSPACE)".into(),
        ));
    }
    if !Path::new(ws).is_dir() {
        return Err(ConfigError::Validation(format!(
            "workspace '{ws}' is not a directory"
        )));
    }
    if let Some(add) = cfg.additional_root.as_deref().filter(|a| !a.is_empty()) {
        if !Path::new(add).is_dir() {
            return Err(ConfigError::Validation(format!(
                "additional-root '{add}' is not a directory"
            )));
        }
    }
    let l = &cfg.limits;
    if l.output_cap_bytes == 0 || l.read_clamp_chars == 0 || l.max_search_files == 0 {
        return Err(ConfigError::Validation(
            "limits output-cap-bytes, read-clamp-chars and max-search-files must be positive".into(),
        ));
    }
    if cfg.todo.max_sessions == 0 {
        return Err(ConfigError::Validation("todo.max-sessions must be positive".into()));
    }
    Ok(())
}
