use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::LauncherError;
use crate::runtime::{find_runtime, AuthRequirement, RUNTIMES};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");

pub const CONFIG_DIR_ENV: &str = "CLAUDE_LAUNCHER_CONFIG_DIR";
pub const INSTALL_DIR_ENV: &str = "CLAUDE_LAUNCHER_INSTALL_DIR";
pub const BIN_DIR_ENV: &str = "CLAUDE_LAUNCHER_BIN_DIR";
pub const RELEASE_BASE_URL_ENV: &str = "CLAUDE_LAUNCHER_RELEASE_BASE_URL";

pub const PERMISSION_MODES: [&str; 4] = ["default", "acceptEdits", "plan", "bypassPermissions"];

const DEFAULT_DOWNLOAD_BASE: &str = "https://storage.googleapis.com/claude-code-dist-86c565f3-f756-42ad-8dfa-d59b1c096819/claude-code-releases";
const DEFAULT_CHANGELOG_URL: &str =
    "https://raw.githubusercontent.com/anthropics/claude-code/main/CHANGELOG.md";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub version: u32,
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub cli_tool: CliToolConfig,
    pub working_directory: String,
    pub env: BTreeMap<String, String>,
    pub release: ReleaseConfig,
    pub launch: LaunchConfig,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub runtime: String,
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub haiku: String,
    pub sonnet: String,
    pub opus: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliToolConfig {
    pub path: String,
    pub permission_mode: String,
    pub max_turns: u32,
    pub auto_update: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    #[default]
    Native,
    Script,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub download_base: String,
    pub changelog_url: String,
    pub install_method: InstallMethod,
    pub require_manifest: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub terminal: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
            cli_tool: CliToolConfig::default(),
            working_directory: ".".to_string(),
            env: BTreeMap::new(),
            release: ReleaseConfig::default(),
            launch: LaunchConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            runtime: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for CliToolConfig {
    fn default() -> Self {
        Self {
            path: "claude".to_string(),
            permission_mode: "default".to_string(),
            max_turns: 0,
            auto_update: true,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            changelog_url: DEFAULT_CHANGELOG_URL.to_string(),
            install_method: InstallMethod::Native,
            require_manifest: true,
            extra: BTreeMap::new(),
        }
    }
}

impl LauncherConfig {
    /// The API key, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        self.server
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Release root with the environment override applied and no trailing slash.
    pub fn download_base(&self) -> String {
        let raw = env::var(RELEASE_BASE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.release.download_base.clone());
        raw.trim().trim_end_matches('/').to_string()
    }

    pub fn working_directory(&self, base_dir: &Path) -> PathBuf {
        let raw = self.working_directory.trim();
        if raw.is_empty() || raw == "." {
            return base_dir.to_path_buf();
        }
        let expanded = PathBuf::from(expand_path(raw));
        if expanded.is_absolute() {
            expanded
        } else {
            base_dir.join(expanded)
        }
    }
}

/// Recursively overlays `overlay` onto `base`.
///
/// Mappings merge key by key; any other overlay value replaces the base value,
/// except that a null overlay never erases a mapping from the base.
pub fn merge_yaml(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_yaml(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (base @ Value::Mapping(_), Value::Null) => base,
        (_, overlay) => overlay,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Missing,
    Loaded,
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: LauncherConfig,
    pub status: LoadStatus,
    /// Whether the file on disk carries a non-empty `server.base_url`.
    pub env_configured: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load_document(&self) -> LoadedConfig {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                let status = if err.kind() == std::io::ErrorKind::NotFound {
                    LoadStatus::Missing
                } else {
                    warn!("config {} unreadable, using defaults: {err}", self.path.display());
                    LoadStatus::Corrupt(err.to_string())
                };
                return LoadedConfig {
                    config: LauncherConfig::default(),
                    status,
                    env_configured: false,
                };
            }
        };
        match read_config_from_str(&content) {
            Ok((config, env_configured)) => {
                debug!(path = %self.path.display(), "config loaded");
                LoadedConfig {
                    config,
                    status: LoadStatus::Loaded,
                    env_configured,
                }
            }
            Err(err) => {
                warn!("config {} is corrupt, using defaults: {err}", self.path.display());
                LoadedConfig {
                    config: LauncherConfig::default(),
                    status: LoadStatus::Corrupt(err.to_string()),
                    env_configured: false,
                }
            }
        }
    }

    /// Where an unreadable config is kept before `save` replaces it.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    pub fn save(&self, config: &LauncherConfig) -> Result<(), LauncherError> {
        self.back_up_unreadable()?;
        let content = serde_yaml::to_string(config)?;
        write_atomic_text_file(&self.path, &content, Some(0o600))?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    fn back_up_unreadable(&self) -> Result<(), LauncherError> {
        let unreadable = match fs::read_to_string(&self.path) {
            Ok(content) => read_config_from_str(&content).is_err(),
            Err(err) => err.kind() != std::io::ErrorKind::NotFound,
        };
        if unreadable {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup)?;
            warn!(
                "kept unreadable config {} as {}",
                self.path.display(),
                backup.display()
            );
        }
        Ok(())
    }
}

fn read_config_from_str(content: &str) -> Result<(LauncherConfig, bool), LauncherError> {
    let user: Value = if content.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(content)?
    };
    if !matches!(user, Value::Mapping(_) | Value::Null) {
        return Err(LauncherError::Config(
            "config root must be a mapping".to_string(),
        ));
    }
    let env_configured = user
        .get("server")
        .and_then(|server| server.get("base_url"))
        .and_then(Value::as_str)
        .is_some_and(|url| !url.trim().is_empty());
    let defaults = serde_yaml::to_value(LauncherConfig::default())?;
    let merged = merge_yaml(defaults, user);
    let config: LauncherConfig = serde_yaml::from_value(merged)?;
    Ok((config, env_configured))
}

pub fn validate_config(cfg: &LauncherConfig) -> Result<(), LauncherError> {
    let Some(runtime) = find_runtime(&cfg.server.runtime) else {
        let known: Vec<&str> = RUNTIMES.iter().map(|rt| rt.key).collect();
        return Err(LauncherError::Config(format!(
            "server.runtime '{}' is not one of: {}",
            cfg.server.runtime,
            known.join(", ")
        )));
    };
    let base_url = cfg.server.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(LauncherError::Config(format!(
            "server.base_url must start with http:// or https:// (got '{base_url}')"
        )));
    }
    if runtime.auth == AuthRequirement::Required && cfg.api_key().is_none() {
        return Err(LauncherError::Config(format!(
            "server.api_key is required for runtime '{}'",
            runtime.key
        )));
    }
    if !PERMISSION_MODES.contains(&cfg.cli_tool.permission_mode.as_str()) {
        return Err(LauncherError::Config(format!(
            "cli_tool.permission_mode must be one of: {}",
            PERMISSION_MODES.join(", ")
        )));
    }
    if cfg.cli_tool.path.trim().is_empty() {
        return Err(LauncherError::Config(
            "cli_tool.path must be non-empty".to_string(),
        ));
    }
    for (key, value) in &cfg.env {
        if !is_env_identifier(key) {
            return Err(LauncherError::Config(format!(
                "env key '{key}' is not a valid environment variable name"
            )));
        }
        if value.contains(['\n', '\r', '\0']) {
            return Err(LauncherError::Config(format!(
                "env.{key} contains a newline or NUL byte"
            )));
        }
    }
    Ok(())
}

pub fn is_env_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

pub fn expand_path(input: &str) -> String {
    if input == "~" {
        if let Some(home) = home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn default_config_dir() -> PathBuf {
    if let Some(path) = env_path(CONFIG_DIR_ENV) {
        return path;
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("claude-launcher");
    base
}

pub fn default_install_dir() -> PathBuf {
    if let Some(path) = env_path(INSTALL_DIR_ENV) {
        return path;
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".local");
    base.push("share");
    base.push("claude-launcher");
    base
}

pub fn default_bin_dir() -> PathBuf {
    if let Some(path) = env_path(BIN_DIR_ENV) {
        return path;
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".local");
    base.push("bin");
    base
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| PathBuf::from(expand_path(value.trim())))
}

#[derive(Debug, Clone)]
pub struct LauncherPaths {
    pub config_path: PathBuf,
    pub config_dir: PathBuf,
    pub install_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl LauncherPaths {
    pub fn resolve(config_override: Option<&PathBuf>) -> Self {
        let config_path = match config_override {
            Some(path) => path.clone(),
            None => default_config_dir().join("config.yaml"),
        };
        let config_dir = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(default_config_dir, PathBuf::from);
        Self {
            config_path,
            config_dir,
            install_dir: default_install_dir(),
            bin_dir: default_bin_dir(),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn version_cache(&self) -> PathBuf {
        self.config_dir.join("version.json")
    }
}

pub fn ensure_parent(path: &Path) -> Result<(), LauncherError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn write_atomic_text_file(
    path: &Path,
    content: &str,
    mode: Option<u32>,
) -> Result<(), LauncherError> {
    ensure_parent(path)?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "claude-launcher".to_string()),
        std::process::id(),
        ts
    ));

    fs::write(&tmp_path, content)?;
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
