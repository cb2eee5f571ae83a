use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::write_atomic_text_file;
use crate::error::LauncherError;

const SETTINGS_DIR: &str = ".claude";
const SETTINGS_FILE: &str = "settings.local.json";

/// Environment keys the launcher owns inside the tool's settings file.
pub const MANAGED_ENV_KEYS: [&str; 7] = [
    "ANTHROPIC_BASE_URL",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_AUTH_TOKEN",
    "ANTHROPIC_DEFAULT_HAIKU_MODEL",
    "ANTHROPIC_DEFAULT_SONNET_MODEL",
    "ANTHROPIC_DEFAULT_OPUS_MODEL",
    "CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC",
];

pub fn settings_path(working_dir: &Path) -> PathBuf {
    working_dir.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Returns the settings file for `working_dir`, creating `{}` when absent.
pub fn find_or_create(working_dir: &Path) -> Result<PathBuf, LauncherError> {
    let path = settings_path(working_dir);
    if !path.exists() {
        write_atomic_text_file(&path, "{}\n", None)?;
        info!(path = %path.display(), "created settings file");
    }
    Ok(path)
}

#[cfg(test)]
pub fn read_env(path: &Path) -> BTreeMap<String, String> {
    let Ok(document) = read_document(path) else {
        return BTreeMap::new();
    };
    document
        .get("env")
        .and_then(Value::as_object)
        .map(|env| {
            env.iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Rewrites the `env` mapping: managed keys are replaced by `env` (or dropped
/// when absent from it); every other key in the document is left alone.
pub fn write_env(
    path: &Path,
    env: &BTreeMap<String, String>,
    managed_keys: &[&str],
) -> Result<(), LauncherError> {
    let mut document = match read_document(path) {
        Ok(document) => document,
        Err(DocumentError::Missing) => Map::new(),
        Err(DocumentError::Corrupt(reason)) => {
            let backup = backup_path(path);
            fs::copy(path, &backup)?;
            warn!(
                "settings file {} is not a JSON object ({reason}); backed up to {}",
                path.display(),
                backup.display()
            );
            Map::new()
        }
        Err(DocumentError::Io(err)) => return Err(err.into()),
    };

    let mut env_map = match document.remove("env") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for key in managed_keys {
        env_map.remove(*key);
    }
    for (key, value) in env {
        env_map.insert(key.clone(), Value::String(value.clone()));
    }
    document.insert("env".to_string(), Value::Object(env_map));

    let mut content = serde_json::to_string_pretty(&Value::Object(document))?;
    content.push('\n');
    write_atomic_text_file(path, &content, None)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

enum DocumentError {
    Missing,
    Corrupt(String),
    Io(std::io::Error),
}

fn read_document(path: &Path) -> Result<Map<String, Value>, DocumentError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(DocumentError::Missing)
        }
        Err(err) => return Err(DocumentError::Io(err)),
    };
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DocumentError::Corrupt("root is not an object".to_string())),
        Err(err) => Err(DocumentError::Corrupt(err.to_string())),
    }
}
