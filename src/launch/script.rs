use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{write_atomic_text_file, LauncherConfig};
use crate::error::LauncherError;
use crate::platform::Os;
use crate::runtime::{find_runtime, AuthRequirement};
use crate::settings::MANAGED_ENV_KEYS;

pub const DISABLE_TRAFFIC_KEY: &str = "CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC";

/// Resolved environment and invocation for one launch, before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSpec {
    pub env: Vec<(String, String)>,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    Posix,
    Batch,
}

impl ScriptFlavor {
    pub fn for_os(os: Os) -> Self {
        if os == Os::Windows {
            Self::Batch
        } else {
            Self::Posix
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Posix => "launch.sh",
            Self::Batch => "launch.cmd",
        }
    }
}

impl ScriptSpec {
    pub fn from_config(
        cfg: &LauncherConfig,
        program: &Path,
        base_dir: &Path,
    ) -> Result<Self, LauncherError> {
        let runtime = find_runtime(&cfg.server.runtime).ok_or_else(|| {
            LauncherError::Config(format!("unknown runtime '{}'", cfg.server.runtime))
        })?;
        let api_key = cfg.api_key();
        if runtime.auth == AuthRequirement::Required && api_key.is_none() {
            return Err(LauncherError::Config(format!(
                "{} requires an API key; run `claude-launcher configure`",
                runtime.display_name
            )));
        }

        let mut env: Vec<(String, String)> = cfg
            .env
            .iter()
            .filter(|(key, _)| !MANAGED_ENV_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut set = |key: &str, value: &str| env.push((key.to_string(), value.to_string()));

        set("ANTHROPIC_BASE_URL", cfg.server.base_url.trim());
        match api_key {
            Some(key) => {
                set("ANTHROPIC_API_KEY", key);
                set("ANTHROPIC_AUTH_TOKEN", key);
            }
            None => {
                if let Some(token) = runtime.placeholder_token {
                    set("ANTHROPIC_AUTH_TOKEN", token);
                }
            }
        }
        for (key, model) in [
            ("ANTHROPIC_DEFAULT_HAIKU_MODEL", &cfg.models.haiku),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", &cfg.models.sonnet),
            ("ANTHROPIC_DEFAULT_OPUS_MODEL", &cfg.models.opus),
        ] {
            let model = model.trim();
            if !model.is_empty() {
                set(key, model);
            }
        }
        set(DISABLE_TRAFFIC_KEY, "1");

        let mut args = Vec::new();
        let mode = cfg.cli_tool.permission_mode.trim();
        if !mode.is_empty() && mode != "default" {
            args.push("--permission-mode".to_string());
            args.push(mode.to_string());
        }
        if cfg.cli_tool.max_turns > 0 {
            args.push("--max-turns".to_string());
            args.push(cfg.cli_tool.max_turns.to_string());
        }

        Ok(Self {
            env,
            program: program.to_path_buf(),
            args,
            working_dir: cfg.working_directory(base_dir),
        })
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Rejects values the chosen script format cannot carry.
    ///
    /// `set "K=V"` and the quoted program line in a batch file end at the
    /// first `"`, so no value may contain one there.
    pub fn check_renderable(&self, flavor: ScriptFlavor) -> Result<(), LauncherError> {
        if flavor == ScriptFlavor::Posix {
            return Ok(());
        }
        let program = self.program.to_string_lossy();
        let working_dir = self.working_dir.to_string_lossy();
        let fields = self
            .env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .chain([
                ("cli_tool.path", program.as_ref()),
                ("working_directory", working_dir.as_ref()),
            ])
            .chain(self.args.iter().map(|arg| ("cli_tool arguments", arg.as_str())));
        for (name, value) in fields {
            if value.contains('"') {
                return Err(LauncherError::Config(format!(
                    "{name} contains a double quote, which a Windows launch script cannot carry"
                )));
            }
        }
        Ok(())
    }

    /// The launcher-owned subset, as written to the tool's settings file.
    pub fn managed_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .filter(|(key, _)| MANAGED_ENV_KEYS.contains(&key.as_str()))
            .cloned()
            .collect()
    }

    /// Variables for display, with keys and tokens replaced by `***`.
    pub fn masked_summary(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, value)| {
                let shown = if is_secret_key(key) && !value.is_empty() {
                    "***".to_string()
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect()
    }

    pub fn render(&self, flavor: ScriptFlavor) -> String {
        match flavor {
            ScriptFlavor::Posix => self.render_posix(),
            ScriptFlavor::Batch => self.render_batch(),
        }
    }

    fn render_posix(&self) -> String {
        let mut out = String::from("#!/usr/bin/env bash\n# Generated by claude-launcher; rewritten on every launch.\n");
        for (key, value) in &self.env {
            out.push_str(&format!("export {key}={}\n", shell_single_quote(value)));
        }
        out.push_str(&format!(
            "cd {} || exit 1\n",
            shell_single_quote(&self.working_dir.to_string_lossy())
        ));
        let mut command = vec![shell_single_quote(&self.program.to_string_lossy())];
        command.extend(self.args.iter().map(|arg| shell_single_quote(arg)));
        out.push_str(&command.join(" "));
        out.push('\n');
        out.push_str("status=$?\n");
        out.push_str("echo\n");
        out.push_str("echo \"claude exited with status $status\"\n");
        out.push_str("exec \"${SHELL:-/bin/bash}\"\n");
        out
    }

    fn render_batch(&self) -> String {
        let mut out = String::from("@echo off\r\nrem Generated by claude-launcher; rewritten on every launch.\r\n");
        for (key, value) in &self.env {
            out.push_str(&format!("set \"{key}={}\"\r\n", batch_escape(value)));
        }
        out.push_str(&format!(
            "cd /d \"{}\"\r\n",
            batch_escape(&self.working_dir.to_string_lossy())
        ));
        let mut command = format!("\"{}\"", batch_escape(&self.program.to_string_lossy()));
        for arg in &self.args {
            command.push(' ');
            command.push_str(&batch_escape(arg));
        }
        out.push_str(&command);
        out.push_str("\r\n");
        out
    }
}

fn is_secret_key(key: &str) -> bool {
    key.ends_with("_KEY") || key.ends_with("_TOKEN")
}

pub fn shell_single_quote(value: &str) -> String {
    // foo'bar -> 'foo'\''bar'
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn batch_escape(value: &str) -> String {
    value.replace('%', "%%")
}

pub fn script_path(dir: &Path, flavor: ScriptFlavor) -> PathBuf {
    dir.join(flavor.file_name())
}

pub fn write_script(path: &Path, content: &str) -> Result<(), LauncherError> {
    write_atomic_text_file(path, content, Some(0o755))
}
