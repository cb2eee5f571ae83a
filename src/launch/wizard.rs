use std::path::Path;
use tracing::debug;

use crate::config::LauncherConfig;
use crate::error::LauncherError;
use crate::launch::prompt::Prompter;
use crate::launch::script::ScriptSpec;
use crate::runtime::{AuthRequirement, BackendProbe, DEFAULT_PROBE_TIMEOUT, RUNTIMES};

const MANUAL_ENTRY: &str = "Enter a model name manually";

#[derive(Debug, Clone, PartialEq)]
pub enum EnvCollection {
    Complete(LauncherConfig),
    Incomplete(String),
}

/// Asks for runtime, endpoint, credentials and models, starting from `current`.
///
/// Nothing is persisted here; a `Complete` result is the caller's to save.
pub fn collect_env(
    prompter: &dyn Prompter,
    probe: &BackendProbe,
    current: &LauncherConfig,
) -> Result<EnvCollection, LauncherError> {
    let mut cfg = current.clone();

    prompter.note("LLM runtime configuration");
    let items: Vec<String> = RUNTIMES
        .iter()
        .map(|rt| format!("{} ({})", rt.display_name, rt.key))
        .collect();
    let current_index = RUNTIMES
        .iter()
        .position(|rt| rt.key.eq_ignore_ascii_case(current.server.runtime.trim()))
        .unwrap_or(0);
    let runtime = &RUNTIMES[prompter
        .select("Select LLM runtime server", &items, current_index)?
        .min(RUNTIMES.len() - 1)];
    let runtime_changed = !runtime.key.eq_ignore_ascii_case(current.server.runtime.trim());
    cfg.server.runtime = runtime.key.to_string();

    let default_url = if runtime_changed || current.server.base_url.trim().is_empty() {
        runtime.default_base_url()
    } else {
        current.server.base_url.trim().to_string()
    };
    let base_url = prompter.input("ANTHROPIC_BASE_URL", Some(&default_url))?;
    let base_url = if base_url.trim().is_empty() {
        default_url
    } else {
        base_url.trim().trim_end_matches('/').to_string()
    };
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Ok(EnvCollection::Incomplete(format!(
            "base URL must start with http:// or https:// (got '{base_url}')"
        )));
    }
    cfg.server.base_url = base_url;

    match runtime.auth {
        AuthRequirement::None => cfg.server.api_key = None,
        AuthRequirement::Optional | AuthRequirement::Required => {
            let existing = if runtime_changed { None } else { current.api_key() };
            let prompt = match (runtime.auth, existing) {
                (_, Some(_)) => "API key (Enter keeps the saved key)",
                (AuthRequirement::Required, None) => "API key (required)",
                _ => "API key (Enter to skip)",
            };
            let answer = prompter.secret(prompt)?;
            cfg.server.api_key = if answer.is_empty() {
                existing.map(str::to_string)
            } else {
                Some(answer)
            };
            if runtime.auth == AuthRequirement::Required && cfg.api_key().is_none() {
                return Ok(EnvCollection::Incomplete(format!(
                    "{} requires an API key",
                    runtime.display_name
                )));
            }
        }
    }

    let health = probe.validate(
        &cfg.server.base_url,
        runtime.key,
        DEFAULT_PROBE_TIMEOUT,
        cfg.api_key(),
    );
    prompter.note(&health.message);

    let models = probe.fetch_models(
        &cfg.server.base_url,
        runtime.key,
        DEFAULT_PROBE_TIMEOUT,
        cfg.api_key(),
    );
    debug!(count = models.len(), "models discovered");
    if models.is_empty() {
        prompter.note("No models found. Enter model names manually.");
    } else {
        prompter.note(&format!("Found {} models", models.len()));
    }
    cfg.models.opus = choose_model(prompter, "ANTHROPIC_DEFAULT_OPUS_MODEL", &models, &current.models.opus)?;
    cfg.models.sonnet = choose_model(prompter, "ANTHROPIC_DEFAULT_SONNET_MODEL", &models, &current.models.sonnet)?;
    cfg.models.haiku = choose_model(prompter, "ANTHROPIC_DEFAULT_HAIKU_MODEL", &models, &current.models.haiku)?;

    let spec = match ScriptSpec::from_config(&cfg, Path::new(&cfg.cli_tool.path), Path::new(".")) {
        Ok(spec) => spec,
        Err(err) => return Ok(EnvCollection::Incomplete(err.to_string())),
    };
    prompter.note("Configuration summary");
    for (key, value) in spec.masked_summary() {
        prompter.note(&format!("  {key} = {value}"));
    }
    if !prompter.confirm("Save this configuration?", true)? {
        return Ok(EnvCollection::Incomplete("configuration discarded".to_string()));
    }
    Ok(EnvCollection::Complete(cfg))
}

fn choose_model(
    prompter: &dyn Prompter,
    label: &str,
    models: &[String],
    current: &str,
) -> Result<String, LauncherError> {
    let current = current.trim();
    let fallback = (!current.is_empty()).then_some(current);
    if models.is_empty() {
        return prompter.input(label, fallback);
    }
    let mut items = models.to_vec();
    items.push(MANUAL_ENTRY.to_string());
    let default = models.iter().position(|m| m == current).unwrap_or(0);
    let picked = prompter.select(label, &items, default)?;
    match models.get(picked) {
        Some(model) => Ok(model.clone()),
        None => prompter.input(label, fallback),
    }
}
