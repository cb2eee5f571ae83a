pub mod prompt;
pub mod script;
pub mod state;
pub mod terminal;
pub mod wizard;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{expand_path, validate_config, ConfigStore, InstallMethod, LauncherConfig, LoadStatus};
use crate::error::LauncherError;
use crate::install::{self, InstallEngine, ProgressEvent};
use crate::platform::{is_download_supported, Os, PlatformId};
use crate::process::ToolRunner;
use crate::runtime::BackendProbe;
use crate::settings::{self, MANAGED_ENV_KEYS};
use crate::version::{UpdateState, UpdateStatus, Version, VersionCatalog};

use prompt::Prompter;
use script::{ScriptFlavor, ScriptSpec};
use state::{transition, LauncherEvent, LauncherState, MAX_COLLECT_ATTEMPTS};
use terminal::TerminalLauncher;
use wizard::EnvCollection;

const MAX_STEPS: usize = 64;

/// Side effects behind each non-terminal state.
///
/// Every method performs the work of one state and reports its outcome as an
/// event; deciding what happens next is left to [`transition`].
pub trait Steps {
    fn check_installed(&mut self) -> LauncherEvent;
    fn install(&mut self) -> LauncherEvent;
    fn update(&mut self) -> LauncherEvent;
    fn check_update(&mut self) -> LauncherEvent;
    fn load_config(&mut self) -> LauncherEvent;
    fn inspect_env(&mut self) -> LauncherEvent;
    fn confirm_env(&mut self) -> LauncherEvent;
    fn collect_env(&mut self, attempt: u8) -> LauncherEvent;
    fn launch(&mut self) -> LauncherEvent;
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub final_state: LauncherState,
    pub visited: Vec<LauncherState>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == LauncherState::Done
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.final_state {
            LauncherState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Drives `steps` from `CheckInstalled` to a terminal state.
pub fn run(steps: &mut dyn Steps) -> RunReport {
    let mut state = LauncherState::CheckInstalled;
    let mut visited = vec![state.clone()];
    while !state.is_terminal() {
        if visited.len() > MAX_STEPS {
            state = LauncherState::Failed {
                reason: format!("workflow did not finish after {MAX_STEPS} steps"),
            };
            visited.push(state.clone());
            break;
        }
        let event = dispatch(steps, &state);
        let next = transition(&state, &event);
        debug!(from = %state, to = %next, ?event, "state transition");
        state = next;
        visited.push(state.clone());
    }
    match &state {
        LauncherState::Failed { reason } => warn!("launcher stopped: {reason}"),
        _ => info!("launcher finished"),
    }
    RunReport {
        final_state: state,
        visited,
    }
}

fn dispatch(steps: &mut dyn Steps, state: &LauncherState) -> LauncherEvent {
    match state {
        LauncherState::CheckInstalled => steps.check_installed(),
        LauncherState::Install => steps.install(),
        LauncherState::Update => steps.update(),
        LauncherState::CheckUpdate => steps.check_update(),
        LauncherState::LoadConfig => steps.load_config(),
        LauncherState::InspectEnv => steps.inspect_env(),
        LauncherState::ConfirmEnv => steps.confirm_env(),
        LauncherState::CollectEnv { attempt } => steps.collect_env(*attempt),
        LauncherState::Launch => steps.launch(),
        LauncherState::Done | LauncherState::Failed { .. } => {
            LauncherEvent::Aborted(format!("no step for terminal state {state}"))
        }
    }
}

/// Path of the tool to run: an explicit path as given, otherwise a `PATH`
/// lookup, then the launcher-managed link, then the bare name.
pub fn resolve_binary(cfg: &LauncherConfig, linked: &Path) -> PathBuf {
    let configured = PathBuf::from(expand_path(cfg.cli_tool.path.trim()));
    if configured.is_absolute() || configured.components().count() > 1 {
        return configured;
    }
    if let Ok(found) = which::which(&configured) {
        return found;
    }
    if linked.is_file() {
        return linked.to_path_buf();
    }
    configured
}

/// A rendered launch script that has not been written yet.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedLaunch {
    #[serde(skip)]
    pub spec: ScriptSpec,
    pub script_path: PathBuf,
    pub working_dir: PathBuf,
    pub script: String,
}

pub fn prepare_launch(
    cfg: &LauncherConfig,
    program: &Path,
    base_dir: &Path,
    os: Os,
    script_dir: &Path,
) -> Result<PreparedLaunch, LauncherError> {
    validate_config(cfg)?;
    let spec = ScriptSpec::from_config(cfg, program, base_dir)?;
    let flavor = ScriptFlavor::for_os(os);
    spec.check_renderable(flavor)?;
    Ok(PreparedLaunch {
        script_path: script::script_path(script_dir, flavor),
        working_dir: spec.working_dir.clone(),
        script: spec.render(flavor),
        spec,
    })
}

/// Persists the configuration and settings, writes the script and opens the terminal.
///
/// The config is only saved once the script could be built, so a failed
/// preparation leaves the files on disk untouched.
pub fn commit_launch(
    prepared: &PreparedLaunch,
    cfg: &LauncherConfig,
    store: &ConfigStore,
    terminal: &dyn TerminalLauncher,
) -> Result<String, LauncherError> {
    store.save(cfg)?;
    let settings_file = settings::settings_path(&prepared.working_dir);
    settings::write_env(&settings_file, &prepared.spec.managed_env(), &MANAGED_ENV_KEYS)?;
    script::write_script(&prepared.script_path, &prepared.script)?;
    info!(script = %prepared.script_path.display(), "launch script written");
    terminal.launch(
        &prepared.script_path,
        &prepared.working_dir,
        cfg.launch.terminal.as_deref(),
    )
}

pub struct Collaborators<'a> {
    pub runner: &'a dyn ToolRunner,
    pub catalog: &'a VersionCatalog,
    pub engine: Arc<InstallEngine>,
    pub probe: &'a BackendProbe,
    pub prompter: &'a dyn Prompter,
    pub terminal: &'a dyn TerminalLauncher,
}

/// The production [`Steps`]: real install, config, prompts and terminal.
pub struct LiveSteps<'a> {
    deps: Collaborators<'a>,
    store: ConfigStore,
    platform: PlatformId,
    base_dir: PathBuf,
    script_dir: PathBuf,
    config: LauncherConfig,
    env_configured: bool,
    binary: PathBuf,
    installed: Option<Version>,
    progress: Option<Box<dyn FnMut(&ProgressEvent) + 'a>>,
}

impl<'a> LiveSteps<'a> {
    pub fn new(
        deps: Collaborators<'a>,
        store: ConfigStore,
        platform: PlatformId,
        base_dir: PathBuf,
        script_dir: PathBuf,
    ) -> Self {
        let loaded = store.load_document();
        let binary = resolve_binary(&loaded.config, &deps.engine.linked_binary());
        Self {
            deps,
            store,
            platform,
            base_dir,
            script_dir,
            config: loaded.config,
            env_configured: loaded.env_configured,
            binary,
            installed: None,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: impl FnMut(&ProgressEvent) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    fn note(&self, message: &str) {
        self.deps.prompter.note(message);
    }

    fn install_native(&mut self) -> Result<PathBuf, LauncherError> {
        if !is_download_supported(&self.platform) {
            return Err(LauncherError::UnsupportedPlatform(self.platform.to_string()));
        }
        let engine = Arc::clone(&self.deps.engine);
        let version = engine.resolve_target_version(self.deps.catalog, None)?;
        self.deps
            .prompter
            .note(&format!("Installing Claude CLI {version} for {}", self.platform.display_name()));
        let progress = &mut self.progress;
        let outcome = engine.install_blocking(version, |event| {
            if let Some(callback) = progress.as_mut() {
                callback(event);
            }
        })?;
        match (outcome.success, outcome.binary_path) {
            (true, Some(path)) => Ok(path),
            _ => Err(LauncherError::Process(outcome.message)),
        }
    }
}

impl Steps for LiveSteps<'_> {
    fn check_installed(&mut self) -> LauncherEvent {
        match self.deps.catalog.installed_version(self.deps.runner, &self.binary) {
            Ok(version) => {
                info!(%version, binary = %self.binary.display(), "claude found");
                self.installed = Some(version);
                LauncherEvent::InstalledFound(Some(version))
            }
            Err(LauncherError::BinaryNotFound(reason)) => {
                debug!("claude not installed: {reason}");
                LauncherEvent::InstalledMissing
            }
            Err(err) => {
                warn!("claude is present but its version is unknown: {err}");
                LauncherEvent::InstalledFound(None)
            }
        }
    }

    fn install(&mut self) -> LauncherEvent {
        let result = match self.config.release.install_method {
            InstallMethod::Native => self.install_native(),
            InstallMethod::Script => install::run_install_script(self.deps.runner, &self.platform)
                .map(|_| resolve_binary(&self.config, &self.deps.engine.linked_binary())),
        };
        match result {
            Ok(binary) => {
                self.note(&format!("Claude CLI installed at {}", binary.display()));
                self.binary = binary;
                LauncherEvent::InstallSucceeded
            }
            Err(err) => LauncherEvent::InstallFailed(err.to_string()),
        }
    }

    fn update(&mut self) -> LauncherEvent {
        match install::run_self_update(self.deps.runner, &self.binary) {
            Ok(_) => {
                self.note("Claude CLI is up to date");
                LauncherEvent::UpdateFinished { ok: true }
            }
            Err(err) => {
                warn!("self-update failed: {err}");
                self.note(&format!("Update failed, continuing with the installed version: {err}"));
                LauncherEvent::UpdateFinished { ok: false }
            }
        }
    }

    fn check_update(&mut self) -> LauncherEvent {
        let unknown = LauncherError::VersionParse("installed version unknown".to_string());
        let latest = match self.installed {
            Some(_) => self.deps.catalog.fetch_latest_version(),
            None => None,
        };
        let status = UpdateStatus::classify(self.installed.ok_or(&unknown), latest);
        let apply = self.config.cli_tool.auto_update;
        if status.status == UpdateState::UpdateAvailable && !apply {
            if let (Some(installed), Some(latest)) = (status.installed, status.latest) {
                self.note(&format!(
                    "Update available: {installed} -> {latest}. Run `claude-launcher update` to apply it."
                ));
            }
        }
        debug!(status = status.status.as_str(), "update check");
        LauncherEvent::UpdateChecked {
            status: status.status,
            apply,
        }
    }

    fn load_config(&mut self) -> LauncherEvent {
        let loaded = self.store.load_document();
        if let LoadStatus::Corrupt(reason) = &loaded.status {
            self.note(&format!(
                "{} is unreadable ({reason}); continuing with defaults. It will be kept as {} when the new configuration is saved.",
                self.store.path().display(),
                self.store.backup_path().display()
            ));
        }
        let working_dir = loaded.config.working_directory(&self.base_dir);
        if let Err(err) = settings::find_or_create(&working_dir) {
            return LauncherEvent::ConfigFailed(err.to_string());
        }
        self.config = loaded.config;
        self.env_configured = loaded.env_configured;
        LauncherEvent::ConfigLoaded
    }

    fn inspect_env(&mut self) -> LauncherEvent {
        if self.env_configured {
            LauncherEvent::EnvPresent
        } else {
            LauncherEvent::EnvEmpty
        }
    }

    fn confirm_env(&mut self) -> LauncherEvent {
        match ScriptSpec::from_config(&self.config, &self.binary, &self.base_dir) {
            Ok(spec) => {
                self.note("Current configuration");
                for (key, value) in spec.masked_summary() {
                    self.note(&format!("  {key} = {value}"));
                }
            }
            Err(err) => self.note(&format!("Current configuration is incomplete: {err}")),
        }
        match self
            .deps
            .prompter
            .confirm("Edit the LLM runtime configuration?", false)
        {
            Ok(true) => LauncherEvent::EditRequested,
            Ok(false) => LauncherEvent::EditDeclined,
            Err(err) => LauncherEvent::Aborted(err.to_string()),
        }
    }

    fn collect_env(&mut self, attempt: u8) -> LauncherEvent {
        if attempt > 1 {
            self.note(&format!("Attempt {attempt} of {MAX_COLLECT_ATTEMPTS}"));
        }
        match wizard::collect_env(self.deps.prompter, self.deps.probe, &self.config) {
            Ok(EnvCollection::Complete(config)) => {
                self.config = config;
                self.env_configured = true;
                LauncherEvent::EnvCollected
            }
            Ok(EnvCollection::Incomplete(reason)) => {
                self.note(&reason);
                LauncherEvent::EnvIncomplete(reason)
            }
            Err(err) => LauncherEvent::Aborted(err.to_string()),
        }
    }

    fn launch(&mut self) -> LauncherEvent {
        let result = prepare_launch(
            &self.config,
            &self.binary,
            &self.base_dir,
            self.platform.os,
            &self.script_dir,
        )
        .and_then(|prepared| {
            commit_launch(&prepared, &self.config, &self.store, self.deps.terminal)
        });
        match result {
            Ok(terminal) => {
                self.note(&format!("Claude is launching in a new {terminal} window"));
                LauncherEvent::Launched
            }
            Err(err) => LauncherEvent::LaunchFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::CannedFetcher;
    use crate::launch::prompt::testing::{Answer, ScriptedPrompter};
    use crate::process::testing::MockRunner;
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::io;
    use tempfile::{tempdir, TempDir};

    const BASE: &str = "https://dl.test/releases";
    const CHANGELOG: &str = "https://changelog.test/CHANGELOG.md";

    #[derive(Default)]
    struct RecordingTerminal {
        launches: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl TerminalLauncher for RecordingTerminal {
        fn launch(
            &self,
            script: &Path,
            working_dir: &Path,
            _preferred: Option<&str>,
        ) -> Result<String, LauncherError> {
            self.launches
                .borrow_mut()
                .push((script.to_path_buf(), working_dir.to_path_buf()));
            Ok("test-terminal".to_string())
        }
    }

    struct World {
        dir: TempDir,
        fetcher: Arc<CannedFetcher>,
        runner: MockRunner,
        catalog: VersionCatalog,
        engine: Arc<InstallEngine>,
        probe: BackendProbe,
        prompter: ScriptedPrompter,
        terminal: RecordingTerminal,
    }

    impl World {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            fs::create_dir_all(dir.path().join("project")).unwrap();
            let fetcher = Arc::new(CannedFetcher::new());
            let engine = Arc::new(InstallEngine::new(
                fetcher.clone(),
                PlatformId::from_parts("linux", "x86_64"),
                BASE,
                dir.path().join("install"),
                dir.path().join("bin"),
            ));
            Self {
                catalog: VersionCatalog::new(fetcher.clone(), CHANGELOG),
                probe: BackendProbe::new(fetcher.clone()),
                runner: MockRunner::default(),
                prompter: ScriptedPrompter::default(),
                terminal: RecordingTerminal::default(),
                engine,
                fetcher,
                dir,
            }
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("config").join("config.yaml")
        }

        fn script_path(&self) -> PathBuf {
            self.dir.path().join("config").join("launch.sh")
        }

        fn project(&self) -> PathBuf {
            self.dir.path().join("project")
        }

        fn write_config(&self, yaml: &str) {
            fs::create_dir_all(self.config_path().parent().unwrap()).unwrap();
            fs::write(self.config_path(), yaml).unwrap();
        }

        fn publish_release(&self, version: &str) {
            let payload = b"\x7fELF claude".to_vec();
            let digest = hex::encode(Sha256::digest(&payload));
            self.fetcher.respond(CHANGELOG, 200, format!("# Changelog\n\n## {version}\n"));
            self.fetcher
                .respond(&format!("{BASE}/{version}/linux-x64/claude"), 200, payload);
            self.fetcher.respond(
                &format!("{BASE}/{version}/manifest.json"),
                200,
                json!({"platforms": {"linux-x64": {"checksum": digest}}}).to_string(),
            );
        }

        fn answer(&self, answers: Vec<Answer>) {
            for answer in answers {
                self.prompter.push(answer);
            }
        }

        fn run(&self) -> RunReport {
            let deps = Collaborators {
                runner: &self.runner,
                catalog: &self.catalog,
                engine: Arc::clone(&self.engine),
                probe: &self.probe,
                prompter: &self.prompter,
                terminal: &self.terminal,
            };
            let mut steps = LiveSteps::new(
                deps,
                ConfigStore::new(self.config_path()),
                PlatformId::from_parts("linux", "x86_64"),
                self.project(),
                self.config_path().parent().unwrap().to_path_buf(),
            );
            run(&mut steps)
        }

        fn script(&self) -> String {
            fs::read_to_string(self.script_path()).unwrap()
        }
    }

    fn ollama_answers() -> Vec<Answer> {
        vec![
            Answer::Select(0),
            Answer::Text(String::new()),
            Answer::Text("qwen3-coder:30b".to_string()),
            Answer::Text("qwen3-coder:30b".to_string()),
            Answer::Text("qwen3:4b".to_string()),
            Answer::Confirm(true),
        ]
    }

    fn names(report: &RunReport) -> Vec<&'static str> {
        report.visited.iter().map(LauncherState::name).collect()
    }

    #[test]
    fn fresh_machine_installs_then_updates() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_error(io::ErrorKind::NotFound);
        world.runner.push_output(0, "Successfully updated");
        world.write_config("server:\n  base_url: http://localhost:11434\n");
        world.answer(vec![Answer::Confirm(false)]);

        let report = world.run();
        assert!(report.succeeded(), "{:?}", report.final_state);
        assert_eq!(
            &names(&report)[..4],
            ["check_installed", "install", "update", "load_config"]
        );
        let linked = world.dir.path().join("bin").join("claude");
        assert!(linked.exists());
        let calls = world.runner.calls();
        assert_eq!(calls[1].program, linked.to_string_lossy());
        assert_eq!(calls[1].args, vec!["update".to_string()]);
    }

    #[test]
    fn up_to_date_install_skips_download() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0 (Claude Code)");
        world.write_config("server:\n  base_url: http://localhost:11434\n");
        world.answer(vec![Answer::Confirm(false)]);

        let report = world.run();
        assert!(report.succeeded());
        assert_eq!(
            &names(&report)[..3],
            ["check_installed", "check_update", "load_config"]
        );
        assert_eq!(world.fetcher.call_count(&format!("{BASE}/2.3.0/linux-x64/claude")), 0);
        assert_eq!(world.runner.calls().len(), 1);
    }

    #[test]
    fn available_update_is_applied_when_enabled() {
        let world = World::new();
        world.publish_release("2.4.0");
        world.runner.push_output(0, "2.3.0 (Claude Code)");
        world.runner.push_output(0, "updated");
        world.write_config("server:\n  base_url: http://localhost:11434\n");
        world.answer(vec![Answer::Confirm(false)]);

        let report = world.run();
        assert!(report.succeeded());
        assert_eq!(&names(&report)[..3], ["check_installed", "check_update", "update"]);
    }

    #[test]
    fn available_update_is_only_reported_when_disabled() {
        let world = World::new();
        world.publish_release("2.4.0");
        world.runner.push_output(0, "2.3.0");
        world.write_config(
            "server:\n  base_url: http://localhost:11434\ncli_tool:\n  auto_update: false\n",
        );
        world.answer(vec![Answer::Confirm(false)]);

        let report = world.run();
        assert!(report.succeeded());
        assert!(!names(&report).contains(&"update"));
        assert!(world.prompter.notes().iter().any(|n| n.contains("2.3.0 -> 2.4.0")));
    }

    #[test]
    fn empty_env_is_collected_and_traffic_flag_is_set() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0");
        world.answer(ollama_answers());

        let report = world.run();
        assert!(report.succeeded(), "{:?}", report.final_state);
        assert!(names(&report).contains(&"collect_env"));
        assert!(!names(&report).contains(&"confirm_env"));

        let script = world.script();
        assert!(script.contains("export CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC='1'\n"));
        assert!(script.contains("export ANTHROPIC_DEFAULT_HAIKU_MODEL='qwen3:4b'\n"));

        let saved = ConfigStore::new(world.config_path()).load_document();
        assert!(saved.env_configured);
        assert_eq!(saved.config.models.opus, "qwen3-coder:30b");

        let env = settings::read_env(&settings::settings_path(&world.project()));
        assert_eq!(
            env.get("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC").map(String::as_str),
            Some("1")
        );
        let launches = world.terminal.launches.borrow();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0], (world.script_path(), world.project()));
    }

    #[test]
    fn ollama_without_key_exports_no_api_key() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0");
        world.answer(ollama_answers());

        assert!(world.run().succeeded());
        let script = world.script();
        assert!(!script.contains("ANTHROPIC_API_KEY"));
        assert!(script.contains("export ANTHROPIC_AUTH_TOKEN='ollama'\n"));
    }

    #[test]
    fn required_key_never_reaches_launch() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0");
        let litellm = crate::runtime::RUNTIMES
            .iter()
            .position(|rt| rt.key == "litellm")
            .unwrap();
        for _ in 0..MAX_COLLECT_ATTEMPTS {
            world.answer(vec![
                Answer::Select(litellm),
                Answer::Text(String::new()),
                Answer::Text(String::new()),
            ]);
        }

        let report = world.run();
        assert!(!report.succeeded());
        assert!(!names(&report).contains(&"launch"));
        assert_eq!(
            names(&report).iter().filter(|name| **name == "collect_env").count(),
            usize::from(MAX_COLLECT_ATTEMPTS)
        );
        assert!(world.terminal.launches.borrow().is_empty());
        assert!(!world.config_path().exists());
        assert!(!world.script_path().exists());
    }

    #[test]
    fn declining_edit_launches_with_persisted_values() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0");
        world.write_config(
            "server:\n  runtime: vllm\n  base_url: http://gpu-box:8000\n  api_key: sk-box\nmodels:\n  sonnet: served-model\nteam: infra\n",
        );
        world.answer(vec![Answer::Confirm(false)]);

        let report = world.run();
        assert!(report.succeeded());
        assert!(names(&report).contains(&"confirm_env"));
        let script = world.script();
        assert!(script.contains("export ANTHROPIC_BASE_URL='http://gpu-box:8000'\n"));
        assert!(script.contains("export ANTHROPIC_API_KEY='sk-box'\n"));
        assert!(script.contains("export ANTHROPIC_DEFAULT_SONNET_MODEL='served-model'\n"));
        assert!(world.prompter.notes().iter().all(|n| !n.contains("sk-box")));
        let saved = fs::read_to_string(world.config_path()).unwrap();
        assert!(saved.contains("team: infra"));
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults_and_is_kept() {
        let world = World::new();
        world.publish_release("2.3.0");
        world.runner.push_output(0, "2.3.0");
        world.write_config("server: [broken\n");
        world.answer(ollama_answers());

        let report = world.run();
        assert!(report.succeeded(), "{:?}", report.final_state);
        assert_eq!(
            names(&report),
            vec![
                "check_installed",
                "check_update",
                "load_config",
                "inspect_env",
                "collect_env",
                "launch",
                "done"
            ]
        );
        assert!(world.prompter.notes().iter().any(|n| n.contains("unreadable")));

        let backup = world.config_path().with_file_name("config.yaml.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "server: [broken\n");
        let saved = ConfigStore::new(world.config_path()).load_document();
        assert_eq!(saved.status, LoadStatus::Loaded);
        assert_eq!(saved.config.models.opus, "qwen3-coder:30b");
        assert_eq!(world.terminal.launches.borrow().len(), 1);
    }

    #[test]
    fn windows_launch_refuses_quoted_values_before_writing() {
        let world = World::new();
        let mut cfg = LauncherConfig::default();
        cfg.models.sonnet = "bad\"model".to_string();
        let err = prepare_launch(
            &cfg,
            Path::new("claude"),
            &world.project(),
            Os::Windows,
            world.config_path().parent().unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "config_invalid");
        assert!(prepare_launch(
            &cfg,
            Path::new("claude"),
            &world.project(),
            Os::Linux,
            world.config_path().parent().unwrap(),
        )
        .is_ok());
        assert!(!world.config_path().parent().unwrap().exists());
    }

    #[test]
    fn failed_install_points_to_manual_install() {
        let world = World::new();
        world.runner.push_error(io::ErrorKind::NotFound);

        let report = world.run();
        assert_eq!(
            names(&report),
            vec!["check_installed", "install", "failed"]
        );
        assert!(report.failure_reason().unwrap().contains("install.sh"));
    }

    struct Replay {
        events: VecDeque<LauncherEvent>,
    }

    impl Replay {
        fn next(&mut self) -> LauncherEvent {
            self.events
                .pop_front()
                .unwrap_or_else(|| LauncherEvent::Aborted("script exhausted".to_string()))
        }
    }

    impl Steps for Replay {
        fn check_installed(&mut self) -> LauncherEvent {
            self.next()
        }
        fn install(&mut self) -> LauncherEvent {
            self.next()
        }
        fn update(&mut self) -> LauncherEvent {
            self.next()
        }
        fn check_update(&mut self) -> LauncherEvent {
            self.next()
        }
        fn load_config(&mut self) -> LauncherEvent {
            self.next()
        }
        fn inspect_env(&mut self) -> LauncherEvent {
            self.next()
        }
        fn confirm_env(&mut self) -> LauncherEvent {
            self.next()
        }
        fn collect_env(&mut self, _attempt: u8) -> LauncherEvent {
            self.next()
        }
        fn launch(&mut self) -> LauncherEvent {
            self.next()
        }
    }

    #[test]
    fn run_visits_every_state_in_order() {
        let mut steps = Replay {
            events: VecDeque::from(vec![
                LauncherEvent::InstalledMissing,
                LauncherEvent::InstallSucceeded,
                LauncherEvent::UpdateFinished { ok: true },
                LauncherEvent::ConfigLoaded,
                LauncherEvent::EnvPresent,
                LauncherEvent::EditRequested,
                LauncherEvent::EnvIncomplete("discarded".to_string()),
                LauncherEvent::EnvCollected,
                LauncherEvent::Launched,
            ]),
        };
        let report = run(&mut steps);
        assert!(report.succeeded());
        assert_eq!(
            names(&report),
            vec![
                "check_installed",
                "install",
                "update",
                "load_config",
                "inspect_env",
                "confirm_env",
                "collect_env",
                "collect_env",
                "launch",
                "done"
            ]
        );
        assert_eq!(report.visited[7], LauncherState::CollectEnv { attempt: 2 });
    }

    #[test]
    fn exhausted_steps_fail_instead_of_looping() {
        let mut steps = Replay {
            events: VecDeque::new(),
        };
        let report = run(&mut steps);
        assert_eq!(report.failure_reason(), Some("script exhausted"));
    }
}
