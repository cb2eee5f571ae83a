mod config;
mod error;
mod http;
mod install;
mod launch;
mod logging;
mod platform;
mod process;
mod runtime;
mod settings;
mod version;

use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::console::style;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{
    validate_config, write_atomic_text_file, ConfigStore, InstallMethod, LauncherConfig,
    LauncherPaths, LoadStatus, DEFAULT_CONFIG_YAML,
};
use crate::error::LauncherError;
use crate::http::{HttpFetch, ReqwestFetcher};
use crate::install::{InstallEngine, ProgressEvent};
use crate::launch::prompt::TerminalPrompter;
use crate::launch::script::ScriptSpec;
use crate::launch::terminal::SystemTerminal;
use crate::launch::wizard::{self, EnvCollection};
use crate::launch::{Collaborators, LiveSteps};
use crate::platform::{detect_platform, is_download_supported};
use crate::process::SystemRunner;
use crate::runtime::{find_runtime, BackendProbe, DEFAULT_PROBE_TIMEOUT, RUNTIMES};
use crate::settings::MANAGED_ENV_KEYS;
use crate::version::{Version, VersionCatalog};

#[derive(Parser, Debug)]
#[command(
    name = "claude-launcher",
    version,
    about = "Install, configure and launch the Claude CLI against a local LLM runtime"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or update, configure, then launch (the default)
    Run,
    Install {
        #[arg(long = "version", value_name = "VERSION")]
        target: Option<String>,
        #[arg(long, value_enum)]
        method: Option<MethodArg>,
    },
    Update,
    Check,
    Configure,
    Launch {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Info,
    Runtimes,
    Models {
        #[arg(long)]
        runtime: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    Probe {
        #[arg(long)]
        runtime: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Path,
    Show,
    Init,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Native,
    Script,
}

impl From<MethodArg> for InstallMethod {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Native => InstallMethod::Native,
            MethodArg::Script => InstallMethod::Script,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

struct Context {
    paths: LauncherPaths,
    json: bool,
}

impl Context {
    fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.paths.config_path)
    }

    /// Loads the config; an unreadable file yields the defaults and is kept as
    /// `config.yaml.bak` by the next save.
    fn load_config(&self) -> LauncherConfig {
        self.store().load_document().config
    }

    fn catalog(&self, http: Arc<dyn HttpFetch>, cfg: &LauncherConfig) -> VersionCatalog {
        VersionCatalog::new(http, cfg.release.changelog_url.clone())
            .with_cache_file(self.paths.version_cache())
    }

    fn engine(&self, http: Arc<dyn HttpFetch>, cfg: &LauncherConfig) -> Arc<InstallEngine> {
        Arc::new(InstallEngine::from_config(
            http,
            detect_platform(),
            cfg,
            &self.paths,
        ))
    }

    fn binary(&self, cfg: &LauncherConfig) -> PathBuf {
        let linked = self.paths.bin_dir.join(detect_platform().binary_name());
        launch::resolve_binary(cfg, &linked)
    }
}

fn main() -> Result<(), LauncherError> {
    let cli = Cli::parse();
    let ctx = Context {
        paths: LauncherPaths::resolve(cli.config.as_ref()),
        json: cli.json,
    };
    let log_guard = logging::init(&ctx.paths.log_dir(), cli.verbose);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => handle_run(&ctx),
        Commands::Install { target, method } => handle_install(&ctx, target, method),
        Commands::Update => handle_update(&ctx),
        Commands::Check => handle_check(&ctx),
        Commands::Configure => handle_configure(&ctx),
        Commands::Launch { dry_run } => handle_launch(&ctx, dry_run),
        Commands::Info => handle_info(&ctx),
        Commands::Runtimes => handle_runtimes(&ctx),
        Commands::Models { runtime, url } => handle_models(&ctx, runtime, url),
        Commands::Probe { runtime, url } => handle_probe(&ctx, runtime, url),
        Commands::Config { command } => handle_config(&ctx, command),
    };

    if let Err(err) = result {
        tracing::debug!("command failed: {err:?}");
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                error_code: Some(err.error_code().to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{} {err}", style("error:").red().bold());
        }
        // `exit` skips destructors; flush the file log first.
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}

fn require_interactive(ctx: &Context, what: &str) -> Result<(), LauncherError> {
    if ctx.json {
        return Err(LauncherError::NotInteractive(format!(
            "{what} is interactive and cannot run with --json"
        )));
    }
    if !io::stdin().is_terminal() {
        return Err(LauncherError::NotInteractive(format!(
            "{what} requires a TTY"
        )));
    }
    Ok(())
}

fn http_client() -> Result<Arc<dyn HttpFetch>, LauncherError> {
    Ok(Arc::new(ReqwestFetcher::new()?))
}

fn print_progress(event: &ProgressEvent) {
    let mut stderr = io::stderr();
    let _ = match event {
        ProgressEvent::Progress { percent, message } => {
            write!(stderr, "\r{percent:>3}% {message:<40}")
        }
        ProgressEvent::Finished { success, message } => {
            let mark = if *success {
                style("done").green()
            } else {
                style("stopped").yellow()
            };
            writeln!(stderr, "\r{mark}: {message:<40}")
        }
        ProgressEvent::Error(message) => writeln!(stderr, "\r{}: {message:<40}", style("failed").red()),
    };
    let _ = stderr.flush();
}

fn handle_run(ctx: &Context) -> Result<(), LauncherError> {
    require_interactive(ctx, "run")?;
    let cfg = ctx.load_config();
    let http = http_client()?;
    let runner = SystemRunner;
    let catalog = ctx.catalog(Arc::clone(&http), &cfg);
    let probe = BackendProbe::new(Arc::clone(&http));
    let prompter = TerminalPrompter::new();
    let platform = detect_platform();
    let terminal = SystemTerminal::new(platform.os);
    let deps = Collaborators {
        runner: &runner,
        catalog: &catalog,
        engine: ctx.engine(http, &cfg),
        probe: &probe,
        prompter: &prompter,
        terminal: &terminal,
    };
    let mut steps = LiveSteps::new(
        deps,
        ctx.store(),
        platform,
        env::current_dir()?,
        ctx.paths.config_dir.clone(),
    )
    .with_progress(print_progress);

    let report = launch::run(&mut steps);
    if !report.succeeded() {
        let reason = report.failure_reason().unwrap_or("launcher did not finish");
        return Err(LauncherError::Workflow(reason.to_string()));
    }
    output(ctx, serde_json::to_value(&report)?)
}

fn handle_install(
    ctx: &Context,
    target: Option<String>,
    method: Option<MethodArg>,
) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let platform = detect_platform();
    let method = method.map(InstallMethod::from).unwrap_or(cfg.release.install_method);
    if method == InstallMethod::Script {
        let result = install::run_install_script(&SystemRunner, &platform)?;
        return output(
            ctx,
            json!({"method": "script", "output": result.stdout_text()}),
        );
    }

    if !is_download_supported(&platform) {
        return Err(LauncherError::UnsupportedPlatform(platform.to_string()));
    }
    let requested = target
        .as_deref()
        .map(str::parse::<Version>)
        .transpose()?;
    let http = http_client()?;
    let catalog = ctx.catalog(Arc::clone(&http), &cfg);
    let engine = ctx.engine(http, &cfg);
    let version = engine.resolve_target_version(&catalog, requested)?;
    let outcome = engine.install_blocking(version, |event| {
        if !ctx.json {
            print_progress(event);
        }
    })?;
    if !outcome.success {
        return Err(LauncherError::Workflow(format!(
            "install of {version} failed: {}",
            outcome.message
        )));
    }
    output(
        ctx,
        json!({
            "method": "native",
            "version": version,
            "binary": outcome.binary_path,
            "message": outcome.message,
        }),
    )
}

fn handle_update(ctx: &Context) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let binary = ctx.binary(&cfg);
    let result = install::run_self_update(&SystemRunner, &binary)?;
    output(
        ctx,
        json!({"binary": binary, "output": result.stdout_text()}),
    )
}

fn handle_check(ctx: &Context) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let binary = ctx.binary(&cfg);
    let catalog = ctx.catalog(http_client()?, &cfg);
    let status = catalog.check_update_status(&SystemRunner, &binary);
    output(
        ctx,
        json!({
            "binary": binary,
            "status": status.status,
            "needs_update": status.needs_update,
            "installed": status.installed,
            "latest": status.latest,
        }),
    )
}

fn handle_configure(ctx: &Context) -> Result<(), LauncherError> {
    require_interactive(ctx, "configure")?;
    let cfg = ctx.load_config();
    let probe = BackendProbe::new(http_client()?);
    let cfg = match wizard::collect_env(&TerminalPrompter::new(), &probe, &cfg)? {
        EnvCollection::Complete(cfg) => cfg,
        EnvCollection::Incomplete(reason) => return Err(LauncherError::Config(reason)),
    };
    validate_config(&cfg)?;
    let spec = ScriptSpec::from_config(&cfg, &ctx.binary(&cfg), &env::current_dir()?)?;
    ctx.store().save(&cfg)?;
    let settings_file = settings::settings_path(&spec.working_dir);
    settings::write_env(&settings_file, &spec.managed_env(), &MANAGED_ENV_KEYS)?;
    output(
        ctx,
        json!({"config": ctx.paths.config_path, "settings": settings_file, "saved": true}),
    )
}

fn handle_launch(ctx: &Context, dry_run: bool) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let platform = detect_platform();
    let prepared = launch::prepare_launch(
        &cfg,
        &ctx.binary(&cfg),
        &env::current_dir()?,
        platform.os,
        &ctx.paths.config_dir,
    )?;
    if dry_run {
        if ctx.json {
            return output(ctx, serde_json::to_value(&prepared)?);
        }
        println!("# {}", prepared.script_path.display());
        print!("{}", prepared.script);
        return Ok(());
    }
    let terminal = launch::commit_launch(
        &prepared,
        &cfg,
        &ctx.store(),
        &SystemTerminal::new(platform.os),
    )?;
    output(
        ctx,
        json!({"terminal": terminal, "script_path": prepared.script_path}),
    )
}

fn handle_info(ctx: &Context) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let platform = detect_platform();
    let binary = ctx.binary(&cfg);
    let catalog = ctx.catalog(http_client()?, &cfg);
    let (installed, installed_error) = match catalog.installed_version(&SystemRunner, &binary) {
        Ok(version) => (Some(version), None),
        Err(err) => (None, Some(err.to_string())),
    };
    output(
        ctx,
        json!({
            "platform": platform,
            "platform_name": platform.display_name(),
            "download_identifier": platform.download_identifier(),
            "binary": binary,
            "installed_version": installed,
            "installed_error": installed_error,
            "paths": {
                "config": ctx.paths.config_path,
                "config_exists": ctx.paths.config_path.is_file(),
                "install_dir": ctx.paths.install_dir,
                "bin_dir": ctx.paths.bin_dir,
                "logs": ctx.paths.log_dir(),
            },
        }),
    )
}

fn handle_runtimes(ctx: &Context) -> Result<(), LauncherError> {
    let runtimes: Vec<serde_json::Value> = RUNTIMES
        .iter()
        .map(|rt| {
            json!({
                "key": rt.key,
                "name": rt.display_name,
                "default_base_url": rt.default_base_url(),
                "models_path": rt.models_path,
                "health_path": rt.health_path,
                "auth": rt.auth,
            })
        })
        .collect();
    output(ctx, serde_json::Value::Array(runtimes))
}

/// Runtime key, base URL and API key for `models` / `probe`.
///
/// The saved URL and key are only reused when the runtime matches the saved one.
fn backend_target(
    cfg: &LauncherConfig,
    runtime: Option<String>,
    url: Option<String>,
) -> Result<(&'static str, String, Option<String>), LauncherError> {
    let key = runtime.unwrap_or_else(|| cfg.server.runtime.clone());
    let descriptor = find_runtime(&key)
        .ok_or_else(|| LauncherError::Config(format!("unknown runtime '{key}'")))?;
    let same_runtime = descriptor.key.eq_ignore_ascii_case(cfg.server.runtime.trim());
    let base_url = match url {
        Some(url) => url,
        None if same_runtime => cfg.server.base_url.clone(),
        None => descriptor.default_base_url(),
    };
    let api_key = if same_runtime {
        cfg.api_key().map(str::to_string)
    } else {
        None
    };
    Ok((descriptor.key, base_url, api_key))
}

fn handle_models(
    ctx: &Context,
    runtime: Option<String>,
    url: Option<String>,
) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let (runtime, base_url, api_key) = backend_target(&cfg, runtime, url)?;
    let probe = BackendProbe::new(http_client()?);
    let models = probe.fetch_models(&base_url, runtime, DEFAULT_PROBE_TIMEOUT, api_key.as_deref());
    output(
        ctx,
        json!({"runtime": runtime, "base_url": base_url, "models": models}),
    )
}

fn handle_probe(
    ctx: &Context,
    runtime: Option<String>,
    url: Option<String>,
) -> Result<(), LauncherError> {
    let cfg = ctx.load_config();
    let (runtime, base_url, api_key) = backend_target(&cfg, runtime, url)?;
    let probe = BackendProbe::new(http_client()?);
    let result = probe.validate(&base_url, runtime, DEFAULT_PROBE_TIMEOUT, api_key.as_deref());
    if !result.ok {
        return Err(LauncherError::BackendUnreachable(result.message));
    }
    output(
        ctx,
        json!({
            "runtime": runtime,
            "base_url": base_url,
            "message": result.message,
            "response_time_ms": result.response_time_ms,
        }),
    )
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), LauncherError> {
    let path = &ctx.paths.config_path;
    match command {
        ConfigCommand::Path => output(ctx, json!({"path": path})),
        ConfigCommand::Show => {
            let loaded = ctx.store().load_document();
            let status = match &loaded.status {
                LoadStatus::Missing => "missing".to_string(),
                LoadStatus::Loaded => "loaded".to_string(),
                LoadStatus::Corrupt(reason) => format!("corrupt: {reason}"),
            };
            let mut config = loaded.config;
            if config.api_key().is_some() {
                config.server.api_key = Some("***".to_string());
            }
            output(
                ctx,
                json!({"path": path, "status": status, "config": serde_json::to_value(&config)?}),
            )
        }
        ConfigCommand::Init => {
            if ctx.store().exists() {
                return output(ctx, json!({"path": path, "created": false}));
            }
            write_atomic_text_file(path, DEFAULT_CONFIG_YAML, Some(0o600))?;
            output(ctx, json!({"path": path, "created": true}))
        }
    }
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), LauncherError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_code: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), LauncherError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
