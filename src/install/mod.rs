pub mod archive;
pub mod download;
pub mod manifest;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::config::{ensure_parent, LauncherConfig, LauncherPaths};
use crate::error::LauncherError;
use crate::http::{HttpFetch, HttpRequest};
use crate::platform::{Os, PlatformId};
use crate::process::{CommandOutput, ToolRunner};
use crate::version::{Version, VersionCatalog};

pub use download::{progress_channel, CancelToken, PercentSpan, ProgressEvent, ProgressSink};

const LOCK_FILE: &str = ".install.lock";
const STALE_LOCK_AGE: Duration = Duration::from_secs(15 * 60);
const LATEST_TIMEOUT: Duration = Duration::from_secs(10);

const DOWNLOAD_SPAN: PercentSpan = PercentSpan { start: 0, end: 90 };
const VERIFY_PERCENT: u8 = 93;
const EXTRACT_PERCENT: u8 = 96;
const LOCATE_PERCENT: u8 = 99;

pub const INSTALL_SCRIPT_URL: &str = "https://claude.ai/install.sh";
pub const INSTALL_PS1_URL: &str = "https://claude.ai/install.ps1";

/// Inputs for one install attempt; never reused across attempts.
#[derive(Debug)]
pub struct DownloadTask {
    pub version: Version,
    pub destination: PathBuf,
    pub cancel: CancelToken,
    pub progress: ProgressSink,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub success: bool,
    pub message: String,
    pub binary_path: Option<PathBuf>,
}

impl InstallOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            binary_path: None,
        }
    }
}

/// Deterministic release URL: `<base>/<version>/<platform-id>/<binary-name>`.
pub fn resolve_download_url(
    download_base: &str,
    version: &Version,
    platform: &PlatformId,
) -> Result<String, LauncherError> {
    let identifier = platform
        .download_identifier()
        .ok_or_else(|| LauncherError::UnsupportedPlatform(platform.to_string()))?;
    Ok(format!(
        "{}/{version}/{identifier}/{}",
        download_base.trim_end_matches('/'),
        platform.binary_name()
    ))
}

pub fn manifest_url(download_base: &str, version: &Version) -> String {
    format!("{}/{version}/manifest.json", download_base.trim_end_matches('/'))
}

pub struct InstallEngine {
    http: Arc<dyn HttpFetch>,
    platform: PlatformId,
    download_base: String,
    install_root: PathBuf,
    bin_dir: PathBuf,
    require_manifest: bool,
}

impl InstallEngine {
    pub fn new(
        http: Arc<dyn HttpFetch>,
        platform: PlatformId,
        download_base: impl Into<String>,
        install_root: impl Into<PathBuf>,
        bin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            platform,
            download_base: download_base.into(),
            install_root: install_root.into(),
            bin_dir: bin_dir.into(),
            require_manifest: true,
        }
    }

    pub fn from_config(
        http: Arc<dyn HttpFetch>,
        platform: PlatformId,
        cfg: &LauncherConfig,
        paths: &LauncherPaths,
    ) -> Self {
        Self::new(
            http,
            platform,
            cfg.download_base(),
            paths.install_dir.clone(),
            paths.bin_dir.clone(),
        )
        .require_manifest(cfg.release.require_manifest)
    }

    pub fn require_manifest(mut self, required: bool) -> Self {
        self.require_manifest = required;
        self
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.install_root.join("versions")
    }

    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.versions_dir().join(version.to_string())
    }

    pub fn linked_binary(&self) -> PathBuf {
        self.bin_dir.join(self.platform.binary_name())
    }

    pub fn download_url(&self, version: &Version) -> Result<String, LauncherError> {
        resolve_download_url(&self.download_base, version, &self.platform)
    }

    /// Explicit request, else the changelog, else `<base>/latest`.
    pub fn resolve_target_version(
        &self,
        catalog: &VersionCatalog,
        requested: Option<Version>,
    ) -> Result<Version, LauncherError> {
        if let Some(version) = requested {
            return Ok(version);
        }
        if let Some(version) = catalog.fetch_latest_version() {
            return Ok(version);
        }
        let url = format!("{}/latest", self.download_base.trim_end_matches('/'));
        let response = self
            .http
            .fetch(&HttpRequest::get(&url, LATEST_TIMEOUT))?
            .ensure_success(&url)?;
        let text = response.text();
        text.trim().parse().map_err(|_| {
            LauncherError::Network(format!("{url} did not return a version (got '{}')", text.trim()))
        })
    }

    /// Starts an attempt on a worker thread.
    ///
    /// The install lock is taken before the thread starts, so a concurrent
    /// attempt against the same install root fails here instead of racing.
    pub fn spawn(self: &Arc<Self>, version: Version) -> Result<InstallHandle, LauncherError> {
        let lock = InstallLock::acquire(&self.install_root)?;
        let (progress, events) = progress_channel();
        let cancel = CancelToken::new();
        let task = DownloadTask {
            version,
            destination: self.version_dir(&version),
            cancel: cancel.clone(),
            progress,
        };
        let engine = Arc::clone(self);
        let join = thread::Builder::new()
            .name("claude-install".to_string())
            .spawn(move || {
                let _lock = lock;
                engine.install(task)
            })?;
        Ok(InstallHandle {
            events,
            cancel,
            join,
        })
    }

    /// Spawns an attempt and forwards its events to `on_event` until it ends.
    ///
    /// Ctrl-C or SIGTERM while waiting cancels the attempt, which then fails
    /// with `Cancelled` once its leftovers are gone.
    pub fn install_blocking(
        self: &Arc<Self>,
        version: Version,
        mut on_event: impl FnMut(&ProgressEvent),
    ) -> Result<InstallOutcome, LauncherError> {
        let handle = self.spawn(version)?;
        let _interrupt = match handle.cancel.cancel_on_interrupt() {
            Ok(guard) => Some(guard),
            Err(err) => {
                warn!("could not watch for interrupts during install: {err}");
                None
            }
        };
        for event in handle.events.iter() {
            on_event(&event);
        }
        let cancel = handle.cancel.clone();
        let outcome = handle.wait();
        if !outcome.success && cancel.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }
        Ok(outcome)
    }

    /// Runs one attempt to completion and emits exactly one terminal event.
    pub fn install(&self, task: DownloadTask) -> InstallOutcome {
        let DownloadTask {
            version,
            destination,
            cancel,
            mut progress,
        } = task;
        let staging = staging_dir(&destination);
        let download_path = self
            .install_root
            .join("downloads")
            .join(format!("claude-{version}.download"));

        let result = self.run_pipeline(
            &version,
            &destination,
            &staging,
            &download_path,
            &cancel,
            &mut progress,
        );
        let _ = fs::remove_file(&download_path);
        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }

        match result {
            Ok((binary_path, unverified)) => {
                let mut message = format!("installed {version} at {}", binary_path.display());
                if let Some(reason) = unverified {
                    message.push_str(&format!(" (unverified: {reason})"));
                }
                info!("{message}");
                progress.progress(100, "Installed");
                progress.finish(true, message.clone());
                InstallOutcome {
                    success: true,
                    message,
                    binary_path: Some(binary_path),
                }
            }
            Err(LauncherError::Cancelled) => {
                info!(%version, "install cancelled");
                progress.finish(false, "cancelled");
                InstallOutcome::failed("cancelled")
            }
            Err(err) => {
                warn!(%version, "install failed: {err}");
                let message = err.to_string();
                progress.error(message.clone());
                InstallOutcome::failed(message)
            }
        }
    }

    fn run_pipeline(
        &self,
        version: &Version,
        destination: &Path,
        staging: &Path,
        download_path: &Path,
        cancel: &CancelToken,
        progress: &mut ProgressSink,
    ) -> Result<(PathBuf, Option<String>), LauncherError> {
        let url = self.download_url(version)?;
        let platform_id = self
            .platform
            .download_identifier()
            .ok_or_else(|| LauncherError::UnsupportedPlatform(self.platform.to_string()))?;
        info!(%url, "downloading {version}");

        download::download_to(
            self.http.as_ref(),
            &url,
            download_path,
            cancel,
            progress,
            DOWNLOAD_SPAN,
        )?;

        cancel.check()?;
        progress.progress(VERIFY_PERCENT, "Verifying checksum");
        let manifest_url = manifest_url(&self.download_base, version);
        let unverified = match manifest::fetch_expected_digest(
            self.http.as_ref(),
            &manifest_url,
            &platform_id,
        ) {
            Ok(expected) => {
                manifest::verify_checksum(download_path, &expected)?;
                None
            }
            Err(err) if !self.require_manifest => {
                warn!("installing without checksum verification: {err}");
                Some(err.to_string())
            }
            Err(err) => return Err(err),
        };

        cancel.check()?;
        progress.progress(EXTRACT_PERCENT, "Extracting");
        if staging.exists() {
            fs::remove_dir_all(staging)?;
        }
        archive::extract(download_path, staging, self.platform.binary_name())?;

        progress.progress(LOCATE_PERCENT, "Locating binary");
        let found = archive::locate_binary(staging, self.platform.binary_name())?;
        let relative = found
            .strip_prefix(staging)
            .map(Path::to_path_buf)
            .map_err(|_| LauncherError::BinaryNotFound(found.display().to_string()))?;

        cancel.check()?;
        if destination.exists() {
            fs::remove_dir_all(destination)?;
        }
        fs::rename(staging, destination)?;
        let binary = destination.join(relative);
        let linked = self.activate(&binary)?;
        Ok((linked, unverified))
    }

    /// Exposes `binary` on the bin dir (symlink on unix, copy elsewhere).
    pub fn activate(&self, binary: &Path) -> Result<PathBuf, LauncherError> {
        let link = self.linked_binary();
        ensure_parent(&link)?;
        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_dir() => {
                return Err(LauncherError::Process(format!(
                    "refusing to replace directory with binary link: {}",
                    link.display()
                )));
            }
            Ok(_) => fs::remove_file(&link)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(binary, &link)?;
        #[cfg(not(unix))]
        fs::copy(binary, &link)?;
        Ok(link)
    }
}

fn staging_dir(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "install".to_string());
    destination.with_file_name(format!(".{name}.staging"))
}

pub struct InstallHandle {
    pub events: Receiver<ProgressEvent>,
    pub cancel: CancelToken,
    join: JoinHandle<InstallOutcome>,
}

impl InstallHandle {
    pub fn wait(self) -> InstallOutcome {
        self.join
            .join()
            .unwrap_or_else(|_| InstallOutcome::failed("install worker panicked"))
    }
}

#[derive(Debug, Serialize)]
struct LockMetadata {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Exclusive marker file held for the duration of an install attempt.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    pub fn acquire(install_root: &Path) -> Result<Self, LauncherError> {
        fs::create_dir_all(install_root)?;
        let path = install_root.join(LOCK_FILE);
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if lock_is_stale(&path) {
                    warn!(path = %path.display(), "removing stale install lock");
                    fs::remove_file(&path)?;
                    return Self::create(&path).map_err(|err| {
                        if err.kind() == io::ErrorKind::AlreadyExists {
                            LauncherError::InstallInProgress(install_root.display().to_string())
                        } else {
                            err.into()
                        }
                    });
                }
                Err(LauncherError::InstallInProgress(
                    install_root.display().to_string(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let metadata = LockMetadata {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_string(&metadata).map_err(io::Error::other)?;
        file.write_all(body.as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age >= STALE_LOCK_AGE)
        .unwrap_or(false)
}

/// Runs the vendor's installer script (`release.install_method: script`).
pub fn run_install_script(
    runner: &dyn ToolRunner,
    platform: &PlatformId,
) -> Result<CommandOutput, LauncherError> {
    let (program, args) = if platform.os == Os::Windows {
        (
            PathBuf::from("powershell"),
            vec![
                "-NoProfile".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-Command".to_string(),
                format!("irm {INSTALL_PS1_URL} | iex"),
            ],
        )
    } else {
        (
            PathBuf::from("bash"),
            vec![
                "-c".to_string(),
                format!("curl -fsSL {INSTALL_SCRIPT_URL} | bash"),
            ],
        )
    };
    info!(program = %program.display(), "running install script");
    let output = runner
        .run(&program, &args, None)
        .map_err(|err| LauncherError::Process(format!("failed to run installer: {err}")))?;
    if !output.success() {
        return Err(LauncherError::Process(format!(
            "installer exited with status {}: {}",
            output.status_code,
            output.stderr_text()
        )));
    }
    Ok(output)
}

/// Calls the tool's own `update` entry point.
pub fn run_self_update(
    runner: &dyn ToolRunner,
    binary: &Path,
) -> Result<CommandOutput, LauncherError> {
    let output = runner
        .run(binary, &["update".to_string()], Some(Duration::from_secs(300)))
        .map_err(|err| LauncherError::Process(format!("{} update: {err}", binary.display())))?;
    if !output.success() {
        return Err(LauncherError::Process(format!(
            "{} update exited with status {}: {}",
            binary.display(),
            output.status_code,
            output.stderr_text()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::CannedFetcher;
    use crate::process::testing::MockRunner;
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use tempfile::{tempdir, TempDir};

    const BASE: &str = "https://dl.test/releases";

    fn linux() -> PlatformId {
        PlatformId::from_parts("linux", "x86_64")
    }

    fn v(raw: &str) -> Version {
        raw.parse().unwrap()
    }

    struct Fixture {
        dir: TempDir,
        fetcher: Arc<CannedFetcher>,
        engine: Arc<InstallEngine>,
    }

    fn fixture(require_manifest: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::new());
        let engine = Arc::new(
            InstallEngine::new(
                fetcher.clone(),
                linux(),
                BASE,
                dir.path().join("install"),
                dir.path().join("bin"),
            )
            .require_manifest(require_manifest),
        );
        Fixture {
            dir,
            fetcher,
            engine,
        }
    }

    fn publish(fetcher: &CannedFetcher, version: &str, payload: &[u8], digest: Option<String>) {
        fetcher.respond(
            &format!("{BASE}/{version}/linux-x64/claude"),
            200,
            payload.to_vec(),
        );
        if let Some(digest) = digest {
            fetcher.respond(
                &format!("{BASE}/{version}/manifest.json"),
                200,
                json!({"version": version, "platforms": {"linux-x64": {"checksum": digest, "size": payload.len()}}})
                    .to_string(),
            );
        }
    }

    fn run(engine: &Arc<InstallEngine>, version: &str) -> (InstallOutcome, Vec<ProgressEvent>) {
        let handle = engine.spawn(v(version)).unwrap();
        let events: Vec<ProgressEvent> = handle.events.iter().collect();
        (handle.wait(), events)
    }

    #[test]
    fn url_template_is_deterministic() {
        assert_eq!(
            resolve_download_url(BASE, &v("2.3.0"), &linux()).unwrap(),
            "https://dl.test/releases/2.3.0/linux-x64/claude"
        );
        let win = PlatformId::from_parts("windows", "x86_64");
        assert_eq!(
            resolve_download_url("https://dl.test/releases/", &v("2.3.0"), &win).unwrap(),
            "https://dl.test/releases/2.3.0/win32-x64/claude.exe"
        );
        let bsd = PlatformId::from_parts("freebsd", "x86_64");
        let err = resolve_download_url(BASE, &v("2.3.0"), &bsd).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_platform");
        assert_eq!(manifest_url(BASE, &v("2.3.0")), "https://dl.test/releases/2.3.0/manifest.json");
    }

    #[test]
    fn verified_install_links_binary() {
        let fx = fixture(true);
        let payload = b"\x7fELF fake binary";
        publish(&fx.fetcher, "2.3.0", payload, Some(hex::encode(Sha256::digest(payload))));

        let (outcome, events) = run(&fx.engine, "2.3.0");
        assert!(outcome.success, "{}", outcome.message);
        let linked = outcome.binary_path.unwrap();
        assert_eq!(linked, fx.dir.path().join("bin/claude"));
        assert_eq!(fs::read(&linked).unwrap(), payload);
        assert!(fx.engine.version_dir(&v("2.3.0")).join("claude").is_file());
        assert!(!fx.dir.path().join("install/.install.lock").exists());
        assert!(!fx.dir.path().join("install/downloads/claude-2.3.0.download").exists());

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { success: true, .. })));
        let mut last = 0;
        for event in &events {
            if let ProgressEvent::Progress { percent, .. } = event {
                assert!(*percent >= last);
                last = *percent;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn checksum_mismatch_fails_and_cleans_up() {
        let fx = fixture(true);
        publish(&fx.fetcher, "2.3.0", b"tampered", Some("0".repeat(64)));

        let (outcome, events) = run(&fx.engine, "2.3.0");
        assert!(!outcome.success);
        assert!(outcome.message.contains("checksum mismatch"));
        assert!(matches!(events.last(), Some(ProgressEvent::Error(_))));
        assert!(!fx.dir.path().join("install/downloads/claude-2.3.0.download").exists());
        assert!(!fx.engine.version_dir(&v("2.3.0")).exists());
        assert!(!fx.dir.path().join("bin/claude").exists());
    }

    #[test]
    fn missing_manifest_blocks_when_required() {
        let fx = fixture(true);
        publish(&fx.fetcher, "2.3.0", b"binary", None);
        let (outcome, _) = run(&fx.engine, "2.3.0");
        assert!(!outcome.success);
        assert!(outcome.message.contains("manifest"));
        assert!(!fx.dir.path().join("install/downloads/claude-2.3.0.download").exists());
    }

    #[test]
    fn missing_manifest_warns_when_optional() {
        let fx = fixture(false);
        publish(&fx.fetcher, "2.3.0", b"binary", None);
        let (outcome, _) = run(&fx.engine, "2.3.0");
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("unverified"));
    }

    #[test]
    fn blocking_install_forwards_every_event() {
        let fx = fixture(true);
        let payload = b"\x7fELF fake binary";
        publish(&fx.fetcher, "2.3.0", payload, Some(hex::encode(Sha256::digest(payload))));

        let mut seen = Vec::new();
        let outcome = fx
            .engine
            .install_blocking(v("2.3.0"), |event| seen.push(event.clone()))
            .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert!(matches!(seen.last(), Some(ProgressEvent::Finished { success: true, .. })));
        assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    struct TrickleBody {
        remaining: usize,
    }

    impl io::Read for TrickleBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(10));
            let n = buf.len().min(256).min(self.remaining);
            buf[..n].fill(7);
            self.remaining -= n;
            Ok(n)
        }
    }

    /// Serves the binary slowly enough to cancel mid-download.
    struct TrickleFetcher;

    impl HttpFetch for TrickleFetcher {
        fn fetch(&self, request: &HttpRequest<'_>) -> Result<crate::http::HttpResponse, LauncherError> {
            Err(LauncherError::Network(format!("{} not published", request.url)))
        }

        fn open_stream(&self, _url: &str) -> Result<crate::http::HttpBody, LauncherError> {
            let len = 64 * 1024;
            Ok(crate::http::HttpBody {
                content_length: Some(len as u64),
                reader: Box::new(TrickleBody { remaining: len }),
            })
        }
    }

    #[test]
    fn cancelled_attempt_cleans_up_and_releases_the_lock() {
        let dir = tempdir().unwrap();
        let install_root = dir.path().join("install");
        let engine = Arc::new(
            InstallEngine::new(
                Arc::new(TrickleFetcher),
                linux(),
                BASE,
                install_root.clone(),
                dir.path().join("bin"),
            )
            .require_manifest(false),
        );

        let handle = engine.spawn(v("2.3.0")).unwrap();
        let first = handle.events.recv().unwrap();
        assert!(!first.is_terminal());
        handle.cancel.cancel();
        let rest: Vec<ProgressEvent> = handle.events.iter().collect();
        let outcome = handle.wait();

        assert!(!outcome.success);
        assert_eq!(outcome.message, "cancelled");
        assert_eq!(
            rest.last(),
            Some(&ProgressEvent::Finished {
                success: false,
                message: "cancelled".to_string()
            })
        );
        assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(!install_root.join("downloads/claude-2.3.0.download").exists());
        assert!(!staging_dir(&engine.version_dir(&v("2.3.0"))).exists());
        assert!(!engine.version_dir(&v("2.3.0")).exists());
        assert!(!dir.path().join("bin/claude").exists());
        assert!(!install_root.join(".install.lock").exists());
        assert!(InstallLock::acquire(&install_root).is_ok());
    }

    #[test]
    fn network_failure_reports_error_event() {
        let fx = fixture(true);
        let (outcome, events) = run(&fx.engine, "9.9.9");
        assert!(!outcome.success);
        assert!(matches!(events.last(), Some(ProgressEvent::Error(_))));
        assert!(!fx.engine.version_dir(&v("9.9.9")).exists());
    }

    #[test]
    fn second_attempt_is_refused_while_locked() {
        let fx = fixture(true);
        let lock = InstallLock::acquire(&fx.dir.path().join("install")).unwrap();
        let err = fx.engine.spawn(v("2.3.0")).err().unwrap();
        assert_eq!(err.error_code(), "install_in_progress");
        drop(lock);
        assert!(InstallLock::acquire(&fx.dir.path().join("install")).is_ok());
    }

    #[test]
    fn target_version_falls_back_to_latest_file() {
        let fx = fixture(true);
        let catalog = VersionCatalog::new(fx.fetcher.clone(), "https://changelog.test/CHANGELOG.md");
        assert_eq!(
            fx.engine.resolve_target_version(&catalog, Some(v("1.0.0"))).unwrap(),
            v("1.0.0")
        );
        fx.fetcher.respond(&format!("{BASE}/latest"), 200, "2.4.1\n");
        assert_eq!(fx.engine.resolve_target_version(&catalog, None).unwrap(), v("2.4.1"));

        fx.fetcher.respond("https://changelog.test/CHANGELOG.md", 200, "## 2.5.0\n");
        assert_eq!(fx.engine.resolve_target_version(&catalog, None).unwrap(), v("2.5.0"));
    }

    #[test]
    fn target_version_fails_when_nothing_is_reachable() {
        let fx = fixture(true);
        let catalog = VersionCatalog::new(fx.fetcher.clone(), "https://changelog.test/CHANGELOG.md");
        assert!(fx.engine.resolve_target_version(&catalog, None).is_err());
    }

    #[test]
    fn install_script_command_per_platform() {
        let runner = MockRunner::default();
        runner.push_output(0, "installed");
        run_install_script(&runner, &linux()).unwrap();
        let call = &runner.calls()[0];
        assert_eq!(call.program, "bash");
        assert!(call.args[1].contains("install.sh"));

        runner.push_output(1, "");
        let win = PlatformId::from_parts("windows", "x86_64");
        assert!(run_install_script(&runner, &win).is_err());
        assert_eq!(runner.calls()[1].program, "powershell");
    }

    #[test]
    fn self_update_reports_failure() {
        let runner = MockRunner::default();
        runner.push_output(0, "updated");
        run_self_update(&runner, Path::new("claude")).unwrap();
        assert_eq!(runner.calls()[0].args, vec!["update".to_string()]);
        assert!(run_self_update(&runner, Path::new("claude")).is_err());
    }
}
