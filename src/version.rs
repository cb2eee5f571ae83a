use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::LauncherError;
use crate::http::{HttpFetch, HttpRequest};
use crate::process::ToolRunner;

pub const LATEST_VERSION_TTL: Duration = Duration::from_secs(60 * 60);
const CHANGELOG_TIMEOUT: Duration = Duration::from_secs(10);
const VERSION_FLAG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = LauncherError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let mut parts = body.split('.');
        let mut next = || -> Result<u64, LauncherError> {
            parts
                .next()
                .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
                .and_then(|part| part.parse::<u64>().ok())
                .ok_or_else(|| LauncherError::VersionParse(raw.to_string()))
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(LauncherError::VersionParse(raw.to_string()));
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn version_token_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\d.])v?(\d+)\.(\d+)\.(\d+)(?:[^\d.]|$)").ok())
        .as_ref()
}

fn changelog_heading_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:#{1,6}\s*\[?|\[)v?(\d+\.\d+\.\d+)\]?(?:\s|$|[^\d.])").ok()
    })
    .as_ref()
}

/// First `major.minor.patch` token in free-form text such as `--version` output.
pub fn find_version_token(text: &str) -> Option<Version> {
    let caps = version_token_regex()?.captures(text)?;
    Some(Version::new(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// First bracketed or heading-level version in a changelog document.
pub fn parse_changelog(text: &str) -> Option<Version> {
    let heading = changelog_heading_regex()?;
    text.lines().find_map(|line| {
        let caps = heading.captures(line)?;
        caps[1].parse().ok()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    NotInstalled,
    UpToDate,
    UpdateAvailable,
    VersionCheckFailed,
    LatestCheckFailed,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::UpToDate => "up_to_date",
            Self::UpdateAvailable => "update_available",
            Self::VersionCheckFailed => "version_check_failed",
            Self::LatestCheckFailed => "latest_check_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub needs_update: bool,
    pub installed: Option<Version>,
    pub latest: Option<Version>,
    pub status: UpdateState,
}

impl UpdateStatus {
    pub fn classify(
        installed: Result<Version, &LauncherError>,
        latest: Option<Version>,
    ) -> Self {
        let installed = match installed {
            Ok(version) => version,
            Err(LauncherError::BinaryNotFound(_)) => {
                return Self {
                    needs_update: true,
                    installed: None,
                    latest,
                    status: UpdateState::NotInstalled,
                }
            }
            Err(_) => {
                return Self {
                    needs_update: false,
                    installed: None,
                    latest,
                    status: UpdateState::VersionCheckFailed,
                }
            }
        };
        match latest {
            None => Self {
                needs_update: false,
                installed: Some(installed),
                latest: None,
                status: UpdateState::LatestCheckFailed,
            },
            Some(latest) if installed < latest => Self {
                needs_update: true,
                installed: Some(installed),
                latest: Some(latest),
                status: UpdateState::UpdateAvailable,
            },
            Some(latest) => Self {
                needs_update: false,
                installed: Some(installed),
                latest: Some(latest),
                status: UpdateState::UpToDate,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionCacheFile {
    latest_version: Version,
    last_checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CachedLatest {
    version: Version,
    fetched_at: Instant,
}

pub struct VersionCatalog {
    changelog_url: String,
    ttl: Duration,
    cache_file: Option<PathBuf>,
    http: Arc<dyn HttpFetch>,
    cache: RwLock<Option<CachedLatest>>,
}

impl VersionCatalog {
    pub fn new(http: Arc<dyn HttpFetch>, changelog_url: impl Into<String>) -> Self {
        Self {
            changelog_url: changelog_url.into(),
            ttl: LATEST_VERSION_TTL,
            cache_file: None,
            http,
            cache: RwLock::new(None),
        }
    }

    pub fn with_cache_file(mut self, path: PathBuf) -> Self {
        self.cache_file = Some(path);
        self
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Latest published version, or `None` when it cannot be determined.
    pub fn fetch_latest_version(&self) -> Option<Version> {
        if let Some(version) = self.cached_in_memory() {
            debug!(%version, "latest version served from memory cache");
            return Some(version);
        }
        if let Some(version) = self.cached_on_disk() {
            debug!(%version, "latest version served from disk cache");
            self.remember(version);
            return Some(version);
        }

        let request = HttpRequest::get(&self.changelog_url, CHANGELOG_TIMEOUT);
        let response = match self
            .http
            .fetch(&request)
            .and_then(|response| response.ensure_success(&self.changelog_url))
        {
            Ok(response) => response,
            Err(err) => {
                warn!("latest version check failed: {err}");
                return None;
            }
        };
        let Some(version) = parse_changelog(&response.text()) else {
            warn!(url = %self.changelog_url, "no version heading found in changelog");
            return None;
        };
        self.remember(version);
        self.persist(version);
        Some(version)
    }

    pub fn installed_version(
        &self,
        runner: &dyn ToolRunner,
        binary: &Path,
    ) -> Result<Version, LauncherError> {
        let output = runner
            .run(binary, &["--version".to_string()], Some(VERSION_FLAG_TIMEOUT))
            .map_err(|err| LauncherError::BinaryNotFound(format!("{}: {err}", binary.display())))?;
        if !output.success() {
            return Err(LauncherError::BinaryNotFound(format!(
                "{} --version exited with status {}",
                binary.display(),
                output.status_code
            )));
        }
        let text = output.stdout_text();
        find_version_token(&text).ok_or(LauncherError::VersionParse(text))
    }

    pub fn check_update_status(&self, runner: &dyn ToolRunner, binary: &Path) -> UpdateStatus {
        let installed = self.installed_version(runner, binary);
        if let Err(err) = &installed {
            debug!("installed version unavailable: {err}");
        }
        let latest = match &installed {
            Ok(_) => self.fetch_latest_version(),
            Err(_) => None,
        };
        UpdateStatus::classify(installed.as_ref().copied(), latest)
    }

    fn cached_in_memory(&self) -> Option<Version> {
        let guard = self.cache.read().ok()?;
        let cached = (*guard)?;
        if cached.fetched_at.elapsed() < self.ttl {
            Some(cached.version)
        } else {
            None
        }
    }

    fn remember(&self, version: Version) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(CachedLatest {
                version,
                fetched_at: Instant::now(),
            });
        }
    }

    fn cached_on_disk(&self) -> Option<Version> {
        let path = self.cache_file.as_ref()?;
        let content = fs::read_to_string(path).ok()?;
        let cached: VersionCacheFile = serde_json::from_str(&content).ok()?;
        let age = Utc::now().signed_duration_since(cached.last_checked_at);
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        if age >= chrono::Duration::zero() && age < ttl {
            Some(cached.latest_version)
        } else {
            None
        }
    }

    fn persist(&self, version: Version) {
        let Some(path) = &self.cache_file else {
            return;
        };
        let payload = VersionCacheFile {
            latest_version: version,
            last_checked_at: Utc::now(),
        };
        let result = serde_json::to_string_pretty(&payload)
            .map_err(LauncherError::from)
            .and_then(|text| crate::config::write_atomic_text_file(path, &text, None));
        if let Err(err) = result {
            warn!("failed to write version cache {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::CannedFetcher;
    use crate::process::testing::MockRunner;
    use std::io;
    use tempfile::tempdir;

    const CHANGELOG_URL: &str = "https://example.test/CHANGELOG.md";

    fn v(raw: &str) -> Version {
        raw.parse().unwrap()
    }

    #[test]
    fn ordering_is_numeric_per_component() {
        assert!(v("2.1.9") < v("2.1.10"));
        assert!(v("2.0.0") < v("2.0.1"));
        assert!(v("1.99.99") < v("2.0.0"));
        assert_eq!(v("v2.3.0"), v("2.3.0"));
        let mut list = vec![v("2.1.10"), v("2.1.9"), v("0.9.0"), v("10.0.0")];
        list.sort();
        let rendered: Vec<String> = list.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["0.9.0", "2.1.9", "2.1.10", "10.0.0"]);
    }

    #[test]
    fn malformed_versions_are_errors() {
        for raw in ["", "2.1", "2.1.x", "2.1.3.4", "a.b.c", "2..1"] {
            let err = raw.parse::<Version>().unwrap_err();
            assert_eq!(err.error_code(), "version_unparseable", "{raw}");
        }
    }

    #[test]
    fn changelog_first_heading_wins() {
        let doc = "# Changelog\n\nSome intro mentioning 9.9.9 in prose.\n\n## 2.1.42\n- fix\n\n## 2.1.41\n";
        assert_eq!(parse_changelog(doc), Some(v("2.1.42")));
        let bracketed = "Changelog\n[1.0.3] - 2024-01-01\n[1.0.2]\n";
        assert_eq!(parse_changelog(bracketed), Some(v("1.0.3")));
        let heading_bracket = "## [v3.0.1] - released\n";
        assert_eq!(parse_changelog(heading_bracket), Some(v("3.0.1")));
        assert_eq!(parse_changelog("# Changelog\nnothing here\n"), None);
    }

    #[test]
    fn version_token_found_in_tool_output() {
        assert_eq!(find_version_token("2.1.42 (Claude Code)"), Some(v("2.1.42")));
        assert_eq!(find_version_token("tool v1.2.3"), Some(v("1.2.3")));
        assert_eq!(find_version_token("no version"), None);
    }

    #[test]
    fn latest_version_is_cached_within_window() {
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.respond(CHANGELOG_URL, 200, "## 2.3.0\n");
        let catalog = VersionCatalog::new(fetcher.clone(), CHANGELOG_URL);
        assert_eq!(catalog.fetch_latest_version(), Some(v("2.3.0")));
        fetcher.respond(CHANGELOG_URL, 200, "## 2.4.0\n");
        assert_eq!(catalog.fetch_latest_version(), Some(v("2.3.0")));
        assert_eq!(fetcher.call_count(CHANGELOG_URL), 1);
    }

    #[test]
    fn expired_cache_refetches() {
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.respond(CHANGELOG_URL, 200, "## 2.3.0\n");
        let catalog =
            VersionCatalog::new(fetcher.clone(), CHANGELOG_URL).with_ttl(Duration::ZERO);
        catalog.fetch_latest_version();
        catalog.fetch_latest_version();
        assert_eq!(fetcher.call_count(CHANGELOG_URL), 2);
    }

    #[test]
    fn network_failure_yields_none() {
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.fail(CHANGELOG_URL, "offline");
        let catalog = VersionCatalog::new(fetcher.clone(), CHANGELOG_URL);
        assert_eq!(catalog.fetch_latest_version(), None);

        fetcher.respond(CHANGELOG_URL, 503, "busy");
        assert_eq!(catalog.fetch_latest_version(), None);

        fetcher.respond(CHANGELOG_URL, 200, "# Changelog\n");
        assert_eq!(catalog.fetch_latest_version(), None);
    }

    #[test]
    fn disk_cache_is_shared_across_catalogs() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("version.json");
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.respond(CHANGELOG_URL, 200, "## 2.3.0\n");

        let first = VersionCatalog::new(fetcher.clone(), CHANGELOG_URL).with_cache_file(cache.clone());
        assert_eq!(first.fetch_latest_version(), Some(v("2.3.0")));
        assert!(cache.exists());

        let second = VersionCatalog::new(fetcher.clone(), CHANGELOG_URL).with_cache_file(cache);
        assert_eq!(second.fetch_latest_version(), Some(v("2.3.0")));
        assert_eq!(fetcher.call_count(CHANGELOG_URL), 1);
    }

    #[test]
    fn stale_disk_cache_is_ignored() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("version.json");
        let stale = VersionCacheFile {
            latest_version: v("1.0.0"),
            last_checked_at: Utc::now() - chrono::Duration::hours(2),
        };
        fs::write(&cache, serde_json::to_string(&stale).unwrap()).unwrap();
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.respond(CHANGELOG_URL, 200, "## 2.3.0\n");
        let catalog = VersionCatalog::new(fetcher.clone(), CHANGELOG_URL).with_cache_file(cache);
        assert_eq!(catalog.fetch_latest_version(), Some(v("2.3.0")));
        assert_eq!(fetcher.call_count(CHANGELOG_URL), 1);
    }

    #[test]
    fn installed_version_reads_version_flag() {
        let fetcher = Arc::new(CannedFetcher::new());
        let catalog = VersionCatalog::new(fetcher, CHANGELOG_URL);
        let runner = MockRunner::default();
        runner.push_output(0, "2.1.9 (Claude Code)\n");
        assert_eq!(
            catalog.installed_version(&runner, Path::new("claude")).unwrap(),
            v("2.1.9")
        );
        assert_eq!(runner.calls()[0].args, vec!["--version".to_string()]);

        runner.push_output(0, "garbage");
        let err = catalog.installed_version(&runner, Path::new("claude")).unwrap_err();
        assert_eq!(err.error_code(), "version_unparseable");

        runner.push_error(io::ErrorKind::NotFound);
        let err = catalog.installed_version(&runner, Path::new("claude")).unwrap_err();
        assert_eq!(err.error_code(), "binary_not_found");
    }

    #[test]
    fn update_status_covers_every_state() {
        let fetcher = Arc::new(CannedFetcher::new());
        fetcher.respond(CHANGELOG_URL, 200, "## 2.1.10\n");
        let catalog = VersionCatalog::new(fetcher, CHANGELOG_URL);
        let runner = MockRunner::default();

        runner.push_output(0, "2.1.9");
        let status = catalog.check_update_status(&runner, Path::new("claude"));
        assert_eq!(status.status, UpdateState::UpdateAvailable);
        assert!(status.needs_update);

        runner.push_output(0, "2.1.10");
        let status = catalog.check_update_status(&runner, Path::new("claude"));
        assert_eq!(status.status, UpdateState::UpToDate);
        assert!(!status.needs_update);

        let status = catalog.check_update_status(&runner, Path::new("claude"));
        assert_eq!(status.status, UpdateState::NotInstalled);

        runner.push_output(0, "???");
        let status = catalog.check_update_status(&runner, Path::new("claude"));
        assert_eq!(status.status, UpdateState::VersionCheckFailed);
    }

    #[test]
    fn latest_unknown_is_reported_separately() {
        let fetcher = Arc::new(CannedFetcher::new());
        let catalog = VersionCatalog::new(fetcher, CHANGELOG_URL);
        let runner = MockRunner::default();
        runner.push_output(0, "2.1.9");
        let status = catalog.check_update_status(&runner, Path::new("claude"));
        assert_eq!(status.status, UpdateState::LatestCheckFailed);
        assert_eq!(status.installed, Some(v("2.1.9")));
        assert!(!status.needs_update);
    }
}
