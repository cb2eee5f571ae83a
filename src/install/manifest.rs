use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::LauncherError;
use crate::http::{HttpFetch, HttpRequest};

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReleaseManifest {
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformEntry>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformEntry {
    #[serde(default, alias = "sha256")]
    pub checksum: Option<String>,
}

impl ReleaseManifest {
    /// Expected SHA-256 for `platform_id`, falling back to a top-level digest.
    pub fn digest_for(&self, platform_id: &str) -> Option<String> {
        self.platforms
            .get(platform_id)
            .and_then(|entry| entry.checksum.as_deref())
            .or(self.sha256.as_deref())
            .or(self.checksum.as_deref())
            .and_then(normalize_digest)
    }
}

pub fn normalize_digest(raw: &str) -> Option<String> {
    let candidate = raw.trim().trim_start_matches("sha256:").to_ascii_lowercase();
    if candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(candidate)
    } else {
        None
    }
}

/// Downloads the manifest and returns the digest for `platform_id`.
///
/// Every way of not getting a usable digest is reported as `ManifestMissing`.
pub fn fetch_expected_digest(
    http: &dyn HttpFetch,
    manifest_url: &str,
    platform_id: &str,
) -> Result<String, LauncherError> {
    let response = http
        .fetch(&HttpRequest::get(manifest_url, MANIFEST_TIMEOUT))
        .map_err(|err| LauncherError::ManifestMissing(format!("{manifest_url}: {err}")))?;
    if !response.is_success() {
        return Err(LauncherError::ManifestMissing(format!(
            "{manifest_url} answered HTTP {}",
            response.status
        )));
    }
    let manifest: ReleaseManifest = serde_json::from_slice(&response.body).map_err(|err| {
        LauncherError::ManifestMissing(format!("{manifest_url} is not a valid manifest: {err}"))
    })?;
    manifest.digest_for(platform_id).ok_or_else(|| {
        LauncherError::ManifestMissing(format!(
            "{manifest_url} has no checksum for {platform_id}"
        ))
    })
}

pub fn sha256_file(path: &Path) -> Result<String, LauncherError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares the file digest with `expected`; on mismatch the file is deleted.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), LauncherError> {
    let actual = sha256_file(path)?;
    let expected = normalize_digest(expected).unwrap_or_else(|| expected.trim().to_string());
    if actual == expected {
        return Ok(());
    }
    if let Err(err) = fs::remove_file(path) {
        warn!("failed to remove {} after checksum mismatch: {err}", path.display());
    }
    Err(LauncherError::ChecksumMismatch {
        path: path.display().to_string(),
        expected,
        actual,
    })
}
