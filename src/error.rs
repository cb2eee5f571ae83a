use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("request to {url} failed with HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("release manifest unavailable: {0}")]
    ManifestMissing(String),
    #[error("archive is corrupt or unsafe: {0}")]
    Archive(String),
    #[error("binary not found: {0}")]
    BinaryNotFound(String),
    #[error("version unparseable: {0}")]
    VersionParse(String),
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error("no terminal emulator found: {0}")]
    NoTerminal(String),
    #[error("cancelled")]
    Cancelled,
    #[error("another install is already running for {0}")]
    InstallInProgress(String),
    #[error("{0}")]
    NotInteractive(String),
    #[error("{0}")]
    Workflow(String),
}

impl LauncherError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::Io(_) => "io_error",
            Self::Prompt(_) => "prompt_failed",
            Self::Yaml(_) => "config_unreadable",
            Self::Json(_) => "json_error",
            Self::Http(_) | Self::Network(_) | Self::HttpStatus { .. } => "network_failure",
            Self::Process(_) => "process_failed",
            Self::UnsupportedPlatform(_) => "unsupported_platform",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::ManifestMissing(_) => "manifest_missing",
            Self::Archive(_) => "archive_unsafe",
            Self::BinaryNotFound(_) => "binary_not_found",
            Self::VersionParse(_) => "version_unparseable",
            Self::BackendUnreachable(_) => "backend_unreachable",
            Self::NoTerminal(_) => "no_terminal",
            Self::Cancelled => "cancelled",
            Self::InstallInProgress(_) => "install_in_progress",
            Self::NotInteractive(_) => "not_interactive",
            Self::Workflow(_) => "workflow_failed",
        }
    }

    #[cfg(test)]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }
}

impl From<zip::result::ZipError> for LauncherError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}
