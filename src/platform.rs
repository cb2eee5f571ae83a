use serde::Serialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Darwin,
    Linux,
    Windows,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
    Other,
}

/// Canonical description of the machine the launcher runs on.
///
/// Computed once per process by [`detect_platform`]; unknown combinations are
/// represented rather than rejected so callers can branch on "unsupported".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformId {
    pub os: Os,
    pub arch: Arch,
    pub musl: bool,
    pub wsl: bool,
}

static PLATFORM: OnceLock<PlatformId> = OnceLock::new();

pub fn detect_platform() -> PlatformId {
    *PLATFORM.get_or_init(|| {
        let mut platform = PlatformId::from_parts(env::consts::OS, env::consts::ARCH);
        if platform.os == Os::Linux {
            platform.musl = cfg!(target_env = "musl") || musl_loader_present(Path::new("/lib"));
            platform.wsl = proc_version_mentions_microsoft();
        }
        platform
    })
}

pub fn is_download_supported(platform: &PlatformId) -> bool {
    platform.download_identifier().is_some()
}

impl Os {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "macos" | "darwin" => Self::Darwin,
            "linux" => Self::Linux,
            "windows" | "win32" => Self::Windows,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Darwin => "darwin",
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }
}

impl Arch {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Self::X64,
            "aarch64" | "arm64" => Self::Arm64,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
            Self::Other => "other",
        }
    }
}

impl PlatformId {
    pub fn from_parts(os: &str, arch: &str) -> Self {
        Self {
            os: Os::parse(os),
            arch: Arch::parse(arch),
            musl: false,
            wsl: false,
        }
    }

    #[cfg(test)]
    pub fn with_musl(mut self, musl: bool) -> Self {
        self.musl = musl && self.os == Os::Linux;
        self
    }

    /// Identifier used in release URLs, e.g. `darwin-arm64` or `linux-x64-musl`.
    pub fn download_identifier(&self) -> Option<String> {
        let arch = match self.arch {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
            Arch::Other => return None,
        };
        match self.os {
            Os::Darwin => Some(format!("darwin-{arch}")),
            Os::Linux if self.musl => Some(format!("linux-{arch}-musl")),
            Os::Linux => Some(format!("linux-{arch}")),
            Os::Windows => Some(format!("win32-{arch}")),
            Os::Unknown => None,
        }
    }

    pub fn binary_name(&self) -> &'static str {
        if self.os == Os::Windows {
            "claude.exe"
        } else {
            "claude"
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self.os {
            Os::Darwin => "macOS",
            Os::Linux if self.wsl => "WSL",
            Os::Linux => "Linux",
            Os::Windows => "Windows",
            Os::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())?;
        if self.musl {
            write!(f, "-musl")?;
        }
        Ok(())
    }
}

fn musl_loader_present(lib_dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(lib_dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("ld-musl-") || name.starts_with("libc.musl-")
    })
}

fn proc_version_mentions_microsoft() -> bool {
    fs::read_to_string("/proc/version")
        .map(|content| content.to_ascii_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn download_identifiers_cover_supported_matrix() {
        let cases = [
            ("macos", "x86_64", "darwin-x64"),
            ("macos", "aarch64", "darwin-arm64"),
            ("linux", "x86_64", "linux-x64"),
            ("linux", "aarch64", "linux-arm64"),
            ("windows", "x86_64", "win32-x64"),
            ("windows", "aarch64", "win32-arm64"),
        ];
        for (os, arch, expected) in cases {
            let platform = PlatformId::from_parts(os, arch);
            assert_eq!(platform.download_identifier().as_deref(), Some(expected));
            assert!(is_download_supported(&platform));
        }
    }

    #[test]
    fn musl_variant_only_applies_to_linux() {
        let linux = PlatformId::from_parts("linux", "amd64").with_musl(true);
        assert_eq!(linux.download_identifier().as_deref(), Some("linux-x64-musl"));
        let mac = PlatformId::from_parts("darwin", "arm64").with_musl(true);
        assert!(!mac.musl);
        assert_eq!(mac.download_identifier().as_deref(), Some("darwin-arm64"));
    }

    #[test]
    fn unknown_combinations_are_unsupported_not_errors() {
        let bsd = PlatformId::from_parts("freebsd", "x86_64");
        assert_eq!(bsd.os, Os::Unknown);
        assert!(!is_download_supported(&bsd));

        let riscv = PlatformId::from_parts("linux", "riscv64");
        assert_eq!(riscv.arch, Arch::Other);
        assert!(riscv.download_identifier().is_none());
    }

    #[test]
    fn windows_binary_has_exe_suffix() {
        assert_eq!(PlatformId::from_parts("windows", "x86_64").binary_name(), "claude.exe");
        assert_eq!(PlatformId::from_parts("linux", "x86_64").binary_name(), "claude");
    }

    #[test]
    fn detect_platform_is_stable() {
        assert_eq!(detect_platform(), detect_platform());
    }

    #[test]
    fn musl_loader_detection_reads_lib_dir() {
        let dir = tempdir().unwrap();
        assert!(!musl_loader_present(dir.path()));
        fs::write(dir.path().join("ld-musl-x86_64.so.1"), b"").unwrap();
        assert!(musl_loader_present(dir.path()));
    }
}
