use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

use crate::error::LauncherError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
    RawBinary,
}

/// Identifies the container by its leading bytes; the file name is never consulted.
pub fn detect_kind(path: &Path) -> Result<ArchiveKind, LauncherError> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let read = file.read(&mut header[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    let header = &header[..filled];
    if header.starts_with(&GZIP_MAGIC) {
        Ok(ArchiveKind::TarGz)
    } else if header.starts_with(&ZIP_MAGIC) {
        Ok(ArchiveKind::Zip)
    } else {
        Ok(ArchiveKind::RawBinary)
    }
}

/// Unpacks `archive_path` into `dest_dir`.
///
/// A payload that is neither gzip nor zip is copied to `dest_dir/<binary_name>`.
pub fn extract(
    archive_path: &Path,
    dest_dir: &Path,
    binary_name: &str,
) -> Result<ArchiveKind, LauncherError> {
    fs::create_dir_all(dest_dir)?;
    let kind = detect_kind(archive_path)?;
    debug!(?kind, path = %archive_path.display(), "extracting");
    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive_path, dest_dir)?,
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir)?,
        ArchiveKind::RawBinary => {
            fs::copy(archive_path, dest_dir.join(binary_name))?;
        }
    }
    Ok(kind)
}

/// Relative form of an archive member path, or `None` if it could escape the destination.
pub fn normalize_member_path(raw: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if normalized.as_os_str().is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), LauncherError> {
    let file = File::open(archive_path)?;
    let mut zip = ZipArchive::new(file)?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let raw_name = entry.name().to_string();
        let Some(relative) = normalize_member_path(Path::new(&raw_name)) else {
            if raw_name.trim_matches('/').is_empty() || raw_name == "./" {
                continue;
            }
            return Err(LauncherError::Archive(format!(
                "entry escapes destination: {raw_name}"
            )));
        };
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & 0o170000 == 0o120000)
        {
            return Err(LauncherError::Archive(format!(
                "symlink entries are not supported: {raw_name}"
            )));
        }
        let target = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o755))?;
        }
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<(), LauncherError> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|err| LauncherError::Archive(err.to_string()))?;
    for item in entries {
        let mut entry = item.map_err(|err| LauncherError::Archive(err.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|err| LauncherError::Archive(err.to_string()))?
            .into_owned();
        let Some(relative) = normalize_member_path(&raw_path) else {
            if raw_path.as_os_str().is_empty() || raw_path == Path::new(".") || raw_path == Path::new("./") {
                continue;
            }
            return Err(LauncherError::Archive(format!(
                "entry escapes destination: {}",
                raw_path.display()
            )));
        };
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(LauncherError::Archive(format!(
                "link entries are not supported: {}",
                raw_path.display()
            )));
        }
        let target = dest_dir.join(relative);
        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|err| LauncherError::Archive(format!("{}: {err}", raw_path.display())))?;
    }
    Ok(())
}

/// Finds `binary_name` under `root` (shallowest match wins) and makes it executable.
pub fn locate_binary(root: &Path, binary_name: &str) -> Result<PathBuf, LauncherError> {
    let mut frontier = vec![root.to_path_buf()];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        let mut level: Vec<PathBuf> = Vec::new();
        for dir in frontier {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    next.push(path);
                } else if file_type.is_file() && entry.file_name() == binary_name {
                    level.push(path);
                }
            }
        }
        level.sort();
        if let Some(found) = level.into_iter().next() {
            make_executable(&found)?;
            return Ok(found);
        }
        frontier = next;
    }
    Err(LauncherError::BinaryNotFound(format!(
        "{binary_name} not found under {}",
        root.display()
    )))
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<(), LauncherError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<(), LauncherError> {
    Ok(())
}
