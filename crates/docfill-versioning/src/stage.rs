//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Artifact verification, extraction, and payload staging."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::checker::AssetKind;
use crate::error::{InstallError, InstallStep};

/// Smallest executable accepted by default.
pub const DEFAULT_MIN_EXECUTABLE_BYTES: u64 = 64 * 1024;

const MACHO_MAGICS: [[u8; 4]; 5] = [
    [0xFE, 0xED, 0xFA, 0xCE],
    [0xFE, 0xED, 0xFA, 0xCF],
    [0xCE, 0xFA, 0xED, 0xFE],
    [0xCF, 0xFA, 0xED, 0xFE],
    [0xCA, 0xFE, 0xBA, 0xBE],
];

/// Whether `header` starts like a PE, ELF or Mach-O binary.
#[must_use]
pub fn has_binary_header(header: &[u8]) -> bool {
    header.starts_with(b"MZ")
        || header.starts_with(b"\x7fELF")
        || MACHO_MAGICS.iter().any(|magic| header.starts_with(magic))
}

/// Reject downloads that are too small or do not look like an executable.
pub fn verify_executable(path: &Path, min_bytes: u64) -> Result<(), InstallError> {
    let size = fs::metadata(path)
        .map_err(InstallError::io(InstallStep::Verify, path))?
        .len();
    if size < min_bytes {
        return Err(InstallError::Verify(format!(
            "executable is {size} bytes, expected at least {min_bytes}"
        )));
    }
    let mut header = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map_err(InstallError::io(InstallStep::Verify, path))?;
    if !has_binary_header(&header) {
        return Err(InstallError::Verify(
            "download is not a recognised executable format".to_owned(),
        ));
    }
    Ok(())
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>, InstallError> {
    let file = File::open(path).map_err(InstallError::io(InstallStep::Verify, path))?;
    zip::ZipArchive::new(file).map_err(|err| InstallError::Archive(err.to_string()))
}

fn entry_file_name(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
}

/// Reject archives that do not open or hold no file named `executable_name`.
pub fn verify_archive(path: &Path, executable_name: &str) -> Result<(), InstallError> {
    let archive = open_archive(path)?;
    let found = archive
        .file_names()
        .any(|name| entry_file_name(name).eq_ignore_ascii_case(executable_name));
    if found {
        Ok(())
    } else {
        Err(InstallError::NoInstallableArtifact(format!(
            "archive does not contain {executable_name}"
        )))
    }
}

/// Extract `archive` below `dest`, skipping entries that would escape it.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, InstallError> {
    let mut zip = open_archive(archive)?;
    let mut extracted = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| InstallError::Archive(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            debug!(entry = entry.name(), "skipping archive entry outside the payload");
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(InstallError::io(InstallStep::Stage, &target))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(InstallError::io(InstallStep::Stage, parent))?;
        }
        let mut out = File::create(&target).map_err(InstallError::io(InstallStep::Stage, &target))?;
        io::copy(&mut entry, &mut out).map_err(InstallError::io(InstallStep::Stage, &target))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                    .map_err(InstallError::io(InstallStep::Stage, &target))?;
            }
        }
        extracted += 1;
    }
    Ok(extracted)
}

/// Breadth-first search for `name` below `root`.
///
/// The shallowest exact match wins; a case-insensitive match is used only
/// when no exact one exists.
#[must_use]
pub fn locate_executable(root: &Path, name: &str) -> Option<PathBuf> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut fallback = None;
    while let Some(dir) = queue.pop_front() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        children.sort();
        for path in children {
            if path.is_dir() {
                queue.push_back(path);
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name == name {
                return Some(path);
            }
            if fallback.is_none() && file_name.eq_ignore_ascii_case(name) {
                fallback = Some(path);
            }
        }
    }
    fallback
}

/// Remove every entry named in `preserve` from `root`, so the swap never overwrites it.
pub fn strip_preserved(root: &Path, preserve: &[String]) -> Result<Vec<PathBuf>, InstallError> {
    let mut removed = Vec::new();
    if preserve.is_empty() {
        return Ok(removed);
    }
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|err| {
            let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
            InstallError::io(InstallStep::Stage, path)(io::Error::other(err.to_string()))
        })?;
        let name = entry.file_name().to_string_lossy();
        if !preserve.iter().any(|keep| keep.eq_ignore_ascii_case(&name)) {
            continue;
        }
        let path = entry.path().to_path_buf();
        if entry.file_type().is_dir() {
            walker.skip_current_dir();
            fs::remove_dir_all(&path).map_err(InstallError::io(InstallStep::Stage, &path))?;
        } else {
            fs::remove_file(&path).map_err(InstallError::io(InstallStep::Stage, &path))?;
        }
        debug!(path = %path.display(), "preserved entry removed from payload");
        removed.push(path);
    }
    Ok(removed)
}

/// Verify `artifact` and lay it out under `scratch`, returning the payload root.
///
/// The payload root holds `executable_name` at its top level and mirrors the
/// application directory.
pub fn stage_artifact(
    artifact: &Path,
    kind: AssetKind,
    executable_name: &str,
    min_executable_bytes: u64,
    scratch: &Path,
) -> Result<PathBuf, InstallError> {
    match kind {
        AssetKind::InstallerExecutable => {
            verify_executable(artifact, min_executable_bytes)?;
            let payload = scratch.join("payload");
            fs::create_dir_all(&payload).map_err(InstallError::io(InstallStep::Stage, &payload))?;
            let target = payload.join(executable_name);
            fs::copy(artifact, &target).map_err(InstallError::io(InstallStep::Stage, &target))?;
            mark_executable(&target)?;
            Ok(payload)
        }
        AssetKind::Archive | AssetKind::SourceArchive => {
            verify_archive(artifact, executable_name)?;
            let extracted_root = scratch.join("extracted");
            let count = extract_archive(artifact, &extracted_root)?;
            let executable = locate_executable(&extracted_root, executable_name).ok_or_else(|| {
                InstallError::NoInstallableArtifact(format!(
                    "{executable_name} not found after extraction"
                ))
            })?;
            verify_executable(&executable, min_executable_bytes)?;
            mark_executable(&executable)?;
            let payload = executable
                .parent()
                .map_or_else(|| extracted_root.clone(), Path::to_path_buf);
            info!(entries = count, payload = %payload.display(), "archive staged");
            Ok(payload)
        }
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(InstallError::io(InstallStep::Stage, path))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).map_err(InstallError::io(InstallStep::Stage, path))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), InstallError> {
    Ok(())
}
