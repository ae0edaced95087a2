//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Timestamped installation backups with pruning."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{InstallError, InstallStep};

const BACKUP_PREFIX: &str = "backup_";

/// Backups kept by default.
pub const DEFAULT_KEEP_BACKUPS: usize = 3;

/// Manages `<backup_dir>/backup_YYYYMMDD_HHMMSS/` snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    /// Manager rooted at `backup_dir`.
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Root of all snapshots.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy the executable and any existing `state_files` of `app_dir` into a new snapshot.
    pub fn create(
        &self,
        app_dir: &Path,
        executable_name: &str,
        state_files: &[String],
        now: NaiveDateTime,
    ) -> Result<PathBuf, InstallError> {
        let target = self.fresh_snapshot_dir(now);
        fs::create_dir_all(&target).map_err(InstallError::io(InstallStep::Backup, &target))?;
        if let Err(err) = fill_snapshot(&target, app_dir, executable_name, state_files) {
            if let Err(cleanup) = fs::remove_dir_all(&target) {
                warn!(path = %target.display(), error = %cleanup, "failed to remove partial backup");
            }
            return Err(err);
        }
        info!(backup = %target.display(), "installation backed up");
        Ok(target)
    }

    fn fresh_snapshot_dir(&self, now: NaiveDateTime) -> PathBuf {
        let stem = format!("{BACKUP_PREFIX}{}", now.format("%Y%m%d_%H%M%S"));
        let mut candidate = self.backup_dir.join(&stem);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{stem}_{suffix}"));
            suffix += 1;
        }
        candidate
    }

    /// Snapshots, newest first.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut snapshots: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(BACKUP_PREFIX))
            .map(|entry| entry.path())
            .collect();
        snapshots.sort_by(|a, b| snapshot_key(b).cmp(&snapshot_key(a)));
        Ok(snapshots)
    }

    /// Newest snapshot, if any.
    pub fn latest(&self) -> io::Result<Option<PathBuf>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Delete all but the newest `keep` snapshots. Returns the removed paths.
    pub fn prune(&self, keep: usize) -> io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for stale in self.list()?.into_iter().skip(keep) {
            match fs::remove_dir_all(&stale) {
                Ok(()) => removed.push(stale),
                Err(err) => warn!(path = %stale.display(), error = %err, "failed to prune backup"),
            }
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), keep, "old backups pruned");
        }
        Ok(removed)
    }
}

fn fill_snapshot(
    target: &Path,
    app_dir: &Path,
    executable_name: &str,
    state_files: &[String],
) -> Result<(), InstallError> {
    let executable = app_dir.join(executable_name);
    fs::copy(&executable, target.join(executable_name))
        .map_err(InstallError::io(InstallStep::Backup, &executable))?;
    for name in state_files {
        let source = app_dir.join(name);
        if !source.exists() {
            debug!(path = %source.display(), "state file absent, not backed up");
            continue;
        }
        copy_tree(&source, &target.join(name))
            .map_err(InstallError::io(InstallStep::Backup, &source))?;
    }
    Ok(())
}

// backup_20250101_101010_2 sorts after backup_20250101_101010.
fn snapshot_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp_len = BACKUP_PREFIX.len() + "YYYYmmdd_HHMMSS".len();
    let (stamp, rest) = match (name.get(..stamp_len), name.get(stamp_len..)) {
        (Some(stamp), Some(rest)) => (stamp, rest),
        _ => (name.as_str(), ""),
    };
    let suffix = rest.trim_start_matches('_').parse().unwrap_or(0);
    (stamp.to_owned(), suffix)
}

/// Copy a file, or a directory recursively, to `dest`.
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        return Ok(());
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn install(dir: &Path) {
        fs::write(dir.join("DocumentFiller.exe"), b"MZold").unwrap();
        fs::write(dir.join("settings.json"), b"{}").unwrap();
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join("templates/letter.docx"), b"tpl").unwrap();
    }

    #[test]
    fn snapshot_holds_executable_and_state() {
        let app = tempfile::tempdir().unwrap();
        install(app.path());
        let manager = BackupManager::new(app.path().join("backups"));
        let snapshot = manager
            .create(
                app.path(),
                "DocumentFiller.exe",
                &["settings.json".to_owned(), "templates".to_owned(), "missing.db".to_owned()],
                at("2025-01-01 10:11:12"),
            )
            .unwrap();
        assert!(snapshot.ends_with("backup_20250101_101112"));
        assert_eq!(fs::read(snapshot.join("DocumentFiller.exe")).unwrap(), b"MZold");
        assert!(snapshot.join("settings.json").exists());
        assert!(snapshot.join("templates/letter.docx").exists());
    }

    #[test]
    fn prune_keeps_newest() {
        let app = tempfile::tempdir().unwrap();
        install(app.path());
        let manager = BackupManager::new(app.path().join("backups"));
        for stamp in ["2025-01-01 10:00:00", "2025-01-03 10:00:00", "2025-01-02 10:00:00"] {
            manager
                .create(app.path(), "DocumentFiller.exe", &[], at(stamp))
                .unwrap();
        }
        let same_second = manager
            .create(app.path(), "DocumentFiller.exe", &[], at("2025-01-03 10:00:00"))
            .unwrap();
        assert!(same_second.ends_with("backup_20250103_100000_1"));
        assert_eq!(manager.latest().unwrap(), Some(same_second.clone()));

        let removed = manager.prune(2).unwrap();
        assert_eq!(removed.len(), 2);
        let left = manager.list().unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0], same_second);
        assert!(left[1].ends_with("backup_20250103_100000"));
    }

    #[test]
    fn missing_executable_fails_backup() {
        let app = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(app.path().join("backups"));
        let err = manager
            .create(app.path(), "DocumentFiller.exe", &[], at("2025-01-01 10:00:00"))
            .unwrap_err();
        assert_eq!(err.step(), InstallStep::Backup);
        assert!(manager.list().unwrap().is_empty());
    }
}
