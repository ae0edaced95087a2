//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Backup, download, stage, and swap-script handoff for updates."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! An install runs backup, download, verification and staging entirely inside
//! a scratch directory under the application directory. Only when all of them
//! succeed is the payload moved to `__update_tmp` and a swap script launched.
//! Every error before that point leaves the installation as it was and removes
//! all scratch state.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::backup::{copy_tree, BackupManager, DEFAULT_KEEP_BACKUPS};
use crate::checker::UpdateManifest;
use crate::error::{InstallError, InstallStep};
use crate::fetch::{ArtifactFetcher, CancelFlag, ProgressFn};
use crate::logging::{record_failure, record_rollback, record_staged};
use crate::stage::{stage_artifact, strip_preserved, DEFAULT_MIN_EXECUTABLE_BYTES};
use crate::swap::{SwapLauncher, SwapPlan, DEFAULT_GRACE_PERIOD};

/// Directory below the application directory holding the payload the swap script copies.
pub const STAGING_DIR_NAME: &str = "__update_tmp";

/// User data never overwritten by an update.
pub const DEFAULT_PRESERVE: &[&str] = &[
    "backups",
    "templates",
    "license.json",
    "settings.ini",
    "docfill.toml",
    "update.log",
    STAGING_DIR_NAME,
    ".git",
];

/// Files copied into every backup next to the executable.
pub const DEFAULT_STATE_FILES: &[&str] = &["license.json", "settings.ini", "docfill.toml"];

/// Where and how updates are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSettings {
    /// Installation directory.
    pub app_dir: PathBuf,
    /// Executable file name inside `app_dir`.
    pub executable_name: String,
    /// Root of backup snapshots.
    pub backup_dir: PathBuf,
    /// Snapshots kept after pruning.
    pub keep_backups: usize,
    /// Smallest acceptable executable.
    pub min_executable_bytes: u64,
    /// Wait before the swap script kills this process.
    pub grace_period: Duration,
    /// Names stripped from every payload.
    pub preserve: Vec<String>,
    /// Names copied into backups.
    pub state_files: Vec<String>,
}

impl InstallSettings {
    /// Defaults for `executable_name` installed in `app_dir`.
    #[must_use]
    pub fn new(app_dir: impl Into<PathBuf>, executable_name: impl Into<String>) -> Self {
        let app_dir = app_dir.into();
        Self {
            backup_dir: app_dir.join("backups"),
            app_dir,
            executable_name: executable_name.into(),
            keep_backups: DEFAULT_KEEP_BACKUPS,
            min_executable_bytes: DEFAULT_MIN_EXECUTABLE_BYTES,
            grace_period: DEFAULT_GRACE_PERIOD,
            preserve: DEFAULT_PRESERVE.iter().map(|s| (*s).to_owned()).collect(),
            state_files: DEFAULT_STATE_FILES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Path of the installed executable.
    #[must_use]
    pub fn executable(&self) -> PathBuf {
        self.app_dir.join(&self.executable_name)
    }

    /// Path of the staged payload.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.app_dir.join(STAGING_DIR_NAME)
    }
}

/// Proof that a swap script is running. The caller must exit promptly so the
/// script can replace the files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapHandoff {
    /// Script that was launched.
    pub script: PathBuf,
    /// Payload it will copy.
    pub staging_dir: PathBuf,
    /// Version being installed; `None` for a rollback.
    pub version: Option<String>,
}

/// Installs updates through the two-process swap protocol.
pub struct UpdateInstaller {
    settings: InstallSettings,
    fetcher: Arc<dyn ArtifactFetcher>,
    launcher: Arc<dyn SwapLauncher>,
    backups: BackupManager,
}

impl UpdateInstaller {
    /// Installer using `fetcher` for downloads and `launcher` for the swap script.
    #[must_use]
    pub fn new(
        settings: InstallSettings,
        fetcher: Arc<dyn ArtifactFetcher>,
        launcher: Arc<dyn SwapLauncher>,
    ) -> Self {
        let backups = BackupManager::new(settings.backup_dir.clone());
        Self {
            settings,
            fetcher,
            launcher,
            backups,
        }
    }

    /// Installer settings.
    #[must_use]
    pub fn settings(&self) -> &InstallSettings {
        &self.settings
    }

    /// Backup snapshots of this installation.
    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Back up, download, verify and stage `manifest`, then launch the swap script.
    ///
    /// `cancel` is honoured until the download completes. On error no script
    /// exists and the installation is untouched.
    pub async fn install(
        &self,
        manifest: &UpdateManifest,
        progress: &ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<SwapHandoff, InstallError> {
        info!(version = %manifest.version, kind = %manifest.asset_kind, "installing update");
        let result = self.try_install(manifest, progress, cancel).await;
        if let Err(err) = &result {
            record_failure(err);
        }
        result
    }

    async fn try_install(
        &self,
        manifest: &UpdateManifest,
        progress: &ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<SwapHandoff, InstallError> {
        self.backup_best_effort();

        let scratch = tempfile::Builder::new()
            .prefix(".docfill-update-")
            .tempdir_in(&self.settings.app_dir)
            .map_err(InstallError::io(InstallStep::Prepare, &self.settings.app_dir))?;

        let artifact = scratch.path().join(artifact_file_name(&manifest.asset_name));
        self.fetcher
            .fetch(&manifest.download_url, &artifact, progress, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        let payload = stage_artifact(
            &artifact,
            manifest.asset_kind,
            &self.settings.executable_name,
            self.settings.min_executable_bytes,
            scratch.path(),
        )?;
        strip_preserved(&payload, &self.settings.preserve)?;

        let staging = self.promote(&payload)?;
        drop(scratch);

        let script = self.hand_over(&staging)?;
        record_staged(manifest, &script);
        self.prune_backups();
        Ok(SwapHandoff {
            script,
            staging_dir: staging,
            version: Some(manifest.version.clone()),
        })
    }

    /// Restore the newest backup through the same swap protocol.
    pub fn rollback(&self) -> Result<SwapHandoff, InstallError> {
        let result = self.try_rollback();
        if let Err(err) = &result {
            record_failure(err);
        }
        result
    }

    fn try_rollback(&self) -> Result<SwapHandoff, InstallError> {
        let backup = self
            .backups
            .latest()
            .map_err(InstallError::io(InstallStep::Rollback, self.backups.backup_dir()))?
            .ok_or_else(|| InstallError::NoBackup(self.backups.backup_dir().to_path_buf()))?;

        let staging = self.settings.staging_dir();
        self.reset_staging(&staging)?;
        let staged = copy_tree(&backup, &staging)
            .map_err(InstallError::io(InstallStep::Rollback, &backup))
            .and_then(|()| strip_preserved(&staging, &self.settings.preserve));
        if let Err(err) = staged {
            discard(&staging);
            return Err(err);
        }

        let script = self.hand_over(&staging)?;
        record_rollback(&backup, &script);
        Ok(SwapHandoff {
            script,
            staging_dir: staging,
            version: None,
        })
    }

    fn backup_best_effort(&self) {
        let now = Local::now().naive_local();
        if let Err(err) = self.backups.create(
            &self.settings.app_dir,
            &self.settings.executable_name,
            &self.settings.state_files,
            now,
        ) {
            warn!(error = %err, "backup failed, continuing update without one");
        }
    }

    /// Runs only once a swap script owns the update.
    fn prune_backups(&self) {
        if let Err(err) = self.backups.prune(self.settings.keep_backups) {
            warn!(error = %err, "backup pruning failed");
        }
    }

    fn reset_staging(&self, staging: &Path) -> Result<(), InstallError> {
        match fs::remove_dir_all(staging) {
            Ok(()) => debug!(path = %staging.display(), "stale staging directory removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(InstallError::io(InstallStep::Stage, staging)(err)),
        }
        Ok(())
    }

    fn promote(&self, payload: &Path) -> Result<PathBuf, InstallError> {
        let staging = self.settings.staging_dir();
        self.reset_staging(&staging)?;
        if fs::rename(payload, &staging).is_err() {
            if let Err(err) = copy_tree(payload, &staging) {
                discard(&staging);
                return Err(InstallError::io(InstallStep::Stage, &staging)(err));
            }
        }
        Ok(staging)
    }

    fn hand_over(&self, staging: &Path) -> Result<PathBuf, InstallError> {
        let plan = SwapPlan {
            app_dir: self.settings.app_dir.clone(),
            staging_dir: staging.to_path_buf(),
            executable: self.settings.executable(),
            pid: std::process::id(),
            grace: self.settings.grace_period,
        };
        let script = match plan.write_script(&self.settings.app_dir) {
            Ok(script) => script,
            Err(err) => {
                discard(staging);
                return Err(InstallError::io(InstallStep::Swap, &self.settings.app_dir)(err));
            }
        };
        if let Err(err) = self.launcher.launch(&script) {
            if let Err(cleanup) = fs::remove_file(&script) {
                warn!(script = %script.display(), error = %cleanup, "failed to remove swap script");
            }
            discard(staging);
            return Err(InstallError::Launch(err));
        }
        Ok(script)
    }
}

impl std::fmt::Debug for UpdateInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateInstaller")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn artifact_file_name(asset_name: &str) -> String {
    Path::new(asset_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact.download")
        .to_owned()
}

fn discard(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %err, "failed to remove staging directory");
        }
    }
}
