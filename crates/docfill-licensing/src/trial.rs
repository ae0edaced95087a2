//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Single-trial enforcement through redundant witnesses."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! A trial counts as used when any witness is present or the store remembers a
//! trial record for this machine. Deleting some witnesses is not enough to get
//! a second trial; every one of them has to go, together with the store.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::error::WitnessError;
use crate::fingerprint::HardwareId;
use crate::store::LicenseStore;

/// One place that can remember the trial was consumed.
pub trait WitnessStore: Send + Sync {
    /// Human readable location, used in logs.
    fn location(&self) -> String;

    /// Whether this witness records a consumed trial for `hardware_id`.
    fn is_present(&self, hardware_id: &HardwareId) -> Result<bool, WitnessError>;

    /// Record the trial as consumed.
    fn mark(&self, hardware_id: &HardwareId, at: NaiveDateTime) -> Result<(), WitnessError>;
}

/// Witness stored as a small marker file.
#[derive(Debug, Clone)]
pub struct FileWitness {
    path: PathBuf,
}

impl FileWitness {
    /// Witness at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, source: io::Error) -> WitnessError {
        WitnessError {
            location: self.location(),
            source,
        }
    }
}

impl WitnessStore for FileWitness {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    // Any marker counts, whatever machine wrote it.
    fn is_present(&self, _hardware_id: &HardwareId) -> Result<bool, WitnessError> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.error(err)),
        }
    }

    fn mark(&self, hardware_id: &HardwareId, at: NaiveDateTime) -> Result<(), WitnessError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.error(err))?;
        }
        let mut file = fs::File::create(&self.path).map_err(|err| self.error(err))?;
        writeln!(file, "{hardware_id} {}", at.format("%Y-%m-%dT%H:%M:%S"))
            .map_err(|err| self.error(err))?;
        Ok(())
    }
}

/// Witness locations for the current platform, easiest to remove first.
///
/// `include_system` adds a machine-wide location that survives removing the
/// user profile; it is skipped when the process cannot be expected to write there.
#[must_use]
pub fn default_witnesses(
    app_dir: &Path,
    product: &str,
    include_system: bool,
) -> Vec<Arc<dyn WitnessStore>> {
    let mut paths = vec![app_dir.join(".trial_marker")];
    if let Some(config) = dirs::config_dir() {
        paths.push(config.join(product).join(".trial_used"));
    }
    if let Some(data) = dirs::data_local_dir() {
        paths.push(data.join(product).join(".cache_state"));
    }
    if include_system {
        paths.extend(system_witness_path(product));
    }
    paths.dedup();
    paths
        .into_iter()
        .map(|path| Arc::new(FileWitness::new(path)) as Arc<dyn WitnessStore>)
        .collect()
}

#[cfg(windows)]
fn system_witness_path(product: &str) -> Option<PathBuf> {
    std::env::var_os("PROGRAMDATA").map(|root| PathBuf::from(root).join(product).join(".trial"))
}

#[cfg(target_os = "macos")]
fn system_witness_path(product: &str) -> Option<PathBuf> {
    Some(PathBuf::from("/Users/Shared").join(format!(".{product}-trial")))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn system_witness_path(product: &str) -> Option<PathBuf> {
    Some(PathBuf::from("/var/tmp").join(format!(".{product}-trial")))
}

#[cfg(not(any(unix, windows)))]
fn system_witness_path(_product: &str) -> Option<PathBuf> {
    None
}

/// Outcome of a best-effort marking pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MarkReport {
    /// Locations written.
    pub written: Vec<String>,
    /// Locations that refused the write.
    pub failed: Vec<String>,
}

/// Decides whether this machine may still receive a trial.
pub struct TrialGuard {
    witnesses: Vec<Arc<dyn WitnessStore>>,
    store: Arc<dyn LicenseStore>,
}

impl TrialGuard {
    /// Guard consulting `witnesses` and the trial history in `store`.
    #[must_use]
    pub fn new(witnesses: Vec<Arc<dyn WitnessStore>>, store: Arc<dyn LicenseStore>) -> Self {
        Self { witnesses, store }
    }

    /// Registered witnesses.
    #[must_use]
    pub fn witnesses(&self) -> &[Arc<dyn WitnessStore>] {
        &self.witnesses
    }

    /// True if any witness reports a consumed trial. Unreadable witnesses count as absent.
    #[must_use]
    pub fn witness_present(&self, hardware_id: &HardwareId) -> bool {
        self.witnesses
            .iter()
            .any(|witness| match witness.is_present(hardware_id) {
                Ok(present) => present,
                Err(err) => {
                    warn!(error = %err, "trial witness could not be read");
                    false
                }
            })
    }

    /// True if any witness exists or the store holds a trial record for this machine.
    ///
    /// A store that cannot be read answers "used", so a broken store never
    /// hands out a fresh trial.
    #[must_use]
    pub fn trial_already_used(&self, hardware_id: &HardwareId) -> bool {
        if self.witness_present(hardware_id) {
            return true;
        }
        match self.store.trial_history(hardware_id) {
            Ok(used) => used,
            Err(err) => {
                warn!(error = %err, "license store unreadable while checking trial history");
                true
            }
        }
    }

    /// Write every reachable witness. Failures are logged and skipped.
    pub fn mark_trial_used(&self, hardware_id: &HardwareId, at: NaiveDateTime) -> MarkReport {
        let mut report = MarkReport::default();
        for witness in &self.witnesses {
            match witness.mark(hardware_id, at) {
                Ok(()) => report.written.push(witness.location()),
                Err(err) => {
                    warn!(error = %err, "trial witness could not be written");
                    report.failed.push(witness.location());
                }
            }
        }
        info!(
            hardware_id = %hardware_id,
            written = report.written.len(),
            failed = report.failed.len(),
            "trial witnesses marked"
        );
        report
    }
}

impl std::fmt::Debug for TrialGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locations: Vec<String> = self.witnesses.iter().map(|w| w.location()).collect();
        f.debug_struct("TrialGuard")
            .field("witnesses", &locations)
            .finish_non_exhaustive()
    }
}
