//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Tamper-evident persistence of license records."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! One JSON document holds the current record per machine plus a short
//! history of the records it replaced. Writes go to a temporary file in the
//! same directory which is then renamed over the document, so a crash mid-save
//! leaves the previous document intact.
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fingerprint::HardwareId;
use crate::integrity::IntegrityKey;
use crate::record::{LicenseKind, LicenseRecord};

/// Maximum number of superseded summaries kept in the document.
pub const HISTORY_LIMIT: usize = 32;

const DOCUMENT_VERSION: u32 = 1;

/// Result of looking up the record for one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLookup {
    /// Nothing stored for this machine.
    Absent,
    /// A record exists but its integrity tag does not verify.
    Tampered(LicenseRecord),
    /// A verified record bound to this machine.
    Valid(LicenseRecord),
}

/// Persistence seam used by the evaluator and the trial guard.
pub trait LicenseStore: Send + Sync {
    /// Look up the record bound to `hardware_id`.
    fn fetch(&self, hardware_id: &HardwareId) -> Result<StoreLookup, StoreError>;

    /// Seal and upsert `record`, returning the stored copy.
    fn save(&self, record: LicenseRecord) -> Result<LicenseRecord, StoreError>;

    /// Whether any current or superseded record for `hardware_id` was a trial.
    fn trial_history(&self, hardware_id: &HardwareId) -> Result<bool, StoreError>;

    /// Recompute and compare the record's integrity tag.
    fn verify_integrity(&self, record: &LicenseRecord) -> bool;

    /// Verified record for `hardware_id`; tampered and missing records read as absent.
    fn load(&self, hardware_id: &HardwareId) -> Result<Option<LicenseRecord>, StoreError> {
        Ok(match self.fetch(hardware_id)? {
            StoreLookup::Valid(record) => Some(record),
            StoreLookup::Absent | StoreLookup::Tampered(_) => None,
        })
    }
}

/// Summary of a record that was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersededRecord {
    /// Machine the replaced record was bound to.
    pub hardware_id: HardwareId,
    /// Kind of the replaced record.
    #[serde(rename = "type")]
    pub kind: LicenseKind,
    /// Whether the replaced record was a trial.
    pub is_trial: bool,
    /// When the replacement happened.
    pub superseded_at: NaiveDateTime,
}

/// On-disk document layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Layout version.
    #[serde(default)]
    pub version: u32,
    /// Current record per hardware id.
    #[serde(default)]
    pub records: BTreeMap<HardwareId, LicenseRecord>,
    /// Oldest first.
    #[serde(default)]
    pub superseded: Vec<SupersededRecord>,
}

impl StoreDocument {
    fn lookup(&self, hardware_id: &HardwareId, key: &IntegrityKey) -> StoreLookup {
        match self.records.get(hardware_id) {
            None => StoreLookup::Absent,
            Some(record) if &record.hardware_id != hardware_id || !key.verify(record) => {
                StoreLookup::Tampered(record.clone())
            }
            Some(record) => StoreLookup::Valid(record.clone()),
        }
    }

    fn upsert(&mut self, record: LicenseRecord) {
        self.version = DOCUMENT_VERSION;
        let replaced_at = record.activation_date;
        if let Some(previous) = self.records.insert(record.hardware_id.clone(), record) {
            self.superseded.push(SupersededRecord {
                hardware_id: previous.hardware_id,
                kind: previous.kind,
                is_trial: previous.is_trial,
                superseded_at: replaced_at,
            });
            self.trim_history();
        }
    }

    /// Drop the oldest entries past the limit, sparing trial summaries while others remain.
    fn trim_history(&mut self) {
        while self.superseded.len() > HISTORY_LIMIT {
            let victim = self
                .superseded
                .iter()
                .position(|entry| !entry.is_trial)
                .unwrap_or(0);
            self.superseded.remove(victim);
        }
    }

    fn trial_history(&self, hardware_id: &HardwareId) -> bool {
        let current = self
            .records
            .get(hardware_id)
            .is_some_and(|record| record.is_trial || record.kind == LicenseKind::Trial);
        current
            || self
                .superseded
                .iter()
                .any(|entry| &entry.hardware_id == hardware_id && entry.is_trial)
    }
}

/// JSON file store with atomic replacement.
#[derive(Debug)]
pub struct FileLicenseStore {
    path: PathBuf,
    key: IntegrityKey,
    write_lock: Mutex<()>,
}

impl FileLicenseStore {
    /// Store backed by the document at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, key: IntegrityKey) -> Self {
        Self {
            path: path.into(),
            key,
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the store document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<StoreDocument, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StoreDocument::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        })
    }

    fn quarantine(&self) -> Result<(), StoreError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{stamp}"));
        fs::rename(&self.path, &aside).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        warn!(path = %self.path.display(), "unreadable license store moved aside");
        Ok(())
    }

    fn write_document(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_err(parent))?;

        let data = serde_json::to_vec_pretty(document)?;
        let temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err(parent))?;
        let mut file = temp.as_file();
        file.write_all(&data).map_err(io_err(temp.path()))?;
        file.sync_all().map_err(io_err(temp.path()))?;
        temp.persist(&self.path)
            .map_err(|err| StoreError::Io {
                path: self.path.clone(),
                source: err.error,
            })?;
        debug!(path = %self.path.display(), "license store written");
        Ok(())
    }
}

impl LicenseStore for FileLicenseStore {
    fn fetch(&self, hardware_id: &HardwareId) -> Result<StoreLookup, StoreError> {
        Ok(self.read_document()?.lookup(hardware_id, &self.key))
    }

    fn save(&self, record: LicenseRecord) -> Result<LicenseRecord, StoreError> {
        let _guard = self.write_lock.lock();
        let mut document = match self.read_document() {
            Ok(document) => document,
            Err(StoreError::Corrupt { .. }) => {
                self.quarantine()?;
                StoreDocument::default()
            }
            Err(err) => return Err(err),
        };
        let sealed = self.key.seal(record);
        document.upsert(sealed.clone());
        self.write_document(&document)?;
        Ok(sealed)
    }

    fn trial_history(&self, hardware_id: &HardwareId) -> Result<bool, StoreError> {
        Ok(self.read_document()?.trial_history(hardware_id))
    }

    fn verify_integrity(&self, record: &LicenseRecord) -> bool {
        self.key.verify(record)
    }
}

/// In-process store for tests and embedding.
#[derive(Debug)]
pub struct MemoryLicenseStore {
    key: IntegrityKey,
    document: Mutex<StoreDocument>,
}

impl MemoryLicenseStore {
    /// Empty store.
    #[must_use]
    pub fn new(key: IntegrityKey) -> Self {
        Self {
            key,
            document: Mutex::new(StoreDocument::default()),
        }
    }

    /// Remove the current record for `hardware_id`, leaving history in place.
    pub fn forget(&self, hardware_id: &HardwareId) -> Option<LicenseRecord> {
        self.document.lock().records.remove(hardware_id)
    }

    /// Replace the stored record without resealing it.
    pub fn put_raw(&self, record: LicenseRecord) {
        self.document
            .lock()
            .records
            .insert(record.hardware_id.clone(), record);
    }

    /// Copy of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> StoreDocument {
        self.document.lock().clone()
    }
}

impl LicenseStore for MemoryLicenseStore {
    fn fetch(&self, hardware_id: &HardwareId) -> Result<StoreLookup, StoreError> {
        Ok(self.document.lock().lookup(hardware_id, &self.key))
    }

    fn save(&self, record: LicenseRecord) -> Result<LicenseRecord, StoreError> {
        let sealed = self.key.seal(record);
        self.document.lock().upsert(sealed.clone());
        Ok(sealed)
    }

    fn trial_history(&self, hardware_id: &HardwareId) -> Result<bool, StoreError> {
        Ok(self.document.lock().trial_history(hardware_id))
    }

    fn verify_integrity(&self, record: &LicenseRecord) -> bool {
        self.key.verify(record)
    }
}
