//! ---
//! docfill_section: "15-testing-qa"
//! docfill_subsection: "integration-tests"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "End-to-end licensing scenarios against file-backed collaborators."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use docfill_licensing::{
    Clock, Collaborators, FileLicenseStore, FileWitness, FixedClock, HardwareId, IntegrityKey,
    LicenseEvaluator, LicenseSettings, LicenseStore, NetworkError, RemoteAuthority,
    RemoteEntitlement, StaticIdentity, VerdictKind, WitnessStore,
};

fn at(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn hw(raw: &str) -> HardwareId {
    raw.parse().unwrap()
}

struct Machine {
    root: tempfile::TempDir,
    hardware_id: HardwareId,
    clock: Arc<FixedClock>,
}

impl Machine {
    fn new(hardware_id: &str, now: &str) -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            hardware_id: hw(hardware_id),
            clock: Arc::new(FixedClock::new(at(now))),
        }
    }

    fn store_path(&self) -> PathBuf {
        self.root.path().join("data/license.json")
    }

    fn witness_paths(&self) -> Vec<PathBuf> {
        let root = self.root.path();
        vec![
            root.join("app/.trial_marker"),
            root.join("config/DocumentFiller/.trial_used"),
            root.join("data/DocumentFiller/.cache_state"),
        ]
    }

    fn evaluator(&self, remote: Option<Arc<dyn RemoteAuthority>>) -> LicenseEvaluator {
        let settings = LicenseSettings::default();
        let store: Arc<dyn LicenseStore> = Arc::new(FileLicenseStore::new(
            self.store_path(),
            IntegrityKey::new(settings.secret.clone()),
        ));
        let witnesses = self
            .witness_paths()
            .into_iter()
            .map(|path| Arc::new(FileWitness::new(path)) as Arc<dyn WitnessStore>)
            .collect();
        LicenseEvaluator::new(
            settings,
            Collaborators {
                identity: Arc::new(StaticIdentity(self.hardware_id.clone())),
                clock: Arc::clone(&self.clock) as Arc<dyn Clock>,
                store,
                witnesses,
                remote,
            },
        )
    }
}

fn remove_if_present(path: &Path) {
    if path.exists() {
        fs::remove_file(path).unwrap();
    }
}

#[tokio::test]
async fn fresh_machine_gets_exactly_one_trial() {
    let machine = Machine::new("AAAAAAAA", "2025-01-01 10:00:00");
    let evaluator = machine.evaluator(None);

    let first = evaluator.verdict().await;
    assert!(first.is_valid);
    assert_eq!(first.kind, VerdictKind::Trial);
    assert_eq!(first.days_left, 7);
    assert!(machine.store_path().exists());
    assert!(machine.witness_paths().iter().all(|path| path.exists()));

    remove_if_present(&machine.store_path());
    let reinstalled = machine.evaluator(None);
    let second = reinstalled.verdict().await;
    assert!(!second.is_valid);
    assert_eq!(second.kind, VerdictKind::Expired);
    assert_eq!(second.days_left, 0);
}

#[tokio::test]
async fn trial_runs_out_after_seven_days() {
    let machine = Machine::new("AAAAAAAA", "2025-01-01 10:00:00");
    let evaluator = machine.evaluator(None);
    assert!(evaluator.verdict().await.is_valid);

    machine.clock.set(at("2025-01-08 23:00:00"));
    let last_day = evaluator.verdict().await;
    assert!(last_day.is_valid);
    assert_eq!(last_day.days_left, 1);

    machine.clock.set(at("2025-01-09 00:00:01"));
    let ended = evaluator.verdict().await;
    assert!(!ended.is_valid);
    assert_eq!(ended.kind, VerdictKind::Expired);
}

#[tokio::test]
async fn bad_signature_leaves_prior_record_untouched() {
    let machine = Machine::new("AAAAAAAA", "2024-12-01 09:00:00");
    let evaluator = machine.evaluator(None);
    assert!(evaluator.verdict().await.is_valid);
    let before = fs::read(machine.store_path()).unwrap();

    let err = evaluator
        .activate("DF-AAAAAAAA-20250101-030-0123456789ABCDEF")
        .unwrap_err();
    assert!(err.to_string().contains("signature"));
    assert_eq!(fs::read(machine.store_path()).unwrap(), before);

    let verdict = evaluator.verdict().await;
    assert_eq!(verdict.kind, VerdictKind::Trial);
}

#[tokio::test]
async fn activation_replaces_an_exhausted_trial() {
    let machine = Machine::new("1A2B3C4D", "2025-03-01 12:00:00");
    let evaluator = machine.evaluator(None);
    assert!(evaluator.verdict().await.is_valid);
    machine.clock.set(at("2025-04-01 12:00:00"));
    assert!(!evaluator.verdict().await.is_valid);

    let key = evaluator
        .codec()
        .encode(&machine.hardware_id, 365, at("2025-04-01 12:00:00").date())
        .unwrap();
    evaluator.activate(key.as_str()).unwrap();

    let info = evaluator.license_info().await;
    assert!(info.verdict.is_valid);
    assert_eq!(info.verdict.kind, VerdictKind::Premium);
    assert!(info.activated);
    assert!(!info.is_trial);
    assert_eq!(info.verdict.days_left, 365);
}

#[tokio::test]
async fn edited_store_fails_closed() {
    let machine = Machine::new("AAAAAAAA", "2025-01-01 10:00:00");
    let evaluator = machine.evaluator(None);
    assert!(evaluator.verdict().await.is_valid);

    let raw = fs::read_to_string(machine.store_path()).unwrap();
    fs::write(machine.store_path(), raw.replace("2025-01-08", "2035-01-08")).unwrap();

    let verdict = evaluator.verdict().await;
    assert!(!verdict.is_valid);
    assert_eq!(verdict.kind, VerdictKind::Invalid);
}

struct Unreachable;

#[async_trait]
impl RemoteAuthority for Unreachable {
    async fn lookup(&self, _: &HardwareId) -> Result<Option<RemoteEntitlement>, NetworkError> {
        Err(NetworkError::Timeout)
    }
}

struct Grants(RemoteEntitlement);

#[async_trait]
impl RemoteAuthority for Grants {
    async fn lookup(&self, _: &HardwareId) -> Result<Option<RemoteEntitlement>, NetworkError> {
        Ok(Some(self.0.clone()))
    }
}

#[tokio::test]
async fn unreachable_remote_is_no_stricter_than_offline() {
    let machine = Machine::new("AAAAAAAA", "2025-01-01 10:00:00");
    let online = machine.evaluator(Some(Arc::new(Unreachable) as Arc<dyn RemoteAuthority>));
    let verdict = online.verdict().await;
    assert!(verdict.is_valid);
    assert_eq!(verdict.kind, VerdictKind::Trial);
    assert_eq!(online.verdict().await, machine.evaluator(None).offline_verdict());
}

#[tokio::test]
async fn remote_grant_overrides_exhausted_local_state() {
    let machine = Machine::new("AAAAAAAA", "2025-01-01 10:00:00");
    for path in machine.witness_paths() {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"used").unwrap();
    }
    assert!(!machine.evaluator(None).verdict().await.is_valid);

    let remote = Grants(RemoteEntitlement {
        hardware_id: "AAAAAAAA".to_owned(),
        active: true,
        expires: None,
        license_type: Some("premium".to_owned()),
        name: None,
        email: None,
    });
    let verdict = machine.evaluator(Some(Arc::new(remote) as Arc<dyn RemoteAuthority>)).verdict().await;
    assert!(verdict.is_valid);
    assert_eq!(verdict.kind, VerdictKind::Online);
    assert_eq!(verdict.days_left, 999);
}
