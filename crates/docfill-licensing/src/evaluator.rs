//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "License state machine producing verdicts for the host."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! Every verdict walks the same table:
//!
//! 1. A reachable remote authority that grants this machine wins outright and
//!    the store is synchronised with an `online` record.
//! 2. Otherwise the local store decides. Unreadable or tampered records fail
//!    closed.
//! 3. A missing record becomes a trial, or an `expired` record when the trial
//!    was already consumed.
//! 4. Trial and licensed records are checked against their expiration.
//!
//! Remote failures never make the outcome stricter than running offline.
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::clock::{days_left, Clock, UNBOUNDED_DAYS};
use crate::error::{ActivationError, KeyError};
use crate::features::{Feature, FeatureSet};
use crate::fingerprint::{HardwareId, MachineIdentity};
use crate::key::KeyCodec;
use crate::logging::{
    record_activation, record_activation_failure, record_trial_issued, record_trial_refused,
    record_verdict,
};
use crate::record::{LicenseKind, LicenseRecord, ONLINE_VALID};
use crate::remote::{RemoteAuthority, RemoteEntitlement, RemoteExpiry};
use crate::settings::LicenseSettings;
use crate::store::{LicenseStore, StoreLookup};
use crate::trial::{TrialGuard, WitnessStore};

/// Kind reported to the host alongside a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VerdictKind {
    /// Trial in progress or just ended.
    Trial,
    /// Activated basic license.
    Standard,
    /// Activated premium license.
    Premium,
    /// Entitlement granted by the remote authority.
    Online,
    /// Trial consumed, license lapsed, or entitlement revoked.
    Expired,
    /// Record unusable: tampered, unreadable, foreign, or incomplete.
    Invalid,
}

impl From<LicenseKind> for VerdictKind {
    fn from(kind: LicenseKind) -> Self {
        match kind {
            LicenseKind::Trial => VerdictKind::Trial,
            LicenseKind::Standard => VerdictKind::Standard,
            LicenseKind::Premium => VerdictKind::Premium,
            LicenseKind::Online => VerdictKind::Online,
            LicenseKind::Expired => VerdictKind::Expired,
        }
    }
}

/// Answer handed to the host: may the application run, and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Whether use is granted.
    pub is_valid: bool,
    /// Days remaining; at least 1 whenever `is_valid` holds, 0 otherwise.
    pub days_left: i64,
    /// Human readable explanation naming the check that decided.
    pub message: String,
    /// Entitlement kind.
    pub kind: VerdictKind,
    #[serde(skip)]
    features: FeatureSet,
}

impl Verdict {
    fn granted(kind: VerdictKind, days_left: i64, message: String, features: FeatureSet) -> Self {
        Self {
            is_valid: true,
            days_left: days_left.max(1),
            message,
            kind,
            features,
        }
    }

    fn denied(kind: VerdictKind, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            days_left: 0,
            message: message.into(),
            kind,
            features: FeatureSet::default(),
        }
    }

    /// Features usable under this verdict.
    #[must_use]
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }
}

/// Verdict plus the stored record's details, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseInfo {
    /// The verdict itself.
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Machine fingerprint.
    pub hardware_id: HardwareId,
    /// Stored `activated` flag.
    pub activated: bool,
    /// Stored `is_trial` flag.
    pub is_trial: bool,
    /// Stored expiration.
    pub expiration_date: Option<NaiveDateTime>,
    /// Features usable under the verdict.
    pub features: FeatureSet,
}

/// Collaborators the evaluator delegates all I/O to.
pub struct Collaborators {
    /// Names the current machine.
    pub identity: Arc<dyn MachineIdentity>,
    /// Supplies the current time.
    pub clock: Arc<dyn Clock>,
    /// License record persistence.
    pub store: Arc<dyn LicenseStore>,
    /// Trial witnesses, in registration order.
    pub witnesses: Vec<Arc<dyn WitnessStore>>,
    /// Optional remote authority.
    pub remote: Option<Arc<dyn RemoteAuthority>>,
}

enum RemoteOpinion {
    Granted(RemoteEntitlement),
    Denied,
    Unavailable,
}

mod messages {
    pub const TAMPERED: &str = "license data failed its integrity check";
    pub const STORE_UNREADABLE: &str = "license data could not be read";
    pub const STORE_UNWRITABLE: &str = "license data could not be saved";
    pub const TRIAL_EXHAUSTED: &str =
        "the trial period has already been used on this computer; activation required";
    pub const TRIAL_ENDED: &str = "trial period has ended; activation required";
    pub const REVOKED: &str = "online license is no longer active; activation required";
    pub const NOT_ACTIVATED: &str = "license is not activated";
    pub const WRONG_MACHINE: &str = "license is not valid for this computer";
    pub const MISSING_EXPIRATION: &str = "license has no expiration date";
    pub const EXPIRED: &str = "license has expired";
    pub const ACTIVE: &str = "license active";
    pub const ONLINE_ACTIVE: &str = "online license active";

    pub fn trial_active(days: i64) -> String {
        format!("trial active, {days} days remaining")
    }

    pub fn trial_created(days: i64) -> String {
        format!("trial period created for {days} days")
    }
}

/// Decides whether this installation may run.
pub struct LicenseEvaluator {
    settings: LicenseSettings,
    identity: Arc<dyn MachineIdentity>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn LicenseStore>,
    guard: TrialGuard,
    remote: Option<Arc<dyn RemoteAuthority>>,
    codec: KeyCodec,
    write_lock: Mutex<()>,
}

impl LicenseEvaluator {
    /// Evaluator using `settings` and the given collaborators.
    #[must_use]
    pub fn new(settings: LicenseSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            identity,
            clock,
            store,
            witnesses,
            remote,
        } = collaborators;
        Self {
            codec: KeyCodec::new(settings.secret.clone()),
            guard: TrialGuard::new(witnesses, Arc::clone(&store)),
            settings,
            identity,
            clock,
            store,
            remote,
            write_lock: Mutex::new(()),
        }
    }

    /// Fingerprint of the current machine.
    #[must_use]
    pub fn hardware_id(&self) -> HardwareId {
        self.identity.hardware_id()
    }

    /// Trial guard shared with the evaluator.
    #[must_use]
    pub fn trial_guard(&self) -> &TrialGuard {
        &self.guard
    }

    /// Key codec keyed with the configured secret.
    #[must_use]
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Full evaluation: remote authority first, then local state.
    pub async fn verdict(&self) -> Verdict {
        let hardware_id = self.identity.hardware_id();
        let verdict = match self.remote_opinion(&hardware_id).await {
            RemoteOpinion::Granted(entitlement) => self.remote_verdict(&hardware_id, &entitlement),
            RemoteOpinion::Denied => {
                self.revoke_online_record(&hardware_id);
                self.evaluate_local(&hardware_id)
            }
            RemoteOpinion::Unavailable => self.evaluate_local(&hardware_id),
        };
        record_verdict(&verdict);
        verdict
    }

    /// Evaluation without consulting the remote authority.
    pub fn offline_verdict(&self) -> Verdict {
        let verdict = self.evaluate_local(&self.identity.hardware_id());
        record_verdict(&verdict);
        verdict
    }

    /// Verdict plus stored record details.
    pub async fn license_info(&self) -> LicenseInfo {
        let verdict = self.verdict().await;
        let hardware_id = self.identity.hardware_id();
        let record = match self.store.fetch(&hardware_id) {
            Ok(StoreLookup::Valid(record)) => Some(record),
            _ => None,
        };
        LicenseInfo {
            features: verdict.features.clone(),
            activated: record.as_ref().is_some_and(|r| r.activated),
            is_trial: record.as_ref().is_some_and(|r| r.is_trial),
            expiration_date: record.and_then(|r| r.expiration_date),
            hardware_id,
            verdict,
        }
    }

    /// True when the installation is entitled and the entitlement carries `feature`.
    pub async fn is_feature_available(&self, feature: Feature) -> bool {
        let verdict = self.verdict().await;
        verdict.is_valid && verdict.features.contains(feature)
    }

    /// Validate `key` and store the resulting license.
    ///
    /// On any failure the previously stored record is left as it was.
    pub fn activate(&self, key: &str) -> Result<LicenseRecord, ActivationError> {
        let key = key.trim();
        let hardware_id = self.identity.hardware_id();
        let now = self.clock.now();
        let decoded = self
            .codec
            .decode(key, &hardware_id, now)
            .inspect_err(record_activation_failure)?;

        let _guard = self.write_lock.lock();
        let record = self
            .store
            .save(LicenseRecord::activated(key, &decoded, now))?;
        record_activation(&record);
        Ok(record)
    }

    /// Check a key without storing anything.
    pub fn check_key(&self, key: &str) -> Result<(), KeyError> {
        self.codec
            .decode(key, &self.identity.hardware_id(), self.clock.now())
            .map(|_| ())
    }

    async fn remote_opinion(&self, hardware_id: &HardwareId) -> RemoteOpinion {
        let Some(remote) = &self.remote else {
            return RemoteOpinion::Unavailable;
        };
        match remote.lookup(hardware_id).await {
            Ok(Some(entitlement)) if entitlement.grants(self.clock.now()) => {
                RemoteOpinion::Granted(entitlement)
            }
            Ok(_) => {
                debug!(hardware_id = %hardware_id, "remote authority holds no active entitlement");
                RemoteOpinion::Denied
            }
            Err(err) => {
                warn!(error = %err, "remote authority unavailable; using local license state");
                RemoteOpinion::Unavailable
            }
        }
    }

    fn remote_verdict(&self, hardware_id: &HardwareId, entitlement: &RemoteEntitlement) -> Verdict {
        let now = self.clock.now();
        let expiration = match entitlement.expiry() {
            RemoteExpiry::At(expires) => Some(expires),
            RemoteExpiry::Unbounded | RemoteExpiry::Unreadable => None,
        };
        let days = expiration.map_or(UNBOUNDED_DAYS, |expires| days_left(now, expires));
        let features = entitlement.features();
        self.sync_online_record(hardware_id, now, expiration, &features);
        Verdict::granted(
            VerdictKind::Online,
            days,
            messages::ONLINE_ACTIVE.to_owned(),
            features,
        )
    }

    fn sync_online_record(
        &self,
        hardware_id: &HardwareId,
        now: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        features: &FeatureSet,
    ) {
        let _guard = self.write_lock.lock();
        let candidate =
            LicenseRecord::online(hardware_id.clone(), now, expiration, features.clone());
        match self.store.fetch(hardware_id) {
            Ok(StoreLookup::Valid(current))
                if current.is_key_activation() && current.in_force(now) =>
            {
                debug!("active key license kept; remote entitlement not synchronised");
                return;
            }
            Ok(StoreLookup::Valid(current)) if current.same_entitlement(&candidate) => return,
            _ => {}
        }
        match self.store.save(candidate) {
            Ok(_) => info!(hardware_id = %hardware_id, "online entitlement synchronised"),
            Err(err) => warn!(error = %err, "online entitlement could not be synchronised"),
        }
    }

    fn revoke_online_record(&self, hardware_id: &HardwareId) {
        let _guard = self.write_lock.lock();
        let Ok(StoreLookup::Valid(current)) = self.store.fetch(hardware_id) else {
            return;
        };
        if current.kind != LicenseKind::Online {
            return;
        }
        let mut revoked = current;
        revoked.kind = LicenseKind::Expired;
        revoked.activated = false;
        revoked.features = FeatureSet::default();
        revoked.activation_date = self.clock.now();
        revoked.expiration_date = Some(revoked.activation_date);
        match self.store.save(revoked) {
            Ok(_) => warn!(hardware_id = %hardware_id, "online entitlement revoked by remote authority"),
            Err(err) => warn!(error = %err, "revoked online entitlement could not be stored"),
        }
    }

    fn evaluate_local(&self, hardware_id: &HardwareId) -> Verdict {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        match self.store.fetch(hardware_id) {
            Err(err) => {
                warn!(error = %err, "license store unreadable");
                Verdict::denied(VerdictKind::Invalid, messages::STORE_UNREADABLE)
            }
            Ok(StoreLookup::Tampered(_)) => {
                warn!(hardware_id = %hardware_id, "license record failed integrity check");
                Verdict::denied(VerdictKind::Invalid, messages::TAMPERED)
            }
            Ok(StoreLookup::Absent) => self.first_run(hardware_id, now),
            Ok(StoreLookup::Valid(record)) if record.is_trial => {
                self.check_trial(hardware_id, record, now)
            }
            Ok(StoreLookup::Valid(record)) => check_licensed(hardware_id, &record, now),
        }
    }

    fn first_run(&self, hardware_id: &HardwareId, now: NaiveDateTime) -> Verdict {
        if self.guard.trial_already_used(hardware_id) {
            return self.refuse_trial(hardware_id, now);
        }
        match self.issue_trial(hardware_id, now) {
            Ok(record) => self.check_trial(hardware_id, record, now),
            Err(verdict) => verdict,
        }
    }

    fn refuse_trial(&self, hardware_id: &HardwareId, now: NaiveDateTime) -> Verdict {
        record_trial_refused(hardware_id);
        if let Err(err) = self
            .store
            .save(LicenseRecord::exhausted(hardware_id.clone(), now))
        {
            warn!(error = %err, "exhausted-trial record could not be stored");
        }
        Verdict::denied(VerdictKind::Expired, messages::TRIAL_EXHAUSTED)
    }

    /// Store a fresh trial, then mark the witnesses. Nothing is marked if the save fails.
    fn issue_trial(
        &self,
        hardware_id: &HardwareId,
        now: NaiveDateTime,
    ) -> Result<LicenseRecord, Verdict> {
        let trial = LicenseRecord::trial(hardware_id.clone(), now, self.settings.trial_days);
        let record = self.store.save(trial).map_err(|err| {
            warn!(error = %err, "trial record could not be stored");
            Verdict::denied(VerdictKind::Invalid, messages::STORE_UNWRITABLE)
        })?;
        self.guard.mark_trial_used(hardware_id, now);
        record_trial_issued(hardware_id, &record);
        Ok(record)
    }

    fn check_trial(
        &self,
        hardware_id: &HardwareId,
        record: LicenseRecord,
        now: NaiveDateTime,
    ) -> Verdict {
        if &record.hardware_id != hardware_id {
            return Verdict::denied(VerdictKind::Invalid, messages::WRONG_MACHINE);
        }
        let Some(expiration) = record.expiration_date else {
            return self.repair_trial(hardware_id, now);
        };
        if now > expiration {
            return Verdict::denied(VerdictKind::Expired, messages::TRIAL_ENDED);
        }
        let days = days_left(now, expiration);
        Verdict::granted(
            VerdictKind::Trial,
            days,
            messages::trial_active(days),
            record.features,
        )
    }

    /// A trial without an expiration gets one fresh trial, unless a witness says otherwise.
    fn repair_trial(&self, hardware_id: &HardwareId, now: NaiveDateTime) -> Verdict {
        if self.guard.witness_present(hardware_id) {
            return self.refuse_trial(hardware_id, now);
        }
        match self.issue_trial(hardware_id, now) {
            Ok(record) => {
                let days = record
                    .expiration_date
                    .map_or(i64::from(self.settings.trial_days), |exp| days_left(now, exp));
                Verdict::granted(
                    VerdictKind::Trial,
                    days,
                    messages::trial_created(days),
                    record.features,
                )
            }
            Err(verdict) => verdict,
        }
    }
}

fn check_licensed(hardware_id: &HardwareId, record: &LicenseRecord, now: NaiveDateTime) -> Verdict {
    if record.kind == LicenseKind::Expired {
        let message = if record.license_key == ONLINE_VALID {
            messages::REVOKED
        } else {
            messages::TRIAL_EXHAUSTED
        };
        return Verdict::denied(VerdictKind::Expired, message);
    }
    if !record.activated {
        return Verdict::denied(VerdictKind::Invalid, messages::NOT_ACTIVATED);
    }
    if &record.hardware_id != hardware_id {
        return Verdict::denied(VerdictKind::Invalid, messages::WRONG_MACHINE);
    }
    let kind = VerdictKind::from(record.kind);
    match record.expiration_date {
        None if record.kind == LicenseKind::Online => Verdict::granted(
            kind,
            UNBOUNDED_DAYS,
            messages::ONLINE_ACTIVE.to_owned(),
            record.features.clone(),
        ),
        None => Verdict::denied(VerdictKind::Invalid, messages::MISSING_EXPIRATION),
        Some(expiration) if now > expiration => {
            Verdict::denied(VerdictKind::Expired, messages::EXPIRED)
        }
        Some(expiration) => Verdict::granted(
            kind,
            days_left(now, expiration),
            messages::ACTIVE.to_owned(),
            record.features.clone(),
        ),
    }
}

impl std::fmt::Debug for LicenseEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseEvaluator")
            .field("settings", &self.settings)
            .field("guard", &self.guard)
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::clock::FixedClock;
    use crate::error::NetworkError;
    use crate::fingerprint::StaticIdentity;
    use crate::integrity::IntegrityKey;
    use crate::store::MemoryLicenseStore;
    use crate::trial::FileWitness;

    struct ScriptedRemote {
        answer: Mutex<Result<Option<RemoteEntitlement>, NetworkError>>,
        calls: AtomicUsize,
    }

    impl ScriptedRemote {
        fn new(answer: Result<Option<RemoteEntitlement>, NetworkError>) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(answer),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, answer: Result<Option<RemoteEntitlement>, NetworkError>) {
            *self.answer.lock() = answer;
        }
    }

    #[async_trait]
    impl RemoteAuthority for ScriptedRemote {
        async fn lookup(
            &self,
            _hardware_id: &HardwareId,
        ) -> Result<Option<RemoteEntitlement>, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.lock().clone()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<FixedClock>,
        store: Arc<MemoryLicenseStore>,
        witness: Arc<FileWitness>,
        evaluator: LicenseEvaluator,
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn hw() -> HardwareId {
        "AAAAAAAA".parse().unwrap()
    }

    fn fixture(remote: Option<Arc<dyn RemoteAuthority>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = LicenseSettings::default();
        let clock = Arc::new(FixedClock::new(start()));
        let store = Arc::new(MemoryLicenseStore::new(IntegrityKey::new(
            settings.secret.clone(),
        )));
        let witness = Arc::new(FileWitness::new(dir.path().join(".trial_marker")));
        let evaluator = LicenseEvaluator::new(
            settings,
            Collaborators {
                identity: Arc::new(StaticIdentity(hw())),
                clock: clock.clone(),
                store: store.clone(),
                witnesses: vec![witness.clone() as Arc<dyn WitnessStore>],
                remote,
            },
        );
        Fixture {
            _dir: dir,
            clock,
            store,
            witness,
            evaluator,
        }
    }

    fn key_for(days: u32) -> String {
        KeyCodec::new(LicenseSettings::default().secret)
            .encode(&hw(), days, start().date())
            .unwrap()
            .to_string()
    }

    fn granting(expires: Option<&str>, license_type: &str) -> RemoteEntitlement {
        RemoteEntitlement {
            hardware_id: hw().to_string(),
            active: true,
            expires: expires.map(str::to_owned),
            license_type: Some(license_type.to_owned()),
            name: None,
            email: None,
        }
    }

    #[test]
    fn first_run_issues_a_seven_day_trial() {
        let f = fixture(None);
        let verdict = f.evaluator.offline_verdict();
        assert!(verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Trial);
        assert_eq!(verdict.days_left, 7);
        assert!(f.witness.path().exists());
        assert_eq!(f.evaluator.offline_verdict(), verdict);
    }

    #[test]
    fn trial_ends_after_its_last_day() {
        let f = fixture(None);
        f.evaluator.offline_verdict();
        f.clock.set(
            NaiveDate::from_ymd_opt(2025, 1, 8)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap(),
        );
        let last_day = f.evaluator.offline_verdict();
        assert!(last_day.is_valid);
        assert_eq!(last_day.days_left, 1);

        f.clock.advance(Duration::hours(1));
        let ended = f.evaluator.offline_verdict();
        assert!(!ended.is_valid);
        assert_eq!(ended.kind, VerdictKind::Expired);
        assert_eq!(ended.days_left, 0);
    }

    #[test]
    fn deleting_the_record_does_not_restart_the_trial() {
        let f = fixture(None);
        f.evaluator.offline_verdict();
        f.store.forget(&hw());
        let verdict = f.evaluator.offline_verdict();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Expired);
        assert_eq!(verdict.message, messages::TRIAL_EXHAUSTED);
    }

    #[test]
    fn tampered_record_fails_closed() {
        let f = fixture(None);
        f.evaluator.offline_verdict();
        let mut record = match f.store.fetch(&hw()).unwrap() {
            StoreLookup::Valid(record) => record,
            other => panic!("unexpected lookup {other:?}"),
        };
        record.expiration_date = Some(start() + Duration::days(365));
        f.store.put_raw(record);
        let verdict = f.evaluator.offline_verdict();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Invalid);
        assert_eq!(verdict.message, messages::TAMPERED);
    }

    #[test]
    fn activation_unlocks_premium_and_survives_trial_history() {
        let f = fixture(None);
        f.evaluator.offline_verdict();
        let record = f.evaluator.activate(&key_for(30)).unwrap();
        assert!(record.activated);
        assert!(!record.is_trial);
        let verdict = f.evaluator.offline_verdict();
        assert!(verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Premium);
        assert_eq!(verdict.days_left, 30);
        assert!(verdict.features().contains(Feature::Premium));
    }

    #[test]
    fn failed_activation_keeps_previous_record() {
        let f = fixture(None);
        f.evaluator.offline_verdict();
        let before = f.store.snapshot();
        let mut key = key_for(30);
        let last = key.pop();
        key.push(if last == Some('0') { '1' } else { '0' });
        assert!(matches!(
            f.evaluator.activate(&key),
            Err(ActivationError::Key(KeyError::BadSignature))
        ));
        assert_eq!(f.store.snapshot(), before);
    }

    #[tokio::test]
    async fn remote_grant_bypasses_local_state_and_syncs() {
        let remote = ScriptedRemote::new(Ok(Some(granting(None, "premium"))));
        let f = fixture(Some(remote.clone() as Arc<dyn RemoteAuthority>));
        let verdict = f.evaluator.verdict().await;
        assert!(verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Online);
        assert_eq!(verdict.days_left, UNBOUNDED_DAYS);
        assert!(f.evaluator.is_feature_available(Feature::Premium).await);
        assert!(!f.witness.path().exists());

        let stored = f.store.load(&hw()).unwrap().unwrap();
        assert_eq!(stored.kind, LicenseKind::Online);
        assert_eq!(stored.license_key, ONLINE_VALID);

        // Offline, the synchronised record still grants.
        remote.set(Err(NetworkError::Timeout));
        let offline = f.evaluator.verdict().await;
        assert!(offline.is_valid);
        assert_eq!(offline.days_left, UNBOUNDED_DAYS);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn remote_expiry_drives_days_left() {
        let remote = ScriptedRemote::new(Ok(Some(granting(Some("2025-01-11"), "standard"))));
        let f = fixture(Some(remote as Arc<dyn RemoteAuthority>));
        let verdict = f.evaluator.verdict().await;
        assert_eq!(verdict.days_left, 10);
        assert!(!f.evaluator.is_feature_available(Feature::Premium).await);
        assert!(f.evaluator.is_feature_available(Feature::Basic).await);
    }

    #[tokio::test]
    async fn network_failure_matches_offline_behaviour() {
        let remote = ScriptedRemote::new(Err(NetworkError::Connect("refused".into())));
        let f = fixture(Some(remote as Arc<dyn RemoteAuthority>));
        let verdict = f.evaluator.verdict().await;
        assert!(verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Trial);
    }

    #[tokio::test]
    async fn explicit_remote_denial_revokes_online_record() {
        let remote = ScriptedRemote::new(Ok(Some(granting(None, "premium"))));
        let f = fixture(Some(remote.clone() as Arc<dyn RemoteAuthority>));
        assert!(f.evaluator.verdict().await.is_valid);

        remote.set(Ok(None));
        let verdict = f.evaluator.verdict().await;
        assert!(!verdict.is_valid);
        assert_eq!(verdict.kind, VerdictKind::Expired);
        assert_eq!(verdict.message, messages::REVOKED);
    }

    #[tokio::test]
    async fn sync_never_replaces_an_active_key_license() {
        let remote = ScriptedRemote::new(Ok(Some(granting(None, "standard"))));
        let f = fixture(Some(remote as Arc<dyn RemoteAuthority>));
        f.evaluator.activate(&key_for(30)).unwrap();
        assert!(f.evaluator.verdict().await.is_valid);
        let stored = f.store.load(&hw()).unwrap().unwrap();
        assert_eq!(stored.kind, LicenseKind::Premium);
    }

    #[tokio::test]
    async fn license_info_reports_record_details() {
        let f = fixture(None);
        let info = f.evaluator.license_info().await;
        assert!(info.verdict.is_valid);
        assert!(info.is_trial);
        assert!(info.activated);
        assert_eq!(info.hardware_id, hw());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "trial");
        assert_eq!(json["days_left"], 7);
    }
}
