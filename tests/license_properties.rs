//! ---
//! docfill_section: "15-testing-qa"
//! docfill_subsection: "integration-tests"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Property tests for activation keys, trial witnesses and verdicts."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use docfill_licensing::{
    Clock, Collaborators, FileWitness, FixedClock, HardwareId, IntegrityKey, KeyCodec, KeyError,
    LicenseEvaluator, LicenseSettings, LicenseStore, MemoryLicenseStore, SharedSecret,
    StaticIdentity, TrialGuard, WitnessStore,
};
use proptest::prelude::*;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn noon() -> NaiveDateTime {
    today().and_hms_opt(12, 0, 0).unwrap()
}

fn codec() -> KeyCodec {
    KeyCodec::new(SharedSecret::default())
}

fn hardware_id() -> impl Strategy<Value = HardwareId> {
    "[0-9A-F]{8}".prop_map(|raw| raw.parse().unwrap())
}

fn evaluator(clock: Arc<FixedClock>) -> LicenseEvaluator {
    let settings = LicenseSettings::default();
    let store: Arc<dyn LicenseStore> =
        Arc::new(MemoryLicenseStore::new(IntegrityKey::new(settings.secret.clone())));
    LicenseEvaluator::new(
        settings,
        Collaborators {
            identity: Arc::new(StaticIdentity("0BADC0DE".parse().unwrap())),
            clock: clock as Arc<dyn Clock>,
            store,
            witnesses: Vec::new(),
            remote: None,
        },
    )
}

proptest! {
    #[test]
    fn decode_recovers_what_encode_wrote(hw in hardware_id(), days in 1u32..=999) {
        let key = codec().encode(&hw, days, today()).unwrap();
        let decoded = codec().decode(key.as_str(), &hw, noon()).unwrap();
        prop_assert_eq!(decoded.hardware_id, hw);
        prop_assert_eq!(decoded.days, days);
    }

    #[test]
    fn any_signature_edit_is_a_bad_signature(
        hw in hardware_id(),
        days in 1u32..=999,
        index in 0usize..16,
        replacement in proptest::char::ranges(vec!['0'..='9', 'A'..='F'].into()),
    ) {
        let key = codec().encode(&hw, days, today()).unwrap();
        let (body, signature) = key.as_str().rsplit_once('-').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        prop_assume!(chars[index] != replacement);
        chars[index] = replacement;
        let forged = format!("{body}-{}", chars.into_iter().collect::<String>());
        prop_assert_eq!(codec().decode(&forged, &hw, noon()), Err(KeyError::BadSignature));
    }

    #[test]
    fn keys_do_not_move_between_machines(a in hardware_id(), b in hardware_id(), days in 1u32..=999) {
        prop_assume!(a != b);
        let key = codec().encode(&a, days, today()).unwrap();
        let is_wrong_machine = matches!(
            codec().decode(key.as_str(), &b, noon()),
            Err(KeyError::WrongMachine { .. })
        );
        prop_assert!(is_wrong_machine);
    }

    #[test]
    fn trial_stays_used_until_every_witness_is_gone(count in 1usize..5, mask in any::<u8>()) {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..count).map(|i| dir.path().join(format!("w{i}/.marker"))).collect();
        let witnesses = paths
            .iter()
            .map(|path| Arc::new(FileWitness::new(path.clone())) as Arc<dyn WitnessStore>)
            .collect();
        let store: Arc<dyn LicenseStore> =
            Arc::new(MemoryLicenseStore::new(IntegrityKey::new(SharedSecret::default())));
        let guard = TrialGuard::new(witnesses, store);
        let hw: HardwareId = "AAAAAAAA".parse().unwrap();

        guard.mark_trial_used(&hw, noon());
        let mut removed = 0;
        for (i, path) in paths.iter().enumerate() {
            if mask & (1 << i) != 0 {
                fs::remove_file(path).unwrap();
                removed += 1;
            }
        }
        prop_assert_eq!(guard.trial_already_used(&hw), removed < count);
    }

    #[test]
    fn valid_verdicts_never_show_zero_days(minutes in 0i64..(9 * 24 * 60)) {
        let clock = Arc::new(FixedClock::new(noon()));
        let evaluator = evaluator(Arc::clone(&clock));
        prop_assert!(evaluator.offline_verdict().is_valid);

        clock.advance(Duration::minutes(minutes));
        let verdict = evaluator.offline_verdict();
        if verdict.is_valid {
            prop_assert!(verdict.days_left >= 1);
        } else {
            prop_assert_eq!(verdict.days_left, 0);
        }
    }

    #[test]
    fn repeated_verdicts_agree(minutes in 0i64..(9 * 24 * 60)) {
        let clock = Arc::new(FixedClock::new(noon()));
        let evaluator = evaluator(Arc::clone(&clock));
        evaluator.offline_verdict();
        clock.advance(Duration::minutes(minutes));
        prop_assert_eq!(evaluator.offline_verdict(), evaluator.offline_verdict());
    }
}
