//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Entitlement record persisted once per machine."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::clock::end_of_day;
use crate::features::FeatureSet;
use crate::fingerprint::HardwareId;
use crate::key::DecodedKey;

/// Sentinel stored in `license_key` for trial records.
pub const TRIAL_VERSION: &str = "TRIAL_VERSION";
/// Sentinel stored in `license_key` once the trial can no longer be granted.
pub const EXPIRED: &str = "EXPIRED";
/// Sentinel stored in `license_key` for records synchronised from the remote authority.
pub const ONLINE_VALID: &str = "ONLINE_VALID";

/// Kind of entitlement a record represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseKind {
    /// Time-limited first-run trial.
    Trial,
    /// Activated license with basic features.
    Standard,
    /// Activated license with every feature.
    Premium,
    /// Trial consumed or entitlement revoked; only activation leaves this state.
    Expired,
    /// Entitlement granted by the remote authority.
    Online,
}

/// Persisted entitlement state for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Machine the record is bound to.
    pub hardware_id: HardwareId,
    /// Activation string or one of the sentinels.
    pub license_key: String,
    /// When the record was created.
    pub activation_date: NaiveDateTime,
    /// End of the entitlement, normalised to 23:59:59; `None` means unbounded or missing.
    pub expiration_date: Option<NaiveDateTime>,
    /// Entitlement kind.
    #[serde(rename = "type")]
    pub kind: LicenseKind,
    /// Capability tags.
    pub features: FeatureSet,
    /// Whether the record grants use at all.
    pub activated: bool,
    /// Whether the record is a trial.
    pub is_trial: bool,
    /// Keyed hash over every other field, hex encoded.
    #[serde(default)]
    pub integrity_tag: String,
}

impl LicenseRecord {
    /// Fresh trial lasting `trial_days` full days after today.
    #[must_use]
    pub fn trial(hardware_id: HardwareId, now: NaiveDateTime, trial_days: u32) -> Self {
        let expires = end_of_day(now.date()) + Duration::days(i64::from(trial_days));
        Self {
            hardware_id,
            license_key: TRIAL_VERSION.to_owned(),
            activation_date: now,
            expiration_date: Some(expires),
            kind: LicenseKind::Trial,
            features: FeatureSet::for_kind(LicenseKind::Trial),
            activated: true,
            is_trial: true,
            integrity_tag: String::new(),
        }
    }

    /// Record issued when the trial was already consumed on this machine.
    #[must_use]
    pub fn exhausted(hardware_id: HardwareId, now: NaiveDateTime) -> Self {
        Self {
            hardware_id,
            license_key: EXPIRED.to_owned(),
            activation_date: now,
            expiration_date: Some(now),
            kind: LicenseKind::Expired,
            features: FeatureSet::for_kind(LicenseKind::Expired),
            activated: false,
            is_trial: false,
            integrity_tag: String::new(),
        }
    }

    /// Record built from a successfully decoded activation key.
    #[must_use]
    pub fn activated(key: &str, decoded: &DecodedKey, now: NaiveDateTime) -> Self {
        Self {
            hardware_id: decoded.hardware_id.clone(),
            license_key: key.to_owned(),
            activation_date: now,
            expiration_date: Some(decoded.expiration),
            kind: LicenseKind::Premium,
            features: FeatureSet::for_kind(LicenseKind::Premium),
            activated: true,
            is_trial: false,
            integrity_tag: String::new(),
        }
    }

    /// Record mirroring a remote entitlement.
    #[must_use]
    pub fn online(
        hardware_id: HardwareId,
        now: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        features: FeatureSet,
    ) -> Self {
        Self {
            hardware_id,
            license_key: ONLINE_VALID.to_owned(),
            activation_date: now,
            expiration_date: expiration,
            kind: LicenseKind::Online,
            features,
            activated: true,
            is_trial: false,
            integrity_tag: String::new(),
        }
    }

    /// True for activated records created from a key (never replaced by a sync).
    #[must_use]
    pub fn is_key_activation(&self) -> bool {
        self.activated && matches!(self.kind, LicenseKind::Standard | LicenseKind::Premium)
    }

    /// Whether the record grants use at `now`, ignoring hardware binding.
    #[must_use]
    pub fn in_force(&self, now: NaiveDateTime) -> bool {
        self.activated
            && self.kind != LicenseKind::Expired
            && self.expiration_date.map_or(self.kind == LicenseKind::Online, |exp| now <= exp)
    }

    /// Equal in every field except `activation_date` and `integrity_tag`.
    #[must_use]
    pub fn same_entitlement(&self, other: &Self) -> bool {
        self.hardware_id == other.hardware_id
            && self.license_key == other.license_key
            && self.expiration_date == other.expiration_date
            && self.kind == other.kind
            && self.features == other.features
            && self.activated == other.activated
            && self.is_trial == other.is_trial
    }
}
