//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Feature gates granted by each license kind."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::record::LicenseKind;

/// Enumeration of license-controlled features.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Feature {
    /// Document filling available to every valid license, trials included.
    Basic,
    /// Functionality reserved for activated licenses.
    Premium,
}

/// Set of features stored alongside a license record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    /// Features every valid license carries.
    #[must_use]
    pub fn basic() -> Self {
        Self(BTreeSet::from([Feature::Basic]))
    }

    /// Every known feature.
    #[must_use]
    pub fn full() -> Self {
        Self(BTreeSet::from([Feature::Basic, Feature::Premium]))
    }

    /// Features implied by a license kind.
    #[must_use]
    pub fn for_kind(kind: LicenseKind) -> Self {
        match kind {
            LicenseKind::Trial | LicenseKind::Standard => Self::basic(),
            LicenseKind::Premium | LicenseKind::Online => Self::full(),
            LicenseKind::Expired => Self::default(),
        }
    }

    /// Returns true if `feature` is part of the set.
    #[must_use]
    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    /// Iterate the features in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
