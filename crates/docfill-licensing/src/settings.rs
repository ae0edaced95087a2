//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Immutable licensing settings shared by every licensing component."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

/// Secret compiled into every build. Keys issued by the existing activation
/// tooling are signed with this value, so it must not change between releases.
pub const DEFAULT_SHARED_SECRET: &str = "document_filler_secret_2024";

/// Length of a freshly issued trial, in days.
pub const DEFAULT_TRIAL_DAYS: u32 = 7;

/// Shared secret mixed into fingerprints, key signatures, and integrity tags.
///
/// The value never appears in `Debug` output or user-facing messages.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Arc<str>);

impl SharedSecret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl Default for SharedSecret {
    fn default() -> Self {
        Self::new(DEFAULT_SHARED_SECRET)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}

/// Settings handed to the licensing components at construction time.
#[derive(Debug, Clone)]
pub struct LicenseSettings {
    /// Secret used for fingerprints, key signatures, and store integrity tags.
    pub secret: SharedSecret,
    /// Trial length in days.
    pub trial_days: u32,
}

impl Default for LicenseSettings {
    fn default() -> Self {
        Self {
            secret: SharedSecret::default(),
            trial_days: DEFAULT_TRIAL_DAYS,
        }
    }
}
