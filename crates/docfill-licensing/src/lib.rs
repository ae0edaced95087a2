//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Machine-bound licensing, trial enforcement, and entitlement evaluation."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! DocumentFiller licensing crate: hardware fingerprints, offline activation
//! keys, tamper-evident license storage, single-trial enforcement, optional
//! remote entitlements, and the evaluator that turns all of it into a verdict.

pub mod clock;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod fingerprint;
pub mod integrity;
pub mod key;
pub mod logging;
pub mod record;
pub mod remote;
pub mod settings;
pub mod store;
pub mod trial;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ActivationError, KeyError, NetworkError, StoreError, WitnessError};
pub use evaluator::{Collaborators, LicenseEvaluator, LicenseInfo, Verdict, VerdictKind};
pub use features::{Feature, FeatureSet};
pub use fingerprint::{HardwareId, HostFingerprint, MachineIdentity, StaticIdentity};
pub use integrity::IntegrityKey;
pub use key::{DecodedKey, KeyAudit, KeyCodec, LicenseKey};
pub use record::{LicenseKind, LicenseRecord};
pub use remote::{HttpRemoteAuthority, RemoteAuthority, RemoteEntitlement};
pub use settings::{LicenseSettings, SharedSecret};
pub use store::{FileLicenseStore, LicenseStore, MemoryLicenseStore, StoreLookup};
pub use trial::{default_witnesses, FileWitness, TrialGuard, WitnessStore};
