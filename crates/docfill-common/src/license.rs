//! ---
//! docfill_section: "01-core-functionality"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Assembles the license evaluator from configuration."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use docfill_licensing::{
    default_witnesses, Clock, Collaborators, FileLicenseStore, HostFingerprint,
    HttpRemoteAuthority, IntegrityKey, LicenseEvaluator, LicenseStore, MachineIdentity,
    RemoteAuthority, SystemClock,
};
use tracing::{debug, warn};

use crate::config::{AppConfig, PRODUCT_NAME};

/// Evaluator wired to the host fingerprint, the system clock, the configured
/// license store, the standard trial witnesses and the optional remote authority.
pub fn build_evaluator(config: &AppConfig) -> Result<LicenseEvaluator> {
    let settings = config.license.settings();
    let store_path = config.license.store_path();
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("unable to create license directory {}", parent.display()))?;
    }
    debug!(store = %store_path.display(), "license store selected");

    let identity: Arc<dyn MachineIdentity> = Arc::new(HostFingerprint::new(settings.secret.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn LicenseStore> = Arc::new(FileLicenseStore::new(
        store_path,
        IntegrityKey::new(settings.secret.clone()),
    ));

    let witness_root = config.update.app_dir().unwrap_or_else(|err| {
        warn!(error = %err, "application directory unknown, trial marker kept with license data");
        config.license.data_dir()
    });
    let witnesses = default_witnesses(&witness_root, PRODUCT_NAME, config.license.system_witness);

    let remote = match &config.license.remote_url {
        Some(url) => {
            let authority = HttpRemoteAuthority::new(url.clone(), config.license.remote_timeout)
                .with_context(|| format!("unable to build remote license client for {url}"))?;
            Some(Arc::new(authority) as Arc<dyn RemoteAuthority>)
        }
        None => None,
    };

    Ok(LicenseEvaluator::new(
        settings,
        Collaborators {
            identity,
            clock,
            store,
            witnesses,
            remote,
        },
    ))
}
