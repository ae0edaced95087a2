//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Update telemetry counters and structured events."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::path::Path;

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use tracing::{error, info};

use crate::checker::{UpdateManifest, UpdateStatus};
use crate::error::InstallError;

static UPDATE_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "docfill_update_checks_total",
        "Update checks performed, by outcome",
        &["outcome"]
    )
    .expect("metric registration to succeed")
});

static UPDATES_STAGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "docfill_updates_staged_total",
        "Updates staged and handed to a swap script"
    )
    .expect("metric registration to succeed")
});

static UPDATE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "docfill_update_failures_total",
        "Update installs aborted before the swap, by step",
        &["step"]
    )
    .expect("metric registration to succeed")
});

static ROLLBACKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "docfill_update_rollbacks_total",
        "Backups restored through a swap script"
    )
    .expect("metric registration to succeed")
});

pub(crate) fn record_check(status: &UpdateStatus) {
    UPDATE_CHECKS_TOTAL
        .with_label_values(&[status.label()])
        .inc();
}

pub(crate) fn record_staged(manifest: &UpdateManifest, script: &Path) {
    UPDATES_STAGED_TOTAL.inc();
    info!(
        version = %manifest.version,
        asset = %manifest.asset_name,
        script = %script.display(),
        "update staged, handing over to swap script"
    );
}

pub(crate) fn record_failure(err: &InstallError) {
    let step = err.step();
    UPDATE_FAILURES_TOTAL
        .with_label_values(&[step.as_ref()])
        .inc();
    error!(step = %step, error = %err, "update aborted, installation untouched");
}

pub(crate) fn record_rollback(backup: &Path, script: &Path) {
    ROLLBACKS_TOTAL.inc();
    info!(
        backup = %backup.display(),
        script = %script.display(),
        "rollback staged, handing over to swap script"
    );
}
