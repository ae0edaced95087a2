//! ---
//! docfill_section: "02-licensing-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Licensing telemetry counters and structured events."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use tracing::{info, warn};

use crate::error::KeyError;
use crate::evaluator::Verdict;
use crate::fingerprint::HardwareId;
use crate::record::LicenseRecord;

static LICENSE_VERDICTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "docfill_license_verdicts_total",
        "License verdicts handed to the host, by kind and validity",
        &["kind", "valid"]
    )
    .expect("metric registration to succeed")
});

static LICENSE_ACTIVATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "docfill_license_activations_total",
        "Activation keys accepted and stored"
    )
    .expect("metric registration to succeed")
});

static LICENSE_ACTIVATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "docfill_license_activation_failures_total",
        "Activation attempts refused, by reason",
        &["reason"]
    )
    .expect("metric registration to succeed")
});

static TRIALS_ISSUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("docfill_trials_issued_total", "Trial records issued")
        .expect("metric registration to succeed")
});

static TRIAL_REFUSALS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "docfill_trial_refusals_total",
        "Trial requests refused because a trial was already consumed"
    )
    .expect("metric registration to succeed")
});

/// Record a verdict returned to the host.
pub fn record_verdict(verdict: &Verdict) {
    let valid = if verdict.is_valid { "true" } else { "false" };
    LICENSE_VERDICTS_TOTAL
        .with_label_values(&[verdict.kind.as_ref(), valid])
        .inc();
    info!(
        kind = %verdict.kind,
        valid = verdict.is_valid,
        days_left = verdict.days_left,
        "license verdict"
    );
}

/// Record a successful activation.
pub fn record_activation(record: &LicenseRecord) {
    LICENSE_ACTIVATIONS_TOTAL.inc();
    info!(
        hardware_id = %record.hardware_id,
        kind = %record.kind,
        expiration = ?record.expiration_date,
        "license activated"
    );
}

/// Record a refused activation key.
pub fn record_activation_failure(err: &KeyError) {
    LICENSE_ACTIVATION_FAILURES_TOTAL
        .with_label_values(&[err.reason()])
        .inc();
    warn!(reason = err.reason(), "activation key rejected");
}

/// Record a freshly issued trial.
pub fn record_trial_issued(hardware_id: &HardwareId, record: &LicenseRecord) {
    TRIALS_ISSUED_TOTAL.inc();
    info!(
        hardware_id = %hardware_id,
        expiration = ?record.expiration_date,
        "trial issued"
    );
}

/// Record a refused trial.
pub fn record_trial_refused(hardware_id: &HardwareId) {
    TRIAL_REFUSALS_TOTAL.inc();
    warn!(hardware_id = %hardware_id, "trial already consumed on this machine");
}
