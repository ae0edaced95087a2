//! ---
//! docfill_section: "05-host-interfaces"
//! docfill_subsection: "binary"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Host loop running the license and update workers."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use docfill_common::{build_checker, build_evaluator, AppConfig};
use docfill_licensing::LicenseEvaluator;
use docfill_versioning::{UpdateChecker, UpdateStatus};
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Run the startup license check and periodic update checks until Ctrl-C.
pub fn run(config: &AppConfig) -> Result<()> {
    let evaluator = Arc::new(build_evaluator(config)?);
    let checker = match build_checker(&config.update) {
        Ok(checker) => Ok(Arc::new(checker)),
        Err(err) => {
            warn!(error = %err, "update checks disabled");
            Err(err.to_string())
        }
    };
    let current = config.update.current_version();
    let interval = config.update.poll_interval;
    let check_on_start = config.update.check_on_start;

    let runtime = Runtime::new()?;
    runtime.block_on(async move {
        let license = tokio::spawn(license_worker(evaluator));
        let updates = tokio::spawn(update_worker(checker, current, interval, check_on_start));
        info!("monitor running, press Ctrl-C to stop");
        let stopped = tokio::signal::ctrl_c().await;
        updates.abort();
        license.abort();
        stopped?;
        info!("monitor stopped");
        Ok::<(), anyhow::Error>(())
    })
}

async fn license_worker(evaluator: Arc<LicenseEvaluator>) {
    let verdict = evaluator.verdict().await;
    emit("license", &verdict);
}

async fn update_worker(
    checker: Result<Arc<UpdateChecker>, String>,
    current: String,
    every: Duration,
    check_on_start: bool,
) {
    let checker = match checker {
        Ok(checker) => checker,
        Err(reason) => {
            emit("update", &UpdateStatus::Error(reason).host_view());
            return;
        }
    };
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !check_on_start {
        ticker.tick().await;
    }
    loop {
        ticker.tick().await;
        let status = checker.check(&current).await;
        emit("update", &status.host_view());
    }
}

#[derive(Serialize)]
struct Event<'a, T> {
    event: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

fn emit<T: Serialize>(event: &str, body: &T) {
    match serde_json::to_string(&Event { event, body }) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "unable to render host event"),
    }
}
