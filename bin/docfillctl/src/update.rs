//! ---
//! docfill_section: "05-host-interfaces"
//! docfill_subsection: "binary"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Update commands of the control CLI."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use docfill_common::{build_checker, build_installer, AppConfig};
use docfill_versioning::{CancelFlag, DownloadProgress, SwapHandoff, UpdateStatus};
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Top-level update commands.
#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Perform a read-only update check.
    Check(CheckOptions),
    /// Check, then download and install when an update is available.
    Apply,
    /// Restore the newest backup.
    Rollback,
}

/// Options for `update check`.
#[derive(Debug, Args)]
pub struct CheckOptions {
    /// Print the host status object as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the supplied update command.
pub fn run(config: &AppConfig, command: UpdateCommand) -> Result<()> {
    match command {
        UpdateCommand::Check(options) => check(config, &options),
        UpdateCommand::Apply => apply(config),
        UpdateCommand::Rollback => rollback(config),
    }
}

fn check(config: &AppConfig, options: &CheckOptions) -> Result<()> {
    let checker = build_checker(&config.update)?;
    let current = config.update.current_version();
    let runtime = Runtime::new()?;
    let status = runtime.block_on(checker.check(&current));
    if options.json {
        println!("{}", serde_json::to_string_pretty(&status.host_view())?);
        return Ok(());
    }
    println!("Current: {current}");
    match &status {
        UpdateStatus::UpToDate => println!("Up to date"),
        UpdateStatus::Available(manifest) => {
            println!("Latest: {}", manifest.version);
            println!("Artifact: {} ({})", manifest.asset_name, manifest.asset_kind);
            if let Some(notes) = &manifest.notes {
                println!("\n{notes}");
            }
        }
        UpdateStatus::Error(reason) => println!("Update check failed: {reason}"),
    }
    Ok(())
}

fn apply(config: &AppConfig) -> Result<()> {
    let checker = build_checker(&config.update)?;
    let installer = build_installer(&config.update)?;
    let current = config.update.current_version();
    let runtime = Runtime::new()?;

    let manifest = match runtime.block_on(checker.check(&current)) {
        UpdateStatus::Available(manifest) => manifest,
        UpdateStatus::UpToDate => {
            println!("No update available to apply");
            return Ok(());
        }
        UpdateStatus::Error(reason) => anyhow::bail!("update check failed: {reason}"),
    };
    println!("Installing {} over {current}", manifest.version);

    let cancel = CancelFlag::new();
    let handoff = runtime.block_on(async {
        let watcher = cancel.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling download");
                watcher.cancel();
            }
        });
        let result = installer.install(&manifest, &print_progress, &cancel).await;
        ctrl_c.abort();
        result
    });
    eprintln!();
    let handoff = handoff.context("update failed, installation left unchanged")?;
    exit_for_swap(&handoff)
}

fn rollback(config: &AppConfig) -> Result<()> {
    let installer = build_installer(&config.update)?;
    let handoff = installer.rollback().context("rollback failed")?;
    exit_for_swap(&handoff)
}

fn print_progress(progress: DownloadProgress) {
    let mut stderr = std::io::stderr();
    let _ = match progress.percent() {
        Some(percent) => write!(stderr, "\rDownloading: {percent:>3}%"),
        None => write!(stderr, "\rDownloading: {} bytes", progress.downloaded),
    };
    let _ = stderr.flush();
}

// The swap script waits for this process; leave before it times out.
fn exit_for_swap(handoff: &SwapHandoff) -> Result<()> {
    match &handoff.version {
        Some(version) => println!("Update to {version} staged; restarting"),
        None => println!("Rollback staged; restarting"),
    }
    info!(script = %handoff.script.display(), "exiting for swap script");
    std::process::exit(0)
}
