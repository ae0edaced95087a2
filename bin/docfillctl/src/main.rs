//! ---
//! docfill_section: "05-host-interfaces"
//! docfill_subsection: "binary"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Control CLI for DocumentFiller licensing and updates."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use docfill_common::{init_tracing, AppConfig};
use docfill_versioning::BuildInfo;
use tracing::debug;

mod license;
mod monitor;
mod update;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "DocumentFiller licensing and update utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(flatten)]
    global: GlobalOptions,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by every command.
#[derive(Debug, Args)]
pub struct GlobalOptions {
    /// Configuration file; `DOCFILL_CONFIG` takes precedence.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Print this machine's hardware id")]
    Fingerprint,
    #[command(about = "Evaluate and print the license state")]
    Status(license::StatusOptions),
    #[command(about = "Activate this machine with a license key")]
    Activate(license::ActivateOptions),
    #[command(about = "Issue a license key for a hardware id")]
    Keygen(license::KeygenOptions),
    #[command(about = "Report every check of a license key")]
    Inspect(license::InspectOptions),
    #[command(subcommand, about = "Update management actions")]
    Update(update::UpdateCommand),
    #[command(about = "Run the license check and periodic update checks until Ctrl-C")]
    Monitor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", BuildInfo::current().details());
        return Ok(());
    }
    let Some(command) = cli.command else {
        println!("{}", BuildInfo::current().banner());
        return Ok(());
    };

    if let Some(path) = cli.global.config.as_deref().filter(|path| !path.exists()) {
        bail!("configuration file {} does not exist", path.display());
    }
    let loaded = AppConfig::load_with_source(&config_candidates(&cli.global))?;
    init_tracing("docfillctl", &loaded.config.logging)?;
    debug!(source = ?loaded.source, "configuration loaded");
    let config = loaded.config;

    match command {
        Commands::Fingerprint => license::fingerprint(&config),
        Commands::Status(opts) => license::status(&config, &opts),
        Commands::Activate(opts) => license::activate(&config, &opts),
        Commands::Keygen(opts) => license::keygen(&config, &opts),
        Commands::Inspect(opts) => license::inspect(&config, &opts),
        Commands::Update(cmd) => update::run(&config, cmd),
        Commands::Monitor => monitor::run(&config),
    }
}

fn config_candidates(options: &GlobalOptions) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = &options.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("docfill.toml"));
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("docfill.toml"));
        }
    }
    candidates
}
