//! ---
//! docfill_section: "05-host-interfaces"
//! docfill_subsection: "binary"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "License commands of the control CLI."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::Args;
use docfill_common::{build_evaluator, AppConfig};
use docfill_licensing::{
    Clock, HardwareId, HostFingerprint, KeyCodec, LicenseInfo, MachineIdentity, SystemClock,
};
use tokio::runtime::Runtime;

/// Options for `status`.
#[derive(Debug, Args)]
pub struct StatusOptions {
    /// Skip the remote authority.
    #[arg(long)]
    pub offline: bool,
    /// Print the full record as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Options for `activate`.
#[derive(Debug, Args)]
pub struct ActivateOptions {
    /// License key (`DF-HHHHHHHH-YYYYMMDD-DDD-SIGNATURE`).
    #[arg(value_name = "KEY")]
    pub key: String,
}

/// Options for `keygen`.
#[derive(Debug, Args)]
pub struct KeygenOptions {
    /// Hardware id the key is bound to.
    #[arg(long, value_name = "HW")]
    pub hardware_id: String,
    /// Licensed days counted from today (1 to 999).
    #[arg(long, value_name = "N")]
    pub days: u32,
}

/// Options for `inspect`.
#[derive(Debug, Args)]
pub struct InspectOptions {
    /// License key to audit.
    #[arg(value_name = "KEY")]
    pub key: String,
    /// Machine to audit against; defaults to this machine.
    #[arg(long, value_name = "HW")]
    pub hardware_id: Option<String>,
}

pub fn fingerprint(config: &AppConfig) -> Result<()> {
    let identity = HostFingerprint::new(config.license.settings().secret);
    println!("{}", identity.hardware_id());
    Ok(())
}

pub fn status(config: &AppConfig, options: &StatusOptions) -> Result<()> {
    let evaluator = build_evaluator(config)?;
    if options.offline {
        let verdict = evaluator.offline_verdict();
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }
    let runtime = Runtime::new()?;
    let info = runtime.block_on(evaluator.license_info());
    if options.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        render_info(&info);
    }
    Ok(())
}

fn render_info(info: &LicenseInfo) {
    let features: Vec<String> = info.features.iter().map(|f| f.to_string()).collect();
    println!("Hardware ID: {}", info.hardware_id);
    println!("Valid: {}", info.verdict.is_valid);
    println!("Kind: {}", info.verdict.kind);
    println!("Days left: {}", info.verdict.days_left);
    println!("Activated: {}", info.activated);
    println!("Trial: {}", info.is_trial);
    match info.expiration_date {
        Some(expires) => println!("Expires: {}", expires.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Expires: never"),
    }
    println!("Features: {}", features.join(", "));
    println!("{}", info.verdict.message);
}

pub fn activate(config: &AppConfig, options: &ActivateOptions) -> Result<()> {
    let evaluator = build_evaluator(config)?;
    let record = evaluator
        .activate(&options.key)
        .context("activation failed")?;
    match record.expiration_date {
        Some(expires) => println!(
            "Activated {} until {}",
            record.hardware_id,
            expires.format("%Y-%m-%d")
        ),
        None => println!("Activated {}", record.hardware_id),
    }
    Ok(())
}

pub fn keygen(config: &AppConfig, options: &KeygenOptions) -> Result<()> {
    let hardware_id: HardwareId = options.hardware_id.trim().to_uppercase().parse()?;
    let codec = KeyCodec::new(config.license.settings().secret);
    let today = SystemClock.now().date();
    let key = codec.encode(&hardware_id, options.days, today)?;
    println!("{key}");
    Ok(())
}

pub fn inspect(config: &AppConfig, options: &InspectOptions) -> Result<()> {
    let secret = config.license.settings().secret;
    let machine = match &options.hardware_id {
        Some(raw) => raw.trim().to_uppercase().parse::<HardwareId>()?,
        None => HostFingerprint::new(secret.clone()).hardware_id(),
    };
    let audit = KeyCodec::new(secret).audit(options.key.trim(), &machine, SystemClock.now())?;
    println!("Hardware ID: {} ({})", audit.hardware_id, pass(audit.hardware_matches));
    println!(
        "Expires: {} ({})",
        audit.expiration.format("%Y-%m-%d"),
        pass(!audit.expired)
    );
    println!("Days: {}", audit.days);
    println!("Signature: {}", pass(audit.signature_valid));
    println!("Valid: {}", audit.is_valid());
    Ok(())
}

fn pass(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "FAILED"
    }
}
