//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "build"
//! docfill_type: "source"
//! docfill_scope: "build"
//! docfill_description: "Emits build metadata consumed by BuildInfo."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing git metadata degrades to placeholder values instead of failing the build.
    EmitBuilder::builder()
        .build_timestamp()
        .cargo_target_triple()
        .git_sha(true)
        .emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
