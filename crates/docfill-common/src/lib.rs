//! ---
//! docfill_section: "01-core-functionality"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Configuration, tracing and component wiring shared by DocumentFiller tools."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! Shared plumbing for DocumentFiller binaries: configuration loading,
//! tracing initialisation, and construction of the licensing and update
//! components from that configuration.

pub mod config;
pub mod license;
pub mod logging;
pub mod update;

pub use config::{
    AppConfig, LicenseConfig, LoadedAppConfig, LoggingConfig, UpdateConfig, PRODUCT_NAME,
};
pub use license::build_evaluator;
pub use logging::{init_tracing, LogFormat};
pub use update::{build_channel, build_checker, build_installer, NOT_CONFIGURED};
