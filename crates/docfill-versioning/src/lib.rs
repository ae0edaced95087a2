//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Version metadata, update checks, and self-replacing installs."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Update engine for DocumentFiller: build metadata, release channels, the
//! update checker, and the installer that hands the final file swap to an
//! external script.

pub mod backup;
pub mod channel;
pub mod checker;
pub mod error;
pub mod fetch;
pub mod installer;
mod logging;
pub mod semver;
pub mod stage;
pub mod swap;

pub use backup::BackupManager;
pub use channel::{GithubReleases, LocalFeed, ReleaseAsset, ReleaseChannel, ReleaseListing};
pub use checker::{AssetKind, StatusView, UpdateChecker, UpdateManifest, UpdateStatus};
pub use error::{ChannelError, FetchError, InstallError, InstallStep};
pub use fetch::{ArtifactFetcher, CancelFlag, DownloadProgress, HttpFetcher, ProgressFn};
pub use installer::{InstallSettings, SwapHandoff, UpdateInstaller, STAGING_DIR_NAME};
pub use semver::{is_newer, BuildInfo};
pub use swap::{DetachedLauncher, ScriptFlavor, SwapLauncher, SwapPlan};
