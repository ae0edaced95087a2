//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Error taxonomy for release channels and the installer."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

/// Failures querying a release channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The request exceeded its deadline.
    #[error("timed out while checking for updates")]
    Timeout,
    /// DNS or connection failure.
    #[error("could not connect to the update server: {0}")]
    Connect(String),
    /// HTTP 404.
    #[error("repository or release not found")]
    NotFound,
    /// HTTP 403.
    #[error("rate limit exceeded")]
    RateLimited,
    /// Any other non-2xx answer.
    #[error("update server answered with HTTP {0}")]
    Status(u16),
    /// The listing could not be decoded.
    #[error("release listing is malformed: {0}")]
    Malformed(String),
    /// A local feed could not be read.
    #[error("release feed {path} unreadable: {source}")]
    Feed {
        /// Feed file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The channel has nothing published.
    #[error("no releases published")]
    NoReleases,
    /// Other transport failures.
    #[error("update request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChannelError::Timeout
        } else if err.is_connect() {
            ChannelError::Connect(err.to_string())
        } else if err.is_decode() {
            ChannelError::Malformed(err.to_string())
        } else {
            ChannelError::Transport(err.to_string())
        }
    }
}

/// Failures downloading an artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure.
    #[error("download failed: {0}")]
    Network(String),
    /// Non-2xx answer.
    #[error("download answered with HTTP {0}")]
    Status(u16),
    /// Writing the artifact failed.
    #[error("writing download failed: {0}")]
    Io(#[from] std::io::Error),
    /// The user cancelled the download.
    #[error("download cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Install step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InstallStep {
    /// Copying the current installation aside.
    Backup,
    /// Preparing scratch space.
    Prepare,
    /// Downloading the artifact.
    Download,
    /// Checking the artifact.
    Verify,
    /// Extracting and arranging the payload.
    Stage,
    /// Writing and launching the swap script.
    Swap,
    /// Restoring a backup.
    Rollback,
}

/// Failures before the swap script takes over. The installation is untouched
/// whenever one of these is returned.
#[derive(Debug, Error)]
pub enum InstallError {
    /// Download failed.
    #[error("download failed: {0}")]
    Download(#[source] FetchError),
    /// Download cancelled by the user.
    #[error("update cancelled")]
    Cancelled,
    /// Artifact did not look like what the manifest announced.
    #[error("downloaded artifact rejected: {0}")]
    Verify(String),
    /// No executable could be found in the artifact.
    #[error("no installable artifact: {0}")]
    NoInstallableArtifact(String),
    /// Archive could not be read or extracted.
    #[error("update archive unusable: {0}")]
    Archive(String),
    /// Filesystem failure during a step.
    #[error("{step} failed at {path}: {source}")]
    Io {
        /// Step that failed.
        step: InstallStep,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The swap script could not be started.
    #[error("swap script could not be launched: {0}")]
    Launch(#[source] std::io::Error),
    /// Rollback requested without any backup.
    #[error("no backup available in {0}")]
    NoBackup(PathBuf),
}

impl InstallError {
    /// Step the failure belongs to.
    #[must_use]
    pub fn step(&self) -> InstallStep {
        match self {
            InstallError::Download(_) | InstallError::Cancelled => InstallStep::Download,
            InstallError::Verify(_) => InstallStep::Verify,
            InstallError::NoInstallableArtifact(_) | InstallError::Archive(_) => InstallStep::Stage,
            InstallError::Io { step, .. } => *step,
            InstallError::Launch(_) => InstallStep::Swap,
            InstallError::NoBackup(_) => InstallStep::Rollback,
        }
    }

    pub(crate) fn io(step: InstallStep, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| InstallError::Io { step, path, source }
    }
}

impl From<FetchError> for InstallError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => InstallError::Cancelled,
            other => InstallError::Download(other),
        }
    }
}
