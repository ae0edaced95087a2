//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Update availability checks and artifact selection."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::channel::{ReleaseAsset, ReleaseChannel, ReleaseListing};
use crate::error::ChannelError;
use crate::logging::record_check;
use crate::semver::is_newer;

/// Default deadline for a whole check, independent of the license lookup.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Shape of the artifact a manifest points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetKind {
    /// Ready-to-run executable named after the product.
    InstallerExecutable,
    /// Packaged zip archive.
    Archive,
    /// Source archive generated by the release host. Must contain the executable.
    SourceArchive,
}

/// Everything the installer needs to fetch a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// Version without any `v` prefix.
    pub version: String,
    /// Artifact URL.
    pub download_url: String,
    /// Artifact shape.
    pub asset_kind: AssetKind,
    /// Release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Artifact file name.
    pub asset_name: String,
    /// Published size in bytes, 0 when unknown.
    #[serde(default)]
    pub size: u64,
}

/// Result of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Installed version is current.
    UpToDate,
    /// A newer release is installable.
    Available(UpdateManifest),
    /// The check could not complete.
    Error(String),
}

/// `{status, manifest?, reason?}` as consumed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    /// `up_to_date`, `available` or `error`.
    pub status: &'static str,
    /// Manifest when an update is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<UpdateManifest>,
    /// Failure reason when the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UpdateStatus {
    /// Stable label used for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            UpdateStatus::UpToDate => "up_to_date",
            UpdateStatus::Available(_) => "available",
            UpdateStatus::Error(_) => "error",
        }
    }

    /// Host-facing view.
    #[must_use]
    pub fn host_view(&self) -> StatusView {
        let (manifest, reason) = match self {
            UpdateStatus::UpToDate => (None, None),
            UpdateStatus::Available(manifest) => (Some(manifest.clone()), None),
            UpdateStatus::Error(reason) => (None, Some(reason.clone())),
        };
        StatusView {
            status: self.label(),
            manifest,
            reason,
        }
    }
}

/// Queries a release channel and decides whether to offer an update.
pub struct UpdateChecker {
    channel: Arc<dyn ReleaseChannel>,
    product_name: String,
    timeout: Duration,
}

impl UpdateChecker {
    /// Checker for artifacts named after `product_name`.
    #[must_use]
    pub fn new(channel: Arc<dyn ReleaseChannel>, product_name: impl Into<String>) -> Self {
        Self {
            channel,
            product_name: product_name.into(),
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// Override the check deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compare the channel's latest release with `current_version`.
    ///
    /// Never fails: unreachable channels and unusable releases become
    /// [`UpdateStatus::Error`].
    pub async fn check(&self, current_version: &str) -> UpdateStatus {
        debug!(channel = %self.channel.describe(), current = current_version, "checking for updates");
        let latest = match tokio::time::timeout(self.timeout, self.channel.latest()).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout),
        };
        let status = match latest {
            Ok(release) => self.evaluate(release, current_version),
            Err(err) => {
                warn!(error = %err, "update check failed");
                UpdateStatus::Error(err.to_string())
            }
        };
        record_check(&status);
        status
    }

    fn evaluate(&self, release: ReleaseListing, current_version: &str) -> UpdateStatus {
        if !is_newer(&release.tag, current_version) {
            debug!(latest = %release.tag, current = current_version, "no newer release");
            return UpdateStatus::UpToDate;
        }
        match self.select_artifact(&release) {
            Some(manifest) => {
                info!(
                    version = %manifest.version,
                    asset = %manifest.asset_name,
                    kind = %manifest.asset_kind,
                    "update available"
                );
                UpdateStatus::Available(manifest)
            }
            None => UpdateStatus::Error(format!(
                "release {} has no installable artifact",
                release.tag
            )),
        }
    }

    /// Pick the best artifact of `release`: named executable, then zip, then source archive.
    #[must_use]
    pub fn select_artifact(&self, release: &ReleaseListing) -> Option<UpdateManifest> {
        let product = self.product_name.to_ascii_lowercase();
        let executable = release.assets.iter().find(|asset| {
            let name = asset.name.to_ascii_lowercase();
            name.starts_with(&product) && (name.ends_with(".exe") || !name.contains('.'))
        });
        let archive = || {
            release
                .assets
                .iter()
                .find(|asset| asset.name.to_ascii_lowercase().ends_with(".zip"))
        };
        let version = release.tag.trim().trim_start_matches(['v', 'V']).to_owned();

        let manifest = |asset: &ReleaseAsset, asset_kind| UpdateManifest {
            version: version.clone(),
            download_url: asset.url.clone(),
            asset_kind,
            notes: release.notes.clone(),
            asset_name: asset.name.clone(),
            size: asset.size,
        };

        if let Some(asset) = executable {
            return Some(manifest(asset, AssetKind::InstallerExecutable));
        }
        if let Some(asset) = archive() {
            return Some(manifest(asset, AssetKind::Archive));
        }
        release.source_archive_url.as_ref().map(|url| {
            let source = ReleaseAsset {
                name: format!("{}-{}-source.zip", self.product_name, version),
                url: url.clone(),
                size: 0,
            };
            manifest(&source, AssetKind::SourceArchive)
        })
    }
}

impl std::fmt::Debug for UpdateChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateChecker")
            .field("channel", &self.channel.describe())
            .field("product_name", &self.product_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Fixed(ReleaseListing);

    #[async_trait]
    impl ReleaseChannel for Fixed {
        fn describe(&self) -> String {
            "fixed".to_owned()
        }

        async fn latest(&self) -> Result<ReleaseListing, ChannelError> {
            Ok(self.0.clone())
        }
    }

    struct Stalled;

    #[async_trait]
    impl ReleaseChannel for Stalled {
        fn describe(&self) -> String {
            "stalled".to_owned()
        }

        async fn latest(&self) -> Result<ReleaseListing, ChannelError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ChannelError::NoReleases)
        }
    }

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_owned(),
            url: format!("https://downloads.invalid/{name}"),
            size: 1024,
        }
    }

    fn listing(tag: &str, assets: Vec<ReleaseAsset>) -> ReleaseListing {
        ReleaseListing {
            tag: tag.to_owned(),
            notes: None,
            published_at: None,
            assets,
            source_archive_url: Some("https://downloads.invalid/zipball".to_owned()),
        }
    }

    fn checker(release: ReleaseListing) -> UpdateChecker {
        UpdateChecker::new(Arc::new(Fixed(release)), "DocumentFiller")
    }

    #[tokio::test]
    async fn executable_wins_over_archives() {
        let release = listing(
            "v1.0.10",
            vec![asset("DocumentFiller-1.0.10.zip"), asset("DocumentFiller.exe")],
        );
        let UpdateStatus::Available(manifest) = checker(release).check("1.0.9").await else {
            panic!("expected an update");
        };
        assert_eq!(manifest.version, "1.0.10");
        assert_eq!(manifest.asset_kind, AssetKind::InstallerExecutable);
        assert_eq!(manifest.asset_name, "DocumentFiller.exe");
    }

    #[tokio::test]
    async fn archive_then_source_fallback() {
        let with_zip = listing("2.0", vec![asset("notes.txt"), asset("bundle.zip")]);
        let UpdateStatus::Available(manifest) = checker(with_zip).check("1.0").await else {
            panic!("expected an update");
        };
        assert_eq!(manifest.asset_kind, AssetKind::Archive);

        let bare = listing("2.0", vec![asset("OtherTool.exe")]);
        let UpdateStatus::Available(manifest) = checker(bare).check("1.0").await else {
            panic!("expected an update");
        };
        assert_eq!(manifest.asset_kind, AssetKind::SourceArchive);
        assert_eq!(manifest.download_url, "https://downloads.invalid/zipball");
    }

    #[tokio::test]
    async fn release_without_artifacts_is_an_error() {
        let mut release = listing("2.0", Vec::new());
        release.source_archive_url = None;
        let status = checker(release).check("1.0").await;
        assert!(matches!(status, UpdateStatus::Error(_)));
        assert_eq!(status.host_view().status, "error");
    }

    #[tokio::test]
    async fn slow_channel_times_out() {
        let checker = UpdateChecker::new(Arc::new(Stalled), "DocumentFiller")
            .with_timeout(Duration::from_millis(20));
        let status = checker.check("1.0.0").await;
        assert_eq!(status, UpdateStatus::Error(ChannelError::Timeout.to_string()));
    }

    #[test]
    fn host_view_omits_empty_fields() {
        let view = serde_json::to_value(UpdateStatus::UpToDate.host_view()).unwrap();
        assert_eq!(view, serde_json::json!({ "status": "up_to_date" }));
    }
}
