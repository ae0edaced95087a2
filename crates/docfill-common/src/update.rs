//! ---
//! docfill_section: "01-core-functionality"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Assembles release channels, the update checker and the installer."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use docfill_versioning::{
    ArtifactFetcher, DetachedLauncher, GithubReleases, HttpFetcher, LocalFeed, ReleaseChannel,
    SwapLauncher, UpdateChecker, UpdateInstaller,
};
use tracing::debug;

use crate::config::UpdateConfig;

/// Message reported when neither a feed nor a repository is configured.
pub const NOT_CONFIGURED: &str = "update repository is not configured";

/// Release channel selected by configuration: a local feed wins over GitHub.
pub fn build_channel(config: &UpdateConfig) -> Result<Arc<dyn ReleaseChannel>> {
    if let Some(feed) = &config.feed_path {
        debug!(feed = %feed.display(), "using local release feed");
        return Ok(Arc::new(LocalFeed::new(feed.clone())));
    }
    let (owner, repo) = config.github().ok_or_else(|| anyhow!(NOT_CONFIGURED))?;
    let mut channel = GithubReleases::new(
        owner,
        repo,
        config.github_token.as_deref(),
        config.check_timeout,
    )
    .context("unable to build GitHub release client")?;
    if let Some(base) = &config.api_base {
        channel = channel.with_api_base(base.trim_end_matches('/'));
    }
    debug!(owner, repo, "using GitHub releases");
    Ok(Arc::new(channel))
}

/// Checker over the configured channel.
pub fn build_checker(config: &UpdateConfig) -> Result<UpdateChecker> {
    let channel = build_channel(config)?;
    Ok(UpdateChecker::new(channel, config.product_name.clone()).with_timeout(config.check_timeout))
}

/// Installer that downloads over HTTP and launches detached swap scripts.
pub fn build_installer(config: &UpdateConfig) -> Result<UpdateInstaller> {
    let settings = config.install_settings()?;
    let fetcher: Arc<dyn ArtifactFetcher> = Arc::new(
        HttpFetcher::new(config.download_timeout).context("unable to build download client")?,
    );
    let launcher: Arc<dyn SwapLauncher> = Arc::new(DetachedLauncher);
    Ok(UpdateInstaller::new(settings, fetcher, launcher))
}
