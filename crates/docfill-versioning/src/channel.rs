//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Release channels: GitHub releases and local JSON feeds."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChannelError;
use crate::semver::{compare_components, version_components};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("DocumentFiller-Updater/", env!("CARGO_PKG_VERSION"));

/// Downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub url: String,
    /// Size in bytes, when published.
    #[serde(default)]
    pub size: u64,
}

/// Latest release as reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseListing {
    /// Tag or version string, possibly prefixed (`v1.2.0`).
    #[serde(alias = "version")]
    pub tag: String,
    /// Release notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Publication timestamp as published.
    #[serde(default)]
    pub published_at: Option<String>,
    /// Attached files.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    /// Archive of the tagged sources.
    #[serde(default)]
    pub source_archive_url: Option<String>,
}

/// Provider of release listings.
#[async_trait]
pub trait ReleaseChannel: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Latest published release.
    async fn latest(&self) -> Result<ReleaseListing, ChannelError>;
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
    #[serde(default)]
    zipball_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

impl GithubRelease {
    fn into_listing(self) -> Result<ReleaseListing, ChannelError> {
        let tag = self
            .tag_name
            .filter(|tag| !tag.trim().is_empty())
            .or(self.name.filter(|name| !name.trim().is_empty()))
            .ok_or_else(|| ChannelError::Malformed("release has no tag".to_owned()))?;
        Ok(ReleaseListing {
            tag,
            notes: self.body,
            published_at: self.published_at,
            assets: self
                .assets
                .into_iter()
                .map(|asset| ReleaseAsset {
                    name: asset.name,
                    url: asset.browser_download_url,
                    size: asset.size,
                })
                .collect(),
            source_archive_url: self.zipball_url,
        })
    }
}

/// `GET /repos/{owner}/{repo}/releases/latest` on the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubReleases {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GithubReleases {
    /// Channel for `owner/repo`, authenticating with `token` when given.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|_| ChannelError::Transport("token contains invalid characters".to_owned()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            api_base: GITHUB_API.to_owned(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    /// Point the channel at another API root (GitHub Enterprise, test servers).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn latest_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }
}

#[async_trait]
impl ReleaseChannel for GithubReleases {
    fn describe(&self) -> String {
        format!("github:{}/{}", self.owner, self.repo)
    }

    async fn latest(&self) -> Result<ReleaseListing, ChannelError> {
        let url = self.latest_url();
        debug!(url = %url, "querying latest release");
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(ChannelError::NotFound),
            StatusCode::FORBIDDEN => return Err(ChannelError::RateLimited),
            status if !status.is_success() => return Err(ChannelError::Status(status.as_u16())),
            _ => {}
        }
        let body = response.bytes().await?;
        let release: GithubRelease = serde_json::from_slice(&body)
            .map_err(|err| ChannelError::Malformed(err.to_string()))?;
        release.into_listing()
    }
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    releases: Vec<ReleaseListing>,
}

/// JSON file listing releases; the newest by version wins.
#[derive(Debug, Clone)]
pub struct LocalFeed {
    path: PathBuf,
}

impl LocalFeed {
    /// Feed stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReleaseChannel for LocalFeed {
    fn describe(&self) -> String {
        format!("feed:{}", self.path.display())
    }

    async fn latest(&self) -> Result<ReleaseListing, ChannelError> {
        let raw = fs::read(&self.path).map_err(|source| ChannelError::Feed {
            path: self.path.clone(),
            source,
        })?;
        let feed: FeedDocument =
            serde_json::from_slice(&raw).map_err(|err| ChannelError::Malformed(err.to_string()))?;
        feed.releases
            .into_iter()
            .filter_map(|release| version_components(&release.tag).map(|parts| (parts, release)))
            .max_by(|(a, _), (b, _)| compare_components(a, b))
            .map(|(_, release)| release)
            .ok_or(ChannelError::NoReleases)
    }
}
