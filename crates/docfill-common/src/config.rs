//! ---
//! docfill_section: "01-core-functionality"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Application configuration loading and validation."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use docfill_licensing::remote::DEFAULT_REMOTE_TIMEOUT;
use docfill_licensing::settings::{DEFAULT_SHARED_SECRET, DEFAULT_TRIAL_DAYS};
use docfill_licensing::{LicenseSettings, SharedSecret};
use docfill_versioning::backup::DEFAULT_KEEP_BACKUPS;
use docfill_versioning::checker::DEFAULT_CHECK_TIMEOUT;
use docfill_versioning::installer::{DEFAULT_PRESERVE, DEFAULT_STATE_FILES};
use docfill_versioning::stage::DEFAULT_MIN_EXECUTABLE_BYTES;
use docfill_versioning::swap::DEFAULT_GRACE_PERIOD;
use docfill_versioning::{BuildInfo, InstallSettings};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Product name used for directories, witnesses and artifact matching.
pub const PRODUCT_NAME: &str = "DocumentFiller";

fn default_store_file() -> String {
    "license.json".to_owned()
}

fn default_trial_days() -> u32 {
    DEFAULT_TRIAL_DAYS
}

fn default_remote_timeout() -> Duration {
    DEFAULT_REMOTE_TIMEOUT
}

fn default_true() -> bool {
    true
}

fn default_product_name() -> String {
    PRODUCT_NAME.to_owned()
}

fn default_executable_name() -> String {
    if cfg!(windows) {
        format!("{PRODUCT_NAME}.exe")
    } else {
        PRODUCT_NAME.to_owned()
    }
}

fn default_check_timeout() -> Duration {
    DEFAULT_CHECK_TIMEOUT
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_min_executable_bytes() -> u64 {
    DEFAULT_MIN_EXECUTABLE_BYTES
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

fn default_keep_backups() -> usize {
    DEFAULT_KEEP_BACKUPS
}

fn default_preserve() -> Vec<String> {
    DEFAULT_PRESERVE.iter().map(|s| (*s).to_owned()).collect()
}

fn default_state_files() -> Vec<String> {
    DEFAULT_STATE_FILES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_logging_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(PRODUCT_NAME).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for DocumentFiller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Licensing settings.
    #[serde(default)]
    pub license: LicenseConfig,
    /// Update settings.
    #[serde(default)]
    pub update: UpdateConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    /// Parsed configuration.
    pub config: AppConfig,
    /// File it came from, `None` when defaults were used.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    /// Environment variable naming the configuration file.
    pub const ENV_CONFIG_PATH: &str = "DOCFILL_CONFIG";

    /// Load configuration from disk, respecting the `DOCFILL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// The environment override must exist. Otherwise the first existing
    /// candidate wins, and built-in defaults apply when none exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found, using defaults");
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.license.validate()?;
        self.update.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// `[license]` section.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfig {
    /// Directory holding the license store. Defaults to the per-user data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Store file name inside `data_dir`.
    #[serde(default = "default_store_file")]
    pub store_file: String,
    /// Trial length in days.
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,
    /// Remote entitlement endpoint; remote lookups are skipped when unset.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Deadline for one remote lookup.
    #[serde(default = "default_remote_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub remote_timeout: Duration,
    /// Override of the compiled-in shared secret.
    #[serde(default, skip_serializing)]
    pub shared_secret: Option<String>,
    /// Also write the machine-wide trial witness.
    #[serde(default = "default_true")]
    pub system_witness: bool,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            store_file: default_store_file(),
            trial_days: default_trial_days(),
            remote_url: None,
            remote_timeout: default_remote_timeout(),
            shared_secret: None,
            system_witness: true,
        }
    }
}

impl LicenseConfig {
    /// Validate the section.
    pub fn validate(&self) -> Result<()> {
        if self.trial_days == 0 {
            return Err(anyhow!("license.trial_days must be at least 1"));
        }
        if self.store_file.trim().is_empty() {
            return Err(anyhow!("license.store_file must not be empty"));
        }
        if self.remote_timeout.is_zero() {
            return Err(anyhow!("license.remote_timeout must be positive"));
        }
        if let Some(url) = &self.remote_url {
            Url::parse(url).with_context(|| format!("license.remote_url {url} is not a URL"))?;
        }
        if self.shared_secret.as_deref().is_some_and(|s| s.is_empty()) {
            return Err(anyhow!("license.shared_secret must not be empty when set"));
        }
        Ok(())
    }

    /// Directory holding the license store.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join(PRODUCT_NAME))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }

    /// Full path of the license store.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(&self.store_file)
    }

    /// Immutable settings handed to the licensing components.
    #[must_use]
    pub fn settings(&self) -> LicenseSettings {
        LicenseSettings {
            secret: SharedSecret::new(
                self.shared_secret
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SHARED_SECRET.to_owned()),
            ),
            trial_days: self.trial_days,
        }
    }
}

/// `[update]` section.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// GitHub repository owner.
    #[serde(default)]
    pub github_owner: Option<String>,
    /// GitHub repository name.
    #[serde(default)]
    pub github_repo: Option<String>,
    /// Token sent with GitHub requests.
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,
    /// Alternative GitHub API root.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Local JSON release feed; takes precedence over GitHub.
    #[serde(default)]
    pub feed_path: Option<PathBuf>,
    /// Version compared against releases. Defaults to the build version.
    #[serde(default)]
    pub current_version: Option<String>,
    /// Product name matched against release assets.
    #[serde(default = "default_product_name")]
    pub product_name: String,
    /// Executable file name inside the application directory.
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
    /// Installation directory. Defaults to the directory of the running executable.
    #[serde(default)]
    pub app_dir: Option<PathBuf>,
    /// Deadline for one update check.
    #[serde(default = "default_check_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_timeout: Duration,
    /// Deadline for one artifact download.
    #[serde(default = "default_download_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub download_timeout: Duration,
    /// Interval between background checks.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Check once right after start-up.
    #[serde(default = "default_true")]
    pub check_on_start: bool,
    /// Smallest executable accepted from a download.
    #[serde(default = "default_min_executable_bytes")]
    pub min_executable_bytes: u64,
    /// Wait before the swap script kills the old process.
    #[serde(default = "default_grace_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub grace_period: Duration,
    /// Backup root. Defaults to `<app_dir>/backups`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// Backups kept after pruning.
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,
    /// File and directory names an update never overwrites.
    #[serde(default = "default_preserve")]
    pub preserve: Vec<String>,
    /// Files copied into backups next to the executable.
    #[serde(default = "default_state_files")]
    pub state_files: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            github_owner: None,
            github_repo: None,
            github_token: None,
            api_base: None,
            feed_path: None,
            current_version: None,
            product_name: default_product_name(),
            executable_name: default_executable_name(),
            app_dir: None,
            check_timeout: default_check_timeout(),
            download_timeout: default_download_timeout(),
            poll_interval: default_poll_interval(),
            check_on_start: true,
            min_executable_bytes: default_min_executable_bytes(),
            grace_period: default_grace_period(),
            backup_dir: None,
            keep_backups: default_keep_backups(),
            preserve: default_preserve(),
            state_files: default_state_files(),
        }
    }
}

impl UpdateConfig {
    /// Validate the section.
    pub fn validate(&self) -> Result<()> {
        if self.product_name.trim().is_empty() {
            return Err(anyhow!("update.product_name must not be empty"));
        }
        if self.executable_name.trim().is_empty() {
            return Err(anyhow!("update.executable_name must not be empty"));
        }
        for (name, value) in [
            ("check_timeout", self.check_timeout),
            ("download_timeout", self.download_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(anyhow!("update.{name} must be positive"));
            }
        }
        if self.github_owner.is_some() != self.github_repo.is_some() {
            return Err(anyhow!(
                "update.github_owner and update.github_repo must be set together"
            ));
        }
        if let Some(base) = &self.api_base {
            Url::parse(base).with_context(|| format!("update.api_base {base} is not a URL"))?;
        }
        Ok(())
    }

    /// Version the running installation reports.
    #[must_use]
    pub fn current_version(&self) -> String {
        self.current_version
            .clone()
            .unwrap_or_else(|| BuildInfo::current().version)
    }

    /// GitHub coordinates when both owner and repository are set.
    #[must_use]
    pub fn github(&self) -> Option<(&str, &str)> {
        self.github_owner
            .as_deref()
            .zip(self.github_repo.as_deref())
            .filter(|(owner, repo)| !owner.trim().is_empty() && !repo.trim().is_empty())
    }

    /// Installation directory, falling back to the running executable's directory.
    pub fn app_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.app_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe().context("unable to locate the running executable")?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("executable {} has no parent directory", exe.display()))
    }

    /// Immutable settings handed to the installer.
    pub fn install_settings(&self) -> Result<InstallSettings> {
        let app_dir = self.app_dir()?;
        Ok(InstallSettings {
            backup_dir: self
                .backup_dir
                .clone()
                .unwrap_or_else(|| app_dir.join("backups")),
            app_dir,
            executable_name: self.executable_name.clone(),
            keep_backups: self.keep_backups,
            min_executable_bytes: self.min_executable_bytes,
            grace_period: self.grace_period,
            preserve: self.preserve.clone(),
            state_files: self.state_files.clone(),
        })
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Console format on stderr.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
        }
    }
}
