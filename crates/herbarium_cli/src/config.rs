//! Configuration file support for herbarium.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `HERBARIUM_`, nested keys joined
//!    with `__`, e.g. `HERBARIUM_PROJECT__ID`)
//! 3. Config file (./herbarium.toml, then ~/.config/herbarium/config.toml)
//! 4. Built-in defaults
//!
//! The API token is only ever read from `INAT_API_TOKEN`, never from a file.
//!
//! Example config file:
//! ```toml
//! [api]
//! base_url = "https://api.inaturalist.org/v1"
//! timeout_secs = 30
//! max_requests_per_minute = 50
//! max_attempts = 5
//! page_size = 200
//!
//! [cache]
//! path = "inaturalist_observations.json"
//!
//! [project]
//! id = 263745
//! field_name = "Herbarium Catalog Number"
//! include_pattern = "UWAL-M"
//! exclude_pattern = "UWAL-L"
//! correct_invalid = false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};
use directories::ProjectDirs;
use herbarium::reconcile::defaults;
use herbarium::{
    ClientOptions, DEFAULT_CACHE_FILE, DEFAULT_PAGE_SIZE, MembershipRule, RetryConfig,
    TOKEN_ENV_VAR, rate_limits, retry,
};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub project: ProjectConfig,
}

/// iNaturalist API settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token from `INAT_API_TOKEN`.
    #[serde(skip)]
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub max_requests_per_minute: usize,
    /// Attempts per read request, including the first.
    pub max_attempts: usize,
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: herbarium::client::DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout_secs: herbarium::client::DEFAULT_TIMEOUT.as_secs(),
            max_requests_per_minute: rate_limits::DEFAULT_MAX_REQUESTS,
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Record cache settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CACHE_FILE),
        }
    }
}

/// Target project and membership rule.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub id: u64,
    pub field_name: String,
    pub include_pattern: String,
    pub exclude_pattern: String,
    /// Remove members that fail validation, once, after reconciling.
    pub correct_invalid: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: defaults::PROJECT_ID,
            field_name: defaults::FIELD_NAME.to_string(),
            include_pattern: defaults::INCLUDE_PATTERN.to_string(),
            exclude_pattern: defaults::EXCLUDE_PATTERN.to_string(),
            correct_invalid: false,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/herbarium/config.toml)
    /// 3. Local config file (./herbarium.toml)
    /// 4. Environment variables with HERBARIUM_ prefix
    ///
    /// A malformed file or a value of the wrong type is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from("herbarium.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./herbarium.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // HERBARIUM_API__BASE_URL -> api.base_url
        builder = builder.add_source(Self::environment());

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.api.token = std::env::var(TOKEN_ENV_VAR).ok();
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("HERBARIUM")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "herbarium").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Client settings for the library.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.api.base_url.clone(),
            token: self.api.token.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            max_requests_per_minute: self.api.max_requests_per_minute,
            page_size: self.api.page_size,
            retry: RetryConfig::default().with_max_attempts(self.api.max_attempts),
        }
    }

    /// Membership rule for the configured project.
    pub fn membership_rule(&self) -> MembershipRule {
        MembershipRule {
            field_name: self.project.field_name.clone(),
            include: self.project.include_pattern.clone(),
            exclude: self.project.exclude_pattern.clone(),
        }
    }
}
