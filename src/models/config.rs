//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::BodyFormat;

/// Root application configuration.
///
/// Loaded once at startup and handed to the crawler and discovery engine by
/// reference; nothing reads it back from global state mid-run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Seed categories crawled on every site
    #[serde(default)]
    pub categories: Vec<String>,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Content API instances to harvest
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Category discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Page store location and reset mode
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if !(1..=500).contains(&self.crawler.batch_limit) {
            return Err(AppError::validation(
                "crawler.batch_limit must be between 1 and 500",
            ));
        }
        if self.discovery.min_sites_for_global == Some(0) {
            return Err(AppError::validation(
                "discovery.min_sites_for_global must be > 0 when set",
            ));
        }
        self.database.reset_mode()?;

        if self.sites.is_empty() {
            return Err(AppError::validation("No sites defined"));
        }
        let mut seen = HashSet::new();
        for site in &self.sites {
            let base_url = site.base_url.trim();
            if base_url.is_empty() {
                return Err(AppError::validation("sites.base_url is empty"));
            }
            Url::parse(base_url).map_err(|e| {
                AppError::validation(format!("sites.base_url '{base_url}' is invalid: {e}"))
            })?;
            if !seen.insert(base_url.to_string()) {
                return Err(AppError::validation(format!(
                    "site '{base_url}' is defined more than once"
                )));
            }
        }
        Ok(())
    }

    /// Seed categories for a site: global seeds followed by the site's own.
    pub fn seed_categories(&self, site: &SiteConfig) -> Vec<String> {
        self.categories
            .iter()
            .chain(site.categories.iter())
            .cloned()
            .collect()
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Politeness delay after every page fetch, in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Delay after every list (pagination) call, in milliseconds
    #[serde(default = "defaults::pagination_delay")]
    pub pagination_delay_ms: u64,

    /// Retries for retryable HTTP failures inside the API client
    #[serde(default = "defaults::max_retries")]
    pub max_retries: usize,

    /// Base backoff between client retries, in milliseconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Items requested per list call
    #[serde(default = "defaults::batch_limit")]
    pub batch_limit: usize,

    /// Body format stored for each page
    #[serde(default)]
    pub body_format: BodyFormat,

    /// Remove same-title rows beyond the newest after each category
    #[serde(default)]
    pub cleanup_duplicates: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            pagination_delay_ms: defaults::pagination_delay(),
            max_retries: defaults::max_retries(),
            retry_delay_ms: defaults::retry_delay(),
            batch_limit: defaults::batch_limit(),
            body_format: BodyFormat::default(),
            cleanup_duplicates: false,
        }
    }
}

/// A single content API instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Full `api.php` endpoint; also the partition key in the store
    pub base_url: String,

    /// Optional display name used in logs
    #[serde(default)]
    pub name: Option<String>,

    /// Site-specific seed categories
    #[serde(default)]
    pub categories: Vec<String>,
}

impl SiteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            name: None,
            categories: Vec::new(),
        }
    }

    /// Name for log lines.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.base_url)
    }
}

/// Category discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enumerate every category per site and crawl them too
    #[serde(default)]
    pub enabled: bool,

    /// Threshold K for the "present in at least K sites" artifact
    #[serde(default)]
    pub min_sites_for_global: Option<usize>,

    /// Artifact directory, relative to the storage directory
    #[serde(default = "defaults::discovery_output_dir")]
    pub output_dir: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_sites_for_global: None,
            output_dir: defaults::discovery_output_dir(),
        }
    }
}

/// Destructive reset applied during schema bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    #[default]
    None,
    /// Drop and recreate the tables
    Drop,
    /// Keep the tables, delete every row
    Truncate,
}

/// Page store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, relative to the storage directory
    #[serde(default = "defaults::database_path")]
    pub path: String,

    /// Drop tables before the crawl
    #[serde(default)]
    pub drop: bool,

    /// Delete all rows before the crawl
    #[serde(default)]
    pub truncate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: defaults::database_path(),
            drop: false,
            truncate: false,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the reset flags; configuring both is fatal.
    pub fn reset_mode(&self) -> Result<ResetMode> {
        match (self.drop, self.truncate) {
            (true, true) => Err(AppError::config(
                "database.drop and database.truncate are mutually exclusive",
            )),
            (true, false) => Ok(ResetMode::Drop),
            (false, true) => Ok(ResetMode::Truncate),
            (false, false) => Ok(ResetMode::None),
        }
    }

    /// Database file location under the storage directory.
    pub fn resolve_path(&self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(&self.path)
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; wikiharvest/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn pagination_delay() -> u64 {
        100
    }
    pub fn max_retries() -> usize {
        2
    }
    pub fn retry_delay() -> u64 {
        500
    }
    pub fn batch_limit() -> usize {
        50
    }

    // Discovery defaults
    pub fn discovery_output_dir() -> String {
        "discovery".into()
    }

    // Database defaults
    pub fn database_path() -> String {
        "wikiharvest.sqlite".into()
    }
}
