//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STASH_*)
//! 2. TOML config file (if STASH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STASH_*)
/// 2. TOML config file (if STASH_CONFIG_FILE set)
/// 3. Built-in defaults
///
/// List fields take TOML-style arrays from the environment, e.g.
/// `STASH_ALLOWED_HOSTS='["fonts.googleapis.com"]'`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite partition store.
    ///
    /// Set via STASH_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin of the application the coordinator serves.
    ///
    /// Set via STASH_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Version token embedded in every partition name.
    ///
    /// Set via STASH_VERSION environment variable.
    #[serde(default = "default_version")]
    pub version: String,

    /// Optional prefix for partition names (`{prefix}-{kind}-{version}`).
    ///
    /// Set via STASH_CACHE_PREFIX environment variable.
    #[serde(default)]
    pub cache_prefix: String,

    /// Resources that must be pre-cached for install to succeed.
    #[serde(default = "default_core_files")]
    pub core_files: Vec<String>,

    /// Resources pre-cached on a best-effort basis.
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,

    /// Cross-origin hosts whose requests may still be intercepted.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// Document served when navigation fails with nothing cached.
    ///
    /// Set via STASH_OFFLINE_DOCUMENT environment variable.
    #[serde(default = "default_offline_document")]
    pub offline_document: Option<String>,

    /// Image served when an image fetch fails with nothing cached.
    ///
    /// Set via STASH_IMAGE_FALLBACK environment variable.
    #[serde(default = "default_image_fallback")]
    pub image_fallback: Option<String>,

    /// Seconds between refreshes of the core partition.
    ///
    /// Set via STASH_REFRESH_INTERVAL_SECS environment variable.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Activate a freshly installed version without waiting.
    ///
    /// Set via STASH_SKIP_WAITING environment variable.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// User-Agent string for network fetches.
    ///
    /// Set via STASH_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via STASH_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via STASH_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Maximum redirects followed per fetch.
    ///
    /// Set via STASH_MAX_REDIRECTS environment variable.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Base URL of the notification relay (e.g. `http://localhost:5055`).
    ///
    /// Set via STASH_RELAY_URL environment variable. Background sync fails
    /// with DELIVERY_FAILURE while unset.
    #[serde(default)]
    pub relay_url: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stash-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_version() -> String {
    "v2.0.0".into()
}

fn default_core_files() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/about.html",
        "/services.html",
        "/gallery.html",
        "/news.html",
        "/contact.html",
        "/styles/main.css",
        "/js/main.js",
        "/manifest.json",
        "/sw.js",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_static_assets() -> Vec<String> {
    [
        "/humans.txt",
        "/robots.txt",
        "/sitemap.xml",
        "/favicon.ico",
        "https://fonts.googleapis.com/css2?family=Cairo:wght@300;400;600;700&family=Amiri:wght@400;700&display=swap",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["fonts.googleapis.com".into(), "fonts.gstatic.com".into()]
}

fn default_offline_document() -> Option<String> {
    Some("/index.html".into())
}

fn default_image_fallback() -> Option<String> {
    Some("/assets/fallback-image.png".into())
}

fn default_refresh_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "stash/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            version: default_version(),
            cache_prefix: String::new(),
            core_files: default_core_files(),
            static_assets: default_static_assets(),
            allowed_hosts: default_allowed_hosts(),
            offline_document: default_offline_document(),
            image_fallback: default_image_fallback(),
            refresh_interval_secs: default_refresh_interval_secs(),
            skip_waiting: true,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_redirects: default_max_redirects(),
            relay_url: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Refresh interval as Duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Parsed origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the origin is not an absolute URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `STASH_`
    /// 2. TOML file from `STASH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STASH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("STASH_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    /// Extract and validate a configuration from an assembled figment.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Relay base URL, required only when a background sync is delivered.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the relay URL is not set.
    pub fn require_relay_url(&self) -> Result<&str, ConfigError> {
        self.relay_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "relay_url".into(),
            hint: "Set STASH_RELAY_URL environment variable".into(),
        })
    }
}
