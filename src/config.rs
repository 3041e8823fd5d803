//! Configuration types for the asset cache controller and its hosts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Store identifier for the current generation. Bump it whenever the
/// manifest or any cached asset changes.
pub const DEFAULT_CACHE_NAME: &str = "cse-atelier-cache-v1";

/// Assets that must be present in the store after install.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "./",
    "./index.html",
    "./styles.css",
    "./script.js",
    "./manifest.json",
    "./icons/favicon.ico",
    "./icons/icon-192x192.png",
    "./icons/icon-512x512.png",
];

/// URL substrings that bypass interception entirely.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "firestore.googleapis.com",
    "google.com/recaptcha",
    "fonts.gstatic.com",
];

/// Configuration for the asset cache controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Identifier of the current store generation.
    pub cache_name: String,
    /// Base URL the manifest paths are resolved against. Responses from
    /// this origin are classified as same-origin.
    pub scope: String,
    /// Ordered relative paths pre-cached at install.
    pub manifest: Vec<String>,
    /// Request URLs containing any of these substrings are never intercepted.
    pub exclusions: Vec<String>,
    /// Maximum number of manifest fetches in flight during install.
    pub install_concurrency: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            scope: "http://127.0.0.1:8080/".to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(ToString::to_string).collect(),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(ToString::to_string).collect(),
            install_concurrency: 4,
        }
    }
}

impl ControllerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current store identifier.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Sets the scope URL.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Replaces the asset manifest.
    #[must_use]
    pub fn with_manifest<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the exclusion list.
    #[must_use]
    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the install fetch concurrency (clamped to at least one).
    #[must_use]
    pub fn with_install_concurrency(mut self, concurrency: usize) -> Self {
        self.install_concurrency = concurrency.max(1);
        self
    }

    /// Parses the scope URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the scope is not an absolute URL.
    pub fn scope_url(&self) -> Result<Url> {
        Url::parse(&self.scope).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.scope)))
    }

    /// Resolves every manifest path against the scope, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the scope or any path cannot be resolved.
    pub fn resolve_manifest(&self) -> Result<Vec<Url>> {
        let scope = self.scope_url()?;
        self.manifest
            .iter()
            .map(|path| {
                scope
                    .join(path)
                    .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
            })
            .collect()
    }

    /// Checks that the settings describe a usable controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the cache name is empty, or
    /// [`Error::InvalidUrl`] if the scope does not parse.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(Error::Config("cache_name must not be empty".to_string()));
        }
        self.scope_url().map(|_| ())
    }

    /// Returns true if `url` contains one of the exclusion substrings.
    #[must_use]
    pub fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.iter().any(|pattern| url.contains(pattern.as_str()))
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Idle connections kept per host.
    pub max_idle_per_host: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_idle_per_host: 8,
        }
    }
}

impl NetworkConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Listening address for the offline proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9724,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory of the persistent store.
    pub store_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            store_dir: data_dir.join("offline-cache").join("stores"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controller settings.
    pub controller: ControllerConfig,
    /// HTTP client settings.
    pub network: NetworkConfig,
    /// Proxy listener settings.
    pub server: ServerConfig,
    /// Store location.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file. Missing sections and fields
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the input is not valid TOML for this schema
    /// or names an empty cache, or [`Error::InvalidUrl`] for a bad scope.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.controller.validate()?;
        Ok(config)
    }
}
