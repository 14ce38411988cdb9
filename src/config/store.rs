use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CartError;

/// Project config file, looked up in the current directory
pub const PROJECT_CONFIG_FILE: &str = ".cart-session.toml";

/// Environment variable overriding `base_url`
pub const ENV_BASE_URL: &str = "CART_SESSION_BASE_URL";

/// Environment variable overriding `storage_path`
pub const ENV_STORAGE: &str = "CART_SESSION_STORAGE";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SYNC_POLL_MS: u64 = 1000;

/// Store API client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store API base, e.g. `https://shop.example/wp-json/wc/store/v1`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// User-Agent header sent with every request
    #[serde(default)]
    pub user_agent: Option<String>,

    /// SQLite file holding the cart token and update signal
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// How often `watch` polls the store for other processes' writes
    #[serde(default)]
    pub sync_poll_interval_ms: Option<u64>,
}

impl StoreConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Load configuration with precedence: env > project file > global file > defaults.
    pub fn load() -> Result<Self> {
        let global = std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".cart-session").join("config.toml"));
        Self::load_from(
            Path::new(PROJECT_CONFIG_FILE),
            global.as_deref(),
            |name| std::env::var(name).ok(),
        )
    }

    /// Load from explicit locations. Missing files are skipped.
    pub fn load_from(
        project: &Path,
        global: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Some(global) = global {
            if let Some(file) = Self::read_file(global)? {
                config = config.merge(file);
            }
        }
        if let Some(file) = Self::read_file(project)? {
            config = config.merge(file);
        }

        if let Some(url) = env(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = Some(url);
        }
        if let Some(path) = env(ENV_STORAGE).filter(|v| !v.trim().is_empty()) {
            config.storage_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(Some(config))
    }

    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merge(self, other: Self) -> Self {
        Self {
            base_url: other.base_url.or(self.base_url),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            user_agent: other.user_agent.or(self.user_agent),
            storage_path: other.storage_path.or(self.storage_path),
            sync_poll_interval_ms: other.sync_poll_interval_ms.or(self.sync_poll_interval_ms),
        }
    }

    /// The validated base URL.
    ///
    /// Without it no request can succeed, so its absence is a configuration
    /// error rather than a request failure.
    pub fn require_base_url(&self) -> Result<&str, CartError> {
        let url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                CartError::Config(format!(
                    "store API base URL not set (use {} or base_url in {})",
                    ENV_BASE_URL, PROJECT_CONFIG_FILE
                ))
            })?;

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CartError::Config(format!("invalid base URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CartError::Config(format!(
                "base URL must be http or https: {}",
                url
            )));
        }

        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms.unwrap_or(DEFAULT_SYNC_POLL_MS))
    }
}
