use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batcher::BatcherSettings;
use crate::route::{derive_origin_from_url, Endpoint, RouteKey};
use crate::transport::HttpSettings;

pub const CONFIG_FILENAME: &str = ".clientinst.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging endpoint, containing `default_route` where the route key goes.
    pub log_url: String,
    pub default_route: String,
    /// Prefix prepended to `log_url`. Derived from `page_url` when unset.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_batch_len")]
    pub max_batch_len: usize,
    #[serde(default)]
    pub beacon_enabled: bool,
    #[serde(default = "default_pixel_max_url_len")]
    pub pixel_max_url_len: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub xls_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_true")]
    pub log_init_event: bool,
}

fn default_flush_interval_ms() -> u64 {
    2000
}

fn default_max_batch_len() -> usize {
    2000
}

fn default_pixel_max_url_len() -> usize {
    2048
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn new(log_url: impl Into<String>, default_route: impl Into<String>) -> Self {
        Self {
            log_url: log_url.into(),
            default_route: default_route.into(),
            origin: None,
            page_url: None,
            flush_interval_ms: default_flush_interval_ms(),
            max_batch_len: default_max_batch_len(),
            beacon_enabled: false,
            pixel_max_url_len: default_pixel_max_url_len(),
            request_timeout_ms: default_request_timeout_ms(),
            xls_url: None,
            client_id: None,
            log_init_event: true,
        }
    }

    /// Load from the working directory, then the user config directory.
    pub fn load() -> Result<Self> {
        let local = Path::new(CONFIG_FILENAME);
        if local.exists() {
            return load_config_from_path(local);
        }
        match user_config_path() {
            Some(path) if path.exists() => load_config_from_path(path),
            _ => anyhow::bail!(
                "No {} found in the current directory or user config directory",
                CONFIG_FILENAME
            ),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_url.is_empty() {
            anyhow::bail!("log_url must not be empty");
        }
        if !self.default_route.is_empty() && !self.log_url.contains(&self.default_route) {
            anyhow::bail!(
                "log_url '{}' does not contain default_route '{}'",
                self.log_url,
                self.default_route
            );
        }
        if self.flush_interval_ms == 0 {
            anyhow::bail!("flush_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// Explicit origin, else one derived from `page_url`, else none.
    pub fn resolved_origin(&self) -> String {
        self.origin
            .clone()
            .or_else(|| self.page_url.as_deref().and_then(derive_origin_from_url))
            .unwrap_or_default()
    }

    pub fn batcher_settings(&self) -> BatcherSettings {
        let endpoint = Endpoint::new(
            self.resolved_origin(),
            self.log_url.clone(),
            RouteKey::new(self.default_route.clone()),
        );
        BatcherSettings {
            endpoint,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            max_batch_len: self.max_batch_len,
            log_init_event: self.log_init_event,
            xls_url: self.xls_url.clone(),
            client_id: self.client_id.clone(),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_millis(self.request_timeout_ms),
            beacon_enabled: self.beacon_enabled,
            pixel_max_url_len: self.pixel_max_url_len,
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clientinst").join("config.toml"))
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    config.validate()?;
    Ok(config)
}
