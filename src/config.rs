//! CloudNest configuration
//!
//! Persistent JSON settings under the user's config directory, with
//! environment overrides for the OAuth client credentials.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::google_drive::{DRIVE_API_BASE, UPLOAD_API_BASE};
use crate::providers::{GoogleDriveConfig, ProviderError};

pub const CLIENT_ID_ENV: &str = "CLOUDNEST_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "CLOUDNEST_CLIENT_SECRET";

/// Drive caps `pageSize` at 1000
const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudNestConfig {
    /// OAuth client id (required for `login`)
    pub client_id: String,
    /// OAuth client secret, empty for public clients
    pub client_secret: String,
    /// Listing cache freshness window
    pub cache_ttl_secs: u64,
    /// Entries requested per listing page
    pub page_size: u32,
    /// Local key-value storage file (token, linked flag, featured files)
    pub storage_path: PathBuf,
    pub api_base: String,
    pub upload_base: String,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("cloudnest")
}

impl Default for CloudNestConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            cache_ttl_secs: 300,
            page_size: 50,
            storage_path: config_dir().join("local_storage.json"),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
        }
    }
}

impl CloudNestConfig {
    /// `~/.config/cloudnest/config.json` on Linux
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }

    /// Load from `path`, falling back to defaults when missing or unreadable
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load from the default path and apply environment overrides
    pub fn load_default() -> Self {
        let mut config = Self::load(&Self::default_path());
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn save(&self, path: &Path) -> Result<(), ProviderError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Replace the client credentials with non-empty values from `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.client_id = id;
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.page_size == 0 {
            return Err(ProviderError::InvalidConfig("page_size must be at least 1".to_string()));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ProviderError::InvalidConfig(format!(
                "page_size must not exceed {}",
                MAX_PAGE_SIZE
            )));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ProviderError::InvalidConfig("cache_ttl_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Client credentials for `login`
    pub fn require_client(&self) -> Result<(&str, &str), ProviderError> {
        if self.client_id.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!(
                "no OAuth client id configured (set client_id or {})",
                CLIENT_ID_ENV
            )));
        }
        Ok((&self.client_id, &self.client_secret))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn drive_config(&self) -> GoogleDriveConfig {
        GoogleDriveConfig {
            api_base: self.api_base.clone(),
            upload_base: self.upload_base.clone(),
        }
    }
}
