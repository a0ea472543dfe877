//! TOML configuration with validated defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{CleanerError, Result};
use crate::models::ScanScope;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub rate: RateConfig,
    pub classification: ClassificationConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Message ids per list page (1-500)
    pub page_size: u32,
    /// Concurrent metadata fetches per chunk
    pub chunk_size: usize,
    /// Cap on messages examined per scan
    pub max_messages: usize,
    /// "inbox" or "all-mail"
    pub scope: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            chunk_size: 50,
            max_messages: 2000,
            scope: "inbox".to_string(),
        }
    }
}

impl ScanConfig {
    pub fn scan_scope(&self) -> Result<ScanScope> {
        match self.scope.as_str() {
            "inbox" => Ok(ScanScope::Inbox),
            "all-mail" => Ok(ScanScope::AllMail),
            other => Err(CleanerError::ConfigError(format!(
                "Unknown scan scope '{}' (expected 'inbox' or 'all-mail')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Outbound API requests per second (1-50)
    pub requests_per_second: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Senders per LLM request (1-100)
    pub batch_size: usize,
    /// Pause between LLM requests
    pub batch_delay_ms: u64,
    /// Model name passed to the completion provider
    pub model: String,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 500,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl ClassificationConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth client credentials JSON (downloaded from Google Cloud console)
    pub credentials: PathBuf,
    /// Cached token store, created on first auth
    pub token_cache: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials: PathBuf::from("credentials.json"),
            token_cache: PathBuf::from("token-cache.json"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// A missing file means defaults, with a warning so a mistyped path is
    /// not silently ignored.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| CleanerError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CleanerError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=500).contains(&self.scan.page_size) {
            return Err(CleanerError::ConfigError(format!(
                "scan.page_size must be 1-500, got {}",
                self.scan.page_size
            )));
        }
        if self.scan.chunk_size == 0 {
            return Err(CleanerError::ConfigError(
                "scan.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.scan.max_messages == 0 {
            return Err(CleanerError::ConfigError(
                "scan.max_messages must be at least 1".to_string(),
            ));
        }
        self.scan.scan_scope()?;

        if !(1..=50).contains(&self.rate.requests_per_second) {
            return Err(CleanerError::ConfigError(format!(
                "rate.requests_per_second must be 1-50, got {}",
                self.rate.requests_per_second
            )));
        }

        if !(1..=100).contains(&self.classification.batch_size) {
            return Err(CleanerError::ConfigError(format!(
                "classification.batch_size must be 1-100, got {}",
                self.classification.batch_size
            )));
        }

        Ok(())
    }

    /// Example config written by the init-config command
    pub fn example_toml() -> String {
        let mut out = String::from(
            "# inbox-cleaner configuration\n\
             # All values shown are the defaults.\n\n",
        );
        // Defaults always serialize
        out.push_str(&toml::to_string_pretty(&Config::default()).unwrap_or_default());
        out
    }
}
