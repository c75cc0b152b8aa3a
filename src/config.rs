//! Configuration file parser for ~/.config/braid/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::{EngineOptions, SessionOptions};
use crate::source::http::RetryPolicy;
use crate::util::{validate_endpoint, EndpointError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// `forum_url` or `auction_url` failed validation.
    #[error("Invalid endpoint for {key}: {source}")]
    InvalidEndpoint {
        key: &'static str,
        #[source]
        source: EndpointError,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

const KNOWN_KEYS: &[&str] = &[
    "forum_url",
    "auction_url",
    "profile",
    "page_size",
    "offers_page_size",
    "poll_interval_secs",
    "initial_poll_delay_secs",
    "scroll_throttle_ms",
    "edge_threshold_px",
    "max_detector_pages",
    "show_auctions",
    "request_timeout_secs",
    "api_token",
];

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the forum item source.
    pub forum_url: String,

    /// Base URL of the auction side-channel.
    pub auction_url: String,

    /// Qualifies every persisted key, so several users or devices can share
    /// one database.
    pub profile: String,

    /// Forum page length for every directional load.
    pub page_size: usize,

    pub offers_page_size: usize,

    /// New-item check interval in seconds.
    pub poll_interval_secs: u64,

    /// Delay before the first new-item check.
    pub initial_poll_delay_secs: u64,

    pub scroll_throttle_ms: u64,

    /// Distance from either document edge, in pixels, that triggers a load.
    pub edge_threshold_px: u32,

    /// Page ceiling for the filtered new-item count.
    pub max_detector_pages: usize,

    /// Whether auction offers are merged into the feed by default.
    pub show_auctions: bool,

    pub request_timeout_secs: u64,

    /// Bearer token sent to both upstreams.
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forum_url: "https://forum.example.org/api".to_string(),
            auction_url: "https://auctions.example.org/api".to_string(),
            profile: "default".to_string(),
            page_size: 20,
            offers_page_size: 50,
            poll_interval_secs: 30,
            initial_poll_delay_secs: 2,
            scroll_throttle_ms: 100,
            edge_threshold_px: 500,
            max_detector_pages: 10,
            show_auctions: true,
            request_timeout_secs: 30,
            api_token: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("forum_url", &self.forum_url)
            .field("auction_url", &self.auction_url)
            .field("profile", &self.profile)
            .field("page_size", &self.page_size)
            .field("offers_page_size", &self.offers_page_size)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("initial_poll_delay_secs", &self.initial_poll_delay_secs)
            .field("scroll_throttle_ms", &self.scroll_throttle_ms)
            .field("edge_threshold_px", &self.edge_threshold_px)
            .field("max_detector_pages", &self.max_detector_pages)
            .field("show_auctions", &self.show_auctions)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            profile = %config.profile,
            forum = %config.forum_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn forum_endpoint(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.forum_url).map_err(|source| ConfigError::InvalidEndpoint {
            key: "forum_url",
            source,
        })
    }

    pub fn auction_endpoint(&self) -> Result<Url, ConfigError> {
        validate_endpoint(&self.auction_url).map_err(|source| ConfigError::InvalidEndpoint {
            key: "auction_url",
            source,
        })
    }

    pub fn api_token(&self) -> Option<SecretString> {
        self.api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            ..RetryPolicy::default()
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            page_size: self.page_size.max(1),
            offers_page_size: self.offers_page_size,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            initial_poll_delay: Duration::from_secs(self.initial_poll_delay_secs),
            scroll_throttle: Duration::from_millis(self.scroll_throttle_ms),
            edge_threshold: f64::from(self.edge_threshold_px),
            detector_page_len: self.page_size.max(1),
            max_detector_pages: self.max_detector_pages.max(1),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
