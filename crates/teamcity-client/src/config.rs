//! TeamCity connection settings

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::TeamCityError;
use crate::Result;

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// TeamCity connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamCityConfig {
    /// Server URL, e.g. `https://teamcity.example.com`
    pub base_url: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password or access token
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Timeout applied to every request
    pub request_timeout: Duration,
}

impl Default for TeamCityConfig {
    fn default() -> Self {
        TeamCityConfig {
            base_url: std::env::var("TEAMCITY_URL").unwrap_or_default(),
            username: std::env::var("TEAMCITY_USERNAME").unwrap_or_default(),
            password: std::env::var("TEAMCITY_PASSWORD").unwrap_or_default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TeamCityConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific server
    pub fn new(base_url: &str) -> Self {
        TeamCityConfig {
            base_url: base_url.to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set basic auth credentials
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Parse the server URL into the base every endpoint is resolved against.
    ///
    /// The path always ends in `/`, so a server mounted under a context path
    /// (`https://host/tc`) keeps that path when endpoints are joined.
    pub fn base(&self) -> Result<Url> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(TeamCityError::MissingUrl);
        }
        let mut url = Url::parse(raw).map_err(|e| TeamCityError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TeamCityError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}
