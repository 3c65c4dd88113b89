//! Configuration types and loading
//!
//! A [`Configuration`] is an immutable snapshot. It is loaded once (YAML file
//! or defaults, then environment), and every later change goes through
//! [`Configuration::merge`], which returns a new snapshot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credentials::{ApiKeyCredentials, Credentials};
use crate::error::{Result, ScopeError};

/// Environment variable overriding the API base URL
pub const ENV_API_URL: &str = "SCOPE_API_URL";
/// Environment variable overriding the auth API base URL
pub const ENV_AUTH_API_URL: &str = "SCOPE_AUTH_API_URL";
/// Environment variable overriding the environment tag
pub const ENV_ENVIRONMENT: &str = "SCOPE_ENVIRONMENT";

/// Operational parameters for a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Configuration {
    /// Never read from or written to config files
    #[serde(skip)]
    pub credentials: Option<Credentials>,

    /// API base URL, without the version segment
    pub base_url: String,

    /// Auth API base URL used for the token exchange
    pub auth_api_url: String,

    /// API version path segment
    pub api_version: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    pub open_timeout_secs: u64,

    pub cache_enabled: bool,

    /// Default cache entry lifetime in seconds
    pub cache_ttl_secs: u64,

    /// Retries after the first attempt
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    pub telemetry_enabled: bool,

    /// Sent as `X-Scope-Environment`
    pub environment: String,

    /// Refresh the bearer token this many seconds before it expires
    pub token_refresh_buffer_secs: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            credentials: None,
            base_url: "https://api.scope.io".to_string(),
            auth_api_url: "https://auth.scope.io".to_string(),
            api_version: "v1".to_string(),
            timeout_secs: 30,
            open_timeout_secs: 10,
            cache_enabled: true,
            cache_ttl_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            telemetry_enabled: true,
            environment: "production".to_string(),
            token_refresh_buffer_secs: 60,
        }
    }
}

/// Explicit overrides; every `Some` field wins over the base configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub credentials: Option<Credentials>,
    pub base_url: Option<String>,
    pub auth_api_url: Option<String>,
    pub api_version: Option<String>,
    pub timeout_secs: Option<u64>,
    pub open_timeout_secs: Option<u64>,
    pub cache_enabled: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub telemetry_enabled: Option<bool>,
    pub environment: Option<String>,
    pub token_refresh_buffer_secs: Option<u64>,
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

impl Configuration {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.scope.yml`, then `<config dir>/scope/scope.yml`,
    /// then defaults. Environment variables are not applied here; see
    /// [`with_env`](Self::with_env).
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".scope.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("scope").join("scope.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        debug!("Configuration::load: no config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Configuration::load_from_file: called");
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScopeError::Configuration(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config: Configuration = serde_yaml::from_str(&content)
            .map_err(|e| ScopeError::Configuration(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.base_url = trim_url(&config.base_url);
        config.auth_api_url = trim_url(&config.auth_api_url);
        Ok(config)
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay `SCOPE_*` environment variables onto this configuration
    pub fn with_env(mut self) -> Self {
        if let Some(creds) = ApiKeyCredentials::from_env() {
            debug!("Configuration::with_env: credentials from environment");
            self.credentials = Some(Credentials::ApiKey(creds));
        }
        if let Ok(url) = std::env::var(ENV_API_URL)
            && !url.is_empty()
        {
            self.base_url = trim_url(&url);
        }
        if let Ok(url) = std::env::var(ENV_AUTH_API_URL)
            && !url.is_empty()
        {
            self.auth_api_url = trim_url(&url);
        }
        if let Ok(environment) = std::env::var(ENV_ENVIRONMENT)
            && !environment.is_empty()
        {
            self.environment = environment;
        }
        self
    }

    /// New configuration with the given overrides applied
    pub fn merge(&self, overrides: ConfigOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(credentials) = overrides.credentials {
            merged.credentials = Some(credentials);
        }
        if let Some(url) = overrides.base_url {
            merged.base_url = trim_url(&url);
        }
        if let Some(url) = overrides.auth_api_url {
            merged.auth_api_url = trim_url(&url);
        }
        if let Some(v) = overrides.api_version {
            merged.api_version = v;
        }
        if let Some(v) = overrides.timeout_secs {
            merged.timeout_secs = v;
        }
        if let Some(v) = overrides.open_timeout_secs {
            merged.open_timeout_secs = v;
        }
        if let Some(v) = overrides.cache_enabled {
            merged.cache_enabled = v;
        }
        if let Some(v) = overrides.cache_ttl_secs {
            merged.cache_ttl_secs = v;
        }
        if let Some(v) = overrides.max_retries {
            merged.max_retries = v;
        }
        if let Some(v) = overrides.retry_base_delay_ms {
            merged.retry_base_delay_ms = v;
        }
        if let Some(v) = overrides.retry_max_delay_ms {
            merged.retry_max_delay_ms = v;
        }
        if let Some(v) = overrides.telemetry_enabled {
            merged.telemetry_enabled = v;
        }
        if let Some(v) = overrides.environment {
            merged.environment = v;
        }
        if let Some(v) = overrides.token_refresh_buffer_secs {
            merged.token_refresh_buffer_secs = v;
        }
        merged
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        match &self.credentials {
            None => {
                return Err(ScopeError::MissingCredential {
                    field: "credentials".to_string(),
                });
            }
            Some(credentials) => credentials.validate()?,
        }
        if self.base_url.is_empty() {
            return Err(ScopeError::Configuration("base-url must not be empty".to_string()));
        }
        if self.auth_api_url.is_empty() {
            return Err(ScopeError::Configuration("auth-api-url must not be empty".to_string()));
        }
        if self.api_version.is_empty() {
            return Err(ScopeError::Configuration("api-version must not be empty".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ScopeError::Configuration(format!(
                "retry-base-delay-ms ({}) exceeds retry-max-delay-ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }

    /// Full API URL including the version segment
    pub fn api_url(&self) -> String {
        format!("{}/{}", self.base_url, self.api_version)
    }

    /// Token exchange endpoint on the auth API
    pub fn token_url(&self) -> String {
        format!("{}/{}/auth/sdk-token", self.auth_api_url, self.api_version)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn token_refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.token_refresh_buffer_secs)
    }

    /// Configuration as JSON with credentials masked, for display
    pub fn to_redacted_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            let credentials = self
                .credentials
                .as_ref()
                .map(Credentials::redacted)
                .unwrap_or(serde_json::Value::Null);
            map.insert("credentials".to_string(), credentials);
        }
        value
    }
}
