//! Service configuration
//!
//! Values are layered: serde defaults, then an optional TOML file, then
//! `MEMORYOPS__<SECTION>__<KEY>` environment variables, then the flat legacy
//! variables (`API_KEYS`, `TOP_K`, `REQUESTS_PER_MINUTE`, ...). The loaded
//! value is an immutable snapshot handed to each component at construction.

use crate::context::ReducerConfig;
use crate::error::{Error, Result};
use crate::quota::RateLimitConfig;
use crate::upstream::UpstreamConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub use crate::context::{OracleKind, TokenizerKind};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub compression: ReducerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Comma separated API keys; empty disables authentication
    #[serde(default = "default_api_keys")]
    pub api_keys: String,
}

fn default_api_keys() -> String {
    "dev-key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: default_api_keys(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            Error::Configuration(format!("{} must be an integer, got {:?}", name, raw))
        }),
    }
}

impl Config {
    /// Load from an optional TOML file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("MEMORYOPS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        config.apply_legacy_env(&std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string, without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the flat variable names used by earlier deployments.
    ///
    /// A numeric variable that does not parse is a configuration error.
    pub fn apply_legacy_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(val) = vars.get("API_KEYS") {
            self.auth.api_keys = val.clone();
        }

        if let Some(num) = parse_var(vars, "TOP_K")? {
            self.compression.top_k = num;
        }

        if let Some(num) = parse_var(vars, "REQUESTS_PER_MINUTE")? {
            self.rate_limit.requests_per_minute = num;
        }

        // RATE_LIMIT_TPM is an older alias, used only when TOKENS_PER_MINUTE
        // is absent or zero
        let tpm: Option<i64> = parse_var(vars, "TOKENS_PER_MINUTE")?.filter(|n| *n != 0);
        let alias: Option<i64> = parse_var(vars, "RATE_LIMIT_TPM")?;
        if let Some(num) = tpm.or(alias) {
            self.rate_limit.tokens_per_minute = num;
        }

        if let Some(val) = vars.get("UPSTREAM_BASE") {
            self.upstream.base_url = val.clone();
        }

        if let Some(val) = vars.get("UPSTREAM_MODEL") {
            self.upstream.model = val.clone();
        }

        if let Some(val) = vars.get("UPSTREAM_API_KEY").filter(|v| !v.is_empty()) {
            self.upstream.api_key = Some(SecretString::new(val.clone()));
        }
        Ok(())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        if self.compression.top_k == 0 {
            return Err(Error::Configuration("compression.top_k must be at least 1".to_string()));
        }
        if self.compression.oracle == OracleKind::Http && self.compression.oracle_endpoint.is_none()
        {
            return Err(Error::Configuration(
                "compression.oracle_endpoint is required when compression.oracle = \"http\""
                    .to_string(),
            ));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(Error::Configuration("upstream.base_url must not be empty".to_string()));
        }
        Ok(())
    }
}
