//! Service Configuration
//!
//! Configuration for the crank service. Supports environment variables,
//! config files, and CLI arguments.

use std::time::Duration;

use leasehold_crank::CrankConfig;
use serde::{Deserialize, Serialize};

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Ledgers to crank, each run independently
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Per-run crank settings
    #[serde(default)]
    pub crank: CrankConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seconds between runs (0 = run once and exit)
    #[serde(default)]
    pub interval_secs: u64,

    /// Log and exit without running
    #[serde(default)]
    pub disabled: bool,

    /// Timeout for a single ledger request
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

/// One ledger node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Label used in logs and reports
    pub name: String,

    /// JSON-RPC URL
    pub url: String,
}

impl std::str::FromStr for EndpointConfig {
    type Err = String;

    /// Parse `name=url`, or a bare URL named after itself
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, url) = match s.split_once('=') {
            Some((name, url)) if !name.contains("://") => (name.trim(), url.trim()),
            _ => (s.trim(), s.trim()),
        };
        if name.is_empty() || url.is_empty() {
            return Err(format!("invalid endpoint '{}', expected name=url", s));
        }
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServiceConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Check everything that would otherwise fail after startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoints.is_empty() {
            anyhow::bail!("No ledger endpoints configured. Set endpoints in config or pass --endpoint.");
        }
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be at least 1");
        }
        self.crank.validate()?;
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            crank: CrankConfig::default(),
            logging: LoggingConfig::default(),
            interval_secs: 0,
            disabled: false,
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_rpc_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServiceConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        // LEASEHOLD__CRANK__BATCH_SIZE=8 and friends
        builder = builder.add_source(
            config::Environment::with_prefix("LEASEHOLD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
