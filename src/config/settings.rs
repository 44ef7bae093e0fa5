//! Service settings loaded from config.toml
//!
//! The file carries listener, ledger and recovery settings plus an optional list of
//! allocations to seed on startup. Every section has defaults, so an absent file
//! still yields a usable configuration.

use crate::errors::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Ledger behaviour
    pub ledger: LedgerConfig,
    /// Retry behaviour for transient store failures
    pub recovery: RecoveryConfig,
    /// Allocations to create on startup if missing
    pub allocations: Vec<AllocationSeed>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Ledger behaviour
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LedgerConfig {
    /// Largest dollar difference still considered reconciled
    pub reconciliation_tolerance: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reconciliation_tolerance: 0.01,
        }
    }
}

/// Retry behaviour for transient store failures
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RecoveryConfig {
    /// Delay before the first retry
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound on any single delay
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One allocation to seed
#[derive(Debug, Deserialize, Clone)]
pub struct AllocationSeed {
    /// Vendor granting the points
    pub vendor_id: String,
    /// Agent receiving the points
    pub agent_id: String,
    /// Period label
    pub period: String,
    /// Points cap
    pub allocated_points: i64,
    /// First spendable day
    pub start_date: NaiveDate,
    /// Last spendable day
    pub end_date: NaiveDate,
    /// Optional vendor notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })
}

/// Loads configuration from `CONFIG_PATH` (default `./config.toml`).
///
/// A missing file is not an error: defaults are returned and a warning logged.
/// A file that exists but does not parse is still an error.
pub fn load_default_config() -> Result<Config> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        load_config(&path)
    } else {
        warn!(%path, "config file not found, using defaults");
        Ok(Config::default())
    }
}
