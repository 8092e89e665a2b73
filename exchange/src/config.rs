//! Configuration for the exchange engine

use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exchange engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Ledger configuration
    pub ledger: ledger_core::Config,

    /// Matching rules
    pub matching: MatchingConfig,

    /// Verification worker pool
    pub workers: WorkerConfig,

    /// Reconciliation sweep schedule
    pub sweep: SweepConfig,

    /// Requester session handling
    pub session: SessionConfig,

    /// Follow-graph source
    pub oracle: OracleConfig,

    /// Accounts granted admin on first contact
    pub admin_ids: Vec<i64>,

    /// Prefix turning a profile handle into a link
    pub profile_url_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "follow-exchange".to_string(),
            ledger: ledger_core::Config::default(),
            matching: MatchingConfig::default(),
            workers: WorkerConfig::default(),
            sweep: SweepConfig::default(),
            session: SessionConfig::default(),
            oracle: OracleConfig::default(),
            admin_ids: Vec::new(),
            profile_url_prefix: "https://instagram.com/".to_string(),
        }
    }
}

/// Matching rules
///
/// Decimal values are written as strings in TOML, e.g. `min_balance = "5"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum balance for an account to be offered as a followee
    pub min_balance: Decimal,

    /// Credit escrowed per offered follow
    pub stake: Decimal,

    /// Days before the same requester/candidate pair can be offered again
    pub cooldown_days: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_balance: Decimal::from(5),
            stake: Decimal::ONE,
            cooldown_days: 5,
        }
    }
}

/// Verification worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum interactive workflow steps in flight
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

/// Reconciliation sweep schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run the sweep on a timer
    pub enabled: bool,

    /// Seconds between scheduled sweeps
    pub interval_secs: u64,

    /// Sweep items in flight; kept apart from the interactive worker pool
    pub max_concurrent: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            max_concurrent: 4,
        }
    }
}

impl SweepConfig {
    /// Interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Requester session handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Dismiss an unanswered offer after this many seconds (disabled when unset)
    pub offer_timeout_secs: Option<u64>,
}

impl SessionConfig {
    /// Offer timeout as a duration
    pub fn offer_timeout(&self) -> Option<Duration> {
        self.offer_timeout_secs.map(Duration::from_secs)
    }
}

/// Follow-graph source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// JSON snapshot loaded by the file-backed follow graph
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            ledger: ledger_core::Config::from_env()?,
            ..Config::default()
        };

        if let Ok(data_dir) = std::env::var("EXCHANGE_DATA_DIR") {
            config.ledger.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ids) = std::env::var("EXCHANGE_ADMIN_IDS") {
            config.admin_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>()
                        .map_err(|e| crate::Error::Config(format!("EXCHANGE_ADMIN_IDS: {}", e)))
                })
                .collect::<crate::Result<_>>()?;
        }

        if let Ok(secs) = std::env::var("EXCHANGE_SWEEP_INTERVAL_SECS") {
            config.sweep.interval_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("EXCHANGE_SWEEP_INTERVAL_SECS: {}", e))
            })?;
        }

        if let Ok(path) = std::env::var("EXCHANGE_ORACLE_SNAPSHOT") {
            config.oracle.snapshot_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let matching = &self.matching;
        if matching.stake <= Decimal::ZERO {
            return Err(crate::Error::Config("matching.stake must be positive".to_string()));
        }
        if matching.min_balance < matching.stake {
            return Err(crate::Error::Config(
                "matching.min_balance must cover at least one stake".to_string(),
            ));
        }
        if matching.cooldown_days < 0 {
            return Err(crate::Error::Config(
                "matching.cooldown_days cannot be negative".to_string(),
            ));
        }
        if self.workers.max_concurrent == 0 {
            return Err(crate::Error::Config(
                "workers.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.sweep.max_concurrent == 0 {
            return Err(crate::Error::Config(
                "sweep.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `id` is listed as an admin
    pub fn is_configured_admin(&self, id: AccountId) -> bool {
        self.admin_ids.contains(&id.get())
    }
}
