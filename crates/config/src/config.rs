//! Main configuration module for Conductor.
//!
//! All node settings live in one `conductor.toml` file, validated as a
//! whole on load. Defaults match the protocol's reference parameters.

use crate::error::{ConfigError, ConfigResult};
use crate::genesis::GenesisConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Top-level configuration for a Conductor validator node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node identity and paths.
    #[serde(default)]
    pub node: NodeConfig,

    /// Consensus parameters.
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// VDF parameters.
    #[serde(default)]
    pub vdf: VdfConfig,

    /// Peer retry and circuit-breaker parameters.
    #[serde(default)]
    pub peering: PeeringConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upward-API authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics endpoint configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Genesis parameters.
    #[serde(default)]
    pub genesis: GenesisConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("configuration parsed, validating");
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.consensus.validate()?;
        self.vdf.validate()?;
        self.peering.validate()?;
        self.genesis.validate(self.consensus.min_validators)?;
        debug!("configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Node identity and paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path to the validator key file.
    pub key_path: String,
    /// Address the peer transport listens on.
    pub listen_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key_path: "./keys/validator.key".to_string(),
            listen_address: "0.0.0.0:4001".to_string(),
        }
    }
}

/// The quorum threshold as a rational over the validator count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRatio {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl Default for ThresholdRatio {
    fn default() -> Self {
        Self {
            numerator: 2,
            denominator: 3,
        }
    }
}

/// Consensus parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum federation size.
    pub min_validators: u32,
    /// Quorum threshold ratio; the effective threshold is `2f + 1` for
    /// `f = (n - 1) / 3`, and this ratio must not fall below it.
    pub threshold_ratio: ThresholdRatio,
    /// Soft epoch timeout in milliseconds.
    pub epoch_timeout_ms: u32,
    /// Seen-message cache TTL in milliseconds.
    pub seen_cache_ttl_ms: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_validators: 4,
            threshold_ratio: ThresholdRatio::default(),
            epoch_timeout_ms: 120_000,
            seen_cache_ttl_ms: 86_400_000,
        }
    }
}

impl ConsensusConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.min_validators < 4 {
            return Err(ConfigError::Invalid(format!(
                "min_validators = {} cannot tolerate any fault (need >= 4)",
                self.min_validators
            )));
        }
        let ratio = &self.threshold_ratio;
        if ratio.denominator == 0 || ratio.numerator == 0 {
            return Err(ConfigError::Invalid(
                "threshold_ratio must be a positive rational".to_string(),
            ));
        }
        // Safety needs strictly more than 2/3 of a 3f+1 set.
        if 3 * ratio.numerator < 2 * ratio.denominator {
            return Err(ConfigError::Invalid(format!(
                "threshold_ratio {}/{} is below 2/3",
                ratio.numerator, ratio.denominator
            )));
        }
        if self.epoch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "epoch_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// VDF parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdfConfig {
    /// Initial difficulty (sequential hash iterations per day).
    pub difficulty_initial: u64,
    /// Iterations between progress/cancellation checkpoints.
    pub progress_interval: u64,
    /// Days between difficulty adjustments.
    pub adjustment_interval_days: u32,
}

impl Default for VdfConfig {
    fn default() -> Self {
        Self {
            difficulty_initial: 86_400_000,
            progress_interval: 1_000_000,
            adjustment_interval_days: 10,
        }
    }
}

impl VdfConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.difficulty_initial == 0 {
            return Err(ConfigError::Invalid(
                "difficulty_initial must be positive".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::Invalid(
                "progress_interval must be positive".to_string(),
            ));
        }
        if self.adjustment_interval_days == 0 {
            return Err(ConfigError::Invalid(
                "adjustment_interval_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Peer retry and circuit-breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    /// Consecutive failures before a peer's circuit opens.
    pub circuit_breaker_threshold: u32,
    /// How long an open circuit stays open before probing, ms.
    pub circuit_breaker_open_ms: u32,
    /// First retry delay, ms.
    pub retry_base_delay_ms: u32,
    /// Retry delay cap, ms.
    pub retry_max_delay_ms: u32,
    /// Maximum retry attempts per request.
    pub retry_max_attempts: u32,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_open_ms: 60_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            retry_max_attempts: 5,
        }
    }
}

impl PeeringConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry delays must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database directory.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/conductor".to_string(),
        }
    }
}

/// Upward-API authentication.
///
/// Callers of the submission and query adapters authenticate with keys
/// chained to these trust anchors; anyone else receives an
/// authentication error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Hex-encoded public keys of trusted upstream callers.
    #[serde(default)]
    pub trusted_callers: Vec<String>,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is enabled.
    pub enabled: bool,
    /// Port the metrics endpoint binds to.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "conductor_consensus=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
