//! # Conductor Config
//!
//! Single-file TOML configuration for a Conductor validator, following the
//! one-config philosophy: everything a node needs lives in
//! `conductor.toml`, validated as a whole at load time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod genesis;

pub use config::{
    AuthConfig, Config, ConsensusConfig, LoggingConfig, MetricsConfig, NodeConfig, PeeringConfig,
    StorageConfig, ThresholdRatio, VdfConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use genesis::{GenesisConfig, GenesisValidator};
