//! # Conductor Node
//!
//! The validator process: wiring between the consensus core, the day
//! pipeline, storage, and the outside world.
//!
//! - [`node::ConductorNode`] - the run loop
//! - [`adapters`] - the upward boundary (`submit_event_batch`,
//!   `get_block`, `get_day_proof`, `get_consensus_status`)
//! - [`peering`] - inbound admission and the transport seam
//! - [`retry`] - backoff, circuit breaking, rate limiting
//! - [`keyfile`] - validator key material and the formation ceremony
//! - [`metrics`] - Prometheus collectors

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapters;
pub mod keyfile;
pub mod metrics;
pub mod node;
pub mod peering;
pub mod retry;

pub use adapters::{AdapterError, AdapterService, CallerIdentity, ConsensusStatus, SubmissionQueue};
pub use keyfile::{generate_federation, KeyFileError, ValidatorKeyFile};
pub use node::ConductorNode;
pub use peering::{ChannelTransport, InboundFilter, InboundReject, PeerTransport};
pub use retry::{retry_with_backoff, CircuitBreaker, CircuitState, RateLimiter, RetryPolicy};

use thiserror::Error;

/// Errors raised by the node layer.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid startup configuration or key material.
    #[error("setup error: {0}")]
    Setup(String),

    /// Key file handling failed.
    #[error(transparent)]
    KeyFile(#[from] keyfile::KeyFileError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] conductor_config::ConfigError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] conductor_storage::StorageError),

    /// Consensus failure.
    #[error(transparent)]
    Consensus(#[from] conductor_consensus::ConsensusError),

    /// Model-type failure.
    #[error(transparent)]
    Types(#[from] conductor_types::TypesError),
}
