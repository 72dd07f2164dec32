//! # Conductor Storage
//!
//! The single durable resource of a Conductor node: a RocksDB-backed
//! key-value store with one column family per canonical namespace.
//!
//! - **Canonical state**: `block/{epoch}`, `day_proof/{day}`,
//!   `blacklist/{validator_id}`, `validator_set/{day}`, `meta/`.
//!   Writes are serialized per primary key with write-if-absent
//!   idempotence; a second commit for the same key is rejected as
//!   [`StorageError::AlreadyCommitted`] and recovered by reading the
//!   existing record.
//! - **Retention**: day proofs are kept for at least 30 days; blocks and
//!   blacklist entries indefinitely. Volatile caches (RBC fragments, BBA
//!   votes, the seen-message cache) live in memory in the consensus crate,
//!   not here.
//!
//! No persisted record carries a wall-clock timestamp.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod db;
pub mod store;

pub use db::{cf, Database, DatabaseConfig, PutConflict};
pub use store::{ConductorStore, DAY_PROOF_RETENTION_DAYS};

use thiserror::Error;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Attempted second commit for a write-once primary key
    #[error("already committed: {namespace}/{key}")]
    AlreadyCommitted {
        /// The namespace of the conflicting write.
        namespace: &'static str,
        /// The conflicting primary key, hex-encoded.
        key: String,
    },

    /// Column family not found
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Unrecoverable corruption; the process must stop
    #[error("storage corruption: {0}")]
    Corruption(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
