//! # Conductor Types
//!
//! Core data model for the Conductor federation consensus core.
//!
//! This crate defines the identifiers and records that cross component
//! boundaries:
//! - [`ValidatorId`] / [`EventFingerprint`] - content-addressed identifiers
//! - [`EventBatch`] - a proposer's bundle of event fingerprints
//! - [`DayProof`] / [`CanonicalDayProof`] - VDF day proofs and their
//!   quorum-certified form
//! - [`QuorumCertificate`] - threshold signature plus signer bitmap
//! - [`Block`] - a finalized epoch's ordered event set
//! - [`BlacklistEntry`] - a canonical exclusion record
//! - [`ValidatorSet`] - the deterministically ordered active set
//!
//! All persisted records and wire payloads use [`borsh`] for their canonical
//! byte encoding so digests are reproducible across implementations. No type
//! in this crate carries a wall-clock timestamp; temporal ordering is
//! expressed in day numbers and within-day indices only.

pub mod batch;
pub mod block;
pub mod event;
pub mod proof;
pub mod serde_bytes;
pub mod validator;

pub use batch::{EventBatch, MAX_BATCH_EVENTS, MAX_BATCH_SERIALIZED_BYTES};
pub use block::{merkle_root_of_events, BlacklistEntry, Block, QuorumCertificate, ReasonCode};
pub use event::{BallotAction, BlacklistBallot, FederationEvent, MembershipChange};
pub use proof::{CanonicalDayProof, DayProof};
pub use serde_bytes as serde_bytes_array;
pub use validator::{Validator, ValidatorSet};

use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_hash, BlsPublicKey, Hash};
use serde::{Deserialize, Serialize};

/// Monotonically non-decreasing day counter; 0 at genesis.
pub type DayNumber = u64;

/// Consensus instance number; equal to the day number in which it runs.
pub type Epoch = u64;

/// Domain separators mixed into signing preimages and digests.
///
/// These prefixes prevent a signature or digest produced in one context
/// from being replayed in another.
pub mod domains {
    /// Day-seed derivation input.
    pub const DAY_SEED: &[u8] = b"day-seed";
    /// Day proof proposer signature.
    pub const DAY_PROOF: &[u8] = b"CONDUCTOR_DAY_PROOF_V1";
    /// Canonical day proof quorum message.
    pub const CANONICAL_DAY: &[u8] = b"CONDUCTOR_CANONICAL_DAY_V1";
    /// Block digest quorum message.
    pub const BLOCK: &[u8] = b"CONDUCTOR_BLOCK_V1";
    /// Event fingerprint preimage.
    pub const EVENT: &[u8] = b"CONDUCTOR_EVENT_V1";
    /// Event batch digest preimage.
    pub const BATCH: &[u8] = b"CONDUCTOR_BATCH_V1";
    /// Blacklist ballot quorum message.
    pub const BALLOT: &[u8] = b"CONDUCTOR_BALLOT_V1";
    /// Common coin preimage.
    pub const COIN: &[u8] = b"CONDUCTOR_COIN_V1";
    /// Peer message envelope signature.
    pub const ENVELOPE: &[u8] = b"CONDUCTOR_ENVELOPE_V1";
}

/// Errors raised while constructing or validating model types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// Validator set construction failed.
    #[error("invalid validator set: {0}")]
    InvalidValidatorSet(String),

    /// A public key failed to parse.
    #[error(transparent)]
    Crypto(#[from] conductor_crypto::CryptoError),

    /// Batch bounds exceeded.
    #[error("batch rejected: {0}")]
    BatchRejected(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Unique identifier of a validator: the BLAKE3 hash of its long-lived
/// public key. Assigned at join time and stable for the key's lifetime.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct ValidatorId(pub Hash);

impl ValidatorId {
    /// Derive the identifier from a long-lived public key.
    pub fn from_public_key(public_key: &BlsPublicKey) -> Self {
        Self(blake3_hash(&public_key.to_bytes()))
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValidatorId({})", self.short_hex())
    }
}

impl std::fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

/// Hash of an external event payload. Events are never dereferenced inside
/// the core; only fingerprints traverse consensus.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct EventFingerprint(pub Hash);

impl EventFingerprint {
    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Debug for EventFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventFingerprint({})", self.short_hex())
    }
}

impl std::fmt::Display for EventFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}
