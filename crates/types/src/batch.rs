//! Event batches: the unit a proposer disseminates through reliable
//! broadcast.

use crate::{domains, Epoch, EventFingerprint, Result, TypesError, ValidatorId};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, Hash};
use serde::{Deserialize, Serialize};

/// Maximum number of event fingerprints in one batch.
pub const MAX_BATCH_EVENTS: usize = 4096;

/// Maximum serialized batch size in bytes (1 MiB).
pub const MAX_BATCH_SERIALIZED_BYTES: usize = 1024 * 1024;

/// A proposer's bundle of event fingerprints for one epoch.
///
/// Batches are created on receipt of submissions, erasure-coded for
/// reliable broadcast, and discarded after their epoch commits.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EventBatch {
    /// The proposing validator.
    pub proposer: ValidatorId,
    /// The epoch this batch targets.
    pub epoch: Epoch,
    /// Ordered event fingerprints.
    pub events: Vec<EventFingerprint>,
    /// Random nonce distinguishing otherwise-identical batches.
    pub batch_nonce: u128,
}

impl EventBatch {
    /// Create a batch, enforcing the size bounds.
    pub fn new(
        proposer: ValidatorId,
        epoch: Epoch,
        events: Vec<EventFingerprint>,
        batch_nonce: u128,
    ) -> Result<Self> {
        let batch = Self {
            proposer,
            epoch,
            events,
            batch_nonce,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Check the batch against the configured bounds.
    pub fn validate(&self) -> Result<()> {
        if self.events.len() > MAX_BATCH_EVENTS {
            return Err(TypesError::BatchRejected(format!(
                "{} events exceeds limit of {}",
                self.events.len(),
                MAX_BATCH_EVENTS
            )));
        }
        let serialized = self.canonical_bytes();
        if serialized.len() > MAX_BATCH_SERIALIZED_BYTES {
            return Err(TypesError::BatchRejected(format!(
                "{} serialized bytes exceeds limit of {}",
                serialized.len(),
                MAX_BATCH_SERIALIZED_BYTES
            )));
        }
        Ok(())
    }

    /// Canonical byte encoding, identical on every implementation.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("batch encoding cannot fail")
    }

    /// Decode a batch from its canonical encoding.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let batch: EventBatch = borsh::from_slice(bytes)
            .map_err(|e| TypesError::BatchRejected(format!("undecodable batch: {e}")))?;
        batch.validate()?;
        Ok(batch)
    }

    /// The batch digest that reliable broadcast binds fragments to.
    pub fn digest(&self) -> Hash {
        blake3_concat(&[domains::BATCH, &self.canonical_bytes()])
    }
}
