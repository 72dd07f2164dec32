//! Byzantine-behavior evidence.
//!
//! Each evidence record is cryptographically self-contained: it carries
//! the offending signed material, so any third party can re-validate it
//! without trusting the reporter. Records back blacklist ballots via
//! their digest.

use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, Hash};
use conductor_types::{DayNumber, DayProof, ReasonCode, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Domain separator for evidence digests.
const EVIDENCE_DOMAIN: &[u8] = b"CONDUCTOR_EVIDENCE_V1";

/// How long evidence stays relevant, in days.
pub const EVIDENCE_MAX_AGE_DAYS: u64 = 30;

/// The offending material, by kind.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum EvidenceDetail {
    /// Two signed envelopes for the same `(epoch, proposer, phase)` slot
    /// carrying distinct digests. Both canonical envelope encodings are
    /// included.
    Equivocation {
        /// First conflicting envelope, canonical bytes.
        first: Vec<u8>,
        /// Second conflicting envelope, canonical bytes.
        second: Vec<u8>,
    },
    /// A day proof arrived faster than the calibration window permits.
    /// Durations, not timestamps.
    VdfTooFast {
        /// The offending signed proof.
        proof: DayProof,
        /// Observed completion delta in milliseconds.
        measured_millis: u64,
        /// The 5th-percentile floor it undercut, in milliseconds.
        threshold_millis: u64,
    },
    /// A signed day proof whose output fails verification.
    VdfInvalid {
        /// The offending signed proof.
        proof: DayProof,
    },
    /// A message whose cryptographic binding (signature or fragment
    /// proof) fails. The canonical envelope encoding is included.
    SignatureInvalid {
        /// The offending envelope, canonical bytes.
        envelope: Vec<u8>,
    },
    /// A previously seen signed message replayed inside the cache TTL.
    Replay {
        /// Digest of the replayed message.
        message_digest: Hash,
    },
}

impl EvidenceDetail {
    /// The reason code this detail substantiates.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            EvidenceDetail::Equivocation { .. } => ReasonCode::Equivocation,
            EvidenceDetail::VdfTooFast { .. } => ReasonCode::VdfTooFast,
            EvidenceDetail::VdfInvalid { .. } => ReasonCode::VdfInvalid,
            EvidenceDetail::SignatureInvalid { .. } => ReasonCode::SignatureInvalid,
            EvidenceDetail::Replay { .. } => ReasonCode::Replay,
        }
    }
}

/// A self-contained record of Byzantine behavior.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// The accused validator.
    pub accused: ValidatorId,
    /// The validator that observed the behavior.
    pub reporter: ValidatorId,
    /// Epoch or day the behavior occurred in.
    pub epoch_or_day: u64,
    /// The offending material.
    pub detail: EvidenceDetail,
}

impl EvidenceRecord {
    /// Create a record.
    pub fn new(
        accused: ValidatorId,
        reporter: ValidatorId,
        epoch_or_day: u64,
        detail: EvidenceDetail,
    ) -> Self {
        Self {
            accused,
            reporter,
            epoch_or_day,
            detail,
        }
    }

    /// The record's reason code.
    pub fn reason_code(&self) -> ReasonCode {
        self.detail.reason_code()
    }

    /// Unique digest for deduplication and ballot references.
    pub fn digest(&self) -> Hash {
        let body = borsh::to_vec(self).expect("evidence encoding cannot fail");
        blake3_concat(&[EVIDENCE_DOMAIN, &body])
    }

    /// Whether the record is still within the relevance window.
    pub fn is_current(&self, current_day: DayNumber) -> bool {
        current_day.saturating_sub(self.epoch_or_day) <= EVIDENCE_MAX_AGE_DAYS
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} by {} at {} (reported by {})",
            self.reason_code(),
            self.accused,
            self.epoch_or_day,
            self.reporter,
        )
    }
}

/// Collected evidence awaiting ballot proposal.
#[derive(Debug, Clone, Default)]
pub struct EvidencePool {
    pending: Vec<EvidenceRecord>,
    /// Digests already balloted or discarded, to stop re-admission.
    resolved: HashSet<Hash>,
}

impl EvidencePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false for duplicates, stale records, and
    /// records already resolved.
    pub fn add(&mut self, record: EvidenceRecord, current_day: DayNumber) -> bool {
        if !record.is_current(current_day) {
            return false;
        }
        let digest = record.digest();
        if self.resolved.contains(&digest) {
            return false;
        }
        if self.pending.iter().any(|r| r.digest() == digest) {
            return false;
        }
        self.pending.push(record);
        true
    }

    /// Pending records against a specific validator.
    pub fn against(&self, accused: &ValidatorId) -> Vec<&EvidenceRecord> {
        self.pending
            .iter()
            .filter(|r| &r.accused == accused)
            .collect()
    }

    /// All pending records.
    pub fn pending(&self) -> &[EvidenceRecord] {
        &self.pending
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Mark a record resolved (balloted) and drop it from pending.
    pub fn resolve(&mut self, digest: &Hash) {
        self.resolved.insert(*digest);
        self.pending.retain(|r| r.digest() != *digest);
    }

    /// Drop records older than the relevance window.
    pub fn prune(&mut self, current_day: DayNumber) {
        self.pending.retain(|r| r.is_current(current_day));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(accused_byte: u8, day: u64) -> EvidenceRecord {
        EvidenceRecord::new(
            ValidatorId([accused_byte; 32]),
            ValidatorId([0xff; 32]),
            day,
            EvidenceDetail::Replay {
                message_digest: [day as u8; 32],
            },
        )
    }

    #[test]
    fn test_digest_is_stable_and_distinct() {
        assert_eq!(record(1, 5).digest(), record(1, 5).digest());
        assert_ne!(record(1, 5).digest(), record(2, 5).digest());
    }

    #[test]
    fn test_pool_deduplicates() {
        let mut pool = EvidencePool::new();
        assert!(pool.add(record(1, 5), 6));
        assert!(!pool.add(record(1, 5), 6));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_stale_evidence_rejected() {
        let mut pool = EvidencePool::new();
        assert!(!pool.add(record(1, 0), EVIDENCE_MAX_AGE_DAYS + 1));
    }

    #[test]
    fn test_resolved_records_stay_out() {
        let mut pool = EvidencePool::new();
        let r = record(1, 5);
        let digest = r.digest();
        assert!(pool.add(r.clone(), 6));
        pool.resolve(&digest);
        assert!(pool.is_empty());
        assert!(!pool.add(r, 6));
    }

    #[test]
    fn test_against_filters_by_accused() {
        let mut pool = EvidencePool::new();
        pool.add(record(1, 5), 6);
        pool.add(record(2, 5), 6);
        pool.add(record(1, 6), 6);
        assert_eq!(pool.against(&ValidatorId([1u8; 32])).len(), 2);
    }
}
