//! Quorum certificates, finalized blocks, and blacklist entries.

use crate::{domains, DayNumber, Epoch, EventFingerprint, ValidatorId};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, blake3_hash, BlsPublicKey, BlsSignature, Hash};
use serde::{Deserialize, Serialize};

/// Why a validator was blacklisted. Doubles as the evidence kind of the
/// record backing the ballot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum ReasonCode {
    /// A day proof arrived faster than sequential work permits.
    VdfTooFast,
    /// A day proof failed verification.
    VdfInvalid,
    /// A signature on a consensus message failed verification.
    SignatureInvalid,
    /// Two conflicting messages for the same (epoch, proposer, phase).
    Equivocation,
    /// A previously seen signed message was replayed.
    Replay,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonCode::VdfTooFast => "VDF_TOO_FAST",
            ReasonCode::VdfInvalid => "VDF_INVALID",
            ReasonCode::SignatureInvalid => "SIGNATURE_INVALID",
            ReasonCode::Equivocation => "EQUIVOCATION",
            ReasonCode::Replay => "REPLAY",
        };
        write!(f, "{s}")
    }
}

/// Threshold-aggregated proof that at least `2f+1` validators endorsed a
/// specific message under a specific validator set.
///
/// The signer bitmap is indexed by position in the epoch's active set
/// (validators ordered ascending by identifier). The aggregate signature is
/// the group signature produced by threshold combination, so its bytes are
/// identical regardless of which share subset produced it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// Digest of the certified message.
    pub message_digest: Hash,
    /// The group signature over `message_digest`.
    #[serde(with = "crate::serde_bytes_array")]
    pub aggregate_signature: [u8; 96],
    /// Bitmap over active-set validator indices; bit i set means the
    /// validator at index i contributed a share.
    pub signer_bitmap: Vec<u8>,
}

impl QuorumCertificate {
    /// Create a certificate from its parts.
    pub fn new(message_digest: Hash, aggregate_signature: [u8; 96], signer_bitmap: Vec<u8>) -> Self {
        Self {
            message_digest,
            aggregate_signature,
            signer_bitmap,
        }
    }

    /// Number of signers recorded in the bitmap.
    pub fn signer_count(&self) -> u32 {
        self.signer_bitmap.iter().map(|b| b.count_ones()).sum()
    }

    /// Active-set indices of the recorded signers.
    pub fn signer_indices(&self) -> Vec<u32> {
        let mut signers = Vec::new();
        for (byte_idx, byte) in self.signer_bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    signers.push((byte_idx * 8 + bit) as u32);
                }
            }
        }
        signers
    }

    /// Build a bitmap from active-set indices.
    pub fn bitmap_from_indices(indices: &[u32], set_size: usize) -> Vec<u8> {
        if set_size == 0 {
            return Vec::new();
        }
        let mut bitmap = vec![0u8; (set_size - 1) / 8 + 1];
        for &index in indices {
            let byte_idx = (index as usize) / 8;
            let bit_idx = (index as usize) % 8;
            if byte_idx < bitmap.len() {
                bitmap[byte_idx] |= 1 << bit_idx;
            }
        }
        bitmap
    }

    /// Verify the certificate: the signer count must meet `threshold` and
    /// the group signature must verify over `message_digest`.
    pub fn verify(&self, group_public: &BlsPublicKey, threshold: u32) -> bool {
        if self.signer_count() < threshold {
            return false;
        }
        match BlsSignature::from_bytes(&self.aggregate_signature) {
            Ok(sig) => sig.verify(&self.message_digest, group_public),
            Err(_) => false,
        }
    }
}

/// A finalized block: the ordered event set one epoch committed.
///
/// Blocks are immutable once persisted under their epoch; a second commit
/// for the same epoch is rejected.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Block {
    /// The epoch this block finalizes.
    pub epoch: Epoch,
    /// Deduplicated event fingerprints in lexicographic order.
    pub events: Vec<EventFingerprint>,
    /// Merkle root over the ordered event fingerprints.
    pub merkle_root: Hash,
    /// Validators whose proposals the accepted subset included.
    pub proposer_set: Vec<ValidatorId>,
    /// Certificate over the block digest.
    pub quorum_certificate: QuorumCertificate,
}

impl Block {
    /// Assemble a block from the decided event set.
    ///
    /// `events` must already be sorted and deduplicated; the Merkle root is
    /// computed here so every honest node derives the identical digest.
    pub fn assemble(
        epoch: Epoch,
        events: Vec<EventFingerprint>,
        proposer_set: Vec<ValidatorId>,
        quorum_certificate: QuorumCertificate,
    ) -> Self {
        let merkle_root = merkle_root_of_events(&events);
        Self {
            epoch,
            events,
            merkle_root,
            proposer_set,
            quorum_certificate,
        }
    }

    /// The digest the quorum certificate signs: everything except the
    /// certificate itself.
    pub fn digest(&self) -> Hash {
        Self::digest_of(self.epoch, &self.events, &self.merkle_root, &self.proposer_set)
    }

    /// Compute a block digest from its parts, used both when assembling and
    /// when collecting signature shares before the block exists.
    pub fn digest_of(
        epoch: Epoch,
        events: &[EventFingerprint],
        merkle_root: &Hash,
        proposer_set: &[ValidatorId],
    ) -> Hash {
        let body = borsh::to_vec(&(epoch, events, merkle_root, proposer_set))
            .expect("block digest encoding cannot fail");
        blake3_concat(&[domains::BLOCK, &body])
    }
}

/// Merkle root over event fingerprints, duplicating the last leaf on odd
/// levels. An empty event set hashes to the hash of the empty string.
pub fn merkle_root_of_events(events: &[EventFingerprint]) -> Hash {
    if events.is_empty() {
        return blake3_hash(b"");
    }
    let mut level: Vec<Hash> = events.iter().map(|e| blake3_hash(e.as_bytes())).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
            next.push(blake3_concat(&[&pair[0], right]));
        }
        level = next;
    }
    level[0]
}

/// A canonical blacklist record: the target is excluded from the active
/// set starting at `effective_day`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// The excluded validator.
    pub validator_id: ValidatorId,
    /// Why it was excluded.
    pub reason_code: ReasonCode,
    /// Digest of the evidence record backing the ballot.
    pub evidence_digest: Hash,
    /// Day the exclusion activates.
    pub effective_day: DayNumber,
    /// The ballot's quorum certificate.
    pub quorum_certificate: QuorumCertificate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_round_trip() {
        let indices = [0u32, 2, 9];
        let bitmap = QuorumCertificate::bitmap_from_indices(&indices, 12);
        let qc = QuorumCertificate::new([0u8; 32], [0u8; 96], bitmap);
        assert_eq!(qc.signer_indices(), indices);
        assert_eq!(qc.signer_count(), 3);
    }

    #[test]
    fn test_bitmap_empty_set() {
        assert!(QuorumCertificate::bitmap_from_indices(&[], 0).is_empty());
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let a = EventFingerprint([1u8; 32]);
        let b = EventFingerprint([2u8; 32]);
        assert_ne!(
            merkle_root_of_events(&[a, b]),
            merkle_root_of_events(&[b, a])
        );
    }

    #[test]
    fn test_merkle_root_odd_leaves() {
        let events: Vec<_> = (0..3u8).map(|i| EventFingerprint([i; 32])).collect();
        // Just exercise the odd-leaf path; the value must be stable.
        assert_eq!(
            merkle_root_of_events(&events),
            merkle_root_of_events(&events)
        );
    }

    #[test]
    fn test_block_digest_excludes_certificate() {
        let events = vec![EventFingerprint([1u8; 32])];
        let qc1 = QuorumCertificate::new([1u8; 32], [1u8; 96], vec![0b111]);
        let qc2 = QuorumCertificate::new([2u8; 32], [2u8; 96], vec![0b101]);

        let a = Block::assemble(3, events.clone(), vec![], qc1);
        let b = Block::assemble(3, events, vec![], qc2);
        assert_eq!(a.digest(), b.digest());
    }
}
