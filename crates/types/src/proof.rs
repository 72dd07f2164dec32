//! Day proofs and their quorum-certified canonical form.

use crate::block::QuorumCertificate;
use crate::{domains, DayNumber, ValidatorId};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, BlsPublicKey, BlsSignature, Hash};
use serde::{Deserialize, Serialize};

/// A single validator's claim that it performed the day's sequential work.
///
/// The `seed` is deterministic from the day number and the genesis seed;
/// the `output` is `difficulty` sequential hash applications starting from
/// the seed. The proposer signs the proof body with its long-lived key.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DayProof {
    /// The day this proof advances to.
    pub day_number: DayNumber,
    /// Seed the hash chain started from.
    pub seed: Hash,
    /// Number of sequential hash applications performed.
    pub difficulty: u64,
    /// Final value of the hash chain.
    pub output: Hash,
    /// The validator that computed this proof.
    pub proposer: ValidatorId,
    /// Proposer's signature over [`DayProof::signing_bytes`].
    #[serde(with = "crate::serde_bytes_array")]
    pub proposer_signature: [u8; 96],
}

impl DayProof {
    /// Create an unsigned proof (signature zeroed).
    pub fn unsigned(
        day_number: DayNumber,
        seed: Hash,
        difficulty: u64,
        output: Hash,
        proposer: ValidatorId,
    ) -> Self {
        Self {
            day_number,
            seed,
            difficulty,
            output,
            proposer,
            proposer_signature: [0u8; 96],
        }
    }

    /// The preimage the proposer signs.
    ///
    /// Starts with the day-proof domain prefix so the signature cannot be
    /// replayed in another context.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(domains::DAY_PROOF.len() + 112);
        bytes.extend_from_slice(domains::DAY_PROOF);
        bytes.extend_from_slice(&self.day_number.to_be_bytes());
        bytes.extend_from_slice(&self.seed);
        bytes.extend_from_slice(&self.difficulty.to_be_bytes());
        bytes.extend_from_slice(&self.output);
        bytes.extend_from_slice(self.proposer.as_bytes());
        bytes
    }

    /// Verify the proposer's signature.
    pub fn verify_signature(&self, public_key: &BlsPublicKey) -> bool {
        match BlsSignature::from_bytes(&self.proposer_signature) {
            Ok(sig) => sig.verify(&self.signing_bytes(), public_key),
            Err(_) => false,
        }
    }

    /// The digest the day's quorum certificate signs: day number and output
    /// only, so every validator with the same output signs the same digest
    /// regardless of who proposed it.
    pub fn canonical_digest(&self) -> Hash {
        canonical_day_digest(self.day_number, &self.output)
    }
}

/// The quorum message digest for a `(day, output)` pair.
pub fn canonical_day_digest(day_number: DayNumber, output: &Hash) -> Hash {
    blake3_concat(&[domains::CANONICAL_DAY, &day_number.to_be_bytes(), output])
}

/// A day proof that received a quorum certificate from the validator set
/// active at that day. Retained for at least 30 days.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CanonicalDayProof {
    /// The certified proof.
    pub day_proof: DayProof,
    /// Certificate over [`DayProof::canonical_digest`].
    pub quorum_certificate: QuorumCertificate,
}

impl CanonicalDayProof {
    /// Verify internal consistency and the certificate.
    pub fn verify(&self, group_public: &BlsPublicKey, threshold: u32) -> bool {
        self.quorum_certificate.message_digest == self.day_proof.canonical_digest()
            && self.quorum_certificate.verify(group_public, threshold)
    }
}
