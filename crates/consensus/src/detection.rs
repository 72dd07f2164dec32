//! Validation of gossiped evidence records.
//!
//! Evidence is self-contained, so any validator can re-check an
//! accusation before counting it toward a ballot. An invalid accusation
//! is dropped; accepting it blindly would let one Byzantine reporter
//! blacklist honest peers.

use crate::evidence::{EvidenceDetail, EvidenceRecord};
use crate::messages::PeerEnvelope;
use conductor_types::ValidatorSet;
use tracing::debug;

/// Re-validate a record against the active set.
///
/// - Equivocation: both envelopes must decode, verify under the accused
///   sender's key, share the `(epoch, sender)` slot, and carry distinct
///   digests.
/// - VdfInvalid: the proof's proposer signature must verify and the
///   accused must match; the chain re-run itself is the caller's
///   (expensive, blocking-pool) job.
/// - SignatureInvalid: the envelope must decode and its signature must
///   indeed fail under the accused's key.
/// - VdfTooFast and Replay are local observations; they validate
///   structurally and gain weight only by independent reporters.
pub fn validate_evidence(record: &EvidenceRecord, set: &ValidatorSet) -> bool {
    match &record.detail {
        EvidenceDetail::Equivocation { first, second } => {
            let (Ok(first), Ok(second)) = (
                borsh::from_slice::<PeerEnvelope>(first),
                borsh::from_slice::<PeerEnvelope>(second),
            ) else {
                debug!("equivocation evidence with undecodable envelopes");
                return false;
            };

            if first.sender != record.accused || second.sender != record.accused {
                return false;
            }
            if first.epoch_or_day != second.epoch_or_day
                || first.message_digest == second.message_digest
            {
                return false;
            }

            let Some(key) = set.public_key_of(&record.accused) else {
                return false;
            };
            first.verify(key) && second.verify(key)
        }

        EvidenceDetail::VdfInvalid { proof } => {
            if proof.proposer != record.accused {
                return false;
            }
            let Some(key) = set.public_key_of(&proof.proposer) else {
                return false;
            };
            proof.verify_signature(key)
        }

        EvidenceDetail::SignatureInvalid { envelope } => {
            let Ok(envelope) = borsh::from_slice::<PeerEnvelope>(envelope) else {
                return false;
            };
            if envelope.sender != record.accused {
                return false;
            }
            // The claim is that the binding fails; a verifying envelope
            // refutes the accusation. An unknown sender also counts as a
            // binding failure.
            match set.public_key_of(&envelope.sender) {
                Some(key) => !envelope.verify(key),
                None => true,
            }
        }

        EvidenceDetail::VdfTooFast { proof, .. } => {
            if proof.proposer != record.accused {
                return false;
            }
            match set.public_key_of(&proof.proposer) {
                Some(key) => proof.verify_signature(key),
                None => false,
            }
        }

        EvidenceDetail::Replay { .. } => true,
    }
}
