//! Federation event taxonomy.
//!
//! These are the event kinds whose fingerprints flow through consensus.
//! The full event bodies live outside the core (the relay layer stores
//! and serves them); the core sees bodies only at two boundaries: the
//! submission adapter, which fingerprints them, and ballot handling,
//! where the ballot body itself must be executable once committed.

use crate::block::{QuorumCertificate, ReasonCode};
use crate::{domains, DayNumber, EventFingerprint, ValidatorId};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, Hash};
use serde::{Deserialize, Serialize};

/// A membership change proposed as a federation event.
///
/// Takes effect at `effective_day`, which must be at least two days after
/// the day the change commits so the key reshare can complete.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum MembershipChange {
    /// A new validator joins with the given long-lived public key.
    Join {
        /// Compressed BLS public key of the joining validator.
        #[serde(with = "crate::serde_bytes_array")]
        public_key: [u8; 48],
    },
    /// An existing validator leaves voluntarily.
    Leave {
        /// Identifier of the departing validator.
        validator_id: ValidatorId,
    },
}

/// Whether a ballot adds to or removes from the blacklist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum BallotAction {
    /// Exclude the target from the active set.
    Blacklist,
    /// Restore a previously blacklisted validator.
    Unblacklist,
}

/// A blacklist (or unblacklist) ballot.
///
/// The ballot is gossiped until it carries a quorum certificate from
/// `2f+1` active validators, then committed through the ordinary event
/// pipeline; its effect activates at `effective_day`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlacklistBallot {
    /// The validator the ballot is about.
    pub target: ValidatorId,
    /// Why the target is being excluded (ignored for unblacklist).
    pub reason_code: ReasonCode,
    /// Digest of the self-contained evidence record backing the ballot.
    pub evidence_digest: Hash,
    /// Day at which the entry becomes effective.
    pub effective_day: DayNumber,
    /// Add or remove.
    pub action: BallotAction,
    /// Signatures from `2f+1` active validators over the ballot digest.
    pub quorum_certificate: QuorumCertificate,
}

impl BlacklistBallot {
    /// The digest the quorum certificate signs: everything except the
    /// certificate itself.
    pub fn ballot_digest(&self) -> Hash {
        let body = borsh::to_vec(&(
            &self.target,
            &self.reason_code,
            &self.evidence_digest,
            self.effective_day,
            &self.action,
        ))
        .expect("ballot digest encoding cannot fail");
        blake3_concat(&[domains::BALLOT, &body])
    }
}

/// A federation event as seen at the submission boundary.
///
/// Only the fingerprint of an event enters consensus; the variants exist so
/// the boundary can fingerprint deterministically and so ballots and
/// membership changes can be executed when their fingerprints commit.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum FederationEvent {
    /// Announcement of a new post.
    PostAnnounce {
        /// Day the post was created.
        creation_day: DayNumber,
        /// Content identifier of the post payload.
        content_cid: String,
        /// Hash of the author's public key.
        author_key_hash: Hash,
        /// Community the post belongs to.
        community_id: String,
    },
    /// A moderation action against existing content.
    Moderation {
        /// Day the action was taken.
        creation_day: DayNumber,
        /// Reference to the moderated object.
        target_ref: String,
        /// The action, e.g. "remove" or "lock".
        action: String,
        /// Hash of the stated reason.
        reason_digest: Hash,
    },
    /// A new user registration anchored to a day proof.
    UserRegistration {
        /// Day of registration.
        registration_day: DayNumber,
        /// The user's public key bytes.
        user_public_key: Vec<u8>,
        /// Digest of the canonical day proof the registration anchors to.
        day_proof_digest: Hash,
    },
    /// A validator set change.
    Membership {
        /// The change itself.
        change: MembershipChange,
        /// Day at which the change becomes effective.
        effective_day: DayNumber,
    },
    /// A blacklist or unblacklist ballot.
    Ballot(BlacklistBallot),
    /// Notice that an object is exported to an external federation protocol.
    ExportNotice {
        /// Day the notice was created.
        creation_day: DayNumber,
        /// Reference to the exported object.
        object_ref: String,
        /// Digest of the export policy applied.
        policy_digest: Hash,
    },
}

impl FederationEvent {
    /// Compute the event's fingerprint: the BLAKE3 hash of its canonical
    /// encoding under the event domain.
    pub fn fingerprint(&self) -> EventFingerprint {
        let body = borsh::to_vec(self).expect("event encoding cannot fail");
        EventFingerprint(blake3_concat(&[domains::EVENT, &body]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> FederationEvent {
        FederationEvent::PostAnnounce {
            creation_day: 12,
            content_cid: "bafyexample".to_string(),
            author_key_hash: [3u8; 32],
            community_id: "garden".to_string(),
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(sample_event().fingerprint(), sample_event().fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let mut other = sample_event();
        if let FederationEvent::PostAnnounce { creation_day, .. } = &mut other {
            *creation_day = 13;
        }
        assert_ne!(sample_event().fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_event_round_trips_through_borsh() {
        let event = sample_event();
        let bytes = borsh::to_vec(&event).unwrap();
        let decoded: FederationEvent = borsh::from_slice(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
