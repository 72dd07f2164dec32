//! Blacklist ballots and the active exclusion view.
//!
//! A ballot is an ordinary federation event: once evidence accumulates,
//! a validator proposes the ballot, peers that validate the evidence
//! contribute threshold shares, and the certified ballot's fingerprint
//! goes through the normal consensus pipeline. When a committed block
//! contains a known ballot fingerprint, the entry activates at its
//! effective day: the target's messages are still replay-filtered but no
//! longer count toward any threshold.

use crate::messages::{BallotProposal, BallotShare, ConsensusMessage};
use crate::share_set::{ShareSet, ShareSetError};
use conductor_crypto::threshold::{sign_share, SecretShare};
use conductor_crypto::{BlsPublicKey, Hash};
use conductor_types::{
    BallotAction, BlacklistBallot, BlacklistEntry, Block, DayNumber, EventFingerprint,
    FederationEvent, QuorumCertificate, ValidatorId,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Minimum lead time before a ballot activates, in days. Leaves room for
/// the key reshare that follows a membership change.
pub const MIN_EFFECTIVE_LEAD_DAYS: u64 = 2;

/// Errors raised by ballot handling.
#[derive(Debug, thiserror::Error)]
pub enum BallotError {
    /// The effective day is too soon.
    #[error("effective day {effective} must be at least {minimum}")]
    EffectiveDayTooSoon {
        /// Proposed effective day.
        effective: DayNumber,
        /// Earliest acceptable day.
        minimum: DayNumber,
    },

    /// Share collection failed.
    #[error(transparent)]
    Shares(#[from] ShareSetError),
}

/// The in-memory view of current exclusions, loaded from storage at
/// startup and mutated only by committed ballots.
#[derive(Debug, Clone, Default)]
pub struct BlacklistView {
    entries: HashMap<ValidatorId, BlacklistEntry>,
}

impl BlacklistView {
    /// Build a view from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = BlacklistEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.validator_id, e))
                .collect(),
        }
    }

    /// Whether a validator is excluded as of `day`.
    pub fn is_excluded(&self, validator: &ValidatorId, day: DayNumber) -> bool {
        self.entries
            .get(validator)
            .map(|e| e.effective_day <= day)
            .unwrap_or(false)
    }

    /// The entry for a validator, if any.
    pub fn entry(&self, validator: &ValidatorId) -> Option<&BlacklistEntry> {
        self.entries.get(validator)
    }

    /// Identifiers excluded as of `day`.
    pub fn excluded_at(&self, day: DayNumber) -> Vec<ValidatorId> {
        self.entries
            .values()
            .filter(|e| e.effective_day <= day)
            .map(|e| e.validator_id)
            .collect()
    }

    /// Record a committed entry.
    pub fn apply(&mut self, entry: BlacklistEntry) {
        info!(
            validator = %entry.validator_id,
            reason = %entry.reason_code,
            effective_day = entry.effective_day,
            "blacklist entry applied"
        );
        self.entries.insert(entry.validator_id, entry);
    }

    /// Remove an entry (committed unblacklist).
    pub fn remove(&mut self, validator: &ValidatorId) {
        if self.entries.remove(validator).is_some() {
            info!(validator = %validator, "blacklist entry removed");
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The digest a ballot's quorum certificate signs.
fn proposal_digest(proposal: &BallotProposal) -> Hash {
    // The ballot digest covers everything except the certificate, so a
    // placeholder certificate yields the digest the real one will sign.
    BlacklistBallot {
        target: proposal.target,
        reason_code: proposal.reason_code,
        evidence_digest: proposal.evidence_digest,
        effective_day: proposal.effective_day,
        action: proposal.action,
        quorum_certificate: QuorumCertificate::new([0u8; 32], [0u8; 96], Vec::new()),
    }
    .ballot_digest()
}

/// Collects shares for in-flight ballots until they certify.
#[derive(Debug)]
pub struct BallotTracker {
    threshold: u32,
    set_size: usize,
    share_publics: Vec<BlsPublicKey>,
    pending: HashMap<Hash, (BallotProposal, ShareSet)>,
    ready: Vec<BlacklistBallot>,
}

impl BallotTracker {
    /// Create a tracker for the current active set.
    pub fn new(threshold: u32, set_size: usize, share_publics: Vec<BlsPublicKey>) -> Self {
        Self {
            threshold,
            set_size,
            share_publics,
            pending: HashMap::new(),
            ready: Vec::new(),
        }
    }

    /// Propose a ballot: register it and produce the proposal broadcast
    /// plus our own share.
    pub fn propose(
        &mut self,
        proposal: BallotProposal,
        current_day: DayNumber,
        secret_share: &SecretShare,
    ) -> Result<Vec<ConsensusMessage>, BallotError> {
        let minimum = current_day + MIN_EFFECTIVE_LEAD_DAYS;
        if proposal.effective_day < minimum {
            return Err(BallotError::EffectiveDayTooSoon {
                effective: proposal.effective_day,
                minimum,
            });
        }

        self.register(proposal.clone());

        let digest = proposal_digest(&proposal);
        let share = sign_share(secret_share, &digest);
        let share_msg = BallotShare {
            ballot_digest: digest,
            share_index: share.index,
            share: share.signature.to_bytes(),
        };

        // Our own share counts immediately.
        self.on_share(&share_msg)?;

        Ok(vec![
            ConsensusMessage::BallotProposal(proposal),
            ConsensusMessage::BallotShare(share_msg),
        ])
    }

    /// A peer proposed a ballot. The caller has already validated the
    /// backing evidence; endorsing produces our share.
    pub fn endorse(
        &mut self,
        proposal: &BallotProposal,
        current_day: DayNumber,
        secret_share: &SecretShare,
    ) -> Result<ConsensusMessage, BallotError> {
        let minimum = current_day + MIN_EFFECTIVE_LEAD_DAYS;
        if proposal.effective_day < minimum {
            return Err(BallotError::EffectiveDayTooSoon {
                effective: proposal.effective_day,
                minimum,
            });
        }

        self.register(proposal.clone());

        let digest = proposal_digest(proposal);
        let share = sign_share(secret_share, &digest);
        let share_msg = BallotShare {
            ballot_digest: digest,
            share_index: share.index,
            share: share.signature.to_bytes(),
        };
        self.on_share(&share_msg)?;
        Ok(ConsensusMessage::BallotShare(share_msg))
    }

    /// Record a share; returns the certified ballot when the quorum
    /// completes.
    pub fn on_share(&mut self, msg: &BallotShare) -> Result<Option<BlacklistBallot>, BallotError> {
        let Some((proposal, shares)) = self.pending.get_mut(&msg.ballot_digest) else {
            debug!(
                digest = hex::encode(&msg.ballot_digest[..8]),
                "share for unknown ballot buffered out"
            );
            return Ok(None);
        };

        match shares.add_share(msg.share_index, &msg.share, &self.share_publics) {
            Ok(Some(qc)) => {
                let ballot = BlacklistBallot {
                    target: proposal.target,
                    reason_code: proposal.reason_code,
                    evidence_digest: proposal.evidence_digest,
                    effective_day: proposal.effective_day,
                    action: proposal.action,
                    quorum_certificate: qc,
                };
                info!(
                    target = %ballot.target,
                    reason = %ballot.reason_code,
                    effective_day = ballot.effective_day,
                    "ballot certified"
                );
                self.pending.remove(&msg.ballot_digest);
                self.ready.push(ballot.clone());
                Ok(Some(ballot))
            }
            Ok(None) => Ok(None),
            Err(ShareSetError::DuplicateShare(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drain ballots awaiting inclusion in our next batch.
    pub fn take_ready(&mut self) -> Vec<BlacklistBallot> {
        std::mem::take(&mut self.ready)
    }

    fn register(&mut self, proposal: BallotProposal) {
        let digest = proposal_digest(&proposal);
        self.pending.entry(digest).or_insert_with(|| {
            let set = ShareSet::new(digest, self.threshold, self.set_size);
            (proposal, set)
        });
    }
}

/// Resolution of a committed ballot fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallotExecution {
    /// Persist and apply an exclusion.
    Add(BlacklistEntry),
    /// Remove an exclusion.
    Remove(ValidatorId),
}

/// Maps ballot fingerprints to their bodies so committed blocks can be
/// executed. Fingerprints alone traverse consensus; the bodies arrive by
/// ballot gossip.
#[derive(Debug, Default)]
pub struct BallotStore {
    by_fingerprint: HashMap<EventFingerprint, BlacklistBallot>,
}

impl BallotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a certified ballot under its event fingerprint.
    pub fn insert(&mut self, ballot: BlacklistBallot) {
        let fingerprint = FederationEvent::Ballot(ballot.clone()).fingerprint();
        self.by_fingerprint.insert(fingerprint, ballot);
    }

    /// Number of known ballots.
    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    /// Execute the ballots whose fingerprints a committed block carries.
    ///
    /// Ballot certificates are re-verified against the group key; a
    /// ballot that fails is skipped with a warning (a Byzantine batch
    /// cannot conjure exclusions).
    pub fn execute_committed(
        &mut self,
        block: &Block,
        group_public: &BlsPublicKey,
        threshold: u32,
    ) -> Vec<BallotExecution> {
        let mut executions = Vec::new();

        for fingerprint in &block.events {
            let Some(ballot) = self.by_fingerprint.remove(fingerprint) else {
                continue;
            };

            let digest_ok = ballot.quorum_certificate.message_digest == ballot.ballot_digest();
            if !digest_ok || !ballot.quorum_certificate.verify(group_public, threshold) {
                warn!(target = %ballot.target, "committed ballot fails certificate check, skipped");
                continue;
            }

            match ballot.action {
                BallotAction::Blacklist => executions.push(BallotExecution::Add(BlacklistEntry {
                    validator_id: ballot.target,
                    reason_code: ballot.reason_code,
                    evidence_digest: ballot.evidence_digest,
                    effective_day: ballot.effective_day,
                    quorum_certificate: ballot.quorum_certificate,
                })),
                BallotAction::Unblacklist => {
                    executions.push(BallotExecution::Remove(ballot.target))
                }
            }
        }

        executions
    }
}
