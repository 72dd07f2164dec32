//! Wire messages exchanged between validators.
//!
//! Every message is borsh-encoded (the canonical byte encoding, so
//! digests are reproducible across implementations) and travels inside a
//! signed [`PeerEnvelope`]. Gossip carries RBC phases, BBA votes, coin
//! shares, day proofs, block signature shares, ballots and evidence;
//! fragment repair is the one unicast request/response pair.

use crate::evidence::EvidenceRecord;
use crate::merkle::MerkleProof;
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, BlsPrivateKey, BlsPublicKey, BlsSignature, Hash};
use conductor_types::{domains, DayNumber, Epoch, EventFingerprint, ValidatorId};
use serde::{Deserialize, Serialize};

/// One erasure-coded fragment of a batch payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Fragment {
    /// Shard index in `0..n`.
    pub index: u32,
    /// Shard bytes (all shards of a batch are equal length).
    pub data: Vec<u8>,
}

/// RBC phase one: the proposer hands each validator its fragment.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RbcPropose {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Active-set index of the proposer.
    pub proposer_index: u32,
    /// Hash of the batch payload being broadcast.
    pub batch_digest: Hash,
    /// Root of the fragment tree.
    pub merkle_root: Hash,
    /// Payload length before erasure-coding padding.
    pub payload_len: u32,
    /// The recipient's fragment.
    pub fragment: Fragment,
    /// Proof binding the fragment to `merkle_root`.
    pub proof: MerkleProof,
}

/// RBC phase two: each validator multicasts the fragment it was handed.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RbcEcho {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Active-set index of the proposer.
    pub proposer_index: u32,
    /// Hash of the batch payload.
    pub batch_digest: Hash,
    /// Root of the fragment tree.
    pub merkle_root: Hash,
    /// Payload length before padding.
    pub payload_len: u32,
    /// The echoing validator's fragment.
    pub fragment: Fragment,
    /// Proof binding the fragment to `merkle_root`.
    pub proof: MerkleProof,
}

/// RBC phase three: commitment to a digest.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RbcReady {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Active-set index of the proposer.
    pub proposer_index: u32,
    /// Hash of the batch payload.
    pub batch_digest: Hash,
}

/// Binary-agreement BVAL broadcast.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BbaBval {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Which proposer's inclusion is being decided.
    pub proposer_index: u32,
    /// Agreement round.
    pub round: u32,
    /// The broadcast estimate.
    pub value: bool,
}

/// Binary-agreement AUX broadcast.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BbaAux {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Which proposer's inclusion is being decided.
    pub proposer_index: u32,
    /// Agreement round.
    pub round: u32,
    /// A value from the sender's bin-values set.
    pub value: bool,
}

/// A threshold signature share for the common coin of a BBA round.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CoinShare {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Which proposer's BBA the coin belongs to.
    pub proposer_index: u32,
    /// Agreement round.
    pub round: u32,
    /// 1-based threshold share index of the sender.
    pub share_index: u32,
    /// Partial signature over the coin preimage.
    #[serde(with = "conductor_types::serde_bytes_array")]
    pub share: [u8; 96],
}

/// A day proof announcement with the proposer's completion observation.
///
/// `completion_millis` is a duration (how long the chain took), not a
/// timestamp; the difficulty policy takes the median across validators.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DayProofAnnounce {
    /// The signed proof.
    pub proof: conductor_types::DayProof,
    /// How long the computation ran, in milliseconds.
    pub completion_millis: u64,
}

/// A threshold share over a day's canonical digest.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DayShare {
    /// Day being finalized.
    pub day: DayNumber,
    /// The output the sender verified.
    pub output: Hash,
    /// 1-based threshold share index of the sender.
    pub share_index: u32,
    /// Partial signature over the canonical day digest.
    #[serde(with = "conductor_types::serde_bytes_array")]
    pub share: [u8; 96],
}

/// A committed block published with its certificate, so validators that
/// fell behind the agreement can adopt the result directly.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockCommit {
    /// The finalized block, certificate included.
    pub block: conductor_types::Block,
}

/// A threshold share over a block digest.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BlockShare {
    /// Epoch being committed.
    pub epoch: Epoch,
    /// The block digest the sender derived from the decided subset.
    pub block_digest: Hash,
    /// 1-based threshold share index of the sender.
    pub share_index: u32,
    /// Partial signature over the block digest.
    #[serde(with = "conductor_types::serde_bytes_array")]
    pub share: [u8; 96],
}

/// A proposed blacklist ballot awaiting signature shares.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BallotProposal {
    /// Target validator.
    pub target: ValidatorId,
    /// Reason for exclusion.
    pub reason_code: conductor_types::ReasonCode,
    /// Digest of the backing evidence record.
    pub evidence_digest: Hash,
    /// Day the entry activates.
    pub effective_day: DayNumber,
    /// Add or remove.
    pub action: conductor_types::BallotAction,
}

/// A threshold share endorsing a ballot.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BallotShare {
    /// Digest of the ballot body being endorsed.
    pub ballot_digest: Hash,
    /// 1-based threshold share index of the sender.
    pub share_index: u32,
    /// Partial signature over the ballot digest.
    #[serde(with = "conductor_types::serde_bytes_array")]
    pub share: [u8; 96],
}

/// Unicast request for a missing fragment.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FragmentRequest {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Active-set index of the proposer.
    pub proposer_index: u32,
    /// The wanted shard index.
    pub fragment_index: u32,
}

/// Unicast reply carrying a fragment with its proof.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FragmentResponse {
    /// Epoch of the instance.
    pub epoch: Epoch,
    /// Active-set index of the proposer.
    pub proposer_index: u32,
    /// Digest of the batch the fragment belongs to.
    pub batch_digest: Hash,
    /// Root of the fragment tree.
    pub merkle_root: Hash,
    /// Payload length before padding.
    pub payload_len: u32,
    /// The fragment.
    pub fragment: Fragment,
    /// Its inclusion proof.
    pub proof: MerkleProof,
}

/// Every message a validator sends to its peers.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// RBC Propose.
    RbcPropose(RbcPropose),
    /// RBC Echo.
    RbcEcho(RbcEcho),
    /// RBC Ready.
    RbcReady(RbcReady),
    /// BBA BVAL.
    BbaBval(BbaBval),
    /// BBA AUX.
    BbaAux(BbaAux),
    /// Common-coin share.
    CoinShare(CoinShare),
    /// Day proof announcement.
    DayProofAnnounce(DayProofAnnounce),
    /// Day canonical-digest share.
    DayShare(DayShare),
    /// Block digest share.
    BlockShare(BlockShare),
    /// Committed block publication.
    BlockCommit(BlockCommit),
    /// Ballot proposal.
    BallotProposal(BallotProposal),
    /// Ballot endorsement share.
    BallotShare(BallotShare),
    /// Evidence record.
    Evidence(EvidenceRecord),
    /// Fragment repair request (unicast).
    FragmentRequest(FragmentRequest),
    /// Fragment repair response (unicast).
    FragmentResponse(FragmentResponse),
}

impl ConsensusMessage {
    /// The epoch or day this message belongs to.
    pub fn epoch_or_day(&self) -> u64 {
        match self {
            ConsensusMessage::RbcPropose(m) => m.epoch,
            ConsensusMessage::RbcEcho(m) => m.epoch,
            ConsensusMessage::RbcReady(m) => m.epoch,
            ConsensusMessage::BbaBval(m) => m.epoch,
            ConsensusMessage::BbaAux(m) => m.epoch,
            ConsensusMessage::CoinShare(m) => m.epoch,
            ConsensusMessage::DayProofAnnounce(m) => m.proof.day_number,
            ConsensusMessage::DayShare(m) => m.day,
            ConsensusMessage::BlockShare(m) => m.epoch,
            ConsensusMessage::BlockCommit(m) => m.block.epoch,
            ConsensusMessage::BallotProposal(m) => m.effective_day,
            ConsensusMessage::BallotShare(_) => 0,
            ConsensusMessage::Evidence(m) => m.epoch_or_day,
            ConsensusMessage::FragmentRequest(m) => m.epoch,
            ConsensusMessage::FragmentResponse(m) => m.epoch,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::RbcPropose(_) => "rbc_propose",
            ConsensusMessage::RbcEcho(_) => "rbc_echo",
            ConsensusMessage::RbcReady(_) => "rbc_ready",
            ConsensusMessage::BbaBval(_) => "bba_bval",
            ConsensusMessage::BbaAux(_) => "bba_aux",
            ConsensusMessage::CoinShare(_) => "coin_share",
            ConsensusMessage::DayProofAnnounce(_) => "day_proof",
            ConsensusMessage::DayShare(_) => "day_share",
            ConsensusMessage::BlockShare(_) => "block_share",
            ConsensusMessage::BlockCommit(_) => "block_commit",
            ConsensusMessage::BallotProposal(_) => "ballot_proposal",
            ConsensusMessage::BallotShare(_) => "ballot_share",
            ConsensusMessage::Evidence(_) => "evidence",
            ConsensusMessage::FragmentRequest(_) => "fragment_request",
            ConsensusMessage::FragmentResponse(_) => "fragment_response",
        }
    }
}

/// The signed envelope every peer message travels in.
///
/// Receivers reject envelopes whose signature fails, whose sender is
/// unknown or blacklisted, or whose digest hits the seen-message cache.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PeerEnvelope {
    /// Identifier of the sending validator.
    pub sender: ValidatorId,
    /// Epoch or day context of the payload.
    pub epoch_or_day: u64,
    /// Digest of `(sender, epoch_or_day, message)`.
    pub message_digest: Hash,
    /// The payload.
    pub message: ConsensusMessage,
    /// Sender's signature over the digest.
    #[serde(with = "conductor_types::serde_bytes_array")]
    pub signature: [u8; 96],
}

impl PeerEnvelope {
    /// Sign a message into an envelope.
    pub fn sign(sender: ValidatorId, message: ConsensusMessage, key: &BlsPrivateKey) -> Self {
        let epoch_or_day = message.epoch_or_day();
        let message_digest = Self::compute_digest(&sender, epoch_or_day, &message);
        let signature = key.sign(&Self::signing_bytes(&message_digest)).to_bytes();
        Self {
            sender,
            epoch_or_day,
            message_digest,
            message,
            signature,
        }
    }

    /// Verify digest integrity and the sender's signature.
    pub fn verify(&self, sender_key: &BlsPublicKey) -> bool {
        if self.message_digest
            != Self::compute_digest(&self.sender, self.epoch_or_day, &self.message)
        {
            return false;
        }
        match BlsSignature::from_bytes(&self.signature) {
            Ok(sig) => sig.verify(&Self::signing_bytes(&self.message_digest), sender_key),
            Err(_) => false,
        }
    }

    /// Canonical encoding of the whole envelope (for evidence records).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("envelope encoding cannot fail")
    }

    fn compute_digest(sender: &ValidatorId, epoch_or_day: u64, message: &ConsensusMessage) -> Hash {
        let body = borsh::to_vec(&(sender, epoch_or_day, message))
            .expect("envelope digest encoding cannot fail");
        blake3_concat(&[domains::ENVELOPE, &body])
    }

    fn signing_bytes(digest: &Hash) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(domains::ENVELOPE.len() + 32);
        bytes.extend_from_slice(domains::ENVELOPE);
        bytes.extend_from_slice(digest);
        bytes
    }
}

/// The coin preimage for `(epoch, proposer, round)`.
pub fn coin_preimage(epoch: Epoch, proposer: &ValidatorId, round: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domains::COIN.len() + 44);
    bytes.extend_from_slice(domains::COIN);
    bytes.extend_from_slice(&epoch.to_be_bytes());
    bytes.extend_from_slice(proposer.as_bytes());
    bytes.extend_from_slice(&round.to_be_bytes());
    bytes
}

/// Deterministic ordering of the decided event set: lexicographic sort
/// with duplicates removed.
pub fn sort_unique(mut events: Vec<EventFingerprint>) -> Vec<EventFingerprint> {
    events.sort();
    events.dedup();
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let key = BlsPrivateKey::random();
        let sender = ValidatorId::from_public_key(&key.public_key());
        let msg = ConsensusMessage::RbcReady(RbcReady {
            epoch: 4,
            proposer_index: 1,
            batch_digest: [7u8; 32],
        });

        let envelope = PeerEnvelope::sign(sender, msg, &key);
        assert!(envelope.verify(&key.public_key()));
        assert_eq!(envelope.epoch_or_day, 4);

        let decoded: PeerEnvelope = borsh::from_slice(&envelope.canonical_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_tampered_envelope_rejected() {
        let key = BlsPrivateKey::random();
        let sender = ValidatorId::from_public_key(&key.public_key());
        let msg = ConsensusMessage::RbcReady(RbcReady {
            epoch: 4,
            proposer_index: 1,
            batch_digest: [7u8; 32],
        });

        let mut envelope = PeerEnvelope::sign(sender, msg, &key);
        envelope.epoch_or_day = 5;
        assert!(!envelope.verify(&key.public_key()));
    }

    #[test]
    fn test_envelope_rejected_under_wrong_key() {
        let key = BlsPrivateKey::random();
        let sender = ValidatorId::from_public_key(&key.public_key());
        let msg = ConsensusMessage::RbcReady(RbcReady {
            epoch: 0,
            proposer_index: 0,
            batch_digest: [0u8; 32],
        });

        let envelope = PeerEnvelope::sign(sender, msg, &key);
        assert!(!envelope.verify(&BlsPrivateKey::random().public_key()));
    }

    #[test]
    fn test_sort_unique() {
        let a = EventFingerprint([1u8; 32]);
        let b = EventFingerprint([2u8; 32]);
        let c = EventFingerprint([3u8; 32]);
        assert_eq!(sort_unique(vec![c, a, b, a, c]), vec![a, b, c]);
    }

    #[test]
    fn test_coin_preimage_distinguishes_inputs() {
        let v = ValidatorId([1u8; 32]);
        let base = coin_preimage(1, &v, 0);
        assert_ne!(base, coin_preimage(2, &v, 0));
        assert_ne!(base, coin_preimage(1, &v, 1));
        assert_ne!(base, coin_preimage(1, &ValidatorId([2u8; 32]), 0));
    }
}
