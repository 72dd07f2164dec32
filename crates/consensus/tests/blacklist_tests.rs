//! Ballot lifecycle: evidence collection, proposal, threshold
//! endorsement, commitment through the event pipeline, and activation at
//! the effective day.

use conductor_consensus::blacklist::{
    BallotError, BallotExecution, BallotStore, BallotTracker, BlacklistView,
    MIN_EFFECTIVE_LEAD_DAYS,
};
use conductor_consensus::evidence::{EvidenceDetail, EvidencePool, EvidenceRecord};
use conductor_consensus::messages::{BallotProposal, ConsensusMessage};
use conductor_crypto::threshold::{DealtKeys, ThresholdDealer};
use conductor_types::{
    BallotAction, Block, FederationEvent, QuorumCertificate, ReasonCode, ValidatorId,
};

const N: u32 = 4;
const T: u32 = 3;

fn dealt() -> DealtKeys {
    ThresholdDealer::deal(N, T).unwrap()
}

fn tracker(dealt: &DealtKeys) -> BallotTracker {
    BallotTracker::new(T, N as usize, dealt.share_publics.clone())
}

fn proposal(target: ValidatorId, effective_day: u64) -> BallotProposal {
    BallotProposal {
        target,
        reason_code: ReasonCode::Equivocation,
        evidence_digest: [5u8; 32],
        effective_day,
        action: BallotAction::Blacklist,
    }
}

#[test]
fn ballot_certifies_at_threshold_and_executes_on_commit() {
    let dealt = dealt();
    let target = ValidatorId([66u8; 32]);
    let current_day = 7;
    let effective_day = current_day + MIN_EFFECTIVE_LEAD_DAYS;

    // Proposer's tracker: proposal plus own share.
    let mut proposer = tracker(&dealt);
    let messages = proposer
        .propose(proposal(target, effective_day), current_day, &dealt.shares[0])
        .unwrap();
    assert_eq!(messages.len(), 2);

    // Two endorsers validate the evidence and add their shares.
    let proposal_msg = match &messages[0] {
        ConsensusMessage::BallotProposal(p) => p.clone(),
        other => panic!("expected proposal, got {other:?}"),
    };
    let mut certified = None;
    for endorser in 1..3usize {
        let mut peer = tracker(&dealt);
        let share_msg = match peer
            .endorse(&proposal_msg, current_day, &dealt.shares[endorser])
            .unwrap()
        {
            ConsensusMessage::BallotShare(s) => s,
            other => panic!("expected share, got {other:?}"),
        };
        certified = proposer.on_share(&share_msg).unwrap().or(certified);
    }

    let ballot = certified.expect("2f+1 shares certify the ballot");
    assert_eq!(ballot.target, target);
    assert!(ballot.quorum_certificate.signer_count() >= T);
    assert!(ballot
        .quorum_certificate
        .verify(&dealt.group_public, T));

    // The ballot's fingerprint commits through the normal pipeline; the
    // store resolves it back to an executable entry.
    let mut store = BallotStore::new();
    store.insert(ballot.clone());
    let fingerprint = FederationEvent::Ballot(ballot).fingerprint();

    let block = Block::assemble(
        current_day,
        vec![fingerprint],
        vec![],
        QuorumCertificate::new([0u8; 32], [0u8; 96], vec![0b0111]),
    );
    let executions = store.execute_committed(&block, &dealt.group_public, T);

    let [BallotExecution::Add(entry)] = executions.as_slice() else {
        panic!("expected one addition, got {executions:?}");
    };
    assert_eq!(entry.validator_id, target);
    assert_eq!(entry.effective_day, effective_day);

    // Activation respects the effective day.
    let mut view = BlacklistView::default();
    view.apply(entry.clone());
    assert!(!view.is_excluded(&target, effective_day - 1));
    assert!(view.is_excluded(&target, effective_day));
}

#[test]
fn effective_day_lead_time_enforced() {
    let dealt = dealt();
    let mut proposer = tracker(&dealt);
    let target = ValidatorId([66u8; 32]);

    // current + 1 is one day short of the required lead.
    let err = proposer
        .propose(proposal(target, 8), 7, &dealt.shares[0])
        .unwrap_err();
    assert!(matches!(err, BallotError::EffectiveDayTooSoon { .. }));
}

#[test]
fn two_shares_do_not_certify() {
    let dealt = dealt();
    let target = ValidatorId([66u8; 32]);
    let mut proposer = tracker(&dealt);

    let messages = proposer
        .propose(proposal(target, 9), 7, &dealt.shares[0])
        .unwrap();
    let proposal_msg = match &messages[0] {
        ConsensusMessage::BallotProposal(p) => p.clone(),
        other => panic!("expected proposal, got {other:?}"),
    };

    let mut peer = tracker(&dealt);
    let share_msg = match peer.endorse(&proposal_msg, 7, &dealt.shares[1]).unwrap() {
        ConsensusMessage::BallotShare(s) => s,
        other => panic!("expected share, got {other:?}"),
    };

    // Proposer now holds 2 of 3 required shares.
    assert!(proposer.on_share(&share_msg).unwrap().is_none());
    assert!(proposer.take_ready().is_empty());
}

#[test]
fn unblacklist_follows_the_same_path() {
    let dealt = dealt();
    let target = ValidatorId([66u8; 32]);

    let mut proposer = tracker(&dealt);
    let unblacklist = BallotProposal {
        target,
        reason_code: ReasonCode::Equivocation,
        evidence_digest: [0u8; 32],
        effective_day: 9,
        action: BallotAction::Unblacklist,
    };
    let messages = proposer.propose(unblacklist, 7, &dealt.shares[0]).unwrap();
    let proposal_msg = match &messages[0] {
        ConsensusMessage::BallotProposal(p) => p.clone(),
        other => panic!("expected proposal, got {other:?}"),
    };

    let mut certified = None;
    for endorser in 1..3usize {
        let mut peer = tracker(&dealt);
        if let ConsensusMessage::BallotShare(s) = peer
            .endorse(&proposal_msg, 7, &dealt.shares[endorser])
            .unwrap()
        {
            certified = proposer.on_share(&s).unwrap().or(certified);
        }
    }
    let ballot = certified.expect("unblacklist certifies identically");

    let mut store = BallotStore::new();
    store.insert(ballot.clone());
    let block = Block::assemble(
        7,
        vec![FederationEvent::Ballot(ballot).fingerprint()],
        vec![],
        QuorumCertificate::new([0u8; 32], [0u8; 96], vec![0b0111]),
    );
    let executions = store.execute_committed(&block, &dealt.group_public, T);
    assert_eq!(executions, vec![BallotExecution::Remove(target)]);
}

#[test]
fn evidence_pool_feeds_ballot_proposals() {
    let accused = ValidatorId([3u8; 32]);
    let reporter = ValidatorId([1u8; 32]);
    let mut pool = EvidencePool::new();

    let record = EvidenceRecord::new(
        accused,
        reporter,
        6,
        EvidenceDetail::Replay {
            message_digest: [7u8; 32],
        },
    );
    assert!(pool.add(record.clone(), 6));
    assert_eq!(pool.against(&accused).len(), 1);

    // Balloting resolves the record; it cannot be re-admitted.
    let digest = record.digest();
    pool.resolve(&digest);
    assert!(pool.against(&accused).is_empty());
    assert!(!pool.add(record, 6));
}
