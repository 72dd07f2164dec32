//! Day-advancement scenarios at test-scale difficulty.
//!
//! Covers the specified day-one transition (identical outputs from three
//! validators assemble a certificate with popcount >= 3), evidence
//! against an invalid proof, and the divergent-output retry path.

use conductor_consensus::day::{DayAdvancement, DayEffect};
use conductor_consensus::evidence::EvidenceDetail;
use conductor_consensus::messages::{ConsensusMessage, PeerEnvelope};
use conductor_crypto::threshold::{DealtKeys, ThresholdDealer};
use conductor_crypto::BlsPrivateKey;
use conductor_types::{DayProof, Validator, ValidatorId, ValidatorSet};
use conductor_vdf::VdfEngine;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const N: usize = 4;
const TEST_DIFFICULTY: u64 = 1_000;
const GENESIS: &[u8] = b"chorus_test_genesis";

struct Fixture {
    set: Arc<ValidatorSet>,
    keys: Vec<BlsPrivateKey>,
    dealt: DealtKeys,
    engine: VdfEngine,
}

impl Fixture {
    fn new() -> Self {
        let raw_keys: Vec<BlsPrivateKey> = (0..N).map(|_| BlsPrivateKey::random()).collect();
        let validators: Vec<Validator> = raw_keys
            .iter()
            .map(|k| Validator::from_public_key(&k.public_key()))
            .collect();
        let set = Arc::new(ValidatorSet::new(validators).unwrap());

        let mut keys: Vec<Option<BlsPrivateKey>> = vec![None; N];
        for key in raw_keys {
            let id = ValidatorId::from_public_key(&key.public_key());
            let index = set.index_of(&id).unwrap() as usize;
            keys[index] = Some(key);
        }
        let keys = keys.into_iter().map(|k| k.unwrap()).collect();

        let dealt = ThresholdDealer::deal(N as u32, set.quorum_threshold()).unwrap();
        Self {
            set,
            keys,
            dealt,
            engine: VdfEngine::new(GENESIS.to_vec()),
        }
    }

    fn advancement(&self, node: usize, day: u64) -> DayAdvancement {
        DayAdvancement::new(
            day,
            self.set.by_index(node as u32).unwrap().id,
            Arc::clone(&self.set),
            self.dealt.group_public.clone(),
            self.dealt.share_publics.clone(),
            self.dealt.shares[node].clone(),
        )
    }

    fn signed_proof(&self, node: usize, day: u64) -> DayProof {
        let seed = self.engine.derive_seed(day);
        let output = self
            .engine
            .compute(&seed, TEST_DIFFICULTY, 100, &AtomicBool::new(false), |_, _| {})
            .unwrap();
        let proposer = self.set.by_index(node as u32).unwrap().id;
        let mut proof = DayProof::unsigned(day, seed, TEST_DIFFICULTY, output, proposer);
        proof.proposer_signature = self.keys[node].sign(&proof.signing_bytes()).to_bytes();
        proof
    }

    fn envelope(&self, node: usize, message: ConsensusMessage) -> PeerEnvelope {
        let sender = self.set.by_index(node as u32).unwrap().id;
        PeerEnvelope::sign(sender, message, &self.keys[node])
    }
}

#[test]
fn day_one_finalizes_with_three_identical_outputs() {
    let fixture = Fixture::new();
    let mut local = fixture.advancement(0, 1);

    // Everyone computed the same deterministic chain.
    let proofs: Vec<DayProof> = (0..N).map(|i| fixture.signed_proof(i, 1)).collect();
    assert!(proofs.windows(2).all(|w| w[0].output == w[1].output));

    let mut broadcasts = Vec::new();
    let effects = local.on_local_proof(proofs[0].clone(), Duration::from_secs(5));
    for effect in effects {
        if let DayEffect::Broadcast(msg) = effect {
            broadcasts.push(msg);
        }
    }
    // Announce plus our share.
    assert_eq!(broadcasts.len(), 2);

    // Peers announce and share until the quorum closes at 2f+1 = 3.
    let mut canonical = None;
    for node in [1usize, 2] {
        let announce = ConsensusMessage::DayProofAnnounce(
            conductor_consensus::messages::DayProofAnnounce {
                proof: proofs[node].clone(),
                completion_millis: 5_000,
            },
        );
        let envelope = fixture.envelope(node, announce);
        if let ConsensusMessage::DayProofAnnounce(msg) = &envelope.message {
            local.on_peer_announce(msg, &envelope, true);
        }

        let mut peer = fixture.advancement(node, 1);
        let peer_effects = peer.on_local_proof(proofs[node].clone(), Duration::from_secs(5));
        for effect in peer_effects {
            if let DayEffect::Broadcast(ConsensusMessage::DayShare(share)) = effect {
                let envelope = fixture.envelope(node, ConsensusMessage::DayShare(share.clone()));
                for result in local.on_peer_share(&share, &envelope) {
                    if let DayEffect::Canonical(c) = result {
                        canonical = Some(c);
                    }
                }
            }
        }
    }

    let canonical = canonical.expect("three shares finalize the day");
    assert_eq!(canonical.day_proof.day_number, 1);
    assert_eq!(canonical.day_proof.output, proofs[0].output);
    assert!(canonical.quorum_certificate.signer_count() >= 3);
    assert!(canonical.verify(&fixture.dealt.group_public, fixture.set.quorum_threshold()));
    assert_eq!(local.canonical(), Some(&canonical));
}

#[test]
fn invalid_vdf_output_becomes_evidence() {
    let fixture = Fixture::new();
    let mut local = fixture.advancement(0, 1);
    local.on_local_proof(fixture.signed_proof(0, 1), Duration::from_secs(5));

    // Node 1 signs a garbage output; the caller's verification fails.
    let mut bogus = fixture.signed_proof(1, 1);
    bogus.output = [0xAB; 32];
    bogus.proposer_signature = fixture.keys[1].sign(&bogus.signing_bytes()).to_bytes();

    let announce =
        ConsensusMessage::DayProofAnnounce(conductor_consensus::messages::DayProofAnnounce {
            proof: bogus.clone(),
            completion_millis: 5_000,
        });
    let envelope = fixture.envelope(1, announce);
    let effects = if let ConsensusMessage::DayProofAnnounce(msg) = &envelope.message {
        local.on_peer_announce(msg, &envelope, false)
    } else {
        unreachable!()
    };

    assert!(effects.iter().any(|e| matches!(
        e,
        DayEffect::Evidence(record)
            if matches!(record.detail, EvidenceDetail::VdfInvalid { .. })
    )));
}

#[test]
fn forged_proposer_signature_becomes_evidence() {
    let fixture = Fixture::new();
    let mut local = fixture.advancement(0, 1);

    let mut forged = fixture.signed_proof(1, 1);
    forged.proposer_signature = [0u8; 96];

    let announce =
        ConsensusMessage::DayProofAnnounce(conductor_consensus::messages::DayProofAnnounce {
            proof: forged,
            completion_millis: 5_000,
        });
    let envelope = fixture.envelope(1, announce);
    let effects = if let ConsensusMessage::DayProofAnnounce(msg) = &envelope.message {
        local.on_peer_announce(msg, &envelope, true)
    } else {
        unreachable!()
    };

    assert!(effects.iter().any(|e| matches!(
        e,
        DayEffect::Evidence(record)
            if matches!(record.detail, EvidenceDetail::SignatureInvalid { .. })
    )));
}

#[test]
fn divergent_share_triggers_evidence_and_retry() {
    let fixture = Fixture::new();
    let mut local = fixture.advancement(0, 1);
    local.on_local_proof(fixture.signed_proof(0, 1), Duration::from_secs(5));

    // Node 1 shares a signature over a divergent output digest.
    let divergent_output = [0xCD; 32];
    let digest = conductor_types::proof::canonical_day_digest(1, &divergent_output);
    let share = conductor_crypto::threshold::sign_share(&fixture.dealt.shares[1], &digest);
    let share_msg = conductor_consensus::messages::DayShare {
        day: 1,
        output: divergent_output,
        share_index: share.index,
        share: share.signature.to_bytes(),
    };

    let envelope = fixture.envelope(1, ConsensusMessage::DayShare(share_msg.clone()));
    let effects = local.on_peer_share(&share_msg, &envelope);

    assert!(effects.iter().any(|e| matches!(e, DayEffect::Evidence(_))));
    assert!(effects.iter().any(|e| matches!(e, DayEffect::Retry)));
    assert!(local.canonical().is_none());

    // The retry re-announces the same proof; difficulty is untouched.
    let reannounced = local.reannounce();
    assert!(reannounced.iter().any(|e| matches!(
        e,
        DayEffect::Broadcast(ConsensusMessage::DayProofAnnounce(a))
            if a.proof.difficulty == TEST_DIFFICULTY
    )));
}
