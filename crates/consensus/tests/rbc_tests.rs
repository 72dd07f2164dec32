//! Reliable-broadcast scenarios over a simulated four-validator network.
//!
//! Covers the happy path, the reconstruction boundary (`k` fragments
//! deliver, `k - 1` must not), duplicate idempotence, and an
//! equivocating proposer handing different Merkle roots to different
//! validators.

use conductor_consensus::evidence::EvidenceDetail;
use conductor_consensus::messages::{ConsensusMessage, PeerEnvelope};
use conductor_consensus::rbc::{RbcConfig, RbcEffect, RbcInstance};
use conductor_crypto::{blake3_hash, BlsPrivateKey};
use conductor_types::{Validator, ValidatorId, ValidatorSet};
use std::sync::Arc;

/// n = 4, f = 1, k = 2.
const N: usize = 4;

struct Net {
    set: Arc<ValidatorSet>,
    /// Signing keys aligned with active-set order.
    keys: Vec<BlsPrivateKey>,
    instances: Vec<RbcInstance>,
    delivered: Vec<Option<Vec<u8>>>,
    evidence: Vec<conductor_consensus::EvidenceRecord>,
}

impl Net {
    fn new(proposer_index: u32) -> Self {
        let raw_keys: Vec<BlsPrivateKey> = (0..N).map(|_| BlsPrivateKey::random()).collect();
        let validators: Vec<Validator> = raw_keys
            .iter()
            .map(|k| Validator::from_public_key(&k.public_key()))
            .collect();
        let set = Arc::new(ValidatorSet::new(validators).unwrap());

        // Re-align keys with the set's canonical ordering.
        let mut keys: Vec<Option<BlsPrivateKey>> = vec![None; N];
        for key in raw_keys {
            let id = ValidatorId::from_public_key(&key.public_key());
            let index = set.index_of(&id).unwrap() as usize;
            keys[index] = Some(key);
        }
        let keys: Vec<BlsPrivateKey> = keys.into_iter().map(|k| k.unwrap()).collect();

        let config = RbcConfig::for_set(&set);
        let instances = (0..N as u32)
            .map(|i| {
                RbcInstance::new(7, proposer_index, set.by_index(i).unwrap().id, config).unwrap()
            })
            .collect();

        Self {
            set,
            keys,
            instances,
            delivered: vec![None; N],
            evidence: Vec::new(),
        }
    }

    fn envelope(&self, sender_index: usize, message: ConsensusMessage) -> PeerEnvelope {
        let sender = self.set.by_index(sender_index as u32).unwrap().id;
        PeerEnvelope::sign(sender, message, &self.keys[sender_index])
    }

    /// Deliver one message to one node, collecting follow-up broadcasts.
    fn deliver(
        &mut self,
        to: usize,
        sender_index: usize,
        message: &ConsensusMessage,
        queue: &mut Vec<(usize, ConsensusMessage)>,
    ) {
        let envelope = self.envelope(sender_index, message.clone());
        let set = Arc::clone(&self.set);
        let effects = match message {
            ConsensusMessage::RbcPropose(m) => {
                self.instances[to].on_propose(sender_index as u32, m, &envelope, &set)
            }
            ConsensusMessage::RbcEcho(m) => {
                self.instances[to].on_echo(sender_index as u32, m, &envelope, &set)
            }
            ConsensusMessage::RbcReady(m) => {
                self.instances[to].on_ready(sender_index as u32, m, &envelope, &set)
            }
            _ => Vec::new(),
        };

        for effect in effects {
            match effect {
                RbcEffect::Broadcast(msg) => queue.push((to, msg)),
                RbcEffect::Deliver { payload, .. } => self.delivered[to] = Some(payload),
                RbcEffect::Evidence(record) => self.evidence.push(record),
                RbcEffect::RequestFragments(_) => {}
            }
        }
    }

    /// Pump broadcasts to every node until quiescent.
    fn pump(&mut self, mut queue: Vec<(usize, ConsensusMessage)>) {
        let mut steps = 0;
        while let Some((sender, message)) = queue.pop() {
            steps += 1;
            assert!(steps < 10_000, "network did not quiesce");
            for to in 0..N {
                self.deliver(to, sender, &message, &mut queue);
            }
        }
    }
}

#[test]
fn all_honest_validators_deliver_the_same_payload() {
    let mut net = Net::new(0);
    let payload = b"epoch seven batch payload".to_vec();
    let config = RbcConfig::for_set(&net.set);

    let proposes = RbcInstance::propose(7, 0, &payload, &config).unwrap();
    let mut queue = Vec::new();
    for (i, propose) in proposes.into_iter().enumerate() {
        net.deliver(i, 0, &ConsensusMessage::RbcPropose(propose), &mut queue);
    }
    net.pump(queue);

    for delivered in &net.delivered {
        assert_eq!(delivered.as_deref(), Some(payload.as_slice()));
    }
    assert!(net.evidence.is_empty());
}

#[test]
fn delivery_boundary_needs_k_fragments() {
    // Node 3 hears all the Readys but only k-1 = 1 echo: no delivery.
    // One more validated fragment tips it over.
    let mut net = Net::new(0);
    let payload = b"boundary".to_vec();
    let config = RbcConfig::for_set(&net.set);
    let proposes = RbcInstance::propose(7, 0, &payload, &config).unwrap();

    // Node 3 gets only node 1's echo, but a full set of Readys.
    let digest = blake3_hash(&payload);
    let echo_from_1 = ConsensusMessage::RbcEcho(conductor_consensus::messages::RbcEcho {
        epoch: 7,
        proposer_index: 0,
        batch_digest: digest,
        merkle_root: proposes[1].merkle_root,
        payload_len: proposes[1].payload_len,
        fragment: proposes[1].fragment.clone(),
        proof: proposes[1].proof.clone(),
    });
    let mut scratch = Vec::new();
    net.deliver(3, 1, &echo_from_1, &mut scratch);
    for ready_sender in 0..3 {
        let ready = ConsensusMessage::RbcReady(conductor_consensus::messages::RbcReady {
            epoch: 7,
            proposer_index: 0,
            batch_digest: digest,
        });
        net.deliver(3, ready_sender, &ready, &mut scratch);
    }
    assert!(net.delivered[3].is_none(), "k-1 fragments must not deliver");

    // The second validated fragment (k = 2) completes reconstruction.
    let echo_from_2 = ConsensusMessage::RbcEcho(conductor_consensus::messages::RbcEcho {
        epoch: 7,
        proposer_index: 0,
        batch_digest: digest,
        merkle_root: proposes[2].merkle_root,
        payload_len: proposes[2].payload_len,
        fragment: proposes[2].fragment.clone(),
        proof: proposes[2].proof.clone(),
    });
    net.deliver(3, 2, &echo_from_2, &mut scratch);
    assert_eq!(net.delivered[3].as_deref(), Some(payload.as_slice()));
}

#[test]
fn duplicate_echoes_counted_once() {
    let mut net = Net::new(0);
    let payload = b"duplicates".to_vec();
    let config = RbcConfig::for_set(&net.set);
    let proposes = RbcInstance::propose(7, 0, &payload, &config).unwrap();

    let echo = ConsensusMessage::RbcEcho(conductor_consensus::messages::RbcEcho {
        epoch: 7,
        proposer_index: 0,
        batch_digest: blake3_hash(&payload),
        merkle_root: proposes[1].merkle_root,
        payload_len: proposes[1].payload_len,
        fragment: proposes[1].fragment.clone(),
        proof: proposes[1].proof.clone(),
    });

    // The same echo three times is one echo; no Ready forms from it.
    let mut scratch = Vec::new();
    for _ in 0..3 {
        net.deliver(0, 1, &echo, &mut scratch);
    }
    assert!(scratch
        .iter()
        .all(|(_, m)| !matches!(m, ConsensusMessage::RbcReady(_))));
}

#[test]
fn equivocating_proposer_yields_no_delivery_and_evidence() {
    // Proposer 0 hands roots R1 to nodes 1, 2 and R2 to node 3, then
    // slips node 1 the R2 propose as well; node 1 now holds proof of the
    // equivocation.
    let mut net = Net::new(0);
    let config = RbcConfig::for_set(&net.set);

    let payload_a = b"first version".to_vec();
    let payload_b = b"second version".to_vec();
    let proposes_a = RbcInstance::propose(7, 0, &payload_a, &config).unwrap();
    let proposes_b = RbcInstance::propose(7, 0, &payload_b, &config).unwrap();
    assert_ne!(proposes_a[0].merkle_root, proposes_b[0].merkle_root);

    let mut queue = Vec::new();
    net.deliver(1, 0, &ConsensusMessage::RbcPropose(proposes_a[1].clone()), &mut queue);
    net.deliver(2, 0, &ConsensusMessage::RbcPropose(proposes_a[2].clone()), &mut queue);
    net.deliver(3, 0, &ConsensusMessage::RbcPropose(proposes_b[3].clone()), &mut queue);
    net.deliver(1, 0, &ConsensusMessage::RbcPropose(proposes_b[1].clone()), &mut queue);
    net.pump(queue);

    // No honest node delivers: at most two echoes exist per digest,
    // below the 2f+1 = 3 echo quorum.
    assert!(net.delivered.iter().all(|d| d.is_none()));

    // The double-propose surfaced as self-contained equivocation
    // evidence against the proposer.
    let proposer_id = net.set.by_index(0).unwrap().id;
    assert!(net.evidence.iter().any(|record| {
        record.accused == proposer_id
            && matches!(record.detail, EvidenceDetail::Equivocation { .. })
    }));
}

#[test]
fn tampered_fragment_is_dropped_with_evidence() {
    let mut net = Net::new(0);
    let payload = b"tamper target".to_vec();
    let config = RbcConfig::for_set(&net.set);
    let proposes = RbcInstance::propose(7, 0, &payload, &config).unwrap();

    let mut tampered = proposes[1].clone();
    tampered.fragment.data[0] ^= 0xFF;

    let mut scratch = Vec::new();
    net.deliver(1, 0, &ConsensusMessage::RbcPropose(tampered), &mut scratch);

    assert!(scratch.is_empty(), "no echo for an unprovable fragment");
    assert!(net
        .evidence
        .iter()
        .any(|r| matches!(r.detail, EvidenceDetail::SignatureInvalid { .. })));
}
