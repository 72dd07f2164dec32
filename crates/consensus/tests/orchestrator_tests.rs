//! End-to-end epoch scenarios over four orchestrators wired through an
//! in-memory network: the single-epoch happy path, a silent proposer,
//! and an equivocating proposer.

use conductor_consensus::evidence::{EvidenceDetail, EvidenceRecord};
use conductor_consensus::messages::{ConsensusMessage, PeerEnvelope};
use conductor_consensus::orchestrator::{EpochOrchestrator, KeyContext, Outbound};
use conductor_consensus::rbc::{RbcConfig, RbcInstance};
use conductor_consensus::ConsensusError;
use conductor_crypto::threshold::{DealtKeys, ThresholdDealer};
use conductor_crypto::BlsPrivateKey;
use conductor_storage::ConductorStore;
use conductor_types::{
    Block, EventBatch, EventFingerprint, Validator, ValidatorId, ValidatorSet,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

const N: usize = 4;

struct TestNode {
    id: ValidatorId,
    key: BlsPrivateKey,
    orchestrator: Arc<EpochOrchestrator>,
    outbound_rx: mpsc::Receiver<Outbound>,
    commit_rx: mpsc::Receiver<Block>,
    evidence_rx: mpsc::Receiver<EvidenceRecord>,
    _dir: TempDir,
}

struct Federation {
    set: Arc<ValidatorSet>,
    dealt: DealtKeys,
    nodes: Vec<TestNode>,
}

impl Federation {
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

        let dealt = ThresholdDealer::deal(N as u32, set.quorum_threshold()).unwrap();

        let nodes = keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| {
                let key = key.unwrap();
                let id = set.by_index(index as u32).unwrap().id;
                let dir = TempDir::new().unwrap();
                let store = ConductorStore::open(dir.path()).unwrap();

                let (outbound_tx, outbound_rx) = mpsc::channel(10_000);
                let (commit_tx, commit_rx) = mpsc::channel(64);
                let (evidence_tx, evidence_rx) = mpsc::channel(256);

                let orchestrator = Arc::new(
                    EpochOrchestrator::new(
                        id,
                        Arc::clone(&set),
                        KeyContext {
                            group_public: dealt.group_public.clone(),
                            share_publics: dealt.share_publics.clone(),
                            secret_share: dealt.shares[index].clone(),
                        },
                        store,
                        None,
                        outbound_tx,
                        commit_tx,
                        evidence_tx,
                    )
                    .unwrap(),
                );

                TestNode {
                    id,
                    key,
                    orchestrator,
                    outbound_rx,
                    commit_rx,
                    evidence_rx,
                    _dir: dir,
                }
            })
            .collect();

        Self { set, dealt, nodes }
    }

    fn batch(&self, index: usize, epoch: u64, fingerprints: &[[u8; 32]]) -> EventBatch {
        EventBatch::new(
            self.nodes[index].id,
            epoch,
            fingerprints.iter().map(|f| EventFingerprint(*f)).collect(),
            index as u128,
        )
        .unwrap()
    }

    /// Deliver queued traffic until the network quiesces. `active` lists
    /// the honest nodes that process messages.
    async fn pump(&mut self, active: &[usize]) {
        loop {
            let mut moved = false;
            for index in 0..self.nodes.len() {
                while let Ok(outbound) = self.nodes[index].outbound_rx.try_recv() {
                    moved = true;
                    let sender = self.nodes[index].id;
                    let (targets, message): (Vec<usize>, ConsensusMessage) = match outbound {
                        Outbound::Broadcast(message) => (active.to_vec(), message),
                        Outbound::Unicast { target, message } => {
                            let position = active
                                .iter()
                                .copied()
                                .find(|&i| self.nodes[i].id == target);
                            (position.into_iter().collect(), message)
                        }
                    };

                    let envelope =
                        PeerEnvelope::sign(sender, message, &self.nodes[index].key);
                    for target in targets {
                        self.nodes[target]
                            .orchestrator
                            .handle_envelope(&envelope)
                            .await
                            .unwrap();
                    }
                }
            }
            if !moved {
                break;
            }
        }
    }

    async fn inject(&mut self, from: usize, to: usize, message: ConsensusMessage) {
        let envelope = PeerEnvelope::sign(self.nodes[from].id, message, &self.nodes[from].key);
        self.nodes[to]
            .orchestrator
            .handle_envelope(&envelope)
            .await
            .unwrap();
    }
}

/// S1: four proposers, four batches, one block.
#[tokio::test]
async fn single_epoch_happy_path_commits_identically() {
    let mut federation = Federation::new();
    let fingerprints = [[0xAAu8; 32], [0xBBu8; 32], [0xCCu8; 32], [0xDDu8; 32]];

    for index in 0..N {
        let batch = federation.batch(index, 1, &[fingerprints[index]]);
        federation.nodes[index]
            .orchestrator
            .start_epoch(&batch)
            .await
            .unwrap();
    }

    federation.pump(&[0, 1, 2, 3]).await;

    let mut digests = Vec::new();
    for node in federation.nodes.iter_mut() {
        let block = node.commit_rx.try_recv().expect("every node commits");
        assert_eq!(block.epoch, 1);

        // The committed set is the lexicographically ordered union.
        let expected: Vec<EventFingerprint> =
            fingerprints.iter().map(|f| EventFingerprint(*f)).collect();
        assert_eq!(block.events, expected);
        assert!(block.quorum_certificate.signer_count() >= 3);
        assert!(block
            .quorum_certificate
            .verify(&federation.dealt.group_public, 3));
        digests.push(block.digest());
    }
    assert!(digests.windows(2).all(|w| w[0] == w[1]));
}

/// S2: proposer at index 2 sends nothing; the subset excludes it.
#[tokio::test]
async fn silent_proposer_is_excluded_from_the_subset() {
    let mut federation = Federation::new();
    let fingerprints = [[0x11u8; 32], [0x22u8; 32], [0x33u8; 32], [0x44u8; 32]];

    let silent = 2usize;
    let active: Vec<usize> = (0..N).filter(|&i| i != silent).collect();

    for &index in &active {
        let batch = federation.batch(index, 1, &[fingerprints[index]]);
        federation.nodes[index]
            .orchestrator
            .start_epoch(&batch)
            .await
            .unwrap();
    }

    federation.pump(&active).await;

    for &index in &active {
        let block = federation.nodes[index]
            .commit_rx
            .try_recv()
            .expect("active nodes commit");

        // The silent proposer's fingerprint never entered consensus.
        assert!(!block.events.contains(&EventFingerprint(fingerprints[silent])));
        assert_eq!(block.events.len(), active.len());
        assert!(!block
            .proposer_set
            .contains(&federation.nodes[silent].id));
        assert_eq!(block.proposer_set.len(), 3);
    }
}

/// S3: proposer at index 0 equivocates; its broadcast never delivers,
/// its agreement decides 0, and the double propose becomes evidence.
#[tokio::test]
async fn equivocating_proposer_is_rejected_with_evidence() {
    let mut federation = Federation::new();
    let fingerprints = [[0x11u8; 32], [0x22u8; 32], [0x33u8; 32], [0x44u8; 32]];

    let byzantine = 0usize;
    let honest: Vec<usize> = (1..N).collect();

    // The Byzantine proposer crafts two versions of its batch and splits
    // the federation, also leaking the second propose to node 1.
    let config = RbcConfig::for_set(&federation.set);
    let batch_a = federation.batch(byzantine, 1, &[fingerprints[0]]);
    let batch_b = federation.batch(byzantine, 1, &[[0xEEu8; 32]]);
    let proposes_a =
        RbcInstance::propose(1, byzantine as u32, &batch_a.canonical_bytes(), &config).unwrap();
    let proposes_b =
        RbcInstance::propose(1, byzantine as u32, &batch_b.canonical_bytes(), &config).unwrap();

    for &index in &honest {
        let batch = federation.batch(index, 1, &[fingerprints[index]]);
        federation.nodes[index]
            .orchestrator
            .start_epoch(&batch)
            .await
            .unwrap();
    }

    federation
        .inject(byzantine, 1, ConsensusMessage::RbcPropose(proposes_a[1].clone()))
        .await;
    federation
        .inject(byzantine, 2, ConsensusMessage::RbcPropose(proposes_a[2].clone()))
        .await;
    federation
        .inject(byzantine, 3, ConsensusMessage::RbcPropose(proposes_b[3].clone()))
        .await;
    federation
        .inject(byzantine, 1, ConsensusMessage::RbcPropose(proposes_b[1].clone()))
        .await;

    federation.pump(&honest).await;

    let byzantine_id = federation.nodes[byzantine].id;
    for &index in &honest {
        let block = federation.nodes[index]
            .commit_rx
            .try_recv()
            .expect("honest nodes commit");

        // Neither version of the equivocator's batch committed.
        assert!(!block.events.contains(&EventFingerprint(fingerprints[0])));
        assert!(!block.events.contains(&EventFingerprint([0xEEu8; 32])));
        assert!(!block.proposer_set.contains(&byzantine_id));
    }

    // Node 1 holds both signed proposes: self-contained evidence.
    let record = federation.nodes[1]
        .evidence_rx
        .try_recv()
        .expect("equivocation evidence emitted");
    assert_eq!(record.accused, byzantine_id);
    assert!(matches!(record.detail, EvidenceDetail::Equivocation { .. }));
}

/// The pipeline bound: a third concurrent epoch is refused.
#[tokio::test]
async fn at_most_two_epochs_in_flight() {
    let federation = Federation::new();
    let node = &federation.nodes[0];

    let batch_1 = federation.batch(0, 1, &[[1u8; 32]]);
    let batch_2 = federation.batch(0, 2, &[[2u8; 32]]);
    let batch_3 = federation.batch(0, 3, &[[3u8; 32]]);

    node.orchestrator.start_epoch(&batch_1).await.unwrap();
    node.orchestrator.start_epoch(&batch_2).await.unwrap();
    let err = node.orchestrator.start_epoch(&batch_3).await.unwrap_err();
    assert!(matches!(err, ConsensusError::TooManyInFlight { epoch: 3 }));
}

/// A timeout on an undecided epoch retries; on a committed epoch it is a
/// no-op.
#[tokio::test]
async fn timeout_retries_then_becomes_noop_after_commit() {
    let mut federation = Federation::new();

    for index in 0..N {
        let batch = federation.batch(index, 1, &[[index as u8 + 1; 32]]);
        federation.nodes[index]
            .orchestrator
            .start_epoch(&batch)
            .await
            .unwrap();
    }

    // Before any traffic flows, the epoch is retriable.
    assert!(federation.nodes[0].orchestrator.on_timeout(1).await.unwrap());

    federation.pump(&[0, 1, 2, 3]).await;

    for node in federation.nodes.iter_mut() {
        node.commit_rx.try_recv().expect("commit after retry");
    }

    // Once committed, the timeout is stale.
    assert!(!federation.nodes[0].orchestrator.on_timeout(1).await.unwrap());
}
