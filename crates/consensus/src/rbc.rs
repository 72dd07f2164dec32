//! Erasure-coded reliable broadcast.
//!
//! One instance exists per `(epoch, proposer)`. The proposer splits its
//! batch into `n` Reed-Solomon shards (`k = n - 2f` of which reconstruct
//! the payload), binds them to a Merkle root, and hands each validator
//! its shard. Validators echo their shards to everyone, commit with
//! Ready at `2f + 1` matching echoes, amplify Ready at `f + 1`, and
//! deliver once `2f + 1` Readys and `k` validated shards are in hand.
//!
//! The instance is a synchronous state machine: handlers consume a
//! message and return effects (sends, a delivery, evidence) for the
//! orchestrator to act on. Duplicates are idempotent; conflicting
//! messages from the same sender produce self-contained equivocation
//! evidence.

use crate::evidence::{EvidenceDetail, EvidenceRecord};
use crate::merkle::{verify_fragment, FragmentTree, MerkleProof};
use crate::messages::{
    ConsensusMessage, Fragment, FragmentRequest, FragmentResponse, PeerEnvelope, RbcEcho,
    RbcPropose, RbcReady,
};
use conductor_crypto::{blake3_hash, Hash};
use conductor_types::{Epoch, ValidatorId, ValidatorSet};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Errors raised by reliable broadcast.
#[derive(Debug, thiserror::Error)]
pub enum RbcError {
    /// The federation is too small to erasure-code.
    #[error("invalid broadcast parameters: n={n}, f={f}")]
    InvalidParameters {
        /// Validator count.
        n: usize,
        /// Fault budget.
        f: usize,
    },

    /// The erasure coder rejected the shard layout.
    #[error("erasure coding failed: {0}")]
    Coding(String),
}

/// Fault-tolerance parameters of one instance.
#[derive(Debug, Clone, Copy)]
pub struct RbcConfig {
    /// Validator count.
    pub n: usize,
    /// Maximum Byzantine validators.
    pub f: usize,
}

impl RbcConfig {
    /// Derive parameters from a validator set.
    pub fn for_set(set: &ValidatorSet) -> Self {
        Self {
            n: set.len(),
            f: set.max_faulty(),
        }
    }

    /// Reconstruction threshold `k = n - 2f`.
    pub fn k(&self) -> usize {
        self.n - 2 * self.f
    }

    /// Echo quorum `2f + 1`.
    pub fn echo_quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// Ready amplification threshold `f + 1`.
    pub fn ready_amplify(&self) -> usize {
        self.f + 1
    }

    /// Ready delivery quorum `2f + 1`.
    pub fn ready_quorum(&self) -> usize {
        2 * self.f + 1
    }

    fn check(&self) -> Result<(), RbcError> {
        if self.f == 0 || self.n < 3 * self.f + 1 {
            return Err(RbcError::InvalidParameters {
                n: self.n,
                f: self.f,
            });
        }
        Ok(())
    }
}

/// Erasure-code a payload into `n` equal-length fragments with a binding
/// Merkle tree.
pub fn encode_payload(
    payload: &[u8],
    config: &RbcConfig,
) -> Result<(Vec<Fragment>, FragmentTree), RbcError> {
    config.check()?;
    let k = config.k();

    let shard_len = payload.len().div_ceil(k).max(1);
    let mut shards = vec![vec![0u8; shard_len]; config.n];
    for (i, chunk) in payload.chunks(shard_len).enumerate() {
        shards[i][..chunk.len()].copy_from_slice(chunk);
    }

    let coder = ReedSolomon::new(k, config.n - k).map_err(|e| RbcError::Coding(e.to_string()))?;
    coder
        .encode(&mut shards)
        .map_err(|e| RbcError::Coding(e.to_string()))?;

    let tree = FragmentTree::from_fragments(&shards);
    let fragments = shards
        .into_iter()
        .enumerate()
        .map(|(index, data)| Fragment {
            index: index as u32,
            data,
        })
        .collect();

    Ok((fragments, tree))
}

/// What a handler wants done.
#[derive(Debug)]
pub enum RbcEffect {
    /// Broadcast a message to all validators.
    Broadcast(ConsensusMessage),
    /// The instance delivered; the payload hashes to `batch_digest`.
    Deliver {
        /// Reconstructed batch payload.
        payload: Vec<u8>,
        /// Its digest.
        batch_digest: Hash,
    },
    /// Byzantine behavior observed.
    Evidence(EvidenceRecord),
    /// Shards still missing after the Ready quorum formed; ask peers.
    RequestFragments(Vec<FragmentRequest>),
}

/// Message phase, for equivocation slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Phase {
    Propose,
    Echo,
    Ready,
}

/// Per-digest echo bookkeeping. Echoes are counted per `(digest, root)`
/// pair so a proposer cannot mix fragment sets under one digest.
#[derive(Debug, Default)]
struct EchoState {
    payload_len: u32,
    senders: HashSet<u32>,
    /// Validated shard data by shard index.
    fragments: BTreeMap<u32, Vec<u8>>,
}

/// One reliable-broadcast instance.
#[derive(Debug)]
pub struct RbcInstance {
    epoch: Epoch,
    proposer_index: u32,
    reporter: ValidatorId,
    config: RbcConfig,

    /// First envelope seen per (phase, sender), with its digest, for
    /// equivocation detection.
    first_seen: HashMap<(Phase, u32), (Hash, Vec<u8>)>,

    /// Echo state per (batch_digest, merkle_root).
    echoes: HashMap<(Hash, Hash), EchoState>,

    /// Ready senders per batch digest.
    readys: HashMap<Hash, HashSet<u32>>,

    /// The accepted propose, if any: (digest, root, payload_len).
    accepted: Option<(Hash, Hash, u32)>,
    /// Our own fragment from the accepted propose, for echo and repair.
    own_fragment: Option<(Fragment, MerkleProof)>,

    echo_sent: bool,
    ready_sent: bool,
    delivered: bool,
    repair_requested: bool,
}

impl RbcInstance {
    /// Create an instance for `(epoch, proposer_index)`.
    pub fn new(
        epoch: Epoch,
        proposer_index: u32,
        reporter: ValidatorId,
        config: RbcConfig,
    ) -> Result<Self, RbcError> {
        config.check()?;
        Ok(Self {
            epoch,
            proposer_index,
            reporter,
            config,
            first_seen: HashMap::new(),
            echoes: HashMap::new(),
            readys: HashMap::new(),
            accepted: None,
            own_fragment: None,
            echo_sent: false,
            ready_sent: false,
            delivered: false,
            repair_requested: false,
        })
    }

    /// Whether this instance has delivered.
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    /// Build the per-validator Propose messages for a payload (proposer
    /// side). Message `i` goes to the validator at active-set index `i`.
    pub fn propose(
        epoch: Epoch,
        proposer_index: u32,
        payload: &[u8],
        config: &RbcConfig,
    ) -> Result<Vec<RbcPropose>, RbcError> {
        let (fragments, tree) = encode_payload(payload, config)?;
        let batch_digest = blake3_hash(payload);
        let merkle_root = tree.root();

        let proposes = fragments
            .into_iter()
            .map(|fragment| {
                let proof = tree
                    .prove(fragment.index)
                    .expect("fragment index within tree");
                RbcPropose {
                    epoch,
                    proposer_index,
                    batch_digest,
                    merkle_root,
                    payload_len: payload.len() as u32,
                    fragment,
                    proof,
                }
            })
            .collect();

        Ok(proposes)
    }

    /// Handle a Propose from the proposer.
    pub fn on_propose(
        &mut self,
        sender_index: u32,
        msg: &RbcPropose,
        envelope: &PeerEnvelope,
        set: &ValidatorSet,
    ) -> Vec<RbcEffect> {
        let mut effects = Vec::new();

        if sender_index != self.proposer_index {
            trace!(epoch = self.epoch, sender_index, "propose from non-proposer dropped");
            return effects;
        }

        if let Some(evidence) =
            self.note_phase_message(Phase::Propose, sender_index, msg.batch_digest, envelope, set)
        {
            effects.push(RbcEffect::Evidence(evidence));
            return effects;
        }

        if self.accepted.is_some() {
            return effects; // duplicate propose, idempotent
        }

        if !verify_fragment(&msg.merkle_root, &msg.fragment.data, &msg.proof) {
            warn!(
                epoch = self.epoch,
                proposer = self.proposer_index,
                "propose fragment fails merkle proof"
            );
            effects.push(RbcEffect::Evidence(self.binding_evidence(envelope)));
            return effects;
        }

        self.accepted = Some((msg.batch_digest, msg.merkle_root, msg.payload_len));
        self.own_fragment = Some((msg.fragment.clone(), msg.proof.clone()));

        if !self.echo_sent {
            self.echo_sent = true;
            effects.push(RbcEffect::Broadcast(ConsensusMessage::RbcEcho(RbcEcho {
                epoch: self.epoch,
                proposer_index: self.proposer_index,
                batch_digest: msg.batch_digest,
                merkle_root: msg.merkle_root,
                payload_len: msg.payload_len,
                fragment: msg.fragment.clone(),
                proof: msg.proof.clone(),
            })));
        }

        effects
    }

    /// Handle an Echo.
    pub fn on_echo(
        &mut self,
        sender_index: u32,
        msg: &RbcEcho,
        envelope: &PeerEnvelope,
        set: &ValidatorSet,
    ) -> Vec<RbcEffect> {
        let mut effects = Vec::new();

        if let Some(evidence) =
            self.note_phase_message(Phase::Echo, sender_index, msg.batch_digest, envelope, set)
        {
            effects.push(RbcEffect::Evidence(evidence));
            return effects;
        }

        if !verify_fragment(&msg.merkle_root, &msg.fragment.data, &msg.proof)
            || msg.fragment.index != sender_index
        {
            warn!(
                epoch = self.epoch,
                proposer = self.proposer_index,
                sender_index,
                "echo fragment fails merkle binding"
            );
            effects.push(RbcEffect::Evidence(self.binding_evidence(envelope)));
            return effects;
        }

        let state = self
            .echoes
            .entry((msg.batch_digest, msg.merkle_root))
            .or_default();
        state.payload_len = msg.payload_len;
        if !state.senders.insert(sender_index) {
            return effects; // duplicate echo from same sender, counted once
        }
        state
            .fragments
            .entry(msg.fragment.index)
            .or_insert_with(|| msg.fragment.data.clone());

        trace!(
            epoch = self.epoch,
            proposer = self.proposer_index,
            digest = hex::encode(&msg.batch_digest[..8]),
            echoes = state.senders.len(),
            "echo recorded"
        );

        if state.senders.len() >= self.config.echo_quorum() && !self.ready_sent {
            self.ready_sent = true;
            effects.push(RbcEffect::Broadcast(ConsensusMessage::RbcReady(RbcReady {
                epoch: self.epoch,
                proposer_index: self.proposer_index,
                batch_digest: msg.batch_digest,
            })));
        }

        self.try_deliver(&mut effects);
        effects
    }

    /// Handle a Ready.
    pub fn on_ready(
        &mut self,
        sender_index: u32,
        msg: &RbcReady,
        envelope: &PeerEnvelope,
        set: &ValidatorSet,
    ) -> Vec<RbcEffect> {
        let mut effects = Vec::new();

        if let Some(evidence) =
            self.note_phase_message(Phase::Ready, sender_index, msg.batch_digest, envelope, set)
        {
            effects.push(RbcEffect::Evidence(evidence));
            return effects;
        }

        let senders = self.readys.entry(msg.batch_digest).or_default();
        if !senders.insert(sender_index) {
            return effects;
        }
        let count = senders.len();

        trace!(
            epoch = self.epoch,
            proposer = self.proposer_index,
            digest = hex::encode(&msg.batch_digest[..8]),
            readys = count,
            "ready recorded"
        );

        if count >= self.config.ready_amplify() && !self.ready_sent {
            self.ready_sent = true;
            effects.push(RbcEffect::Broadcast(ConsensusMessage::RbcReady(RbcReady {
                epoch: self.epoch,
                proposer_index: self.proposer_index,
                batch_digest: msg.batch_digest,
            })));
        }

        self.try_deliver(&mut effects);
        effects
    }

    /// Handle a repair response: a validated fragment counts toward
    /// reconstruction but not toward any sender quorum.
    pub fn on_fragment_response(&mut self, msg: &FragmentResponse) -> Vec<RbcEffect> {
        let mut effects = Vec::new();

        if !verify_fragment(&msg.merkle_root, &msg.fragment.data, &msg.proof) {
            return effects;
        }

        let state = self
            .echoes
            .entry((msg.batch_digest, msg.merkle_root))
            .or_default();
        state.payload_len = msg.payload_len;
        state
            .fragments
            .entry(msg.fragment.index)
            .or_insert_with(|| msg.fragment.data.clone());

        self.try_deliver(&mut effects);
        effects
    }

    /// Answer a repair request if we hold the accepted propose.
    pub fn on_fragment_request(&self, msg: &FragmentRequest) -> Option<FragmentResponse> {
        let (digest, root, payload_len) = self.accepted?;
        let (fragment, proof) = self.own_fragment.as_ref()?;
        if fragment.index != msg.fragment_index {
            return None;
        }
        Some(FragmentResponse {
            epoch: self.epoch,
            proposer_index: self.proposer_index,
            batch_digest: digest,
            merkle_root: root,
            payload_len,
            fragment: fragment.clone(),
            proof: proof.clone(),
        })
    }

    /// Attempt delivery: `2f + 1` Readys for a digest and `k` validated
    /// fragments under that digest.
    fn try_deliver(&mut self, effects: &mut Vec<RbcEffect>) {
        if self.delivered {
            return;
        }

        let quorum_digest = self
            .readys
            .iter()
            .find(|(_, senders)| senders.len() >= self.config.ready_quorum())
            .map(|(digest, _)| *digest);
        let Some(digest) = quorum_digest else {
            return;
        };

        let candidate = self
            .echoes
            .iter()
            .find(|((d, _), state)| *d == digest && state.fragments.len() >= self.config.k());

        let Some(((_, _root), state)) = candidate else {
            // Quorum committed but shards are short: ask for repair once.
            if !self.repair_requested {
                self.repair_requested = true;
                let held: HashSet<u32> = self
                    .echoes
                    .iter()
                    .filter(|((d, _), _)| *d == digest)
                    .flat_map(|(_, s)| s.fragments.keys().copied())
                    .collect();
                let missing: Vec<FragmentRequest> = (0..self.config.n as u32)
                    .filter(|i| !held.contains(i))
                    .map(|fragment_index| FragmentRequest {
                        epoch: self.epoch,
                        proposer_index: self.proposer_index,
                        fragment_index,
                    })
                    .collect();
                if !missing.is_empty() {
                    effects.push(RbcEffect::RequestFragments(missing));
                }
            }
            return;
        };

        match self.reconstruct(state) {
            Ok(payload) if blake3_hash(&payload) == digest => {
                self.delivered = true;
                debug!(
                    epoch = self.epoch,
                    proposer = self.proposer_index,
                    digest = hex::encode(&digest[..8]),
                    bytes = payload.len(),
                    "reliable broadcast delivered"
                );
                effects.push(RbcEffect::Deliver {
                    payload,
                    batch_digest: digest,
                });
            }
            Ok(_) => {
                warn!(
                    epoch = self.epoch,
                    proposer = self.proposer_index,
                    "reconstructed payload does not match digest"
                );
            }
            Err(e) => {
                warn!(
                    epoch = self.epoch,
                    proposer = self.proposer_index,
                    error = %e,
                    "reconstruction failed"
                );
            }
        }
    }

    fn reconstruct(&self, state: &EchoState) -> Result<Vec<u8>, RbcError> {
        let k = self.config.k();
        let coder =
            ReedSolomon::new(k, self.config.n - k).map_err(|e| RbcError::Coding(e.to_string()))?;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.config.n];
        for (&index, data) in &state.fragments {
            if (index as usize) < self.config.n {
                shards[index as usize] = Some(data.clone());
            }
        }

        coder
            .reconstruct(&mut shards)
            .map_err(|e| RbcError::Coding(e.to_string()))?;

        let mut payload = Vec::with_capacity(state.payload_len as usize);
        for shard in shards.into_iter().take(k) {
            payload.extend_from_slice(&shard.expect("reconstructed shard present"));
        }
        payload.truncate(state.payload_len as usize);
        Ok(payload)
    }

    /// Record the first message per (phase, sender); a second one with a
    /// different digest is equivocation.
    fn note_phase_message(
        &mut self,
        phase: Phase,
        sender_index: u32,
        digest: Hash,
        envelope: &PeerEnvelope,
        set: &ValidatorSet,
    ) -> Option<EvidenceRecord> {
        match self.first_seen.get(&(phase, sender_index)) {
            None => {
                self.first_seen
                    .insert((phase, sender_index), (digest, envelope.canonical_bytes()));
                None
            }
            Some((first_digest, first_bytes)) if *first_digest != digest => {
                let accused = set
                    .by_index(sender_index)
                    .map(|v| v.id)
                    .unwrap_or(envelope.sender);
                warn!(
                    epoch = self.epoch,
                    proposer = self.proposer_index,
                    sender = %accused,
                    ?phase,
                    "equivocation detected"
                );
                Some(EvidenceRecord::new(
                    accused,
                    self.reporter,
                    self.epoch,
                    EvidenceDetail::Equivocation {
                        first: first_bytes.clone(),
                        second: envelope.canonical_bytes(),
                    },
                ))
            }
            Some(_) => None,
        }
    }

    fn binding_evidence(&self, envelope: &PeerEnvelope) -> EvidenceRecord {
        EvidenceRecord::new(
            envelope.sender,
            self.reporter,
            self.epoch,
            EvidenceDetail::SignatureInvalid {
                envelope: envelope.canonical_bytes(),
            },
        )
    }

    /// The proposer index this instance decides for.
    pub fn proposer_index(&self) -> u32 {
        self.proposer_index
    }
}
