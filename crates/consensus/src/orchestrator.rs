//! The epoch orchestrator.
//!
//! Drives one epoch from batch collection to a committed block:
//!
//! ```text
//! AwaitBatches -> RbcRunning -> BbaRunning -> Committing -> Done
//! ```
//!
//! All `n` reliable broadcasts and binary agreements run concurrently;
//! the common-subset rule feeds agreement inputs; once the subset is
//! decided the orchestrator derives the canonical event ordering
//! (lexicographic, deduplicated), collects threshold shares over the
//! block digest, and persists the block write-once and in epoch order.
//! At most two epochs are in flight; epoch `e + 1` never persists before
//! epoch `e`.
//!
//! The orchestrator emits [`Outbound`] messages; the node layer signs
//! them into envelopes and must also loop our own broadcasts back into
//! [`EpochOrchestrator::handle_envelope`].

use crate::acs::{AcsEffect, AcsState};
use crate::bba::{BbaEffect, BbaInstance};
use crate::coin::CommonCoin;
use crate::evidence::EvidenceRecord;
use crate::messages::{sort_unique, BlockShare, ConsensusMessage, PeerEnvelope};
use crate::rbc::{RbcConfig, RbcEffect, RbcInstance};
use crate::share_set::{ShareSet, ShareSetError};
use crate::ConsensusError;
use conductor_crypto::threshold::{sign_share, SecretShare};
use conductor_crypto::{BlsPublicKey, Hash};
use conductor_storage::{ConductorStore, StorageError};
use conductor_types::{
    merkle_root_of_events, Block, Epoch, EventBatch, EventFingerprint, QuorumCertificate,
    ValidatorId, ValidatorSet,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Maximum epochs in flight at once.
pub const MAX_INFLIGHT_EPOCHS: usize = 2;

/// Threshold key material for an epoch, captured at epoch start.
#[derive(Debug, Clone)]
pub struct KeyContext {
    /// The group public key certificates verify against.
    pub group_public: BlsPublicKey,
    /// Share verification keys in active-set order.
    pub share_publics: Vec<BlsPublicKey>,
    /// This validator's secret share.
    pub secret_share: SecretShare,
}

/// A message leaving this node.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Gossip to every validator (including ourselves, via loopback).
    Broadcast(ConsensusMessage),
    /// Direct delivery to one validator.
    Unicast {
        /// The recipient.
        target: ValidatorId,
        /// The payload.
        message: ConsensusMessage,
    },
}

/// Where an epoch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the local batch.
    AwaitBatches,
    /// Broadcasts in progress.
    RbcRunning,
    /// Subset agreement in progress.
    BbaRunning,
    /// Collecting block-digest shares.
    Committing,
    /// Block persisted.
    Done,
}

/// Per-epoch working state.
struct EpochState {
    epoch: Epoch,
    phase: Phase,
    rbc: HashMap<u32, RbcInstance>,
    bba: HashMap<u32, BbaInstance>,
    acs: AcsState,
    /// Delivered payloads by proposer index; preserved across retries.
    delivered: HashMap<u32, Vec<u8>>,
    /// The decided subset, once complete.
    accepted: Option<Vec<u32>>,
    /// Our derived block digest and its share collection.
    block_digest: Option<Hash>,
    block_shares: Option<ShareSet>,
    block_events: Option<Vec<EventFingerprint>>,
    /// Shares that arrived before our own subset completed.
    early_block_shares: Vec<BlockShare>,
    /// Decided block waiting for in-order persistence.
    decided_block: Option<Block>,
}

struct OrchestratorState {
    epochs: BTreeMap<Epoch, EpochState>,
    last_committed: Option<Epoch>,
}

/// Drives epochs to commit.
pub struct EpochOrchestrator {
    me: ValidatorId,
    my_index: u32,
    set: Arc<ValidatorSet>,
    keys: KeyContext,
    coin: Mutex<CommonCoin>,
    store: ConductorStore,
    outbound_tx: mpsc::Sender<Outbound>,
    commit_tx: mpsc::Sender<Block>,
    evidence_tx: mpsc::Sender<EvidenceRecord>,
    state: Mutex<OrchestratorState>,
}

impl EpochOrchestrator {
    /// Create an orchestrator over the epoch's validator-set snapshot.
    ///
    /// `last_committed` is recovered from storage at startup so restarts
    /// resume in order.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        me: ValidatorId,
        set: Arc<ValidatorSet>,
        keys: KeyContext,
        store: ConductorStore,
        last_committed: Option<Epoch>,
        outbound_tx: mpsc::Sender<Outbound>,
        commit_tx: mpsc::Sender<Block>,
        evidence_tx: mpsc::Sender<EvidenceRecord>,
    ) -> Result<Self, ConsensusError> {
        let my_index = set
            .index_of(&me)
            .ok_or(ConsensusError::UnknownSender(me))?;
        let coin = CommonCoin::new(
            set.quorum_threshold(),
            keys.secret_share.clone(),
            keys.share_publics.clone(),
        );
        Ok(Self {
            me,
            my_index,
            set,
            keys,
            coin: Mutex::new(coin),
            store,
            outbound_tx,
            commit_tx,
            evidence_tx,
            state: Mutex::new(OrchestratorState {
                epochs: BTreeMap::new(),
                last_committed,
            }),
        })
    }

    /// Our position in the active set.
    pub fn my_index(&self) -> u32 {
        self.my_index
    }

    /// The phase of an epoch, if in flight.
    pub fn phase(&self, epoch: Epoch) -> Option<Phase> {
        self.state.lock().epochs.get(&epoch).map(|e| e.phase)
    }

    /// Start an epoch with our batch.
    ///
    /// Creates all `n` broadcast and agreement instances and disperses
    /// our batch's fragments. At most [`MAX_INFLIGHT_EPOCHS`] epochs may
    /// be active; commit order is enforced independently.
    pub async fn start_epoch(&self, batch: &EventBatch) -> Result<(), ConsensusError> {
        let epoch = batch.epoch;
        let payload = batch.canonical_bytes();
        let config = RbcConfig::for_set(&self.set);

        let mut outbound = Vec::new();
        {
            let mut state = self.state.lock();

            let inflight = state
                .epochs
                .values()
                .filter(|e| e.phase != Phase::Done)
                .count();
            if inflight >= MAX_INFLIGHT_EPOCHS {
                return Err(ConsensusError::TooManyInFlight { epoch });
            }
            if state.epochs.contains_key(&epoch) {
                return Ok(());
            }

            info!(epoch, events = batch.events.len(), "starting epoch");

            let n = self.set.len();
            let mut rbc = HashMap::with_capacity(n);
            let mut bba = HashMap::with_capacity(n);
            for index in 0..n as u32 {
                rbc.insert(
                    index,
                    RbcInstance::new(epoch, index, self.me, config)?,
                );
                bba.insert(index, BbaInstance::new(epoch, index, n, self.set.max_faulty()));
            }

            state.epochs.insert(
                epoch,
                EpochState {
                    epoch,
                    phase: Phase::RbcRunning,
                    rbc,
                    bba,
                    acs: AcsState::new(n, self.set.max_faulty()),
                    delivered: HashMap::new(),
                    accepted: None,
                    block_digest: None,
                    block_shares: None,
                    block_events: None,
                    early_block_shares: Vec::new(),
                    decided_block: None,
                },
            );

            // Disperse our proposal: fragment i goes to validator i.
            let proposes = RbcInstance::propose(epoch, self.my_index, &payload, &config)?;
            for propose in proposes {
                let target = self
                    .set
                    .by_index(propose.fragment.index)
                    .expect("fragment index within set")
                    .id;
                outbound.push(Outbound::Unicast {
                    target,
                    message: ConsensusMessage::RbcPropose(propose),
                });
            }
        }

        self.send_all(outbound).await
    }

    /// Handle a validated peer envelope (the node layer has already
    /// checked signature, sender, blacklist and the seen cache).
    pub async fn handle_envelope(&self, envelope: &PeerEnvelope) -> Result<(), ConsensusError> {
        let sender_index = self
            .set
            .index_of(&envelope.sender)
            .ok_or(ConsensusError::UnknownSender(envelope.sender))?;

        let mut outbound = Vec::new();
        let mut evidence = Vec::new();
        let mut committed = Vec::new();

        {
            let mut state = self.state.lock();
            match &envelope.message {
                ConsensusMessage::RbcPropose(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.rbc.get_mut(&msg.proposer_index) {
                            let effects =
                                instance.on_propose(sender_index, msg, envelope, &self.set);
                            self.apply_rbc_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                                &mut evidence,
                            );
                        }
                    }
                }
                ConsensusMessage::RbcEcho(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.rbc.get_mut(&msg.proposer_index) {
                            let effects = instance.on_echo(sender_index, msg, envelope, &self.set);
                            self.apply_rbc_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                                &mut evidence,
                            );
                        }
                    }
                }
                ConsensusMessage::RbcReady(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.rbc.get_mut(&msg.proposer_index) {
                            let effects = instance.on_ready(sender_index, msg, envelope, &self.set);
                            self.apply_rbc_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                                &mut evidence,
                            );
                        }
                    }
                }
                ConsensusMessage::FragmentResponse(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.rbc.get_mut(&msg.proposer_index) {
                            let effects = instance.on_fragment_response(msg);
                            self.apply_rbc_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                                &mut evidence,
                            );
                        }
                    }
                }
                ConsensusMessage::FragmentRequest(msg) => {
                    if let Some(epoch_state) = state.epochs.get(&msg.epoch) {
                        if let Some(instance) = epoch_state.rbc.get(&msg.proposer_index) {
                            if let Some(response) = instance.on_fragment_request(msg) {
                                outbound.push(Outbound::Unicast {
                                    target: envelope.sender,
                                    message: ConsensusMessage::FragmentResponse(response),
                                });
                            }
                        }
                    }
                }
                ConsensusMessage::BbaBval(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.bba.get_mut(&msg.proposer_index) {
                            let effects = instance.on_bval(sender_index, msg);
                            self.apply_bba_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                            );
                        }
                    }
                }
                ConsensusMessage::BbaAux(msg) => {
                    if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                        if let Some(instance) = epoch_state.bba.get_mut(&msg.proposer_index) {
                            let effects = instance.on_aux(sender_index, msg);
                            self.apply_bba_effects(
                                epoch_state,
                                msg.proposer_index,
                                effects,
                                &mut outbound,
                            );
                        }
                    }
                }
                ConsensusMessage::CoinShare(msg) => {
                    let proposer = self
                        .set
                        .by_index(msg.proposer_index)
                        .map(|v| v.id)
                        .ok_or(ConsensusError::UnknownSender(envelope.sender))?;
                    let revealed = self.coin.lock().on_share(&proposer, msg);
                    if let Some(value) = revealed {
                        if let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) {
                            if let Some(instance) = epoch_state.bba.get_mut(&msg.proposer_index) {
                                let effects = instance.on_coin(msg.round, value);
                                self.apply_bba_effects(
                                    epoch_state,
                                    msg.proposer_index,
                                    effects,
                                    &mut outbound,
                                );
                            }
                        }
                    }
                }
                ConsensusMessage::BlockShare(msg) => {
                    self.on_block_share(&mut state, msg, &mut committed)?;
                }
                ConsensusMessage::BlockCommit(msg) => {
                    self.on_block_published(&mut state, msg, &mut committed)?;
                }
                // Day, ballot and evidence traffic is routed by the node
                // layer to the day-advancement and detection components.
                _ => {
                    trace!(kind = envelope.message.kind(), "message not for the epoch pipeline");
                }
            }

            self.drain_commits(&mut state, &mut committed)?;
        }

        for record in evidence {
            outbound.push(Outbound::Broadcast(ConsensusMessage::Evidence(record.clone())));
            self.evidence_tx
                .send(record)
                .await
                .map_err(|e| ConsensusError::Channel(e.to_string()))?;
        }
        self.send_all(outbound).await?;
        for block in committed {
            self.commit_tx
                .send(block)
                .await
                .map_err(|e| ConsensusError::Channel(e.to_string()))?;
        }
        Ok(())
    }

    /// Soft-timeout an epoch: cancel agreement work, keep delivered
    /// broadcasts, and restart the decision from what survived.
    pub async fn on_timeout(&self, epoch: Epoch) -> Result<bool, ConsensusError> {
        let mut outbound = Vec::new();
        let retried = {
            let mut state = self.state.lock();
            let Some(epoch_state) = state.epochs.get_mut(&epoch) else {
                return Ok(false);
            };
            if epoch_state.phase == Phase::Done {
                return Ok(false);
            }

            warn!(epoch, phase = ?epoch_state.phase, "epoch timeout, retrying with preserved deliveries");

            let n = self.set.len();
            let f = self.set.max_faulty();
            epoch_state.bba = (0..n as u32)
                .map(|i| (i, BbaInstance::new(epoch, i, n, f)))
                .collect();
            epoch_state.acs = AcsState::new(n, f);
            epoch_state.accepted = None;
            epoch_state.block_digest = None;
            epoch_state.block_shares = None;
            epoch_state.block_events = None;
            epoch_state.early_block_shares.clear();
            epoch_state.phase = Phase::RbcRunning;

            // Re-feed preserved deliveries.
            let delivered: Vec<u32> = epoch_state.delivered.keys().copied().collect();
            for index in delivered {
                let effects = epoch_state.acs.on_rbc_delivered(index);
                self.apply_acs_effects(epoch_state, effects, &mut outbound);
            }
            true
        };

        self.send_all(outbound).await?;
        Ok(retried)
    }

    /// Drop state for committed epochs below the watermark.
    pub fn forget_before(&self, epoch: Epoch) {
        let mut state = self.state.lock();
        state
            .epochs
            .retain(|&e, s| e >= epoch || s.phase != Phase::Done);
        self.coin.lock().forget_before(epoch);
    }

    // ------------------------------------------------------------------
    // Effect plumbing
    // ------------------------------------------------------------------

    fn apply_rbc_effects(
        &self,
        epoch_state: &mut EpochState,
        proposer_index: u32,
        effects: Vec<RbcEffect>,
        outbound: &mut Vec<Outbound>,
        evidence: &mut Vec<EvidenceRecord>,
    ) {
        for effect in effects {
            match effect {
                RbcEffect::Broadcast(message) => outbound.push(Outbound::Broadcast(message)),
                RbcEffect::Deliver {
                    payload,
                    batch_digest,
                } => {
                    debug!(
                        epoch = epoch_state.epoch,
                        proposer = proposer_index,
                        digest = hex::encode(&batch_digest[..8]),
                        "rbc delivered to orchestrator"
                    );
                    epoch_state.delivered.insert(proposer_index, payload);
                    if epoch_state.phase == Phase::RbcRunning {
                        epoch_state.phase = Phase::BbaRunning;
                    }
                    let acs_effects = epoch_state.acs.on_rbc_delivered(proposer_index);
                    self.apply_acs_effects(epoch_state, acs_effects, outbound);
                }
                RbcEffect::Evidence(record) => evidence.push(record),
                RbcEffect::RequestFragments(requests) => {
                    // Ask each fragment's holder directly.
                    for request in requests {
                        if let Some(holder) = self.set.by_index(request.fragment_index) {
                            outbound.push(Outbound::Unicast {
                                target: holder.id,
                                message: ConsensusMessage::FragmentRequest(request),
                            });
                        }
                    }
                }
            }
        }
    }

    fn apply_bba_effects(
        &self,
        epoch_state: &mut EpochState,
        proposer_index: u32,
        effects: Vec<BbaEffect>,
        outbound: &mut Vec<Outbound>,
    ) {
        for effect in effects {
            match effect {
                BbaEffect::Broadcast(message) => outbound.push(Outbound::Broadcast(message)),
                BbaEffect::NeedCoin { round } => {
                    let proposer = self
                        .set
                        .by_index(proposer_index)
                        .expect("instance index within set")
                        .id;
                    let share = self.coin.lock().local_share(
                        epoch_state.epoch,
                        &proposer,
                        proposer_index,
                        round,
                    );
                    // Our own share counts immediately; the reveal, if
                    // this share is the last, loops through on_coin.
                    let revealed = self.coin.lock().on_share(&proposer, &share);
                    outbound.push(Outbound::Broadcast(ConsensusMessage::CoinShare(share)));
                    if let Some(value) = revealed {
                        if let Some(instance) = epoch_state.bba.get_mut(&proposer_index) {
                            let more = instance.on_coin(round, value);
                            self.apply_bba_effects(epoch_state, proposer_index, more, outbound);
                        }
                    }
                }
                BbaEffect::Decide(value) => {
                    debug!(
                        epoch = epoch_state.epoch,
                        proposer = proposer_index,
                        value,
                        "inclusion decided"
                    );
                    let acs_effects = epoch_state.acs.on_bba_decided(proposer_index, value);
                    self.apply_acs_effects(epoch_state, acs_effects, outbound);
                }
            }
        }
    }

    fn apply_acs_effects(
        &self,
        epoch_state: &mut EpochState,
        effects: Vec<AcsEffect>,
        outbound: &mut Vec<Outbound>,
    ) {
        for effect in effects {
            match effect {
                AcsEffect::InputBba {
                    proposer_index,
                    value,
                } => {
                    if let Some(instance) = epoch_state.bba.get_mut(&proposer_index) {
                        let bba_effects = instance.set_input(value);
                        self.apply_bba_effects(epoch_state, proposer_index, bba_effects, outbound);
                    }
                }
                AcsEffect::Complete { accepted } => {
                    self.enter_committing(epoch_state, accepted, outbound);
                }
            }
        }
    }

    /// The subset is decided: derive the canonical event set and start
    /// collecting block shares.
    fn enter_committing(
        &self,
        epoch_state: &mut EpochState,
        accepted: Vec<u32>,
        outbound: &mut Vec<Outbound>,
    ) {
        if epoch_state.phase == Phase::Committing || epoch_state.phase == Phase::Done {
            return;
        }
        epoch_state.phase = Phase::Committing;
        epoch_state.accepted = Some(accepted.clone());

        // Union of the accepted proposals' events, lexicographically
        // ordered and deduplicated; identical on every honest node.
        let mut events = Vec::new();
        for index in &accepted {
            let Some(payload) = epoch_state.delivered.get(index) else {
                continue;
            };
            match EventBatch::from_canonical_bytes(payload) {
                Ok(batch) => events.extend(batch.events),
                Err(e) => {
                    warn!(
                        epoch = epoch_state.epoch,
                        proposer = index,
                        error = %e,
                        "accepted payload is not a valid batch, contributing no events"
                    );
                }
            }
        }
        let events = sort_unique(events);
        let merkle_root = merkle_root_of_events(&events);
        let proposer_set: Vec<ValidatorId> = accepted
            .iter()
            .filter_map(|i| self.set.by_index(*i).map(|v| v.id))
            .collect();

        let digest = Block::digest_of(epoch_state.epoch, &events, &merkle_root, &proposer_set);
        info!(
            epoch = epoch_state.epoch,
            events = events.len(),
            accepted = accepted.len(),
            digest = hex::encode(&digest[..8]),
            "committing epoch"
        );

        epoch_state.block_events = Some(events);
        epoch_state.block_digest = Some(digest);
        let mut shares = ShareSet::new(
            digest,
            self.set.quorum_threshold(),
            self.set.len(),
        );

        // Our share first, then gossip it.
        let share = sign_share(&self.keys.secret_share, &digest);
        let share_msg = BlockShare {
            epoch: epoch_state.epoch,
            block_digest: digest,
            share_index: share.index,
            share: share.signature.to_bytes(),
        };
        match shares.add_share(share.index, &share_msg.share, &self.keys.share_publics) {
            Ok(Some(qc)) => self.finish_block(epoch_state, qc),
            Ok(None) => {}
            Err(e) => warn!(epoch = epoch_state.epoch, error = %e, "own block share rejected"),
        }

        // Replay shares that raced ahead of our subset.
        for early in std::mem::take(&mut epoch_state.early_block_shares) {
            if early.block_digest != digest {
                continue;
            }
            match shares.add_share(early.share_index, &early.share, &self.keys.share_publics) {
                Ok(Some(qc)) => self.finish_block(epoch_state, qc),
                Ok(None) => {}
                Err(ShareSetError::DuplicateShare(_)) => {}
                Err(e) => debug!(epoch = epoch_state.epoch, error = %e, "buffered block share rejected"),
            }
        }

        epoch_state.block_shares = Some(shares);
        outbound.push(Outbound::Broadcast(ConsensusMessage::BlockShare(share_msg)));
    }

    fn on_block_share(
        &self,
        state: &mut OrchestratorState,
        msg: &BlockShare,
        committed: &mut Vec<Block>,
    ) -> Result<(), ConsensusError> {
        let Some(epoch_state) = state.epochs.get_mut(&msg.epoch) else {
            return Ok(());
        };
        let Some(digest) = epoch_state.block_digest else {
            // Shares can arrive before our own subset completes; replay
            // them once it does.
            trace!(epoch = msg.epoch, "block share before local subset, buffered");
            epoch_state.early_block_shares.push(msg.clone());
            return Ok(());
        };
        if msg.block_digest != digest {
            warn!(
                epoch = msg.epoch,
                ours = hex::encode(&digest[..8]),
                theirs = hex::encode(&msg.block_digest[..8]),
                "block share for divergent digest"
            );
            return Ok(());
        }
        let Some(shares) = epoch_state.block_shares.as_mut() else {
            return Ok(());
        };

        match shares.add_share(msg.share_index, &msg.share, &self.keys.share_publics) {
            Ok(Some(qc)) => {
                self.finish_block(epoch_state, qc);
                self.drain_commits(state, committed)?;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(ShareSetError::DuplicateShare(_)) => Ok(()),
            Err(e) => {
                debug!(epoch = msg.epoch, error = %e, "block share rejected");
                Ok(())
            }
        }
    }

    /// A peer published a committed block. If its certificate holds, a
    /// node whose agreement lags can adopt the result directly.
    fn on_block_published(
        &self,
        state: &mut OrchestratorState,
        msg: &crate::messages::BlockCommit,
        committed: &mut Vec<Block>,
    ) -> Result<(), ConsensusError> {
        let block = &msg.block;
        let Some(epoch_state) = state.epochs.get_mut(&block.epoch) else {
            return Ok(());
        };
        if epoch_state.phase == Phase::Done || epoch_state.decided_block.is_some() {
            return Ok(());
        }

        let digest_ok = block.quorum_certificate.message_digest == block.digest();
        if !digest_ok
            || !block
                .quorum_certificate
                .verify(&self.keys.group_public, self.set.quorum_threshold())
        {
            warn!(epoch = block.epoch, "published block fails certificate check");
            return Ok(());
        }

        info!(epoch = block.epoch, "adopting published block");
        epoch_state.phase = Phase::Committing;
        epoch_state.decided_block = Some(block.clone());
        self.drain_commits(state, committed)
    }

    /// The quorum certificate exists: assemble the block and queue it for
    /// in-order persistence.
    fn finish_block(&self, epoch_state: &mut EpochState, qc: QuorumCertificate) {
        if epoch_state.decided_block.is_some() || epoch_state.phase == Phase::Done {
            return;
        }
        let events = epoch_state
            .block_events
            .clone()
            .expect("committing phase has events");
        let proposer_set: Vec<ValidatorId> = epoch_state
            .accepted
            .as_ref()
            .expect("committing phase has subset")
            .iter()
            .filter_map(|i| self.set.by_index(*i).map(|v| v.id))
            .collect();

        let block = Block::assemble(epoch_state.epoch, events, proposer_set, qc);
        epoch_state.decided_block = Some(block);
    }

    /// Persist every decided block whose predecessors are durable.
    fn drain_commits(
        &self,
        state: &mut OrchestratorState,
        committed: &mut Vec<Block>,
    ) -> Result<(), ConsensusError> {
        loop {
            let next_epoch = {
                let candidate = state
                    .epochs
                    .values()
                    .filter(|e| e.decided_block.is_some() && e.phase != Phase::Done)
                    .map(|e| e.epoch)
                    .min();
                let Some(epoch) = candidate else {
                    return Ok(());
                };
                // Epoch e+1 waits for e, even if its agreement finished
                // first.
                match state.last_committed {
                    Some(last) if epoch != last + 1 => return Ok(()),
                    _ => epoch,
                }
            };

            let epoch_state = state
                .epochs
                .get_mut(&next_epoch)
                .expect("candidate epoch exists");
            let block = epoch_state
                .decided_block
                .clone()
                .expect("candidate has decided block");

            match self.store.put_block(&block) {
                Ok(()) => {}
                Err(StorageError::AlreadyCommitted { .. }) => {
                    // Crash-recovery overlap: adopt the persisted record.
                    debug!(epoch = next_epoch, "block already persisted, adopting");
                }
                Err(e) => return Err(e.into()),
            }

            info!(
                epoch = next_epoch,
                events = block.events.len(),
                signers = block.quorum_certificate.signer_count(),
                "epoch committed"
            );
            epoch_state.phase = Phase::Done;
            state.last_committed = Some(next_epoch);
            committed.push(block);
        }
    }

    async fn send_all(&self, outbound: Vec<Outbound>) -> Result<(), ConsensusError> {
        for message in outbound {
            self.outbound_tx
                .send(message)
                .await
                .map_err(|e| ConsensusError::Channel(e.to_string()))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EpochOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochOrchestrator")
            .field("me", &self.me)
            .field("my_index", &self.my_index)
            .finish_non_exhaustive()
    }
}
