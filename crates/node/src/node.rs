//! Node wiring: the long-lived tasks of a Conductor validator.
//!
//! The run loop owns the epoch orchestrator, the day-advancement
//! protocol, detection and ballots. VDF computation and verification run
//! on the dedicated blocking pool; everything else is channel traffic
//! around one cooperative select loop, so no critical section spans a
//! suspension point.
//!
//! Startup recovery derives everything from storage: the last canonical
//! day, the last committed epoch, the persisted blacklist, and the
//! difficulty of the most recent canonical proof. The anomaly-detection
//! clock is re-anchored fresh on every start and never persisted.

use crate::adapters::{AdapterService, SubmissionQueue};
use crate::keyfile::ValidatorKeyFile;
use crate::metrics;
use crate::peering::{InboundFilter, InboundReject, PeerTransport};
use crate::NodeError;
use conductor_config::Config;
use conductor_consensus::blacklist::{
    BallotExecution, BallotStore, BallotTracker, BlacklistView,
};
use conductor_consensus::day::{DayAdvancement, DayEffect};
use conductor_consensus::evidence::{EvidenceDetail, EvidencePool, EvidenceRecord};
use conductor_consensus::messages::{BallotProposal, ConsensusMessage, PeerEnvelope};
use conductor_consensus::orchestrator::{EpochOrchestrator, KeyContext, Outbound};
use conductor_consensus::seen_cache::{SeenCacheConfig, SeenMessageCache};
use conductor_consensus::validate_evidence;
use conductor_crypto::{BlsPublicKey, Hash, ValidatorKeyPair};
use conductor_storage::{ConductorStore, StorageError};
use conductor_types::{
    BallotAction, Block, CanonicalDayProof, DayNumber, DayProof, EventBatch, FederationEvent,
    MembershipChange, ReasonCode, Validator, ValidatorId, ValidatorSet, MAX_BATCH_EVENTS,
};
use conductor_vdf::{DifficultyController, TimingReference, VdfEngine};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Retries per epoch before pending submissions are failed.
const MAX_EPOCH_RETRIES: u32 = 5;

/// A finished local VDF run.
struct VdfResult {
    proof: DayProof,
    completion: Duration,
}

/// A finished peer-proof verification.
struct VerifyResult {
    envelope: PeerEnvelope,
    verified: bool,
}

/// Mutable state of the day pipeline, threaded through the run loop.
struct DayPipeline {
    current_day: DayNumber,
    day: DayAdvancement,
    difficulty: DifficultyController,
    timing: TimingReference,
    cancel: Arc<AtomicBool>,
    epoch_retries: HashMap<u64, u32>,
}

/// A running Conductor validator.
pub struct ConductorNode {
    config: Config,
    identity: ValidatorKeyPair,
    me: ValidatorId,
    set: Arc<ValidatorSet>,
    keys: KeyContext,
    store: ConductorStore,
    engine: VdfEngine,
    queue: Arc<SubmissionQueue>,
    adapters: Arc<AdapterService>,
    blacklist: Arc<RwLock<BlacklistView>>,
    seen: Arc<SeenMessageCache>,
}

impl ConductorNode {
    /// Assemble a node from configuration and key material.
    pub fn new(config: Config, keyfile: &ValidatorKeyFile) -> Result<Self, NodeError> {
        let identity = keyfile.identity()?;
        let me = ValidatorId::from_public_key(identity.public_key());
        let set = Arc::new(keyfile.validator_set()?);
        if !set.contains(&me) {
            return Err(NodeError::Setup(
                "our identity is not in the federation".to_string(),
            ));
        }
        let keys = keyfile.key_context()?;

        let store = ConductorStore::open(&config.storage.path)?;
        store.put_genesis_seed(&config.genesis.seed_bytes()?)?;

        let engine = VdfEngine::new(config.genesis.seed_bytes()?);
        let blacklist = Arc::new(RwLock::new(BlacklistView::from_entries(
            store.blacklist_entries()?,
        )));
        let seen = Arc::new(SeenMessageCache::new(SeenCacheConfig {
            ttl: Duration::from_millis(u64::from(config.consensus.seen_cache_ttl_ms)),
            ..SeenCacheConfig::default()
        }));

        let queue = Arc::new(SubmissionQueue::new());
        let trusted = config
            .auth
            .trusted_callers
            .iter()
            .filter_map(|hex_key| hex::decode(hex_key.trim_start_matches("0x")).ok())
            .collect::<Vec<_>>();
        let adapters = Arc::new(AdapterService::new(
            store.clone(),
            Arc::clone(&queue),
            trusted,
            Duration::from_millis(u64::from(config.consensus.seen_cache_ttl_ms)),
        ));

        Ok(Self {
            config,
            identity,
            me,
            set,
            keys,
            store,
            engine,
            queue,
            adapters,
            blacklist,
            seen,
        })
    }

    /// The upward adapter surface, for the RPC layer to serve.
    pub fn adapters(&self) -> Arc<AdapterService> {
        Arc::clone(&self.adapters)
    }

    /// Our validator identifier.
    pub fn validator_id(&self) -> ValidatorId {
        self.me
    }

    /// Run until `inbound_rx` closes.
    pub async fn run(
        self,
        transport: Arc<dyn PeerTransport>,
        mut inbound_rx: mpsc::Receiver<PeerEnvelope>,
    ) -> Result<(), NodeError> {
        // --- Recovery from storage ---
        let current_day: DayNumber = self.store.latest_canonical_day()?.unwrap_or(0);
        let last_committed = self.store.latest_epoch()?;
        let initial_difficulty = self
            .store
            .get_day_proof(current_day)?
            .map(|p| p.day_proof.difficulty)
            .unwrap_or(self.config.vdf.difficulty_initial);

        info!(
            validator = %self.me,
            day = current_day,
            last_epoch = ?last_committed,
            difficulty = initial_difficulty,
            "node starting"
        );
        metrics::set_day_number(current_day);
        metrics::set_blacklist_size(self.blacklist.read().len());

        // --- Channels and components ---
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(4096);
        let (commit_tx, mut commit_rx) = mpsc::channel::<Block>(64);
        let (evidence_tx, mut evidence_rx) = mpsc::channel::<EvidenceRecord>(256);
        let (vdf_tx, mut vdf_rx) = mpsc::channel::<VdfResult>(4);
        let (verify_tx, mut verify_rx) = mpsc::channel::<VerifyResult>(64);

        let orchestrator = Arc::new(EpochOrchestrator::new(
            self.me,
            Arc::clone(&self.set),
            self.keys.clone(),
            self.store.clone(),
            last_committed,
            outbound_tx.clone(),
            commit_tx,
            evidence_tx.clone(),
        )?);

        let filter = InboundFilter::new(
            self.me,
            Arc::clone(&self.set),
            Arc::clone(&self.blacklist),
            Arc::clone(&self.seen),
        );

        let mut pipeline = DayPipeline {
            current_day,
            day: self.new_day_state(current_day + 1),
            difficulty: DifficultyController::new(
                initial_difficulty,
                self.config.vdf.adjustment_interval_days,
            ),
            timing: TimingReference::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            epoch_retries: HashMap::new(),
        };
        let mut evidence_pool = EvidencePool::new();
        let mut ballot_tracker = BallotTracker::new(
            self.set.quorum_threshold(),
            self.set.len(),
            self.keys.share_publics.clone(),
        );
        let mut ballot_store = BallotStore::new();

        // --- Day pipeline: compute day current_day + 1 ---
        pipeline.timing.observe_day_start(current_day + 1);
        self.spawn_vdf(
            current_day + 1,
            pipeline.difficulty.difficulty(),
            Arc::clone(&pipeline.cancel),
            vdf_tx.clone(),
        );

        // --- First epoch for the current day ---
        if last_committed.map(|e| e < current_day).unwrap_or(true) {
            self.start_epoch(&orchestrator, current_day).await;
        }

        let epoch_timeout =
            Duration::from_millis(u64::from(self.config.consensus.epoch_timeout_ms));
        let mut timeout_ticker = tokio::time::interval(epoch_timeout);
        timeout_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timeout_ticker.tick().await; // the first tick fires immediately

        // --- Main loop ---
        loop {
            tokio::select! {
                maybe_envelope = inbound_rx.recv() => {
                    let Some(envelope) = maybe_envelope else {
                        info!("inbound channel closed, shutting down");
                        break;
                    };
                    self.on_envelope(
                        envelope,
                        &filter,
                        &orchestrator,
                        &mut pipeline,
                        &mut evidence_pool,
                        &mut ballot_tracker,
                        &mut ballot_store,
                        &vdf_tx,
                        &verify_tx,
                        &evidence_tx,
                        &transport,
                    )
                    .await?;
                }

                Some(result) = vdf_rx.recv() => {
                    metrics::record_vdf_computation(
                        result.proof.difficulty,
                        result.completion.as_secs_f64(),
                    );
                    pipeline.timing.record_completion_sample(result.completion);
                    pipeline.difficulty.record_completion(
                        result.proof.day_number,
                        result.completion.as_secs_f64(),
                    );

                    let effects = pipeline.day.on_local_proof(result.proof, result.completion);
                    self.handle_day_effects(
                        effects,
                        &mut pipeline,
                        &orchestrator,
                        &vdf_tx,
                        &evidence_tx,
                        &transport,
                    )
                    .await?;
                }

                Some(result) = verify_rx.recv() => {
                    if let ConsensusMessage::DayProofAnnounce(announce) = &result.envelope.message {
                        pipeline.difficulty.record_completion(
                            announce.proof.day_number,
                            Duration::from_millis(announce.completion_millis).as_secs_f64(),
                        );
                        let effects = pipeline
                            .day
                            .on_peer_announce(announce, &result.envelope, result.verified);
                        self.handle_day_effects(
                            effects,
                            &mut pipeline,
                            &orchestrator,
                            &vdf_tx,
                            &evidence_tx,
                            &transport,
                        )
                        .await?;
                    }
                }

                Some(outbound) = outbound_rx.recv() => {
                    self.dispatch(outbound, &transport).await;
                }

                Some(block) = commit_rx.recv() => {
                    self.on_commit(
                        &block,
                        pipeline.current_day,
                        &mut ballot_store,
                        &orchestrator,
                    )?;
                    // Publish the finished block so laggards can adopt
                    // the certificate instead of re-running agreement.
                    transport
                        .broadcast(self.sign(ConsensusMessage::BlockCommit(
                            conductor_consensus::messages::BlockCommit { block },
                        )))
                        .await;
                }

                Some(record) = evidence_rx.recv() => {
                    metrics::record_evidence(&record.reason_code().to_string());
                    if validate_evidence(&record, &self.set) {
                        evidence_pool.add(record, pipeline.current_day);
                        self.maybe_propose_ballots(
                            pipeline.current_day,
                            &mut evidence_pool,
                            &mut ballot_tracker,
                            &transport,
                        )
                        .await;
                    }
                }

                _ = timeout_ticker.tick() => {
                    self.on_epoch_timeout(&orchestrator, &mut pipeline).await;
                }
            }
        }

        // Best-effort flush before exit; the timing reference zeroizes on
        // drop.
        pipeline.cancel.store(true, Ordering::Relaxed);
        self.store.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound routing
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn on_envelope(
        &self,
        envelope: PeerEnvelope,
        filter: &InboundFilter,
        orchestrator: &Arc<EpochOrchestrator>,
        pipeline: &mut DayPipeline,
        evidence_pool: &mut EvidencePool,
        ballot_tracker: &mut BallotTracker,
        ballot_store: &mut BallotStore,
        vdf_tx: &mpsc::Sender<VdfResult>,
        verify_tx: &mpsc::Sender<VerifyResult>,
        evidence_tx: &mpsc::Sender<EvidenceRecord>,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<(), NodeError> {
        // Our own loopback traffic skips admission (it would replay
        // against the seen cache); everything external passes the gates.
        if envelope.sender != self.me {
            match filter.admit(&envelope, pipeline.current_day) {
                Ok(()) => {}
                Err(InboundReject::Replay(record)) => {
                    metrics::record_peer_reject("replay");
                    let _ = evidence_tx.send(*record).await;
                    return Ok(());
                }
                Err(reject) => {
                    metrics::record_peer_reject(reject.cause());
                    return Ok(());
                }
            }
        }
        metrics::record_peer_message(envelope.message.kind());

        match &envelope.message {
            ConsensusMessage::DayProofAnnounce(announce) => {
                self.on_day_announce(announce, &envelope, pipeline, verify_tx, evidence_tx, transport)
                    .await?;
            }

            ConsensusMessage::DayShare(share) => {
                let effects = pipeline.day.on_peer_share(share, &envelope);
                self.handle_day_effects(
                    effects,
                    pipeline,
                    orchestrator,
                    vdf_tx,
                    evidence_tx,
                    transport,
                )
                .await?;
            }

            ConsensusMessage::BallotProposal(proposal) => {
                if self.should_endorse(proposal, evidence_pool, pipeline.current_day) {
                    match ballot_tracker.endorse(
                        proposal,
                        pipeline.current_day,
                        &self.keys.secret_share,
                    ) {
                        Ok(message) => transport.broadcast(self.sign(message)).await,
                        Err(e) => debug!(error = %e, "ballot endorsement refused"),
                    }
                } else {
                    debug!(target = %proposal.target, "ballot without known evidence, not endorsing");
                }
            }

            ConsensusMessage::BallotShare(share) => {
                if let Ok(Some(ballot)) = ballot_tracker.on_share(share) {
                    // The certified ballot becomes an ordinary event in
                    // our next proposal.
                    ballot_store.insert(ballot.clone());
                    self.queue
                        .push_events(vec![FederationEvent::Ballot(ballot)]);
                }
            }

            ConsensusMessage::Evidence(record) => {
                let _ = evidence_tx.send(record.clone()).await;
            }

            // Everything else is epoch-pipeline traffic.
            _ => {
                orchestrator.handle_envelope(&envelope).await?;
            }
        }

        Ok(())
    }

    /// A peer announced a day proof: run outlier detection, then verify
    /// cheaply by comparison where possible and otherwise re-run the
    /// chain on the blocking pool.
    async fn on_day_announce(
        &self,
        announce: &conductor_consensus::messages::DayProofAnnounce,
        envelope: &PeerEnvelope,
        pipeline: &mut DayPipeline,
        verify_tx: &mpsc::Sender<VerifyResult>,
        evidence_tx: &mpsc::Sender<EvidenceRecord>,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<(), NodeError> {
        let proof_day = announce.proof.day_number;

        if let Some(delta) = pipeline.timing.elapsed_in_day(proof_day) {
            if pipeline.timing.is_anomalously_fast(delta) {
                let threshold = pipeline
                    .timing
                    .fifth_percentile()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                let record = EvidenceRecord::new(
                    announce.proof.proposer,
                    self.me,
                    proof_day,
                    EvidenceDetail::VdfTooFast {
                        proof: announce.proof.clone(),
                        measured_millis: delta.as_millis() as u64,
                        threshold_millis: threshold,
                    },
                );
                warn!(
                    proposer = %announce.proof.proposer,
                    day = proof_day,
                    "day proof arrived implausibly fast"
                );
                let _ = evidence_tx.send(record.clone()).await;
                transport
                    .broadcast(self.sign(ConsensusMessage::Evidence(record)))
                    .await;
            }
        }

        // Cheap path: compare against a canonical proof for that day.
        if let Some(canonical) = self.store.get_day_proof(proof_day)? {
            let verified = canonical.day_proof.output == announce.proof.output;
            let _ = verify_tx
                .send(VerifyResult {
                    envelope: envelope.clone(),
                    verified,
                })
                .await;
            return Ok(());
        }

        // Expensive path: the chain is re-run where it belongs, on the
        // dedicated blocking pool.
        let engine = self.engine.clone();
        let announce = announce.clone();
        let envelope = envelope.clone();
        let verify_tx = verify_tx.clone();
        tokio::task::spawn_blocking(move || {
            let verified = engine.derive_seed(announce.proof.day_number) == announce.proof.seed
                && engine.verify(
                    &announce.proof.seed,
                    announce.proof.difficulty,
                    &announce.proof.output,
                );
            let _ = verify_tx.blocking_send(VerifyResult { envelope, verified });
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Day pipeline
    // ------------------------------------------------------------------

    fn new_day_state(&self, day: DayNumber) -> DayAdvancement {
        DayAdvancement::new(
            day,
            self.me,
            Arc::clone(&self.set),
            self.keys.group_public.clone(),
            self.keys.share_publics.clone(),
            self.keys.secret_share.clone(),
        )
    }

    fn spawn_vdf(
        &self,
        day: DayNumber,
        difficulty: u64,
        cancel: Arc<AtomicBool>,
        vdf_tx: mpsc::Sender<VdfResult>,
    ) {
        let engine = self.engine.clone();
        let progress_interval = self.config.vdf.progress_interval;
        let me = self.me;
        let identity = self.identity.clone();

        info!(day, difficulty, "starting day computation");
        tokio::task::spawn_blocking(move || {
            let seed = engine.derive_seed(day);
            let started = Instant::now();
            match engine.compute(&seed, difficulty, progress_interval, &cancel, |done, total| {
                if done > 0 {
                    debug!(day, done, total, "day computation progress");
                }
            }) {
                Ok(output) => {
                    let completion = started.elapsed();
                    let mut proof = DayProof::unsigned(day, seed, difficulty, output, me);
                    proof.proposer_signature = identity.sign(&proof.signing_bytes()).to_bytes();
                    let _ = vdf_tx.blocking_send(VdfResult { proof, completion });
                }
                Err(e) => {
                    // Cancellation abandons the attempt; nothing persists.
                    info!(day, error = %e, "day computation abandoned");
                }
            }
        });
    }

    async fn handle_day_effects(
        &self,
        effects: Vec<DayEffect>,
        pipeline: &mut DayPipeline,
        orchestrator: &Arc<EpochOrchestrator>,
        vdf_tx: &mpsc::Sender<VdfResult>,
        evidence_tx: &mpsc::Sender<EvidenceRecord>,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<(), NodeError> {
        for effect in effects {
            match effect {
                DayEffect::Broadcast(message) => {
                    transport.broadcast(self.sign(message)).await;
                }
                DayEffect::Evidence(record) => {
                    let _ = evidence_tx.send(record).await;
                }
                DayEffect::Retry => {
                    warn!(day = pipeline.day.day(), "conflicting day outputs, re-announcing");
                    for effect in pipeline.day.reannounce() {
                        if let DayEffect::Broadcast(message) = effect {
                            transport.broadcast(self.sign(message)).await;
                        }
                    }
                }
                DayEffect::Canonical(canonical) => {
                    self.on_day_finalized(canonical, pipeline, orchestrator, vdf_tx)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// The day finalized: persist, advance, do day-boundary
    /// housekeeping, and begin the next chain and epoch.
    async fn on_day_finalized(
        &self,
        canonical: CanonicalDayProof,
        pipeline: &mut DayPipeline,
        orchestrator: &Arc<EpochOrchestrator>,
        vdf_tx: &mpsc::Sender<VdfResult>,
    ) -> Result<(), NodeError> {
        match self.store.put_day_proof(&canonical) {
            Ok(()) | Err(StorageError::AlreadyCommitted { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let finalized = canonical.day_proof.day_number;
        pipeline.current_day = finalized;
        metrics::set_day_number(finalized);

        // Retarget on schedule; only the median steers it.
        pipeline.difficulty.on_day_finalized(finalized);

        // Day-boundary housekeeping.
        self.store.prune_day_proofs(finalized)?;
        self.seen.purge_expired();
        self.adapters.purge_expired();
        orchestrator.forget_before(finalized.saturating_sub(1));
        pipeline.epoch_retries.retain(|&epoch, _| epoch + 1 >= finalized);
        pipeline.timing.forget_before(finalized);

        // The next day's chain begins immediately.
        let next = finalized + 1;
        pipeline.day = self.new_day_state(next);
        pipeline.timing.observe_day_start(next);
        self.spawn_vdf(
            next,
            pipeline.difficulty.difficulty(),
            Arc::clone(&pipeline.cancel),
            vdf_tx.clone(),
        );

        // And so does the day's epoch.
        self.start_epoch(orchestrator, finalized).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Epoch pipeline
    // ------------------------------------------------------------------

    async fn start_epoch(&self, orchestrator: &Arc<EpochOrchestrator>, epoch: u64) {
        let fingerprints = self.queue.snapshot_for_batch(MAX_BATCH_EVENTS);
        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let batch = match EventBatch::new(
            self.me,
            epoch,
            fingerprints,
            u128::from_be_bytes(nonce_bytes),
        ) {
            Ok(batch) => batch,
            Err(e) => {
                error!(epoch, error = %e, "could not assemble our batch");
                return;
            }
        };

        match orchestrator.start_epoch(&batch).await {
            Ok(()) => {}
            Err(e) => warn!(epoch, error = %e, "epoch not started"),
        }
    }

    async fn on_epoch_timeout(
        &self,
        orchestrator: &Arc<EpochOrchestrator>,
        pipeline: &mut DayPipeline,
    ) {
        let epoch = pipeline.current_day;
        match orchestrator.on_timeout(epoch).await {
            Ok(true) => {
                let retries = pipeline.epoch_retries.entry(epoch).or_insert(0);
                *retries += 1;
                metrics::record_epoch_retry();
                if *retries >= MAX_EPOCH_RETRIES {
                    warn!(epoch, retries = *retries, "epoch retry budget exhausted");
                    self.adapters.fail_pending("consensus timeout");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(epoch, error = %e, "timeout handling failed"),
        }
    }

    fn on_commit(
        &self,
        block: &Block,
        current_day: DayNumber,
        ballot_store: &mut BallotStore,
        orchestrator: &Arc<EpochOrchestrator>,
    ) -> Result<(), NodeError> {
        info!(
            epoch = block.epoch,
            events = block.events.len(),
            "block committed"
        );
        metrics::record_commit(block.events.len());

        self.adapters.on_block_committed(block);
        let committed_bodies = self.queue.on_committed(block);

        // Ballots execute against storage and the live view; membership
        // changes are persisted as future validator-set snapshots and
        // take operational effect once the key reshare is installed.
        let executions = ballot_store.execute_committed(
            block,
            &self.keys.group_public,
            self.set.quorum_threshold(),
        );
        for execution in executions {
            match execution {
                BallotExecution::Add(entry) => {
                    match self.store.put_blacklist_entry(&entry) {
                        Ok(()) | Err(StorageError::AlreadyCommitted { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                    self.blacklist.write().apply(entry);
                }
                BallotExecution::Remove(validator) => {
                    self.store.remove_blacklist_entry(&validator)?;
                    self.blacklist.write().remove(&validator);
                }
            }
        }
        metrics::set_blacklist_size(self.blacklist.read().len());

        for body in committed_bodies {
            if let FederationEvent::Membership {
                change,
                effective_day,
            } = body
            {
                self.schedule_membership(change, effective_day, current_day)?;
            }
        }

        orchestrator.forget_before(block.epoch);
        Ok(())
    }

    fn schedule_membership(
        &self,
        change: MembershipChange,
        effective_day: DayNumber,
        current_day: DayNumber,
    ) -> Result<(), NodeError> {
        if effective_day < current_day + 2 {
            warn!(effective_day, "membership change with insufficient lead time ignored");
            return Ok(());
        }

        let mut descriptors = self.set.descriptors().to_vec();
        match &change {
            MembershipChange::Join { public_key } => {
                let key = BlsPublicKey::from_bytes(public_key)
                    .map_err(|e| NodeError::Setup(e.to_string()))?;
                descriptors.push(Validator::from_public_key(&key));
            }
            MembershipChange::Leave { validator_id } => {
                descriptors.retain(|v| &v.id != validator_id);
            }
        }

        // Persist the scheduled set; the reshare ceremony produces the
        // matching key material, and the node adopts both on restart.
        self.store.put_validator_set(effective_day, &descriptors)?;
        warn!(
            effective_day,
            validators = descriptors.len(),
            "membership change scheduled; key reshare required before it activates"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Detection and ballots
    // ------------------------------------------------------------------

    /// Whether to endorse a peer's ballot: we must hold matching,
    /// validated evidence, or the ballot must be an unblacklist for a
    /// validator we agree is currently excluded.
    fn should_endorse(
        &self,
        proposal: &BallotProposal,
        evidence_pool: &EvidencePool,
        current_day: DayNumber,
    ) -> bool {
        match proposal.action {
            BallotAction::Blacklist => evidence_pool
                .pending()
                .iter()
                .any(|r| r.digest() == proposal.evidence_digest && r.accused == proposal.target),
            BallotAction::Unblacklist => self
                .blacklist
                .read()
                .is_excluded(&proposal.target, current_day),
        }
    }

    /// Propose ballots for validators with sufficient evidence: any
    /// single self-proving record, or more than `f` independent
    /// circumstantial reports.
    async fn maybe_propose_ballots(
        &self,
        current_day: DayNumber,
        evidence_pool: &mut EvidencePool,
        ballot_tracker: &mut BallotTracker,
        transport: &Arc<dyn PeerTransport>,
    ) {
        let accused: Vec<ValidatorId> = {
            let mut seen = Vec::new();
            for record in evidence_pool.pending() {
                if !seen.contains(&record.accused) {
                    seen.push(record.accused);
                }
            }
            seen
        };

        for target in accused {
            let records = evidence_pool.against(&target);
            let self_proving = records.iter().find(|r| {
                matches!(
                    r.reason_code(),
                    ReasonCode::Equivocation
                        | ReasonCode::VdfInvalid
                        | ReasonCode::SignatureInvalid
                )
            });
            let circumstantial_quorum = records.len() > self.set.max_faulty();

            let chosen = match self_proving {
                Some(record) => Some((*record).clone()),
                None if circumstantial_quorum => records.first().map(|r| (*r).clone()),
                None => None,
            };
            let Some(record) = chosen else {
                continue;
            };

            let digest: Hash = record.digest();
            let proposal = BallotProposal {
                target,
                reason_code: record.reason_code(),
                evidence_digest: digest,
                effective_day: current_day + 2,
                action: BallotAction::Blacklist,
            };

            match ballot_tracker.propose(proposal, current_day, &self.keys.secret_share) {
                Ok(messages) => {
                    info!(
                        target = %target,
                        reason = %record.reason_code(),
                        "proposing blacklist ballot"
                    );
                    for message in messages {
                        transport.broadcast(self.sign(message)).await;
                    }
                    evidence_pool.resolve(&digest);
                }
                Err(e) => debug!(target = %target, error = %e, "ballot proposal failed"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn sign(&self, message: ConsensusMessage) -> PeerEnvelope {
        PeerEnvelope::sign(self.me, message, self.identity.private_key())
    }

    async fn dispatch(&self, outbound: Outbound, transport: &Arc<dyn PeerTransport>) {
        match outbound {
            Outbound::Broadcast(message) => {
                transport.broadcast(self.sign(message)).await;
            }
            Outbound::Unicast { target, message } => {
                transport.unicast(target, self.sign(message)).await;
            }
        }
    }
}

impl std::fmt::Debug for ConductorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorNode")
            .field("me", &self.me)
            .field("validators", &self.set.len())
            .finish_non_exhaustive()
    }
}
