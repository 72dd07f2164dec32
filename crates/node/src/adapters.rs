//! Boundary adapters toward the federation relay layer.
//!
//! The upward surface is four calls: `submit_event_batch`, `get_block`,
//! `get_day_proof` and `get_consensus_status`. Callers authenticate
//! against the configured trust anchors; submissions are idempotent per
//! key inside a 24-hour window and rate-limited per caller. Validation
//! failures are terminal for the call; consensus outcomes surface
//! through the status poll.

use crate::metrics;
use crate::retry::RateLimiter;
use conductor_crypto::{blake3_concat, Hash};
use conductor_storage::ConductorStore;
use conductor_types::{
    Block, CanonicalDayProof, DayNumber, Epoch, EventFingerprint, FederationEvent,
    MAX_BATCH_EVENTS,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Domain prefix for batch identifiers.
const BATCH_ID_DOMAIN: &[u8] = b"CONDUCTOR_BATCH_ID_V1";

/// Submission rate per caller, tokens per second.
const SUBMIT_RATE_PER_SECOND: f64 = 10.0;
/// Submission burst capacity per caller.
const SUBMIT_BURST: u32 = 50;

/// Errors surfaced to upward callers.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Caller identity missing or malformed.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Caller known but not permitted.
    #[error("permission denied")]
    PermissionDenied,

    /// The submission is malformed or out of bounds.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The caller exceeded its submission rate.
    #[error("rate limited")]
    RateLimited,

    /// Storage failure while serving the call.
    #[error(transparent)]
    Storage(#[from] conductor_storage::StorageError),
}

/// The authenticated caller, as established by the mutual-auth transport
/// in front of these adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    /// The caller's public key bytes.
    pub public_key: Vec<u8>,
}

/// Where a submitted batch stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusStatus {
    /// Not yet committed.
    Pending,
    /// All of the batch's events are in finalized blocks.
    Committed {
        /// Epoch of the block that completed the batch.
        epoch: Epoch,
        /// Digest of that block.
        block_digest: Hash,
    },
    /// The timeout budget was exhausted.
    Failed {
        /// Why the batch failed.
        reason: String,
    },
}

/// Events pending inclusion in our next proposal, with their bodies
/// retained so ballots and membership changes can execute when their
/// fingerprints commit.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: Vec<EventFingerprint>,
    bodies: HashMap<EventFingerprint, FederationEvent>,
}

impl SubmissionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add events, returning their fingerprints.
    pub fn push_events(&self, events: Vec<FederationEvent>) -> Vec<EventFingerprint> {
        let mut inner = self.inner.lock();
        let mut fingerprints = Vec::with_capacity(events.len());
        for event in events {
            let fingerprint = event.fingerprint();
            if !inner.bodies.contains_key(&fingerprint) {
                inner.pending.push(fingerprint);
                inner.bodies.insert(fingerprint, event);
            }
            fingerprints.push(fingerprint);
        }
        fingerprints
    }

    /// Snapshot up to `max` pending fingerprints for the next batch.
    /// Entries stay pending until committed, so a timed-out epoch simply
    /// re-proposes them.
    pub fn snapshot_for_batch(&self, max: usize) -> Vec<EventFingerprint> {
        let inner = self.inner.lock();
        inner.pending.iter().take(max).copied().collect()
    }

    /// Remove everything a committed block covered, returning the bodies
    /// of committed events that have executable content.
    pub fn on_committed(&self, block: &Block) -> Vec<FederationEvent> {
        let committed: HashSet<EventFingerprint> = block.events.iter().copied().collect();
        let mut inner = self.inner.lock();
        inner.pending.retain(|fp| !committed.contains(fp));

        let mut bodies = Vec::new();
        for fingerprint in &block.events {
            if let Some(body) = inner.bodies.remove(fingerprint) {
                bodies.push(body);
            }
        }
        bodies
    }

    /// The body of a pending or known event.
    pub fn body_of(&self, fingerprint: &EventFingerprint) -> Option<FederationEvent> {
        self.inner.lock().bodies.get(fingerprint).cloned()
    }

    /// Number of pending fingerprints.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

struct BatchTracking {
    remaining: HashSet<EventFingerprint>,
    status: ConsensusStatus,
}

struct AdapterState {
    /// idempotency key -> (batch id, recorded at).
    idempotency: HashMap<String, (Hash, Instant)>,
    batches: HashMap<Hash, BatchTracking>,
    limiters: HashMap<Vec<u8>, RateLimiter>,
}

/// The upward adapter surface.
pub struct AdapterService {
    store: ConductorStore,
    queue: Arc<SubmissionQueue>,
    trusted: HashSet<Vec<u8>>,
    idempotency_ttl: Duration,
    state: Mutex<AdapterState>,
}

impl AdapterService {
    /// Create the service.
    ///
    /// `trusted` holds the public keys of permitted upstream callers;
    /// `idempotency_ttl` is the replay window for submissions.
    pub fn new(
        store: ConductorStore,
        queue: Arc<SubmissionQueue>,
        trusted: impl IntoIterator<Item = Vec<u8>>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            trusted: trusted.into_iter().collect(),
            idempotency_ttl,
            state: Mutex::new(AdapterState {
                idempotency: HashMap::new(),
                batches: HashMap::new(),
                limiters: HashMap::new(),
            }),
        }
    }

    fn authenticate(&self, caller: &CallerIdentity) -> Result<(), AdapterError> {
        if caller.public_key.is_empty() {
            return Err(AdapterError::Unauthenticated);
        }
        if !self.trusted.contains(&caller.public_key) {
            return Err(AdapterError::PermissionDenied);
        }
        Ok(())
    }

    /// Submit a batch of events for consensus.
    ///
    /// Idempotent per `idempotency_key` within the TTL: a repeat returns
    /// the original batch id and enqueues nothing.
    pub fn submit_event_batch(
        &self,
        caller: &CallerIdentity,
        events: Vec<FederationEvent>,
        batch_nonce: u128,
        idempotency_key: &str,
    ) -> Result<Hash, AdapterError> {
        let started = Instant::now();
        let result = self.submit_inner(caller, events, batch_nonce, idempotency_key);
        metrics::record_adapter_request(
            "submit_event_batch",
            if result.is_ok() { "ok" } else { "error" },
            started.elapsed().as_secs_f64(),
        );
        result
    }

    fn submit_inner(
        &self,
        caller: &CallerIdentity,
        events: Vec<FederationEvent>,
        batch_nonce: u128,
        idempotency_key: &str,
    ) -> Result<Hash, AdapterError> {
        self.authenticate(caller)?;

        if events.is_empty() {
            return Err(AdapterError::Rejected("empty event batch".to_string()));
        }
        if events.len() > MAX_BATCH_EVENTS {
            return Err(AdapterError::Rejected(format!(
                "{} events exceeds limit of {}",
                events.len(),
                MAX_BATCH_EVENTS
            )));
        }

        let now = Instant::now();
        {
            let mut state = self.state.lock();

            // Rate limit per caller before any work.
            let limiter = state
                .limiters
                .entry(caller.public_key.clone())
                .or_insert_with(|| RateLimiter::new(SUBMIT_RATE_PER_SECOND, SUBMIT_BURST));
            if !limiter.acquire(1) {
                return Err(AdapterError::RateLimited);
            }

            // Idempotency: a repeat inside the TTL is the same call.
            if let Some((batch_id, recorded_at)) = state.idempotency.get(idempotency_key) {
                if now.duration_since(*recorded_at) < self.idempotency_ttl {
                    debug!(
                        idempotency_key,
                        batch_id = hex::encode(&batch_id[..8]),
                        "duplicate submission, returning original batch id"
                    );
                    return Ok(*batch_id);
                }
            }
        }

        let fingerprints = self.queue.push_events(events);
        let batch_id = batch_id_for(&fingerprints, batch_nonce);

        let mut state = self.state.lock();
        state
            .idempotency
            .insert(idempotency_key.to_string(), (batch_id, now));
        state.batches.insert(
            batch_id,
            BatchTracking {
                remaining: fingerprints.iter().copied().collect(),
                status: ConsensusStatus::Pending,
            },
        );

        info!(
            batch_id = hex::encode(&batch_id[..8]),
            events = fingerprints.len(),
            "batch accepted for consensus"
        );
        Ok(batch_id)
    }

    /// Fetch a finalized block.
    pub fn get_block(
        &self,
        caller: &CallerIdentity,
        epoch: Epoch,
    ) -> Result<Option<Block>, AdapterError> {
        let started = Instant::now();
        self.authenticate(caller)?;
        let result = self.store.get_block(epoch).map_err(AdapterError::from);
        metrics::record_adapter_request(
            "get_block",
            if result.is_ok() { "ok" } else { "error" },
            started.elapsed().as_secs_f64(),
        );
        result
    }

    /// Fetch a canonical day proof.
    pub fn get_day_proof(
        &self,
        caller: &CallerIdentity,
        day: DayNumber,
    ) -> Result<Option<CanonicalDayProof>, AdapterError> {
        let started = Instant::now();
        self.authenticate(caller)?;
        let result = self.store.get_day_proof(day).map_err(AdapterError::from);
        metrics::record_adapter_request(
            "get_day_proof",
            if result.is_ok() { "ok" } else { "error" },
            started.elapsed().as_secs_f64(),
        );
        result
    }

    /// Poll a batch's consensus status.
    pub fn get_consensus_status(
        &self,
        caller: &CallerIdentity,
        batch_id: &Hash,
    ) -> Result<ConsensusStatus, AdapterError> {
        self.authenticate(caller)?;
        let state = self.state.lock();
        Ok(state
            .batches
            .get(batch_id)
            .map(|b| b.status.clone())
            .unwrap_or(ConsensusStatus::Failed {
                reason: "unknown batch".to_string(),
            }))
    }

    /// A block committed: settle every batch it completes.
    pub fn on_block_committed(&self, block: &Block) {
        let committed: HashSet<EventFingerprint> = block.events.iter().copied().collect();
        let mut state = self.state.lock();
        for tracking in state.batches.values_mut() {
            if matches!(tracking.status, ConsensusStatus::Pending) {
                tracking.remaining.retain(|fp| !committed.contains(fp));
                if tracking.remaining.is_empty() {
                    tracking.status = ConsensusStatus::Committed {
                        epoch: block.epoch,
                        block_digest: block.digest(),
                    };
                }
            }
        }
    }

    /// The timeout budget for in-flight batches ran out.
    pub fn fail_pending(&self, reason: &str) {
        let mut state = self.state.lock();
        for tracking in state.batches.values_mut() {
            if matches!(tracking.status, ConsensusStatus::Pending) {
                warn!(reason, "marking pending batch failed");
                tracking.status = ConsensusStatus::Failed {
                    reason: reason.to_string(),
                };
            }
        }
    }

    /// Drop idempotency entries past the TTL.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let ttl = self.idempotency_ttl;
        let mut state = self.state.lock();
        state
            .idempotency
            .retain(|_, (_, recorded_at)| now.duration_since(*recorded_at) < ttl);
    }
}

/// The batch identifier: a digest over the fingerprints and nonce.
fn batch_id_for(fingerprints: &[EventFingerprint], batch_nonce: u128) -> Hash {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(fingerprints.len() + 2);
    parts.push(BATCH_ID_DOMAIN);
    for fp in fingerprints {
        parts.push(fp.as_bytes());
    }
    let nonce_bytes = batch_nonce.to_be_bytes();
    parts.push(&nonce_bytes);
    blake3_concat(&parts)
}
