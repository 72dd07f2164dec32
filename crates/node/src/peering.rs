//! Peer-message admission and the transport seam.
//!
//! Every inbound envelope passes four gates before any component sees
//! it: the sender must be a known validator, must not be blacklisted as
//! of the current day, the signature must verify, and the digest must
//! miss the seen-message cache. A replay inside the TTL is itself
//! evidence. The transport behind the gates is an external collaborator;
//! this module defines only its contract and an in-process
//! implementation for tests and local federations.

use async_trait::async_trait;
use conductor_consensus::evidence::{EvidenceDetail, EvidenceRecord};
use conductor_consensus::messages::PeerEnvelope;
use conductor_consensus::seen_cache::{SeenMessageCache, SeenResult};
use conductor_consensus::blacklist::BlacklistView;
use conductor_types::{DayNumber, ValidatorId, ValidatorSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Why an envelope was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundReject {
    /// Sender is not in the active validator set.
    UnknownSender(ValidatorId),
    /// Sender is blacklisted as of the current day.
    Blacklisted(ValidatorId),
    /// Envelope signature or digest check failed.
    BadSignature(ValidatorId),
    /// Replay inside the seen-cache TTL; carries the evidence record.
    Replay(Box<EvidenceRecord>),
    /// The seen cache is at capacity.
    Overloaded,
}

impl InboundReject {
    /// Metric label for the rejection cause.
    pub fn cause(&self) -> &'static str {
        match self {
            InboundReject::UnknownSender(_) => "unknown_sender",
            InboundReject::Blacklisted(_) => "blacklisted",
            InboundReject::BadSignature(_) => "bad_signature",
            InboundReject::Replay(_) => "replay",
            InboundReject::Overloaded => "overloaded",
        }
    }
}

/// The admission filter in front of every component.
pub struct InboundFilter {
    me: ValidatorId,
    set: Arc<ValidatorSet>,
    blacklist: Arc<RwLock<BlacklistView>>,
    seen: Arc<SeenMessageCache>,
}

impl InboundFilter {
    /// Create a filter over the epoch's snapshots.
    pub fn new(
        me: ValidatorId,
        set: Arc<ValidatorSet>,
        blacklist: Arc<RwLock<BlacklistView>>,
        seen: Arc<SeenMessageCache>,
    ) -> Self {
        Self {
            me,
            set,
            blacklist,
            seen,
        }
    }

    /// Validate an envelope for the current day.
    ///
    /// Blacklisted senders are still replay-filtered (their traffic
    /// lands in the cache) but contribute to no threshold thereafter.
    pub fn admit(&self, envelope: &PeerEnvelope, current_day: DayNumber) -> Result<(), InboundReject> {
        let sender = envelope.sender;

        let Some(sender_key) = self.set.public_key_of(&sender) else {
            trace!(sender = %sender, "envelope from unknown sender");
            return Err(InboundReject::UnknownSender(sender));
        };

        if !envelope.verify(sender_key) {
            warn!(sender = %sender, "envelope signature invalid");
            return Err(InboundReject::BadSignature(sender));
        }

        match self.seen.check_and_record(sender, envelope.message_digest) {
            SeenResult::New => {}
            SeenResult::Duplicate => {
                let record = EvidenceRecord::new(
                    sender,
                    self.me,
                    envelope.epoch_or_day,
                    EvidenceDetail::Replay {
                        message_digest: envelope.message_digest,
                    },
                );
                return Err(InboundReject::Replay(Box::new(record)));
            }
            SeenResult::RateLimited => return Err(InboundReject::Overloaded),
        }

        if self.blacklist.read().is_excluded(&sender, current_day) {
            trace!(sender = %sender, "envelope from blacklisted sender");
            return Err(InboundReject::Blacklisted(sender));
        }

        Ok(())
    }
}

/// The peer transport contract. Gossip fan-out and unicast repair are
/// provided by the external networking layer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver to every validator, the local node included.
    async fn broadcast(&self, envelope: PeerEnvelope);

    /// Deliver to one validator.
    async fn unicast(&self, target: ValidatorId, envelope: PeerEnvelope);
}

/// In-process transport for tests and single-host federations: every
/// node registers an inbox keyed by its identifier.
#[derive(Default)]
pub struct ChannelTransport {
    inboxes: RwLock<HashMap<ValidatorId, mpsc::Sender<PeerEnvelope>>>,
}

impl ChannelTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's inbox.
    pub fn register(&self, id: ValidatorId, inbox: mpsc::Sender<PeerEnvelope>) {
        self.inboxes.write().insert(id, inbox);
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn broadcast(&self, envelope: PeerEnvelope) {
        let inboxes: Vec<mpsc::Sender<PeerEnvelope>> =
            self.inboxes.read().values().cloned().collect();
        for inbox in inboxes {
            // A full or closed inbox is that node's problem, not ours.
            let _ = inbox.send(envelope.clone()).await;
        }
    }

    async fn unicast(&self, target: ValidatorId, envelope: PeerEnvelope) {
        let inbox = self.inboxes.read().get(&target).cloned();
        if let Some(inbox) = inbox {
            let _ = inbox.send(envelope).await;
        }
    }
}
