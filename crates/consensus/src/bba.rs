//! Binary Byzantine agreement with a common coin.
//!
//! One instance per `(epoch, proposer)` decides whether that proposer's
//! broadcast is included in the epoch. Rounds exchange BVAL and AUX
//! messages under the bin-values rule; the common coin breaks symmetry:
//!
//! - a value enters bin-values after `2f + 1` BVALs (and is echoed once
//!   `f + 1` are seen),
//! - after `n - f` AUX messages whose values all sit in bin-values, the
//!   round's coin is requested,
//! - if bin-values is a singleton matching the coin, that value is
//!   decided and the instance runs one more round for safety; otherwise
//!   the estimate becomes the singleton value or the coin.
//!
//! Once any honest validator decides `v`, no honest validator can decide
//! `1 - v` in any round.

use crate::messages::{BbaAux, BbaBval, ConsensusMessage};
use conductor_types::Epoch;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// What a handler wants done.
#[derive(Debug, PartialEq, Eq)]
pub enum BbaEffect {
    /// Broadcast a message to all validators.
    Broadcast(ConsensusMessage),
    /// The round needs its coin; the orchestrator gossips coin shares and
    /// calls [`BbaInstance::on_coin`] when the value is known.
    NeedCoin {
        /// Round awaiting its coin.
        round: u32,
    },
    /// The instance decided.
    Decide(bool),
}

/// The two-element value set, tracked without allocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BoolSet {
    has_false: bool,
    has_true: bool,
}

impl BoolSet {
    fn insert(&mut self, value: bool) -> bool {
        let slot = if value {
            &mut self.has_true
        } else {
            &mut self.has_false
        };
        let fresh = !*slot;
        *slot = true;
        fresh
    }

    fn contains(&self, value: bool) -> bool {
        if value {
            self.has_true
        } else {
            self.has_false
        }
    }

    fn len(&self) -> usize {
        usize::from(self.has_false) + usize::from(self.has_true)
    }

    fn only(&self) -> Option<bool> {
        match (self.has_false, self.has_true) {
            (true, false) => Some(false),
            (false, true) => Some(true),
            _ => None,
        }
    }
}

/// One binary-agreement instance.
#[derive(Debug)]
pub struct BbaInstance {
    epoch: Epoch,
    proposer_index: u32,
    n: usize,
    f: usize,

    round: u32,
    estimate: Option<bool>,

    /// BVAL senders per (round, value).
    bval_received: HashMap<(u32, bool), HashSet<u32>>,
    /// Values we have broadcast as BVAL, per round.
    bval_sent: HashMap<u32, BoolSet>,
    /// bin-values per round.
    bin_values: HashMap<u32, BoolSet>,
    /// AUX value per (round, sender).
    aux_received: HashMap<u32, HashMap<u32, bool>>,
    /// Rounds whose AUX we already broadcast.
    aux_sent: HashSet<u32>,
    /// Rounds whose coin we already requested.
    coin_requested: HashSet<u32>,
    /// Known coin values by round.
    coins: HashMap<u32, bool>,

    decided: Option<bool>,
    decided_round: Option<u32>,
    halted: bool,
}

impl BbaInstance {
    /// Create an instance for `(epoch, proposer_index)` over `n`
    /// validators tolerating `f` faults.
    pub fn new(epoch: Epoch, proposer_index: u32, n: usize, f: usize) -> Self {
        Self {
            epoch,
            proposer_index,
            n,
            f,
            round: 0,
            estimate: None,
            bval_received: HashMap::new(),
            bval_sent: HashMap::new(),
            bin_values: HashMap::new(),
            aux_received: HashMap::new(),
            aux_sent: HashSet::new(),
            coin_requested: HashSet::new(),
            coins: HashMap::new(),
            decided: None,
            decided_round: None,
            halted: false,
        }
    }

    /// The decision, once made.
    pub fn decided(&self) -> Option<bool> {
        self.decided
    }

    /// Whether input has been provided.
    pub fn has_input(&self) -> bool {
        self.estimate.is_some()
    }

    /// Whether the instance has fully terminated (decided and ran its
    /// safety round).
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Provide the initial estimate (1 when our RBC delivered, 0 when
    /// filled in by the common-subset rule).
    pub fn set_input(&mut self, value: bool) -> Vec<BbaEffect> {
        if self.estimate.is_some() || self.halted {
            return Vec::new();
        }
        debug!(
            epoch = self.epoch,
            proposer = self.proposer_index,
            value,
            "binary agreement input"
        );
        self.estimate = Some(value);
        let mut effects = Vec::new();
        self.broadcast_bval(0, value, &mut effects);
        self.poll_round(&mut effects);
        effects
    }

    /// Handle a BVAL broadcast.
    pub fn on_bval(&mut self, sender_index: u32, msg: &BbaBval) -> Vec<BbaEffect> {
        let mut effects = Vec::new();
        if self.halted {
            return effects;
        }

        let senders = self
            .bval_received
            .entry((msg.round, msg.value))
            .or_default();
        if !senders.insert(sender_index) {
            return effects;
        }
        let count = senders.len();

        trace!(
            epoch = self.epoch,
            proposer = self.proposer_index,
            round = msg.round,
            value = msg.value,
            count,
            "bval recorded"
        );

        // Echo amplification at f + 1.
        if count >= self.f + 1 && !self.sent_bval(msg.round, msg.value) {
            self.broadcast_bval(msg.round, msg.value, &mut effects);
        }

        // Entry into bin-values at 2f + 1.
        if count >= 2 * self.f + 1 {
            let fresh = self.bin_values.entry(msg.round).or_default().insert(msg.value);
            if fresh && !self.aux_sent.contains(&msg.round) {
                self.aux_sent.insert(msg.round);
                effects.push(BbaEffect::Broadcast(ConsensusMessage::BbaAux(BbaAux {
                    epoch: self.epoch,
                    proposer_index: self.proposer_index,
                    round: msg.round,
                    value: msg.value,
                })));
            }
        }

        self.poll_round(&mut effects);
        effects
    }

    /// Handle an AUX broadcast.
    pub fn on_aux(&mut self, sender_index: u32, msg: &BbaAux) -> Vec<BbaEffect> {
        let mut effects = Vec::new();
        if self.halted {
            return effects;
        }

        self.aux_received
            .entry(msg.round)
            .or_default()
            .entry(sender_index)
            .or_insert(msg.value);

        self.poll_round(&mut effects);
        effects
    }

    /// Provide the coin value for a round.
    pub fn on_coin(&mut self, round: u32, value: bool) -> Vec<BbaEffect> {
        let mut effects = Vec::new();
        if self.halted {
            return effects;
        }
        self.coins.entry(round).or_insert(value);
        self.poll_round(&mut effects);
        effects
    }

    /// Evaluate the current round; loops because resolving one round can
    /// immediately satisfy the next from buffered messages.
    fn poll_round(&mut self, effects: &mut Vec<BbaEffect>) {
        loop {
            if self.halted || self.estimate.is_none() {
                return;
            }
            let round = self.round;

            let Some(bin) = self.bin_values.get(&round).copied() else {
                return;
            };
            if bin.len() == 0 {
                return;
            }

            // n - f AUX messages whose values sit in bin-values.
            let aux_count = self
                .aux_received
                .get(&round)
                .map(|senders| senders.values().filter(|v| bin.contains(**v)).count())
                .unwrap_or(0);
            if aux_count < self.n - self.f {
                return;
            }

            let Some(&coin) = self.coins.get(&round) else {
                if self.coin_requested.insert(round) {
                    effects.push(BbaEffect::NeedCoin { round });
                }
                return;
            };

            // Resolve the round.
            let next_estimate = match bin.only() {
                Some(v) => {
                    if v == coin && self.decided.is_none() {
                        debug!(
                            epoch = self.epoch,
                            proposer = self.proposer_index,
                            round,
                            value = v,
                            "binary agreement decided"
                        );
                        self.decided = Some(v);
                        self.decided_round = Some(round);
                        effects.push(BbaEffect::Decide(v));
                    }
                    v
                }
                None => coin,
            };

            // One extra round past the deciding one, then halt.
            if let Some(decided_round) = self.decided_round {
                if round > decided_round {
                    self.halted = true;
                    return;
                }
            }

            self.round = round + 1;
            self.estimate = Some(next_estimate);
            self.broadcast_bval(self.round, next_estimate, effects);
        }
    }

    fn sent_bval(&self, round: u32, value: bool) -> bool {
        self.bval_sent
            .get(&round)
            .map(|s| s.contains(value))
            .unwrap_or(false)
    }

    fn broadcast_bval(&mut self, round: u32, value: bool, effects: &mut Vec<BbaEffect>) {
        if self.bval_sent.entry(round).or_default().insert(value) {
            effects.push(BbaEffect::Broadcast(ConsensusMessage::BbaBval(BbaBval {
                epoch: self.epoch,
                proposer_index: self.proposer_index,
                round,
                value,
            })));
        }
    }
}
