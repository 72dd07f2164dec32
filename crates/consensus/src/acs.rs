//! Asynchronous common subset.
//!
//! Composes the epoch's `n` reliable broadcasts with `n` binary
//! agreements: a delivered RBC feeds 1 into its BBA; once `n - f` BBAs
//! have decided 1, every BBA still without input receives 0; when all
//! BBAs have decided, the subset is the indices that decided 1, and the
//! composition completes as soon as every accepted index has also
//! delivered its broadcast.

use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What the composition wants done.
#[derive(Debug, PartialEq, Eq)]
pub enum AcsEffect {
    /// Provide `value` as input to the BBA of `proposer_index`.
    InputBba {
        /// Instance to feed.
        proposer_index: u32,
        /// The input bit.
        value: bool,
    },
    /// The subset is decided and every accepted broadcast delivered.
    Complete {
        /// Accepted proposer indices, ascending.
        accepted: Vec<u32>,
    },
}

/// State of one epoch's common-subset composition.
#[derive(Debug)]
pub struct AcsState {
    n: usize,
    f: usize,
    delivered: HashSet<u32>,
    inputs: HashMap<u32, bool>,
    decided: HashMap<u32, bool>,
    completed: bool,
}

impl AcsState {
    /// Create the composition for `n` validators tolerating `f` faults.
    pub fn new(n: usize, f: usize) -> Self {
        Self {
            n,
            f,
            delivered: HashSet::new(),
            inputs: HashMap::new(),
            decided: HashMap::new(),
            completed: false,
        }
    }

    /// Whether an instance already received input.
    pub fn has_input(&self, proposer_index: u32) -> bool {
        self.inputs.contains_key(&proposer_index)
    }

    /// The accepted subset, once every BBA has decided.
    pub fn accepted(&self) -> Option<Vec<u32>> {
        if self.decided.len() < self.n {
            return None;
        }
        let mut accepted: Vec<u32> = self
            .decided
            .iter()
            .filter(|(_, &v)| v)
            .map(|(&i, _)| i)
            .collect();
        accepted.sort_unstable();
        Some(accepted)
    }

    /// RBC instance `proposer_index` delivered.
    pub fn on_rbc_delivered(&mut self, proposer_index: u32) -> Vec<AcsEffect> {
        let mut effects = Vec::new();
        if !self.delivered.insert(proposer_index) {
            return effects;
        }

        if !self.has_input(proposer_index) {
            self.inputs.insert(proposer_index, true);
            effects.push(AcsEffect::InputBba {
                proposer_index,
                value: true,
            });
        }

        self.try_complete(&mut effects);
        effects
    }

    /// BBA instance `proposer_index` decided `value`.
    pub fn on_bba_decided(&mut self, proposer_index: u32, value: bool) -> Vec<AcsEffect> {
        let mut effects = Vec::new();
        if self.decided.insert(proposer_index, value).is_some() {
            return effects;
        }

        // Once n - f proposals are accepted, reject everything still
        // undecided on our side by feeding 0.
        let ones = self.decided.values().filter(|v| **v).count();
        if ones >= self.n - self.f {
            for index in 0..self.n as u32 {
                if !self.has_input(index) {
                    self.inputs.insert(index, false);
                    effects.push(AcsEffect::InputBba {
                        proposer_index: index,
                        value: false,
                    });
                }
            }
        }

        self.try_complete(&mut effects);
        effects
    }

    /// Complete when every BBA decided and every accepted index has a
    /// delivered broadcast.
    fn try_complete(&mut self, effects: &mut Vec<AcsEffect>) {
        if self.completed {
            return;
        }
        let Some(accepted) = self.accepted() else {
            return;
        };
        if !accepted.iter().all(|i| self.delivered.contains(i)) {
            return;
        }

        debug!(accepted = ?accepted, "common subset complete");
        self.completed = true;
        effects.push(AcsEffect::Complete { accepted });
    }
}
