//! The common coin.
//!
//! For each `(epoch, proposer, round)`, every validator signs the
//! deterministic coin preimage with its threshold share. Any `2f + 1`
//! shares interpolate to the unique group signature, so every honest
//! validator derives the same signature bytes and therefore the same coin
//! bit, while no `f` adversaries can predict it before `f + 1` honest
//! shares exist.

use crate::messages::{coin_preimage, CoinShare};
use conductor_crypto::threshold::{sign_share, SecretShare};
use conductor_crypto::{blake3_hash, BlsPublicKey, BlsSignature};
use conductor_types::{Epoch, ValidatorId};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Identifies one coin flip.
type CoinId = (Epoch, u32, u32);

/// Collects coin shares and reveals coin values.
#[derive(Debug)]
pub struct CommonCoin {
    threshold: u32,
    secret_share: SecretShare,
    share_publics: Vec<BlsPublicKey>,
    /// Shares collected per flip, keyed by 1-based share index.
    collected: HashMap<CoinId, BTreeMap<u32, conductor_crypto::threshold::SignatureShare>>,
    /// Revealed values.
    values: HashMap<CoinId, bool>,
}

impl CommonCoin {
    /// Create the coin over this validator's share and the published
    /// share verification keys (active-set order).
    pub fn new(threshold: u32, secret_share: SecretShare, share_publics: Vec<BlsPublicKey>) -> Self {
        Self {
            threshold,
            secret_share,
            share_publics,
            collected: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Produce our share for a flip. The proposer's identifier keys the
    /// preimage so distinct BBA instances flip independent coins.
    pub fn local_share(
        &self,
        epoch: Epoch,
        proposer: &ValidatorId,
        proposer_index: u32,
        round: u32,
    ) -> CoinShare {
        let preimage = coin_preimage(epoch, proposer, round);
        let share = sign_share(&self.secret_share, &preimage);
        CoinShare {
            epoch,
            proposer_index,
            round,
            share_index: share.index,
            share: share.signature.to_bytes(),
        }
    }

    /// Record a share (our own included). Returns the coin value when
    /// this share reveals it. Invalid shares are ignored with a trace;
    /// they cannot block the flip because honest shares suffice.
    pub fn on_share(
        &mut self,
        proposer: &ValidatorId,
        msg: &CoinShare,
    ) -> Option<bool> {
        let id: CoinId = (msg.epoch, msg.proposer_index, msg.round);
        if let Some(&value) = self.values.get(&id) {
            return Some(value);
        }

        if msg.share_index == 0 || msg.share_index as usize > self.share_publics.len() {
            trace!(share_index = msg.share_index, "coin share index out of range");
            return None;
        }

        let Ok(signature) = BlsSignature::from_bytes(&msg.share) else {
            trace!(share_index = msg.share_index, "undecodable coin share");
            return None;
        };

        let preimage = coin_preimage(msg.epoch, proposer, msg.round);
        let share_public = &self.share_publics[msg.share_index as usize - 1];
        if !signature.verify(&preimage, share_public) {
            trace!(share_index = msg.share_index, "coin share fails verification");
            return None;
        }

        let shares = self.collected.entry(id).or_default();
        shares.entry(msg.share_index).or_insert(
            conductor_crypto::threshold::SignatureShare {
                index: msg.share_index,
                signature,
            },
        );

        if (shares.len() as u32) < self.threshold {
            return None;
        }

        let collected: Vec<_> = shares.values().cloned().collect();
        let group_signature =
            conductor_crypto::threshold::combine_signature_shares(self.threshold, &collected)
                .ok()?;

        // The group signature is unique for the preimage; its hash's low
        // bit is the coin.
        let value = blake3_hash(&group_signature.to_bytes())[0] & 1 == 1;
        debug!(
            epoch = msg.epoch,
            proposer_index = msg.proposer_index,
            round = msg.round,
            value,
            "coin revealed"
        );
        self.values.insert(id, value);
        self.collected.remove(&id);
        Some(value)
    }

    /// A previously revealed value, if any.
    pub fn value(&self, epoch: Epoch, proposer_index: u32, round: u32) -> Option<bool> {
        self.values.get(&(epoch, proposer_index, round)).copied()
    }

    /// Drop state for epochs below the watermark.
    pub fn forget_before(&mut self, epoch: Epoch) {
        self.collected.retain(|(e, _, _), _| *e >= epoch);
        self.values.retain(|(e, _, _), _| *e >= epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_crypto::threshold::ThresholdDealer;

    fn coins(n: u32, t: u32) -> (Vec<CommonCoin>, ValidatorId) {
        let dealt = ThresholdDealer::deal(n, t).unwrap();
        let proposer = ValidatorId([7u8; 32]);
        let coins = dealt
            .shares
            .into_iter()
            .map(|share| CommonCoin::new(t, share, dealt.share_publics.clone()))
            .collect();
        (coins, proposer)
    }

    #[test]
    fn test_coin_identical_across_validators() {
        let (mut coins, proposer) = coins(4, 3);

        let shares: Vec<CoinShare> = coins
            .iter()
            .map(|c| c.local_share(1, &proposer, 0, 0))
            .collect();

        let mut revealed = Vec::new();
        for coin in coins.iter_mut() {
            let mut value = None;
            for share in &shares {
                value = coin.on_share(&proposer, share);
                if value.is_some() {
                    break;
                }
            }
            revealed.push(value.expect("threshold met"));
        }

        assert!(revealed.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_no_value_below_threshold() {
        let (mut coins, proposer) = coins(4, 3);
        let shares: Vec<CoinShare> = coins
            .iter()
            .map(|c| c.local_share(1, &proposer, 0, 0))
            .collect();

        let coin = &mut coins[0];
        assert!(coin.on_share(&proposer, &shares[0]).is_none());
        assert!(coin.on_share(&proposer, &shares[1]).is_none());
        assert!(coin.on_share(&proposer, &shares[2]).is_some());
    }

    #[test]
    fn test_invalid_share_ignored() {
        let (mut coins, proposer) = coins(4, 3);
        let mut bad = coins[1].local_share(1, &proposer, 0, 0);
        bad.share = [0xAAu8; 96];

        assert!(coins[0].on_share(&proposer, &bad).is_none());
        // The flip still completes from honest shares.
        let shares: Vec<CoinShare> = coins
            .iter()
            .map(|c| c.local_share(1, &proposer, 0, 0))
            .collect();
        let mut value = None;
        for share in &shares {
            value = coins[0].on_share(&proposer, share);
            if value.is_some() {
                break;
            }
        }
        assert!(value.is_some());
    }

    #[test]
    fn test_distinct_flips_are_independent_keys() {
        let (mut coins, proposer) = coins(4, 3);
        let share_r0 = coins[0].local_share(1, &proposer, 0, 0);
        let share_r1 = coins[0].local_share(1, &proposer, 0, 1);
        assert_ne!(share_r0.share, share_r1.share);

        // A round-1 share does not count toward round 0.
        let c = &mut coins[1];
        c.on_share(&proposer, &share_r1);
        assert!(c.value(1, 0, 0).is_none());
    }
}
