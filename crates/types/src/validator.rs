//! Validator descriptors and the deterministically ordered active set.

use crate::{Result, TypesError, ValidatorId};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::BlsPublicKey;
use serde::{Deserialize, Serialize};

/// A validator's persisted descriptor.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Validator {
    /// Identifier: hash of the public key.
    pub id: ValidatorId,
    /// Compressed long-lived BLS public key.
    #[serde(with = "crate::serde_bytes_array")]
    pub public_key: [u8; 48],
}

impl Validator {
    /// Build a descriptor from a public key, deriving the identifier.
    pub fn from_public_key(public_key: &BlsPublicKey) -> Self {
        Self {
            id: ValidatorId::from_public_key(public_key),
            public_key: public_key.to_bytes(),
        }
    }
}

/// The active validator set for an epoch.
///
/// Validators are ordered ascending by identifier; every signer bitmap and
/// every per-proposer consensus instance indexes into this ordering. The
/// set is constructed once per epoch and shared as an immutable snapshot.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    parsed_keys: Vec<BlsPublicKey>,
}

impl ValidatorSet {
    /// Build a set from descriptors.
    ///
    /// Sorts by identifier, rejects duplicates, and verifies that each
    /// identifier matches the hash of its public key.
    pub fn new(mut validators: Vec<Validator>) -> Result<Self> {
        if validators.is_empty() {
            return Err(TypesError::InvalidValidatorSet(
                "empty validator set".to_string(),
            ));
        }

        validators.sort_by(|a, b| a.id.cmp(&b.id));
        for pair in validators.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(TypesError::InvalidValidatorSet(format!(
                    "duplicate validator {}",
                    pair[0].id
                )));
            }
        }

        let mut parsed_keys = Vec::with_capacity(validators.len());
        for validator in &validators {
            let key = BlsPublicKey::from_bytes(&validator.public_key)?;
            if ValidatorId::from_public_key(&key) != validator.id {
                return Err(TypesError::InvalidValidatorSet(format!(
                    "identifier {} does not match public key",
                    validator.id
                )));
            }
            parsed_keys.push(key);
        }

        Ok(Self {
            validators,
            parsed_keys,
        })
    }

    /// Number of validators `n`.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty (never true for a constructed set).
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Maximum number of Byzantine validators tolerated: `f = (n-1)/3`.
    pub fn max_faulty(&self) -> usize {
        (self.validators.len() - 1) / 3
    }

    /// Signers required for a quorum certificate: `2f + 1`.
    pub fn quorum_threshold(&self) -> u32 {
        (2 * self.max_faulty() + 1) as u32
    }

    /// Erasure-coding reconstruction threshold: `k = n - 2f`.
    pub fn reconstruction_threshold(&self) -> usize {
        self.validators.len() - 2 * self.max_faulty()
    }

    /// Whether an identifier belongs to the set.
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.index_of(id).is_some()
    }

    /// Position of a validator in the canonical ordering.
    pub fn index_of(&self, id: &ValidatorId) -> Option<u32> {
        self.validators
            .binary_search_by(|v| v.id.cmp(id))
            .ok()
            .map(|i| i as u32)
    }

    /// Validator descriptor at a given position.
    pub fn by_index(&self, index: u32) -> Option<&Validator> {
        self.validators.get(index as usize)
    }

    /// Parsed public key at a given position.
    pub fn key_by_index(&self, index: u32) -> Option<&BlsPublicKey> {
        self.parsed_keys.get(index as usize)
    }

    /// Parsed public key for an identifier.
    pub fn public_key_of(&self, id: &ValidatorId) -> Option<&BlsPublicKey> {
        self.index_of(id).and_then(|i| self.key_by_index(i))
    }

    /// All identifiers in canonical order.
    pub fn ids(&self) -> impl Iterator<Item = &ValidatorId> {
        self.validators.iter().map(|v| &v.id)
    }

    /// All descriptors in canonical order (for persistence).
    pub fn descriptors(&self) -> &[Validator] {
        &self.validators
    }

    /// A new set with the given identifiers removed.
    ///
    /// Used when blacklist entries activate at their effective day.
    pub fn without(&self, excluded: &[ValidatorId]) -> Result<Self> {
        let remaining: Vec<Validator> = self
            .validators
            .iter()
            .filter(|v| !excluded.contains(&v.id))
            .cloned()
            .collect();
        Self::new(remaining)
    }
}
