//! Validator key files.
//!
//! The formation ceremony generates one file per validator carrying its
//! long-lived identity key, its threshold share, and the federation's
//! public material. Files are TOML with hex-encoded secrets and must be
//! kept out of logs and backups.

use conductor_consensus::KeyContext;
use conductor_crypto::threshold::{SecretShare, ThresholdDealer};
use conductor_crypto::{BlsPrivateKey, BlsPublicKey, ValidatorKeyPair};
use conductor_types::{Validator, ValidatorId, ValidatorSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while handling key files.
#[derive(Debug, Error)]
pub enum KeyFileError {
    /// File I/O failed.
    #[error("key file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed.
    #[error("key file parse: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("key file serialize: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field failed to decode.
    #[error("invalid key material: {0}")]
    Invalid(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] conductor_crypto::CryptoError),
}

/// One validator's complete key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorKeyFile {
    /// Hex-encoded identity private key (32 bytes).
    pub private_key: String,
    /// Hex-encoded proof-of-possession (96 bytes).
    pub proof_of_possession: String,
    /// 1-based threshold share index (the validator's active-set
    /// position plus one).
    pub share_index: u32,
    /// Hex-encoded threshold share secret (32 bytes).
    pub share_secret: String,
    /// Hex-encoded group public key (48 bytes).
    pub group_public_key: String,
    /// Hex-encoded share verification keys, active-set order.
    pub share_public_keys: Vec<String>,
    /// Hex-encoded identity public keys of the whole federation.
    pub federation: Vec<String>,
}

impl ValidatorKeyFile {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, KeyFileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), KeyFileError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reconstruct the identity key pair.
    pub fn identity(&self) -> Result<ValidatorKeyPair, KeyFileError> {
        let private_key = BlsPrivateKey::from_hex(&self.private_key)?;
        Ok(ValidatorKeyPair::from_private_key(private_key))
    }

    /// Reconstruct the federation's validator set.
    pub fn validator_set(&self) -> Result<ValidatorSet, KeyFileError> {
        let validators = self
            .federation
            .iter()
            .map(|hex_key| Ok(Validator::from_public_key(&BlsPublicKey::from_hex(hex_key)?)))
            .collect::<Result<Vec<_>, KeyFileError>>()?;
        ValidatorSet::new(validators).map_err(|e| KeyFileError::Invalid(e.to_string()))
    }

    /// Reconstruct the threshold key context.
    pub fn key_context(&self) -> Result<KeyContext, KeyFileError> {
        let group_public = BlsPublicKey::from_hex(&self.group_public_key)?;
        let share_publics = self
            .share_public_keys
            .iter()
            .map(|hex_key| BlsPublicKey::from_hex(hex_key).map_err(KeyFileError::from))
            .collect::<Result<Vec<_>, _>>()?;
        let secret = BlsPrivateKey::from_hex(&self.share_secret)?;

        Ok(KeyContext {
            group_public,
            share_publics,
            secret_share: SecretShare {
                index: self.share_index,
                secret,
            },
        })
    }
}

/// Run the formation ceremony: generate `n` identity keys, deal the
/// group key `t`-of-`n`, and assign shares in canonical set order.
///
/// Returns the key files in canonical (active-set) order.
pub fn generate_federation(n: u32, t: u32) -> Result<Vec<ValidatorKeyFile>, KeyFileError> {
    let identities: Vec<ValidatorKeyPair> =
        (0..n).map(|_| ValidatorKeyPair::generate()).collect();

    // Canonical order is ascending by identifier; shares are assigned by
    // position in that order.
    let validators: Vec<Validator> = identities
        .iter()
        .map(|kp| Validator::from_public_key(kp.public_key()))
        .collect();
    let set = ValidatorSet::new(validators).map_err(|e| KeyFileError::Invalid(e.to_string()))?;

    let dealt = ThresholdDealer::deal(n, t)?;
    let federation: Vec<String> = set
        .descriptors()
        .iter()
        .map(|v| hex::encode(v.public_key))
        .collect();
    let share_public_keys: Vec<String> = dealt
        .share_publics
        .iter()
        .map(|pk| pk.to_hex())
        .collect();

    let mut files = Vec::with_capacity(n as usize);
    for (position, descriptor) in set.descriptors().iter().enumerate() {
        let identity = identities
            .iter()
            .find(|kp| ValidatorId::from_public_key(kp.public_key()) == descriptor.id)
            .expect("identity exists for every descriptor");

        files.push(ValidatorKeyFile {
            private_key: identity.private_key().to_hex(),
            proof_of_possession: identity.proof_of_possession().to_hex(),
            share_index: position as u32 + 1,
            share_secret: dealt.shares[position].secret.to_hex(),
            group_public_key: dealt.group_public.to_hex(),
            share_public_keys: share_public_keys.clone(),
            federation: federation.clone(),
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceremony_round_trips_through_toml() {
        let files = generate_federation(4, 3).unwrap();
        assert_eq!(files.len(), 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validator-0.toml");
        files[0].save(&path).unwrap();
        let restored = ValidatorKeyFile::load(&path).unwrap();

        assert_eq!(restored.share_index, files[0].share_index);
        assert_eq!(
            restored.identity().unwrap().public_key(),
            files[0].identity().unwrap().public_key()
        );
    }

    #[test]
    fn test_share_indices_follow_canonical_order() {
        let files = generate_federation(4, 3).unwrap();
        let set = files[0].validator_set().unwrap();

        for file in &files {
            let id = ValidatorId::from_public_key(file.identity().unwrap().public_key());
            let position = set.index_of(&id).unwrap();
            assert_eq!(file.share_index, position + 1);
        }
    }

    #[test]
    fn test_key_context_verifies_own_share() {
        let files = generate_federation(4, 3).unwrap();
        let context = files[1].key_context().unwrap();

        let share = conductor_crypto::threshold::sign_share(&context.secret_share, b"probe");
        assert!(conductor_crypto::threshold::verify_share(
            &context.share_publics[context.secret_share.index as usize - 1],
            b"probe",
            &share,
        ));
    }
}
