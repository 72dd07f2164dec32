//! Genesis parameters: the federation's seed and founding validator set.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// A founding validator's public key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Hex-encoded compressed BLS public key (48 bytes).
    pub public_key: String,
    /// Hex-encoded proof-of-possession (96 bytes).
    pub proof_of_possession: String,
}

/// Genesis configuration.
///
/// The genesis seed anchors every day seed; it must be identical across
/// the federation and can never change once state exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Hex-encoded genesis seed bytes.
    pub genesis_seed: String,
    /// Founding validators.
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
}

impl GenesisConfig {
    /// Decode the genesis seed.
    pub fn seed_bytes(&self) -> ConfigResult<Vec<u8>> {
        let seed = hex::decode(self.genesis_seed.trim_start_matches("0x"))
            .map_err(|e| ConfigError::Invalid(format!("genesis_seed is not hex: {e}")))?;
        if seed.is_empty() {
            return Err(ConfigError::Invalid("genesis_seed is empty".to_string()));
        }
        Ok(seed)
    }

    /// Validate the genesis section.
    pub fn validate(&self, min_validators: u32) -> ConfigResult<()> {
        self.seed_bytes()?;

        if (self.validators.len() as u32) < min_validators {
            return Err(ConfigError::Invalid(format!(
                "genesis lists {} validators, fewer than min_validators = {}",
                self.validators.len(),
                min_validators
            )));
        }

        for (i, validator) in self.validators.iter().enumerate() {
            let key = hex::decode(validator.public_key.trim_start_matches("0x"))
                .map_err(|e| ConfigError::Invalid(format!("validator {i} public_key: {e}")))?;
            if key.len() != 48 {
                return Err(ConfigError::Invalid(format!(
                    "validator {i} public_key is {} bytes, expected 48",
                    key.len()
                )));
            }
            let pop = hex::decode(validator.proof_of_possession.trim_start_matches("0x"))
                .map_err(|e| {
                    ConfigError::Invalid(format!("validator {i} proof_of_possession: {e}"))
                })?;
            if pop.len() != 96 {
                return Err(ConfigError::Invalid(format!(
                    "validator {i} proof_of_possession is {} bytes, expected 96",
                    pop.len()
                )));
            }
        }

        Ok(())
    }
}
