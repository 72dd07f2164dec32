//! # Conductor Crypto
//!
//! Cryptographic primitives for the Conductor federation core.
//!
//! This crate provides:
//! - **BLAKE3 hashing** - content addressing, digests and the VDF chain
//! - **BLS12-381 signatures** - validator identity keys with
//!   proof-of-possession
//! - **Threshold cryptography** - Shamir-shared group key for quorum
//!   certificates, the common coin and sealed proposals
//!
//! ## Example
//!
//! ```rust
//! use conductor_crypto::{blake3_hash, bls::BlsPrivateKey};
//!
//! // Hash some data
//! let digest = blake3_hash(b"federation event");
//!
//! // Generate a validator key and sign
//! let private_key = BlsPrivateKey::random();
//! let signature = private_key.sign(&digest);
//! assert!(signature.verify(&digest, &private_key.public_key()));
//! ```

pub mod bls;
pub mod hash;
pub mod threshold;

// Re-export commonly used items
pub use bls::{BlsPrivateKey, BlsProofOfPossession, BlsPublicKey, BlsSignature, ValidatorKeyPair};
pub use hash::{blake3_concat, blake3_hash, Hasher};
pub use threshold::{
    combine_decryption, combine_signature_shares, decrypt_share, encrypt_to_group, sign_share,
    verify_share, DealtKeys, DecryptionShare, GroupCiphertext, SecretShare, SignatureShare,
    ThresholdDealer,
};

/// Common type alias for a 32-byte hash.
pub type Hash = [u8; 32];

/// Error types for cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Malformed threshold share (bad index or bad point encoding)
    #[error("invalid share: {0}")]
    InvalidShare(String),

    /// Fewer distinct shares than the threshold requires
    #[error("insufficient shares: need {required}, got {provided}")]
    InsufficientShares {
        /// The threshold `t`.
        required: usize,
        /// Distinct shares actually supplied.
        provided: usize,
    },

    /// Recovered plaintext failed the ciphertext integrity tag
    #[error("combined decryption failed integrity check")]
    IntegrityFailure,

    /// BLS operation failed
    #[error("BLS operation failed: {0}")]
    BlsError(String),

    /// Invalid input length
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// Hex decoding error
    #[error("hex decoding error: {0}")]
    HexError(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::HexError(e.to_string())
    }
}

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
