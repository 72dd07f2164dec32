//! # BLS12-381 Signatures
//!
//! This module provides BLS (Boneh-Lynn-Shacham) signatures on the BLS12-381
//! curve. Conductor uses BLS in two roles:
//!
//! - **Identity signatures**: every validator holds a long-lived key pair;
//!   the hash of its public key is the validator's identifier, and the key
//!   signs peer-message envelopes and day-proof announcements.
//! - **Threshold shares**: the group signing key behind quorum certificates
//!   and the common coin is Shamir-shared; partial signatures are ordinary
//!   BLS signatures under share keys (see [`crate::threshold`]).
//!
//! ## Security Features
//!
//! - **Rogue Key Protection**: Proof-of-possession (PoP) required for all keys
//! - **Canonical Encoding**: Signatures and public keys validated for
//!   canonical form on decode
//! - **Domain Separation**: message-type prefixes live in the signing
//!   preimages; the curve-level DST is fixed per deployment
//!
//! ## Key Types
//!
//! - `BlsPrivateKey` - Secret key for signing (32-byte scalar)
//! - `BlsPublicKey` - Public key (48-byte G1 point)
//! - `BlsSignature` - Signature (96-byte G2 point)
//! - `BlsProofOfPossession` - Proof that the holder knows the private key
//!
//! ## Example
//!
//! ```rust
//! use conductor_crypto::bls::BlsPrivateKey;
//!
//! let sk = BlsPrivateKey::random();
//! let pk = sk.public_key();
//! let sig = sk.sign(b"day proof digest");
//! assert!(sig.verify(b"day proof digest", &pk));
//!
//! let pop = sk.generate_proof_of_possession();
//! assert!(pop.verify(&pk));
//! ```

use crate::{CryptoError, Result};
use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Domain separation tag for all Conductor message signatures.
pub(crate) const DST_SIG: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_CONDUCTOR_";

/// Domain separation tag for proof-of-possession.
const DST_POP: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_CONDUCTOR_POP_";

// ============================================================================
// Proof of Possession
// ============================================================================

/// Proof of Possession (PoP) for a BLS public key.
///
/// A PoP proves that the holder of a public key knows the corresponding
/// private key, preventing rogue key attacks when keys participate in
/// aggregated constructions.
#[derive(Clone, PartialEq, Eq)]
pub struct BlsProofOfPossession {
    inner: Signature,
}

impl BlsProofOfPossession {
    /// Create a proof of possession from compressed bytes (96 bytes).
    pub fn from_bytes(bytes: &[u8; 96]) -> Result<Self> {
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;

        // Reject non-canonical encodings.
        if sig.to_bytes() != *bytes {
            return Err(CryptoError::BlsError(
                "non-canonical signature encoding".to_string(),
            ));
        }

        Ok(Self { inner: sig })
    }

    /// Create a proof of possession from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_array::<96>(hex)?;
        Self::from_bytes(&bytes)
    }

    /// Get the compressed bytes (96 bytes).
    pub fn to_bytes(&self) -> [u8; 96] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded proof.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify the proof of possession against a public key.
    pub fn verify(&self, public_key: &BlsPublicKey) -> bool {
        let pk_bytes = public_key.to_bytes();
        let result = self
            .inner
            .verify(true, &pk_bytes, DST_POP, &[], &public_key.inner, true);
        result == BLST_ERROR::BLST_SUCCESS
    }
}

impl std::fmt::Debug for BlsProofOfPossession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsProofOfPossession")
            .field("bytes", &self.to_hex())
            .finish()
    }
}

// ============================================================================
// BLS Private Key
// ============================================================================

/// BLS private key (secret key).
///
/// A 32-byte scalar used for signing. Must be kept secret.
pub struct BlsPrivateKey {
    inner: SecretKey,
}

impl BlsPrivateKey {
    /// Generate a random BLS private key using a cryptographically secure RNG.
    pub fn random() -> Self {
        let mut ikm = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut ikm);
        let sk = SecretKey::key_gen(&ikm, &[]).expect("key generation failed");
        Self { inner: sk }
    }

    /// Create a BLS private key from input keying material.
    ///
    /// Uses BLS key derivation (IKM -> secret key).
    ///
    /// # Arguments
    ///
    /// * `ikm` - Input keying material (at least 32 bytes)
    pub fn from_seed(ikm: &[u8]) -> Result<Self> {
        if ikm.len() < 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: ikm.len(),
            });
        }
        let sk = SecretKey::key_gen(ikm, &[])
            .map_err(|_| CryptoError::InvalidPrivateKey("key generation failed".to_string()))?;
        Ok(Self { inner: sk })
    }

    /// Create a BLS private key from raw bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - 32-byte scalar in big-endian format
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let sk = SecretKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{:?}", e)))?;
        Ok(Self { inner: sk })
    }

    /// Create a BLS private key from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_array::<32>(hex)?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw bytes of the private key.
    ///
    /// # Security
    ///
    /// The returned bytes are the secret key; handle accordingly.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded private key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Derive the public key from this private key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Generate a proof of possession for this key.
    ///
    /// Generated once when creating a validator key and stored with the
    /// validator record.
    pub fn generate_proof_of_possession(&self) -> BlsProofOfPossession {
        let pk = self.public_key();
        let pk_bytes = pk.to_bytes();
        let sig = self.inner.sign(&pk_bytes, DST_POP, &[]);
        BlsProofOfPossession { inner: sig }
    }

    /// Sign a message.
    ///
    /// Message-type domain separation is the caller's responsibility: every
    /// signing preimage in `conductor-types` starts with its own domain
    /// prefix, so a day-proof signature can never be replayed as an envelope
    /// signature.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let sig = self.inner.sign(message, DST_SIG, &[]);
        BlsSignature { inner: sig }
    }
}

impl Clone for BlsPrivateKey {
    fn clone(&self) -> Self {
        let bytes = self.to_bytes();
        Self::from_bytes(&bytes).expect("cloning valid key should succeed")
    }
}

impl std::fmt::Debug for BlsPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsPrivateKey")
            .field("public_key", &self.public_key().to_hex())
            .finish()
    }
}

// ============================================================================
// BLS Public Key
// ============================================================================

/// BLS public key (48 bytes, G1 point).
///
/// Implements `Ord` so validator sets can be ordered deterministically.
#[derive(Clone)]
pub struct BlsPublicKey {
    inner: PublicKey,
}

impl BlsPublicKey {
    /// Create a public key from compressed bytes (48 bytes).
    ///
    /// Validates that the bytes represent a valid point on the curve
    /// and are in canonical form.
    pub fn from_bytes(bytes: &[u8; 48]) -> Result<Self> {
        let pk = PublicKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;

        if pk.to_bytes() != *bytes {
            return Err(CryptoError::BlsError(
                "non-canonical public key encoding".to_string(),
            ));
        }

        Ok(Self { inner: pk })
    }

    /// Create a public key from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_array::<48>(hex)?;
        Self::from_bytes(&bytes)
    }

    /// Get the compressed public key bytes (48 bytes).
    pub fn to_bytes(&self) -> [u8; 48] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded public key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature against a message.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        signature.verify(message, self)
    }
}

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl PartialOrd for BlsPublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlsPublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl std::hash::Hash for BlsPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsPublicKey")
            .field("bytes", &self.to_hex())
            .finish()
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BlsPublicKey::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 48] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| serde::de::Error::custom("expected 48 bytes"))?;
            BlsPublicKey::from_bytes(&arr).map_err(serde::de::Error::custom)
        }
    }
}

// ============================================================================
// BLS Signature
// ============================================================================

/// BLS signature (96 bytes, G2 point).
#[derive(Clone)]
pub struct BlsSignature {
    inner: Signature,
}

impl BlsSignature {
    /// Create a signature from compressed bytes (96 bytes).
    ///
    /// Validates canonical encoding to prevent malleability.
    pub fn from_bytes(bytes: &[u8; 96]) -> Result<Self> {
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;

        if sig.to_bytes() != *bytes {
            return Err(CryptoError::BlsError(
                "non-canonical signature encoding".to_string(),
            ));
        }

        Ok(Self { inner: sig })
    }

    /// Create a signature from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex_array::<96>(hex)?;
        Self::from_bytes(&bytes)
    }

    /// Get the compressed signature bytes (96 bytes).
    pub fn to_bytes(&self) -> [u8; 96] {
        self.inner.to_bytes()
    }

    /// Get the hex-encoded signature.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify the signature against a message and public key.
    pub fn verify(&self, message: &[u8], public_key: &BlsPublicKey) -> bool {
        let result = self
            .inner
            .verify(true, message, DST_SIG, &[], &public_key.inner, true);
        result == BLST_ERROR::BLST_SUCCESS
    }
}

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsSignature")
            .field("bytes", &self.to_hex())
            .finish()
    }
}

impl Serialize for BlsSignature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            BlsSignature::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 96] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| serde::de::Error::custom("expected 96 bytes"))?;
            BlsSignature::from_bytes(&arr).map_err(serde::de::Error::custom)
        }
    }
}

// ============================================================================
// Validator Key Pair
// ============================================================================

/// A complete BLS key pair for a validator, including proof-of-possession.
///
/// This is the recommended type for validator key management; it ensures
/// that every validator key has a valid proof-of-possession.
#[derive(Clone)]
pub struct ValidatorKeyPair {
    private_key: BlsPrivateKey,
    public_key: BlsPublicKey,
    proof_of_possession: BlsProofOfPossession,
}

impl ValidatorKeyPair {
    /// Generate a new random validator key pair with proof-of-possession.
    pub fn generate() -> Self {
        Self::from_private_key(BlsPrivateKey::random())
    }

    /// Create a validator key pair from an existing private key.
    pub fn from_private_key(private_key: BlsPrivateKey) -> Self {
        let public_key = private_key.public_key();
        let proof_of_possession = private_key.generate_proof_of_possession();

        Self {
            private_key,
            public_key,
            proof_of_possession,
        }
    }

    /// Create a validator key pair from components.
    ///
    /// # Errors
    ///
    /// Returns an error if the proof-of-possession is invalid.
    pub fn from_components(
        private_key: BlsPrivateKey,
        proof_of_possession: BlsProofOfPossession,
    ) -> Result<Self> {
        let public_key = private_key.public_key();

        if !proof_of_possession.verify(&public_key) {
            return Err(CryptoError::BlsError(
                "proof-of-possession verification failed".to_string(),
            ));
        }

        Ok(Self {
            private_key,
            public_key,
            proof_of_possession,
        })
    }

    /// Get the private key.
    pub fn private_key(&self) -> &BlsPrivateKey {
        &self.private_key
    }

    /// Get the public key.
    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public_key
    }

    /// Get the proof-of-possession.
    pub fn proof_of_possession(&self) -> &BlsProofOfPossession {
        &self.proof_of_possession
    }

    /// Verify the proof-of-possession is valid for this key pair.
    pub fn verify_proof_of_possession(&self) -> bool {
        self.proof_of_possession.verify(&self.public_key)
    }

    /// Sign a message with the private key.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        self.private_key.sign(message)
    }
}

impl std::fmt::Debug for ValidatorKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorKeyPair")
            .field("public_key", &self.public_key.to_hex())
            .field("pop_valid", &self.verify_proof_of_possession())
            .finish()
    }
}

fn decode_hex_array<const N: usize>(hex: &str) -> Result<[u8; N]> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let bytes = hex::decode(hex)?;
    if bytes.len() != N {
        return Err(CryptoError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
