//! # Threshold Cryptography
//!
//! The federation's quorum certificates, common coin and sealed proposals
//! all hang off a single group key pair whose secret is Shamir-shared among
//! the validators. Each validator holds one share `s_i = P(i)` of a random
//! polynomial `P` of degree `t - 1`; the group secret is `P(0)` and is never
//! materialized after dealing.
//!
//! - **Signing**: a signature share is an ordinary BLS signature under the
//!   share key. Any `t` valid shares interpolate (Lagrange in the exponent)
//!   to the unique group signature, so combination is independent of which
//!   `t`-subset is used and byte-identical for the same share multiset.
//! - **Encryption**: hashed ElGamal against the group public key. A
//!   decryption share is the share-scalar multiple of the ciphertext's
//!   ephemeral point; `t` shares interpolate to the shared secret point.
//!
//! Shares are dealt in a ceremony at federation formation and re-dealt on
//! membership change. Share indices are 1-based; index 0 is rejected
//! because evaluating the polynomial there would reveal the group secret.
//!
//! ## Example
//!
//! ```rust
//! use conductor_crypto::threshold::{ThresholdDealer, sign_share, combine_signature_shares};
//!
//! let dealt = ThresholdDealer::deal(4, 3).unwrap();
//! let message = b"block digest";
//!
//! let shares: Vec<_> = dealt
//!     .shares
//!     .iter()
//!     .map(|s| sign_share(s, message))
//!     .collect();
//!
//! let group_sig = combine_signature_shares(3, &shares[..3]).unwrap();
//! assert!(group_sig.verify(message, &dealt.group_public));
//! ```

use crate::bls::{BlsPrivateKey, BlsPublicKey, BlsSignature};
use crate::hash::{blake3_concat, Hasher};
use crate::{CryptoError, Result};

use blst::{
    blst_bendian_from_scalar, blst_fr, blst_fr_add, blst_fr_eucl_inverse, blst_fr_from_scalar,
    blst_fr_mul, blst_fr_sub, blst_p1, blst_p1_add_or_double, blst_p1_affine, blst_p1_compress,
    blst_p1_from_affine, blst_p1_mult, blst_p1_uncompress, blst_p2, blst_p2_add_or_double,
    blst_p2_affine, blst_p2_compress, blst_p2_from_affine, blst_p2_mult, blst_p2_uncompress,
    blst_scalar, blst_scalar_from_bendian, blst_scalar_from_fr, blst_scalar_from_uint64,
    BLST_ERROR,
};

/// Keystream derivation context for group encryption.
const TE_KEYSTREAM_CONTEXT: &[u8] = b"conductor.threshold-encryption.keystream.v1";

/// Integrity-tag derivation context for group encryption.
const TE_TAG_CONTEXT: &[u8] = b"conductor.threshold-encryption.tag.v1";

// ============================================================================
// Dealt key material
// ============================================================================

/// One validator's share of the group secret key.
///
/// The share signs ordinary BLS signatures; its `index` is the x-coordinate
/// at which the sharing polynomial was evaluated (1-based).
#[derive(Clone, Debug)]
pub struct SecretShare {
    /// 1-based share index (x-coordinate of the polynomial evaluation).
    pub index: u32,
    /// The share scalar, usable as a standalone signing key.
    pub secret: BlsPrivateKey,
}

/// The output of a dealing ceremony.
#[derive(Clone, Debug)]
pub struct DealtKeys {
    /// The group public key; quorum certificates verify against it.
    pub group_public: BlsPublicKey,
    /// Per-share verification keys, indexed by `share index - 1`.
    pub share_publics: Vec<BlsPublicKey>,
    /// The secret shares, one per validator, indexed by `share index - 1`.
    pub shares: Vec<SecretShare>,
}

/// Dealer for Shamir-shared BLS keys.
///
/// Used at federation formation and again whenever the validator set
/// changes (the reshare replaces the group key wholesale).
pub struct ThresholdDealer;

impl ThresholdDealer {
    /// Deal a fresh group key shared `t`-of-`n`.
    ///
    /// # Errors
    ///
    /// Fails when `t` is zero or exceeds `n`.
    pub fn deal(n: u32, t: u32) -> Result<DealtKeys> {
        if t == 0 || t > n {
            return Err(CryptoError::BlsError(format!(
                "invalid threshold parameters: t={t}, n={n}"
            )));
        }

        // Random polynomial of degree t-1 over the scalar field. The
        // constant term is the group secret.
        let coefficients: Vec<blst_fr> = (0..t)
            .map(|_| fr_from_secret(&BlsPrivateKey::random()))
            .collect();

        let group_secret = secret_from_fr(&coefficients[0])?;
        let group_public = group_secret.public_key();

        let mut shares = Vec::with_capacity(n as usize);
        let mut share_publics = Vec::with_capacity(n as usize);
        for index in 1..=n {
            let x = fr_from_index(index);
            let value = poly_eval(&coefficients, &x);
            let secret = secret_from_fr(&value)?;
            share_publics.push(secret.public_key());
            shares.push(SecretShare { index, secret });
        }

        Ok(DealtKeys {
            group_public,
            share_publics,
            shares,
        })
    }
}

// ============================================================================
// Threshold signatures
// ============================================================================

/// A partial signature produced by one share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureShare {
    /// Index of the share that produced this partial signature.
    pub index: u32,
    /// The partial signature (a BLS signature under the share key).
    pub signature: BlsSignature,
}

/// Sign a message with a secret share, producing a signature share.
pub fn sign_share(share: &SecretShare, message: &[u8]) -> SignatureShare {
    SignatureShare {
        index: share.index,
        signature: share.secret.sign(message),
    }
}

/// Verify a signature share against its published share verification key.
pub fn verify_share(share_public: &BlsPublicKey, message: &[u8], share: &SignatureShare) -> bool {
    share.signature.verify(message, share_public)
}

/// Combine at least `t` distinct signature shares into the group signature.
///
/// The result is the unique group signature: it is identical regardless of
/// which `t`-subset (or superset) of valid shares is combined, and it
/// verifies under the group public key like any single-signer signature.
///
/// # Errors
///
/// - [`CryptoError::InsufficientShares`] when fewer than `t` distinct
///   indices are supplied.
/// - [`CryptoError::InvalidShare`] when a share index is zero or a
///   signature fails to decode as a curve point.
pub fn combine_signature_shares(t: u32, shares: &[SignatureShare]) -> Result<BlsSignature> {
    if t == 0 {
        return Err(CryptoError::InvalidShare(
            "zero threshold is meaningless".to_string(),
        ));
    }
    let distinct = dedup_by_index(shares.iter().map(|s| (s.index, s)))?;
    if (distinct.len() as u32) < t {
        return Err(CryptoError::InsufficientShares {
            required: t as usize,
            provided: distinct.len(),
        });
    }

    let indices: Vec<u32> = distinct.iter().map(|(i, _)| *i).collect();
    let mut acc: Option<blst_p2> = None;

    for (pos, (_, share)) in distinct.iter().enumerate() {
        let point = p2_from_compressed(&share.signature.to_bytes())?;
        let coeff = lagrange_at_zero(&indices, pos);
        let term = p2_mul(&point, &coeff);
        acc = Some(match acc {
            None => term,
            Some(sum) => p2_add(&sum, &term),
        });
    }

    let combined = acc.expect("at least t >= 1 shares combined");
    BlsSignature::from_bytes(&p2_compress(&combined))
}

// ============================================================================
// Threshold encryption
// ============================================================================

/// A ciphertext addressed to the group.
///
/// Only after `t` validators contribute decryption shares can the plaintext
/// be recovered; no single validator learns anything about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupCiphertext {
    /// Ephemeral public point `r * G1`, compressed.
    pub ephemeral: [u8; 48],
    /// Plaintext XOR keystream.
    pub payload: Vec<u8>,
    /// Integrity tag binding the shared secret and the plaintext.
    pub tag: [u8; 32],
}

/// One validator's contribution towards decrypting a [`GroupCiphertext`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionShare {
    /// Index of the contributing share.
    pub index: u32,
    /// `s_i * ephemeral`, compressed.
    pub point: [u8; 48],
}

/// Encrypt a plaintext to the group public key.
pub fn encrypt_to_group(group_public: &BlsPublicKey, plaintext: &[u8]) -> Result<GroupCiphertext> {
    let ephemeral_secret = BlsPrivateKey::random();
    let ephemeral = ephemeral_secret.public_key().to_bytes();

    // Shared secret point: r * group_public = s * (r * G1).
    let group_point = p1_from_compressed(&group_public.to_bytes())?;
    let r_scalar = scalar_from_secret(&ephemeral_secret);
    let shared = p1_compress(&p1_mul_scalar(&group_point, &r_scalar));

    let payload = apply_keystream(&shared, plaintext);
    let tag = blake3_concat(&[TE_TAG_CONTEXT, &shared, plaintext]);

    Ok(GroupCiphertext {
        ephemeral,
        payload,
        tag,
    })
}

/// Produce this validator's decryption share for a ciphertext.
///
/// # Errors
///
/// [`CryptoError::InvalidShare`] when the ciphertext's ephemeral point does
/// not decode.
pub fn decrypt_share(share: &SecretShare, ciphertext: &GroupCiphertext) -> Result<DecryptionShare> {
    let ephemeral = p1_from_compressed(&ciphertext.ephemeral)?;
    let scalar = scalar_from_secret(&share.secret);
    let point = p1_compress(&p1_mul_scalar(&ephemeral, &scalar));
    Ok(DecryptionShare {
        index: share.index,
        point,
    })
}

/// Combine at least `t` decryption shares and recover the plaintext.
///
/// # Errors
///
/// - [`CryptoError::InsufficientShares`] with fewer than `t` distinct shares.
/// - [`CryptoError::InvalidShare`] when a share point fails to decode.
/// - [`CryptoError::IntegrityFailure`] when the recovered plaintext does not
///   match the ciphertext's tag (wrong or corrupted shares).
pub fn combine_decryption(
    t: u32,
    ciphertext: &GroupCiphertext,
    shares: &[DecryptionShare],
) -> Result<Vec<u8>> {
    if t == 0 {
        return Err(CryptoError::InvalidShare(
            "zero threshold is meaningless".to_string(),
        ));
    }
    let distinct = dedup_by_index(shares.iter().map(|s| (s.index, s)))?;
    if (distinct.len() as u32) < t {
        return Err(CryptoError::InsufficientShares {
            required: t as usize,
            provided: distinct.len(),
        });
    }

    let indices: Vec<u32> = distinct.iter().map(|(i, _)| *i).collect();
    let mut acc: Option<blst_p1> = None;

    for (pos, (_, share)) in distinct.iter().enumerate() {
        let point = p1_from_compressed(&share.point)?;
        let coeff = lagrange_at_zero(&indices, pos);
        let term = p1_mul(&point, &coeff);
        acc = Some(match acc {
            None => term,
            Some(sum) => p1_add(&sum, &term),
        });
    }

    let shared = p1_compress(&acc.expect("at least t >= 1 shares combined"));
    let plaintext = apply_keystream(&shared, &ciphertext.payload);

    let tag = blake3_concat(&[TE_TAG_CONTEXT, &shared, &plaintext]);
    if tag != ciphertext.tag {
        return Err(CryptoError::IntegrityFailure);
    }

    Ok(plaintext)
}

/// XOR `data` against a BLAKE3 keystream derived from the shared point.
fn apply_keystream(shared: &[u8; 48], data: &[u8]) -> Vec<u8> {
    let mut keystream = vec![0u8; data.len()];
    let mut hasher = Hasher::new();
    hasher.update(TE_KEYSTREAM_CONTEXT);
    hasher.update(shared);
    hasher.finalize_xof_into(&mut keystream);

    keystream
        .iter()
        .zip(data.iter())
        .map(|(k, d)| k ^ d)
        .collect()
}

/// Deduplicate share references by index, rejecting index zero.
fn dedup_by_index<'a, T>(items: impl Iterator<Item = (u32, &'a T)>) -> Result<Vec<(u32, &'a T)>> {
    let mut seen = std::collections::BTreeMap::new();
    for (index, item) in items {
        if index == 0 {
            return Err(CryptoError::InvalidShare(
                "share index zero is reserved".to_string(),
            ));
        }
        seen.entry(index).or_insert(item);
    }
    Ok(seen.into_iter().collect())
}

// ============================================================================
// Scalar-field and curve arithmetic (blst FFI)
// ============================================================================
//
// The safe blst API does not expose the point-by-scalar operations that
// Lagrange interpolation in the exponent needs, so this section wraps the
// raw bindings. Every wrapper takes and returns plain values; no pointer
// escapes a function.

fn fr_from_index(index: u32) -> blst_fr {
    let limbs = [u64::from(index), 0, 0, 0];
    let mut scalar = blst_scalar::default();
    let mut fr = blst_fr::default();
    unsafe {
        blst_scalar_from_uint64(&mut scalar, limbs.as_ptr());
        blst_fr_from_scalar(&mut fr, &scalar);
    }
    fr
}

fn fr_from_secret(secret: &BlsPrivateKey) -> blst_fr {
    let bytes = secret.to_bytes();
    let mut scalar = blst_scalar::default();
    let mut fr = blst_fr::default();
    unsafe {
        blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
        blst_fr_from_scalar(&mut fr, &scalar);
    }
    fr
}

fn scalar_from_secret(secret: &BlsPrivateKey) -> blst_scalar {
    let bytes = secret.to_bytes();
    let mut scalar = blst_scalar::default();
    unsafe {
        blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
    }
    scalar
}

fn secret_from_fr(fr: &blst_fr) -> Result<BlsPrivateKey> {
    let mut scalar = blst_scalar::default();
    let mut bytes = [0u8; 32];
    unsafe {
        blst_scalar_from_fr(&mut scalar, fr);
        blst_bendian_from_scalar(bytes.as_mut_ptr(), &scalar);
    }
    BlsPrivateKey::from_bytes(&bytes)
}

fn fr_mul(a: &blst_fr, b: &blst_fr) -> blst_fr {
    let mut out = blst_fr::default();
    unsafe { blst_fr_mul(&mut out, a, b) };
    out
}

fn fr_add(a: &blst_fr, b: &blst_fr) -> blst_fr {
    let mut out = blst_fr::default();
    unsafe { blst_fr_add(&mut out, a, b) };
    out
}

fn fr_sub(a: &blst_fr, b: &blst_fr) -> blst_fr {
    let mut out = blst_fr::default();
    unsafe { blst_fr_sub(&mut out, a, b) };
    out
}

fn fr_inverse(a: &blst_fr) -> blst_fr {
    let mut out = blst_fr::default();
    unsafe { blst_fr_eucl_inverse(&mut out, a) };
    out
}

/// Evaluate the polynomial with the given coefficients at `x` (Horner).
fn poly_eval(coefficients: &[blst_fr], x: &blst_fr) -> blst_fr {
    let mut result = *coefficients.last().expect("polynomial has coefficients");
    for coeff in coefficients.iter().rev().skip(1) {
        result = fr_add(&fr_mul(&result, x), coeff);
    }
    result
}

/// Lagrange basis coefficient at zero for `indices[position]` over the
/// full index set.
fn lagrange_at_zero(indices: &[u32], position: usize) -> blst_fr {
    let x_i = fr_from_index(indices[position]);
    let mut numerator = fr_from_index(1);
    let mut denominator = fr_from_index(1);
    for (j, &index) in indices.iter().enumerate() {
        if j == position {
            continue;
        }
        let x_j = fr_from_index(index);
        numerator = fr_mul(&numerator, &x_j);
        denominator = fr_mul(&denominator, &fr_sub(&x_j, &x_i));
    }
    fr_mul(&numerator, &fr_inverse(&denominator))
}

fn p1_from_compressed(bytes: &[u8; 48]) -> Result<blst_p1> {
    let mut affine = blst_p1_affine::default();
    let err = unsafe { blst_p1_uncompress(&mut affine, bytes.as_ptr()) };
    if err != BLST_ERROR::BLST_SUCCESS {
        return Err(CryptoError::InvalidShare(format!(
            "invalid G1 point: {:?}",
            err
        )));
    }
    let mut point = blst_p1::default();
    unsafe { blst_p1_from_affine(&mut point, &affine) };
    Ok(point)
}

fn p1_mul_scalar(point: &blst_p1, scalar: &blst_scalar) -> blst_p1 {
    let mut out = blst_p1::default();
    unsafe { blst_p1_mult(&mut out, point, scalar.b.as_ptr(), 255) };
    out
}

fn p1_mul(point: &blst_p1, fr: &blst_fr) -> blst_p1 {
    let mut scalar = blst_scalar::default();
    unsafe { blst_scalar_from_fr(&mut scalar, fr) };
    p1_mul_scalar(point, &scalar)
}

fn p1_add(a: &blst_p1, b: &blst_p1) -> blst_p1 {
    let mut out = blst_p1::default();
    unsafe { blst_p1_add_or_double(&mut out, a, b) };
    out
}

fn p1_compress(point: &blst_p1) -> [u8; 48] {
    let mut out = [0u8; 48];
    unsafe { blst_p1_compress(out.as_mut_ptr(), point) };
    out
}

fn p2_from_compressed(bytes: &[u8; 96]) -> Result<blst_p2> {
    let mut affine = blst_p2_affine::default();
    let err = unsafe { blst_p2_uncompress(&mut affine, bytes.as_ptr()) };
    if err != BLST_ERROR::BLST_SUCCESS {
        return Err(CryptoError::InvalidShare(format!(
            "invalid G2 point: {:?}",
            err
        )));
    }
    let mut point = blst_p2::default();
    unsafe { blst_p2_from_affine(&mut point, &affine) };
    Ok(point)
}

fn p2_mul(point: &blst_p2, fr: &blst_fr) -> blst_p2 {
    let mut scalar = blst_scalar::default();
    unsafe { blst_scalar_from_fr(&mut scalar, fr) };
    let mut out = blst_p2::default();
    unsafe { blst_p2_mult(&mut out, point, scalar.b.as_ptr(), 255) };
    out
}

fn p2_add(a: &blst_p2, b: &blst_p2) -> blst_p2 {
    let mut out = blst_p2::default();
    unsafe { blst_p2_add_or_double(&mut out, a, b) };
    out
}

fn p2_compress(point: &blst_p2) -> [u8; 96] {
    let mut out = [0u8; 96];
    unsafe { blst_p2_compress(out.as_mut_ptr(), point) };
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_rejects_bad_parameters() {
        assert!(ThresholdDealer::deal(4, 0).is_err());
        assert!(ThresholdDealer::deal(4, 5).is_err());
        assert!(ThresholdDealer::deal(4, 4).is_ok());
    }

    #[test]
    fn test_share_signs_under_its_verification_key() {
        let dealt = ThresholdDealer::deal(4, 3).unwrap();
        let message = b"partial";

        for (share, share_public) in dealt.shares.iter().zip(&dealt.share_publics) {
            let sig = sign_share(share, message);
            assert!(verify_share(share_public, message, &sig));
        }
    }

    #[test]
    fn test_combination_subset_independent() {
        let dealt = ThresholdDealer::deal(5, 3).unwrap();
        let message = b"subset independence";

        let shares: Vec<_> = dealt
            .shares
            .iter()
            .map(|s| sign_share(s, message))
            .collect();

        let a = combine_signature_shares(3, &shares[0..3]).unwrap();
        let b = combine_signature_shares(3, &shares[2..5]).unwrap();
        let c = combine_signature_shares(3, &shares).unwrap();

        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.to_bytes(), c.to_bytes());
        assert!(a.verify(message, &dealt.group_public));
    }

    #[test]
    fn test_insufficient_shares_rejected() {
        let dealt = ThresholdDealer::deal(4, 3).unwrap();
        let message = b"too few";

        let shares: Vec<_> = dealt.shares[..2]
            .iter()
            .map(|s| sign_share(s, message))
            .collect();

        let err = combine_signature_shares(3, &shares).unwrap_err();
        assert!(matches!(err, CryptoError::InsufficientShares { .. }));
    }

    #[test]
    fn test_duplicate_shares_counted_once() {
        let dealt = ThresholdDealer::deal(4, 3).unwrap();
        let message = b"duplicates";

        let one = sign_share(&dealt.shares[0], message);
        let shares = vec![one.clone(), one.clone(), one];
        let err = combine_signature_shares(3, &shares).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InsufficientShares {
                required: 3,
                provided: 1
            }
        ));
    }

    #[test]
    fn test_encryption_round_trip() {
        let dealt = ThresholdDealer::deal(4, 3).unwrap();
        let plaintext = b"sealed proposal payload".to_vec();

        let ciphertext = encrypt_to_group(&dealt.group_public, &plaintext).unwrap();
        assert_ne!(ciphertext.payload, plaintext);

        let shares: Vec<_> = dealt.shares[1..4]
            .iter()
            .map(|s| decrypt_share(s, &ciphertext).unwrap())
            .collect();

        let recovered = combine_decryption(3, &ciphertext, &shares).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_decryption_below_threshold_fails() {
        let dealt = ThresholdDealer::deal(4, 3).unwrap();
        let ciphertext = encrypt_to_group(&dealt.group_public, b"secret").unwrap();

        let shares: Vec<_> = dealt.shares[..2]
            .iter()
            .map(|s| decrypt_share(s, &ciphertext).unwrap())
            .collect();

        let err = combine_decryption(3, &ciphertext, &shares).unwrap_err();
        assert!(matches!(err, CryptoError::InsufficientShares { .. }));
    }

    #[test]
    fn test_wrong_shares_fail_integrity() {
        let dealt_a = ThresholdDealer::deal(4, 3).unwrap();
        let dealt_b = ThresholdDealer::deal(4, 3).unwrap();
        let ciphertext = encrypt_to_group(&dealt_a.group_public, b"secret").unwrap();

        // Shares from an unrelated dealing recover garbage; the tag catches it.
        let shares: Vec<_> = dealt_b.shares[..3]
            .iter()
            .map(|s| decrypt_share(s, &ciphertext).unwrap())
            .collect();

        let err = combine_decryption(3, &ciphertext, &shares).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityFailure));
    }
}
