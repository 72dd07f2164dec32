//! Tests for canonical encodings and quorum certificates.
//!
//! These verify:
//! - Encodings are deterministic and round-trip exactly
//! - Quorum certificates verify against the threshold group key and
//!   enforce the signer-count threshold
//! - Persisted record schemas contain only the specified fields; in
//!   particular, no wall-clock value can hide in a fixed-size layout

use borsh::to_vec;
use conductor_crypto::threshold::{combine_signature_shares, sign_share, ThresholdDealer};
use conductor_crypto::BlsPrivateKey;
use conductor_types::{
    Block, CanonicalDayProof, DayProof, EventBatch, EventFingerprint, QuorumCertificate,
    Validator, ValidatorId, ValidatorSet,
};

fn fp(byte: u8) -> EventFingerprint {
    EventFingerprint([byte; 32])
}

#[test]
fn batch_encoding_is_deterministic() {
    let batch = EventBatch::new(ValidatorId([7u8; 32]), 3, vec![fp(1), fp(2)], 99).unwrap();
    assert_eq!(batch.canonical_bytes(), batch.canonical_bytes());
    assert_eq!(
        batch,
        EventBatch::from_canonical_bytes(&batch.canonical_bytes()).unwrap()
    );
}

#[test]
fn day_proof_layout_is_exactly_the_specified_fields() {
    let proof = DayProof::unsigned(1, [0u8; 32], 1000, [0u8; 32], ValidatorId([0u8; 32]));
    let encoded = to_vec(&proof).unwrap();

    // day_number (8) + seed (32) + difficulty (8) + output (32)
    // + proposer (32) + signature (96). A timestamp would not fit.
    assert_eq!(encoded.len(), 8 + 32 + 8 + 32 + 32 + 96);
}

#[test]
fn quorum_certificate_layout_is_exactly_the_specified_fields() {
    let qc = QuorumCertificate::new([0u8; 32], [0u8; 96], vec![0b0111]);
    let encoded = to_vec(&qc).unwrap();

    // digest (32) + signature (96) + bitmap length prefix (4) + bitmap (1).
    assert_eq!(encoded.len(), 32 + 96 + 4 + 1);
}

#[test]
fn quorum_certificate_verifies_threshold_combined_signature() {
    let dealt = ThresholdDealer::deal(4, 3).unwrap();
    let digest = [5u8; 32];

    let shares: Vec<_> = dealt.shares[..3]
        .iter()
        .map(|s| sign_share(s, &digest))
        .collect();
    let group_sig = combine_signature_shares(3, &shares).unwrap();

    let bitmap = QuorumCertificate::bitmap_from_indices(&[0, 1, 2], 4);
    let qc = QuorumCertificate::new(digest, group_sig.to_bytes(), bitmap);

    assert!(qc.verify(&dealt.group_public, 3));
    // Popcount below the threshold fails even with a valid signature.
    assert!(!qc.verify(&dealt.group_public, 4));
}

#[test]
fn quorum_certificate_rejects_wrong_digest() {
    let dealt = ThresholdDealer::deal(4, 3).unwrap();
    let shares: Vec<_> = dealt.shares[..3]
        .iter()
        .map(|s| sign_share(s, &[5u8; 32]))
        .collect();
    let group_sig = combine_signature_shares(3, &shares).unwrap();

    let bitmap = QuorumCertificate::bitmap_from_indices(&[0, 1, 2], 4);
    let qc = QuorumCertificate::new([6u8; 32], group_sig.to_bytes(), bitmap);
    assert!(!qc.verify(&dealt.group_public, 3));
}

#[test]
fn canonical_day_proof_verifies_end_to_end() {
    let dealt = ThresholdDealer::deal(4, 3).unwrap();
    let key = BlsPrivateKey::random();
    let proposer = ValidatorId::from_public_key(&key.public_key());

    let mut proof = DayProof::unsigned(2, [1u8; 32], 1000, [9u8; 32], proposer);
    proof.proposer_signature = key.sign(&proof.signing_bytes()).to_bytes();

    let digest = proof.canonical_digest();
    let shares: Vec<_> = dealt.shares[..3]
        .iter()
        .map(|s| sign_share(s, &digest))
        .collect();
    let group_sig = combine_signature_shares(3, &shares).unwrap();

    let canonical = CanonicalDayProof {
        day_proof: proof,
        quorum_certificate: QuorumCertificate::new(
            digest,
            group_sig.to_bytes(),
            QuorumCertificate::bitmap_from_indices(&[0, 1, 2], 4),
        ),
    };

    assert!(canonical.verify(&dealt.group_public, 3));
}

#[test]
fn block_round_trips_and_digest_is_stable() {
    let qc = QuorumCertificate::new([0u8; 32], [0u8; 96], vec![0b0111]);
    let block = Block::assemble(4, vec![fp(1), fp(2), fp(3)], vec![ValidatorId([1u8; 32])], qc);

    let encoded = to_vec(&block).unwrap();
    let decoded: Block = borsh::from_slice(&encoded).unwrap();
    assert_eq!(block, decoded);
    assert_eq!(block.digest(), decoded.digest());
}

#[test]
fn validator_set_descriptors_round_trip_through_storage_encoding() {
    let validators: Vec<Validator> = (0..4)
        .map(|_| Validator::from_public_key(&BlsPrivateKey::random().public_key()))
        .collect();
    let set = ValidatorSet::new(validators).unwrap();

    let encoded = to_vec(&set.descriptors().to_vec()).unwrap();
    let decoded: Vec<Validator> = borsh::from_slice(&encoded).unwrap();
    let restored = ValidatorSet::new(decoded).unwrap();

    assert_eq!(
        set.ids().collect::<Vec<_>>(),
        restored.ids().collect::<Vec<_>>()
    );
}
