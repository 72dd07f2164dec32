//! Tests for BLS identity keys: signing, verification, proof-of-possession
//! and canonical byte encodings.

use conductor_crypto::bls::{BlsPrivateKey, BlsPublicKey, BlsSignature, ValidatorKeyPair};

#[test]
fn sign_and_verify() {
    let sk = BlsPrivateKey::random();
    let pk = sk.public_key();

    let sig = sk.sign(b"peer envelope");
    assert!(sig.verify(b"peer envelope", &pk));
    assert!(!sig.verify(b"tampered", &pk));
}

#[test]
fn signature_rejected_under_wrong_key() {
    let sk = BlsPrivateKey::random();
    let other = BlsPrivateKey::random();

    let sig = sk.sign(b"message");
    assert!(!sig.verify(b"message", &other.public_key()));
}

#[test]
fn key_round_trips_through_bytes() {
    let sk = BlsPrivateKey::random();
    let restored = BlsPrivateKey::from_bytes(&sk.to_bytes()).unwrap();
    assert_eq!(sk.public_key(), restored.public_key());

    let pk = sk.public_key();
    let restored_pk = BlsPublicKey::from_bytes(&pk.to_bytes()).unwrap();
    assert_eq!(pk, restored_pk);
}

#[test]
fn signature_round_trips_through_bytes() {
    let sk = BlsPrivateKey::random();
    let sig = sk.sign(b"round trip");
    let restored = BlsSignature::from_bytes(&sig.to_bytes()).unwrap();
    assert_eq!(sig, restored);
    assert!(restored.verify(b"round trip", &sk.public_key()));
}

#[test]
fn garbage_bytes_rejected() {
    assert!(BlsPublicKey::from_bytes(&[0xffu8; 48]).is_err());
    assert!(BlsSignature::from_bytes(&[0xffu8; 96]).is_err());
}

#[test]
fn deterministic_signing() {
    let sk = BlsPrivateKey::from_seed(&[7u8; 32]).unwrap();
    let a = sk.sign(b"same input");
    let b = sk.sign(b"same input");
    assert_eq!(a.to_bytes(), b.to_bytes());
}

#[test]
fn proof_of_possession_binds_key() {
    let keypair = ValidatorKeyPair::generate();
    assert!(keypair.verify_proof_of_possession());

    // A PoP from a different key fails against this public key.
    let other = ValidatorKeyPair::generate();
    assert!(!other.proof_of_possession().verify(keypair.public_key()));
}

#[test]
fn keypair_from_components_validates_pop() {
    let sk = BlsPrivateKey::random();
    let pop = sk.generate_proof_of_possession();
    assert!(ValidatorKeyPair::from_components(sk, pop).is_ok());

    let sk2 = BlsPrivateKey::random();
    let wrong_pop = BlsPrivateKey::random().generate_proof_of_possession();
    assert!(ValidatorKeyPair::from_components(sk2, wrong_pop).is_err());
}

#[test]
fn hex_round_trip() {
    let sk = BlsPrivateKey::random();
    let pk = sk.public_key();
    assert_eq!(BlsPublicKey::from_hex(&pk.to_hex()).unwrap(), pk);

    let sig = sk.sign(b"hex");
    assert_eq!(BlsSignature::from_hex(&sig.to_hex()).unwrap(), sig);
}
