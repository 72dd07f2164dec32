//! Tests for the canonical store: write-once semantics, recovery by
//! reading the existing record, and retention pruning.

use conductor_storage::{ConductorStore, StorageError, DAY_PROOF_RETENTION_DAYS};
use conductor_types::{
    BlacklistEntry, Block, CanonicalDayProof, DayProof, EventFingerprint, QuorumCertificate,
    ReasonCode, Validator, ValidatorId,
};
use tempfile::TempDir;

fn open_store() -> (ConductorStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = ConductorStore::open(dir.path()).unwrap();
    (store, dir)
}

fn dummy_qc() -> QuorumCertificate {
    QuorumCertificate::new([0u8; 32], [0u8; 96], vec![0b0111])
}

fn dummy_block(epoch: u64) -> Block {
    Block::assemble(
        epoch,
        vec![EventFingerprint([epoch as u8; 32])],
        vec![ValidatorId([1u8; 32])],
        dummy_qc(),
    )
}

fn dummy_canonical_proof(day: u64) -> CanonicalDayProof {
    CanonicalDayProof {
        day_proof: DayProof::unsigned(day, [1u8; 32], 1000, [2u8; 32], ValidatorId([3u8; 32])),
        quorum_certificate: dummy_qc(),
    }
}

#[test]
fn block_commit_is_write_once() {
    let (store, _dir) = open_store();

    store.put_block(&dummy_block(1)).unwrap();

    // A second commit for the same epoch is rejected...
    let err = store.put_block(&dummy_block(1)).unwrap_err();
    assert!(matches!(err, StorageError::AlreadyCommitted { .. }));

    // ...and the original record is intact and readable.
    let stored = store.get_block(1).unwrap().unwrap();
    assert_eq!(stored.epoch, 1);
}

#[test]
fn latest_epoch_tracks_highest_key() {
    let (store, _dir) = open_store();
    assert_eq!(store.latest_epoch().unwrap(), None);

    store.put_block(&dummy_block(1)).unwrap();
    store.put_block(&dummy_block(2)).unwrap();
    store.put_block(&dummy_block(300)).unwrap();

    assert_eq!(store.latest_epoch().unwrap(), Some(300));
}

#[test]
fn day_proof_write_once_and_latest() {
    let (store, _dir) = open_store();

    store.put_day_proof(&dummy_canonical_proof(1)).unwrap();
    store.put_day_proof(&dummy_canonical_proof(2)).unwrap();

    assert!(matches!(
        store.put_day_proof(&dummy_canonical_proof(2)).unwrap_err(),
        StorageError::AlreadyCommitted { .. }
    ));
    assert_eq!(store.latest_canonical_day().unwrap(), Some(2));
}

#[test]
fn day_proofs_pruned_past_retention() {
    let (store, _dir) = open_store();

    for day in 0..5 {
        store.put_day_proof(&dummy_canonical_proof(day)).unwrap();
    }

    // Within retention: nothing removed.
    assert_eq!(store.prune_day_proofs(10).unwrap(), 0);

    // Day 0 and 1 fall out once the current day passes retention + 1.
    let removed = store
        .prune_day_proofs(DAY_PROOF_RETENTION_DAYS + 2)
        .unwrap();
    assert_eq!(removed, 2);
    assert!(store.get_day_proof(0).unwrap().is_none());
    assert!(store.get_day_proof(1).unwrap().is_none());
    assert!(store.get_day_proof(2).unwrap().is_some());
}

#[test]
fn blacklist_entry_lifecycle() {
    let (store, _dir) = open_store();
    let target = ValidatorId([9u8; 32]);

    let entry = BlacklistEntry {
        validator_id: target,
        reason_code: ReasonCode::Equivocation,
        evidence_digest: [5u8; 32],
        effective_day: 12,
        quorum_certificate: dummy_qc(),
    };

    store.put_blacklist_entry(&entry).unwrap();
    assert_eq!(store.blacklist_entries().unwrap().len(), 1);

    // One active entry per validator.
    assert!(matches!(
        store.put_blacklist_entry(&entry).unwrap_err(),
        StorageError::AlreadyCommitted { .. }
    ));

    // Unblacklist removes; a later ballot may re-add.
    store.remove_blacklist_entry(&target).unwrap();
    assert!(store.get_blacklist_entry(&target).unwrap().is_none());
    store.put_blacklist_entry(&entry).unwrap();
}

#[test]
fn validator_set_snapshots() {
    let (store, _dir) = open_store();

    let validators: Vec<Validator> = (0..4u8)
        .map(|_| {
            Validator::from_public_key(
                &conductor_crypto::BlsPrivateKey::random().public_key(),
            )
        })
        .collect();

    store.put_validator_set(3, &validators).unwrap();
    assert_eq!(store.active_set_day().unwrap(), Some(3));

    let restored = store.get_validator_set(3).unwrap().unwrap();
    assert_eq!(restored, validators);
}

#[test]
fn genesis_seed_is_sticky() {
    let (store, _dir) = open_store();

    store.put_genesis_seed(b"genesis-a").unwrap();
    // Idempotent for the same seed.
    store.put_genesis_seed(b"genesis-a").unwrap();
    // A different seed against existing state is corruption.
    assert!(matches!(
        store.put_genesis_seed(b"genesis-b").unwrap_err(),
        StorageError::Corruption(_)
    ));

    assert_eq!(store.genesis_seed().unwrap().unwrap(), b"genesis-a");
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = ConductorStore::open(dir.path()).unwrap();
        store.put_block(&dummy_block(7)).unwrap();
        store.flush().unwrap();
    }
    let store = ConductorStore::open(dir.path()).unwrap();
    assert_eq!(store.latest_epoch().unwrap(), Some(7));
}
