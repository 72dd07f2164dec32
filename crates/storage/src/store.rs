//! The typed canonical store.
//!
//! Five namespaces back the consensus core: `block/{epoch}`,
//! `day_proof/{day}`, `blacklist/{validator_id}`, `validator_set/{day}`
//! and `meta/`. Blocks and day proofs are write-once: a second write to
//! the same primary key surfaces [`StorageError::AlreadyCommitted`]
//! carrying the existing record, and callers recover by adopting it.

use crate::db::{cf, Database, PutConflict};
use crate::{Result, StorageError};
use borsh::{BorshDeserialize, BorshSerialize};
use conductor_types::{
    BlacklistEntry, Block, CanonicalDayProof, DayNumber, Epoch, Validator, ValidatorId,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Meta keys.
const META_GENESIS_SEED: &[u8] = b"genesis_seed";
const META_ACTIVE_SET_DAY: &[u8] = b"active_set_day";

/// How many days of canonical day proofs are retained, minimum.
pub const DAY_PROOF_RETENTION_DAYS: u64 = 30;

/// The typed store over the canonical namespaces.
#[derive(Debug, Clone)]
pub struct ConductorStore {
    db: Arc<Database>,
}

impl ConductorStore {
    /// Open the store at a path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: Arc::new(Database::open_at(path)?),
        })
    }

    /// Wrap an already-open database.
    pub fn from_database(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // block/{epoch}
    // ------------------------------------------------------------------

    /// Persist a finalized block. Write-once per epoch.
    ///
    /// # Errors
    ///
    /// [`StorageError::AlreadyCommitted`] when a block for the epoch
    /// exists; the error carries the existing record's key so callers can
    /// re-read and adopt it.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let key = block.epoch.to_be_bytes();
        let value = encode(block)?;
        match self.db.put_if_absent(cf::BLOCK, &key, &value) {
            Ok(()) => {
                info!(epoch = block.epoch, events = block.events.len(), "block persisted");
                Ok(())
            }
            Err(PutConflict::Exists(_)) => {
                warn!(epoch = block.epoch, "second commit for epoch rejected");
                Err(StorageError::AlreadyCommitted {
                    namespace: cf::BLOCK,
                    key: hex::encode(key),
                })
            }
            Err(PutConflict::Storage(e)) => Err(e),
        }
    }

    /// Fetch a block by epoch.
    pub fn get_block(&self, epoch: Epoch) -> Result<Option<Block>> {
        self.db
            .get(cf::BLOCK, &epoch.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Highest committed epoch, if any.
    pub fn latest_epoch(&self) -> Result<Option<Epoch>> {
        Ok(self.db.last_key(cf::BLOCK)?.map(|k| be_u64(&k)))
    }

    // ------------------------------------------------------------------
    // day_proof/{day}
    // ------------------------------------------------------------------

    /// Persist a canonical day proof. Write-once per day.
    pub fn put_day_proof(&self, proof: &CanonicalDayProof) -> Result<()> {
        let day = proof.day_proof.day_number;
        let key = day.to_be_bytes();
        let value = encode(proof)?;
        match self.db.put_if_absent(cf::DAY_PROOF, &key, &value) {
            Ok(()) => {
                info!(day, "canonical day proof persisted");
                Ok(())
            }
            Err(PutConflict::Exists(_)) => Err(StorageError::AlreadyCommitted {
                namespace: cf::DAY_PROOF,
                key: hex::encode(key),
            }),
            Err(PutConflict::Storage(e)) => Err(e),
        }
    }

    /// Fetch a canonical day proof.
    pub fn get_day_proof(&self, day: DayNumber) -> Result<Option<CanonicalDayProof>> {
        self.db
            .get(cf::DAY_PROOF, &day.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Highest canonical day, if any.
    pub fn latest_canonical_day(&self) -> Result<Option<DayNumber>> {
        Ok(self.db.last_key(cf::DAY_PROOF)?.map(|k| be_u64(&k)))
    }

    /// Delete day proofs older than the retention window.
    ///
    /// Keeps at least [`DAY_PROOF_RETENTION_DAYS`] days below the current
    /// day. Returns the number of proofs removed.
    pub fn prune_day_proofs(&self, current_day: DayNumber) -> Result<usize> {
        let Some(cutoff) = current_day.checked_sub(DAY_PROOF_RETENTION_DAYS) else {
            return Ok(0);
        };

        let stale = self.db.keys_below(cf::DAY_PROOF, &cutoff.to_be_bytes())?;
        let removed = stale.len();
        for key in stale {
            self.db.delete(cf::DAY_PROOF, &key)?;
        }
        if removed > 0 {
            debug!(removed, cutoff, "pruned day proofs");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // blacklist/{validator_id}
    // ------------------------------------------------------------------

    /// Persist a blacklist entry. A validator appears in at most one
    /// active entry, so a second write for the same identifier conflicts.
    pub fn put_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<()> {
        let key = entry.validator_id.as_bytes();
        let value = encode(entry)?;
        match self.db.put_if_absent(cf::BLACKLIST, key, &value) {
            Ok(()) => {
                info!(validator = %entry.validator_id, reason = %entry.reason_code, "blacklist entry persisted");
                Ok(())
            }
            Err(PutConflict::Exists(_)) => Err(StorageError::AlreadyCommitted {
                namespace: cf::BLACKLIST,
                key: entry.validator_id.short_hex(),
            }),
            Err(PutConflict::Storage(e)) => Err(e),
        }
    }

    /// Fetch a blacklist entry.
    pub fn get_blacklist_entry(&self, validator: &ValidatorId) -> Result<Option<BlacklistEntry>> {
        self.db
            .get(cf::BLACKLIST, validator.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Remove a blacklist entry (a committed unblacklist ballot).
    pub fn remove_blacklist_entry(&self, validator: &ValidatorId) -> Result<()> {
        info!(validator = %validator, "blacklist entry removed");
        self.db.delete(cf::BLACKLIST, validator.as_bytes())
    }

    /// All current blacklist entries.
    pub fn blacklist_entries(&self) -> Result<Vec<BlacklistEntry>> {
        self.db
            .scan(cf::BLACKLIST)?
            .into_iter()
            .map(|(_, v)| decode(&v))
            .collect()
    }

    // ------------------------------------------------------------------
    // validator_set/{day}
    // ------------------------------------------------------------------

    /// Persist the validator descriptors effective from a day.
    pub fn put_validator_set(&self, day: DayNumber, validators: &[Validator]) -> Result<()> {
        let value = encode(&validators.to_vec())?;
        self.db.put(cf::VALIDATOR_SET, &day.to_be_bytes(), &value)?;
        self.db
            .put(cf::META, META_ACTIVE_SET_DAY, &day.to_be_bytes())?;
        debug!(day, count = validators.len(), "validator set snapshot persisted");
        Ok(())
    }

    /// Fetch the validator descriptors effective from a day.
    pub fn get_validator_set(&self, day: DayNumber) -> Result<Option<Vec<Validator>>> {
        self.db
            .get(cf::VALIDATOR_SET, &day.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// The day of the most recently persisted validator-set snapshot.
    pub fn active_set_day(&self) -> Result<Option<DayNumber>> {
        Ok(self
            .db
            .get(cf::META, META_ACTIVE_SET_DAY)?
            .map(|bytes| be_u64(&bytes)))
    }

    // ------------------------------------------------------------------
    // meta/
    // ------------------------------------------------------------------

    /// Persist the genesis seed once at initialization.
    pub fn put_genesis_seed(&self, seed: &[u8]) -> Result<()> {
        match self.db.put_if_absent(cf::META, META_GENESIS_SEED, seed) {
            Ok(()) => Ok(()),
            Err(PutConflict::Exists(existing)) if existing == seed => Ok(()),
            Err(PutConflict::Exists(_)) => Err(StorageError::Corruption(
                "genesis seed mismatch with persisted state".to_string(),
            )),
            Err(PutConflict::Storage(e)) => Err(e),
        }
    }

    /// Fetch the genesis seed.
    pub fn genesis_seed(&self) -> Result<Option<Vec<u8>>> {
        self.db.get(cf::META, META_GENESIS_SEED)
    }

    /// Flush to disk (best-effort shutdown path).
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}

fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>> {
    borsh::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T> {
    borsh::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}
