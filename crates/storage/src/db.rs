//! RocksDB wrapper with column families for the canonical namespaces.
//!
//! This module provides a low-level interface to RocksDB with one column
//! family per logical namespace. The typed store in [`crate::store`] sits
//! on top and enforces write-once semantics per primary key.

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, DB,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Result, StorageError};

/// Column family names, one per canonical namespace.
pub mod cf {
    /// Finalized blocks keyed by epoch.
    pub const BLOCK: &str = "block";
    /// Canonical day proofs keyed by day number.
    pub const DAY_PROOF: &str = "day_proof";
    /// Blacklist entries keyed by validator identifier.
    pub const BLACKLIST: &str = "blacklist";
    /// Validator-set snapshots keyed by effective day.
    pub const VALIDATOR_SET: &str = "validator_set";
    /// Genesis seed and active-set pointer.
    pub const META: &str = "meta";

    /// All column families.
    pub const ALL: &[&str] = &[BLOCK, DAY_PROOF, BLACKLIST, VALIDATOR_SET, META];
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory
    pub path: String,
    /// Enable compression (LZ4)
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/conductor"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// RocksDB wrapper with column families.
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    /// Serializes compare-and-set writes.
    cas_lock: Mutex<()>,
}

impl Database {
    /// Open or create a database at the configured path.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        info!(path = %config.path, "opening database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);

        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let path = Path::new(&config.path);
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!(column_families = cf::ALL.len(), "database opened");

        Ok(Self {
            inner: db,
            cas_lock: Mutex::new(()),
        })
    }

    /// Open a database with default settings at the given path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..DatabaseConfig::default()
        };
        Self::open(&config)
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Read a value.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Write a value unconditionally. Only the typed store uses this, and
    /// only for keys that are not write-once.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .put_cf(&cf, key, value)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Write-if-absent. Returns the pre-existing value on conflict so the
    /// caller can recover by reading the original record.
    pub fn put_if_absent(
        &self,
        cf_name: &str,
        key: &[u8],
        value: &[u8],
    ) -> std::result::Result<(), PutConflict> {
        let _guard = self.cas_lock.lock();

        match self.get(cf_name, key) {
            Ok(Some(existing)) => Err(PutConflict::Exists(existing)),
            Ok(None) => match self.put(cf_name, key, value) {
                Ok(()) => Ok(()),
                Err(e) => Err(PutConflict::Storage(e)),
            },
            Err(e) => Err(PutConflict::Storage(e)),
        }
    }

    /// Delete a key.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .delete_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// The largest key in a column family, exploiting that all numeric keys
    /// are fixed-width big-endian and therefore ordered.
    pub fn last_key(&self, cf_name: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        let mut iter = self.inner.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => Ok(Some(key.into_vec())),
            Some(Err(e)) => Err(StorageError::Database(e.to_string())),
            None => Ok(None),
        }
    }

    /// All keys strictly below `upper_bound`, in ascending order.
    pub fn keys_below(&self, cf_name: &str, upper_bound: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .inner
            .iterator_cf(&cf, IteratorMode::From(&[], Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StorageError::Database(e.to_string()))?;
            if key.as_ref() >= upper_bound {
                break;
            }
            keys.push(key.into_vec());
        }
        Ok(keys)
    }

    /// All key/value pairs in a column family, in ascending key order.
    pub fn scan(&self, cf_name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self.inner.iterator_cf(&cf, IteratorMode::Start);

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::Database(e.to_string()))?;
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }

    /// Flush memtables to disk (best-effort shutdown path).
    pub fn flush(&self) -> Result<()> {
        self.inner
            .flush()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

/// Outcome of a failed [`Database::put_if_absent`].
#[derive(Debug)]
pub enum PutConflict {
    /// The key already holds a value (returned so the caller can recover).
    Exists(Vec<u8>),
    /// The underlying read or write failed.
    Storage(StorageError),
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
