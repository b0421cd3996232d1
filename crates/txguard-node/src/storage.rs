//! RocksDB-backed key-value store for the access-control list.
//!
//! Entries live in the `access_control` column family, keyed by canonical
//! address string. Conditional deletes take a process-local lock around the
//! read and the delete, so they are atomic as long as this process is the
//! only writer, which RocksDB's exclusive open already guarantees.

use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use tracing::{debug, warn};

use txguard_core::error::StoreError;
use txguard_core::traits::KeyValueStore;

// --- Column family names ---

const CF_ACCESS_CONTROL: &str = "access_control";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_ACCESS_CONTROL];

/// Persistent [`KeyValueStore`] over RocksDB.
pub struct RocksKvStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksKvStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(path = %path.as_ref().display(), "storage: access-control database opened");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("missing column family: {name}")))
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf_handle(CF_ACCESS_CONTROL)?;
        let Some(bytes) = self
            .db
            .get_cf(cf, key.as_bytes())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                value: hex::encode(e.into_bytes()),
            })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_ACCESS_CONTROL)?;
        self.db
            .delete_cf(cf, key.as_bytes())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl KeyValueStore for RocksKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_ACCESS_CONTROL)?;
        let _guard = self.write_lock.lock();
        self.db
            .put_cf(cf, key.as_bytes(), value.as_bytes())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        if self.read(key)?.is_none() {
            return Ok(false);
        }
        self.remove(key)?;
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        match self.read(key)? {
            Some(value) if value == expected => {
                self.remove(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf_handle(CF_ACCESS_CONTROL)?;
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            match String::from_utf8(key.into_vec()) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(key = %hex::encode(e.as_bytes()), "storage: skipping non-utf8 key"),
            }
        }
        Ok(keys)
    }
}
