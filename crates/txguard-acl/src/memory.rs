//! In-memory key-value backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use txguard_core::error::StoreError;
use txguard_core::traits::KeyValueStore;

/// Ordered in-memory store. Keys enumerate in lexicographic order.
///
/// Can be switched offline with [`MemoryKvStore::set_available`] so callers'
/// outage handling can be exercised.
#[derive(Debug)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    available: AtomicBool,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the store online or take it offline.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        Ok(self.entries.write().remove(key).is_some())
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|v| v == expected) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        Ok(self.entries.read().keys().cloned().collect())
    }
}
