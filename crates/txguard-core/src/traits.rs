//! Trait interfaces between txguard crates.
//!
//! - [`KeyValueStore`] — string key-value backend (txguard-acl implements)
//! - [`AccessPolicy`] — hot-path access-state lookup (txguard-acl implements)
//! - [`StagePolicy`] — staging exclusion consulted by transaction admission
//!   (txguard-policy implements)

use crate::address::Address;
use crate::error::{GuardError, StoreError};
use crate::types::AccessState;

/// A string key-value service.
///
/// Calls may cross the network and may block or fail; callers on async
/// runtimes should run them on a blocking pool.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Returns `true` if it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove `key` only if it currently holds `expected`.
    ///
    /// Default implementation is a read followed by a delete and is not
    /// atomic; backends that can should override it.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        match self.get(key)? {
            Some(value) if value == expected => self.delete(key),
            _ => Ok(false),
        }
    }

    /// Enumerate every key, in the backend's native order.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).compare_and_delete(key, expected)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

/// Read-only access-state lookup used on the request path.
pub trait AccessPolicy: Send + Sync {
    /// Current access state of `address`.
    fn access_state(&self, address: &Address) -> Result<AccessState, StoreError>;
}

/// Staging exclusion consulted before a transaction enters the pending pool.
pub trait StagePolicy: Send + Sync {
    /// Whether `signer` is currently excluded from staging.
    fn is_banned(&self, signer: &Address) -> bool;

    /// `Ok(())` if a transaction from `signer` may be staged.
    fn check_admission(&self, signer: &Address) -> Result<(), GuardError> {
        if self.is_banned(signer) {
            Err(GuardError::StagingBanned(*signer))
        } else {
            Ok(())
        }
    }
}
