//! Access-control operations over a [`KeyValueStore`].
//!
//! `allow` only clears a denial and `deny_whitelist` only clears a whitelist
//! entry; neither touches the other state. `allow_whitelist` overwrites a
//! denial. Conditional clears go through
//! [`KeyValueStore::compare_and_delete`].

use tracing::{debug, info, warn};

use txguard_core::address::Address;
use txguard_core::error::StoreError;
use txguard_core::traits::{AccessPolicy, KeyValueStore};
use txguard_core::types::AccessState;

/// Access-control list keyed by canonical address string.
#[derive(Debug)]
pub struct AccessControlStore<S> {
    store: S,
}

impl<S: KeyValueStore> AccessControlStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Mark `address` as denied. Idempotent.
    pub fn deny(&self, address: &Address) -> Result<(), StoreError> {
        self.set_state(address, AccessState::Denied)
    }

    /// Clear a denial. Returns `true` if `address` was denied; whitelisted
    /// and absent entries are left as they are.
    pub fn allow(&self, address: &Address) -> Result<bool, StoreError> {
        self.clear_state(address, AccessState::Denied)
    }

    /// Clear a whitelist entry. Returns `true` if `address` was whitelisted.
    pub fn deny_whitelist(&self, address: &Address) -> Result<bool, StoreError> {
        self.clear_state(address, AccessState::Whitelisted)
    }

    /// Mark `address` as whitelisted, overwriting any denial. Idempotent.
    pub fn allow_whitelist(&self, address: &Address) -> Result<(), StoreError> {
        self.set_state(address, AccessState::Whitelisted)
    }

    /// A page of every address with an entry, in the backend's key order.
    ///
    /// Despite the name this includes whitelisted addresses. Keys that are
    /// not addresses are skipped before paging.
    pub fn list_denied(&self, offset: usize, limit: usize) -> Result<Vec<Address>, StoreError> {
        let page = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| match key.parse::<Address>() {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(%key, error = %e, "acl: skipping non-address key");
                    None
                }
            })
            .skip(offset)
            .take(limit)
            .collect();
        Ok(page)
    }

    /// Current state of `address`.
    pub fn access_state(&self, address: &Address) -> Result<AccessState, StoreError> {
        let key = address.encode();
        let value = self.store.get(&key)?;
        AccessState::from_stored(value.as_deref()).ok_or_else(|| StoreError::Corrupt {
            key,
            value: value.unwrap_or_default(),
        })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &S {
        &self.store
    }

    fn set_state(&self, address: &Address, state: AccessState) -> Result<(), StoreError> {
        let Some(value) = state.stored_value() else {
            return Ok(());
        };
        self.store.set(&address.encode(), value)?;
        info!(%address, %state, "acl: access state set");
        Ok(())
    }

    fn clear_state(&self, address: &Address, state: AccessState) -> Result<bool, StoreError> {
        let Some(expected) = state.stored_value() else {
            return Ok(false);
        };
        let cleared = self.store.compare_and_delete(&address.encode(), expected)?;
        if cleared {
            info!(%address, previous = %state, "acl: access state cleared");
        } else {
            debug!(%address, expected = %state, "acl: state did not match, nothing cleared");
        }
        Ok(cleared)
    }
}

impl<S: KeyValueStore> AccessPolicy for AccessControlStore<S> {
    fn access_state(&self, address: &Address) -> Result<AccessState, StoreError> {
        AccessControlStore::access_state(self, address)
    }
}
