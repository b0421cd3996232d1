//! Service composition.
//!
//! [`Node`] owns the access-control store and the request guard built over
//! it. Store calls are synchronous and may block, so async callers go through
//! [`Node::run_store`], which moves them onto the blocking pool under the
//! configured deadline.

use std::sync::Arc;

use tracing::info;

use txguard_acl::{AccessControlStore, MemoryKvStore};
use txguard_core::clock::{Clock, SystemClock};
use txguard_core::error::{StoreError, TxGuardError};
use txguard_core::traits::KeyValueStore;
use txguard_policy::RequestGuard;

use crate::config::NodeConfig;
use crate::storage::RocksKvStore;

/// The access-control store as shared by the service.
pub type SharedAcl = AccessControlStore<Box<dyn KeyValueStore>>;

/// A running txguard service.
pub struct Node {
    config: NodeConfig,
    acl: Arc<SharedAcl>,
    guard: Arc<RequestGuard>,
}

impl Node {
    /// Open the configured backend and build the guard on the system clock.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, TxGuardError> {
        let store: Box<dyn KeyValueStore> = if config.ephemeral {
            info!("node: using in-memory access-control store");
            Box::new(MemoryKvStore::new())
        } else {
            std::fs::create_dir_all(&config.data_dir)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            info!(path = %config.db_path().display(), "node: opening access-control store");
            Box::new(RocksKvStore::open(config.db_path())?)
        };
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    /// Build a node over an explicit backend and clock.
    pub fn with_store(
        config: NodeConfig,
        store: Box<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, TxGuardError> {
        config.validate()?;
        let acl = Arc::new(AccessControlStore::new(store));
        let guard = RequestGuard::new(&config.guard, clock)?.with_access_policy(acl.clone());
        Ok(Arc::new(Self {
            config,
            acl,
            guard: Arc::new(guard),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn acl(&self) -> &Arc<SharedAcl> {
        &self.acl
    }

    pub fn guard(&self) -> &Arc<RequestGuard> {
        &self.guard
    }

    /// Run `op` against the access-control store on the blocking pool.
    ///
    /// Fails with [`StoreError::Timeout`] if it does not finish within the
    /// configured store timeout. The blocking call itself is not cancelled.
    pub async fn run_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SharedAcl) -> Result<T, StoreError> + Send + 'static,
    {
        let acl = Arc::clone(&self.acl);
        let timeout = self.config.store_timeout();
        let task = tokio::task::spawn_blocking(move || op(&acl));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("store task failed: {e}"))),
            Err(_) => Err(StoreError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}
