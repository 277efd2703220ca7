//! Executor pool: one cached executor per host name
//!
//! The map lock is held only long enough to fetch or insert a host's slot.
//! Each slot is an async once-cell, so concurrent callers for the same host
//! share a single session creation while different hosts connect in parallel.
//! A failed creation leaves the slot empty and the next caller tries again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use hostfleet_exec::{ExecError, HostIdentity, RemoteExecutor};

/// Creates executors for hosts
///
/// Allows injection of mock executors in tests.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Open a session for the host and wrap it in an executor
    async fn create(&self, host: &HostIdentity) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

type Slot = Arc<OnceCell<Arc<dyn RemoteExecutor>>>;

/// Shared cache of executors keyed by host name
pub struct ExecutorPool {
    factory: Arc<dyn ExecutorFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ExecutorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorPool").finish_non_exhaustive()
    }
}

impl ExecutorPool {
    /// Create an empty pool
    pub fn new(factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get the host's executor, creating it on first use
    ///
    /// # Errors
    /// Returns the factory's error; the slot stays empty so a later call retries
    pub async fn get(&self, host: &HostIdentity) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(host.name().to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let executor = slot
            .get_or_try_init(|| async {
                debug!(host = %host.name(), "creating executor");
                let executor = self.factory.create(host).await?;
                info!(
                    host = %host.name(),
                    executor = executor.executor_type(),
                    "executor ready"
                );
                Ok::<_, ExecError>(executor)
            })
            .await?;

        Ok(executor.clone())
    }

    /// Drop a host's executor and close its session
    ///
    /// Returns whether an initialized executor was removed.
    pub async fn evict(&self, name: &str) -> bool {
        let slot = self.slots.lock().await.remove(name);
        let Some(executor) = slot.and_then(|s| s.get().cloned()) else {
            return false;
        };

        if let Err(e) = executor.close().await {
            warn!(host = %name, error = %e, "failed to close evicted executor");
        }
        info!(host = %name, "executor evicted");
        true
    }

    /// Number of initialized executors
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Whether no executor has been initialized
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every cached session and empty the pool
    ///
    /// Must not race with in-flight operations.
    pub async fn close(&self) {
        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        for (name, slot) in slots {
            if let Some(executor) = slot.get()
                && let Err(e) = executor.close().await
            {
                warn!(host = %name, error = %e, "failed to close executor");
            }
        }
        info!("executor pool closed");
    }
}
