//! Timed access to the shared cluster client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::cluster::ClusterClient;
use crate::error::{CacheError, CacheResult};

/// The connection as seen by strategies and contexts: every call is bounded
/// by the operation timeout. The client's lifecycle stays with the cache.
#[derive(Debug, Clone)]
pub(crate) struct ClusterHandle {
    client: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl ClusterHandle {
    pub(crate) fn new(client: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    pub(crate) async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.timed("get", self.client.get(key)).await
    }

    pub(crate) async fn put(&self, key: &str, value: Bytes) -> CacheResult<()> {
        self.timed("put", self.client.put(key, value)).await
    }

    pub(crate) async fn remove(&self, key: &str) -> CacheResult<()> {
        self.timed("remove", self.client.remove(key)).await
    }

    pub(crate) async fn try_lock(&self, key: &str) -> CacheResult<bool> {
        self.timed("try_lock", self.client.try_lock(key)).await
    }

    pub(crate) async fn unlock(&self, key: &str) -> CacheResult<()> {
        self.timed("unlock", self.client.unlock(key)).await
    }

    /// Release `key` from a context that cannot await (drop paths).
    pub(crate) fn unlock_detached(&self, key: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = handle.unlock(&key).await {
                        warn!(key = %key, error = %e, "failed to release lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "no runtime to release lock, left to the cluster"),
        }
    }

    /// Take the lock of `key` without waiting.
    ///
    /// Returns `Ok(None)` if the lock is held elsewhere. The returned guard
    /// releases the lock when dropped unless [`HeldLock::release`] ran.
    pub(crate) async fn try_acquire(&self, key: &str) -> CacheResult<Option<HeldLock>> {
        if !self.try_lock(key).await? {
            return Ok(None);
        }
        Ok(Some(HeldLock {
            cluster: self.clone(),
            key: key.to_string(),
            held: true,
        }))
    }
}

/// An acquired cluster lock. Owned, so it can move into a detached task.
#[derive(Debug)]
pub(crate) struct HeldLock {
    cluster: ClusterHandle,
    key: String,
    held: bool,
}

impl HeldLock {
    pub(crate) async fn release(mut self) {
        if let Err(e) = self.cluster.unlock(&self.key).await {
            warn!(key = %self.key, error = %e, "failed to release lock");
        }
        self.held = false;
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.held {
            self.cluster.unlock_detached(std::mem::take(&mut self.key));
        }
    }
}
