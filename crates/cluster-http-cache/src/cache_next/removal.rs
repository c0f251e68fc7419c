//! Fire-and-forget removals.
//!
//! Removals issued here never report back to the caller: a failure is logged
//! and the key is left to the cluster's TTL eviction. A lock handed to
//! [`DetachedRemovals::spawn`] is released only after the last key is gone,
//! so no insert can take the key while the cleanup still runs.
//! [`DetachedRemovals::settle`] lets shutdown (and tests) wait until every
//! issued batch has finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::handle::{ClusterHandle, HeldLock};

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DetachedRemovals {
    inner: Arc<Inner>,
}

impl DetachedRemovals {
    /// Remove `keys` in order on one background task, then release `lock`.
    /// No retry: a failed key is logged and the rest still run.
    pub(crate) fn spawn(&self, cluster: ClusterHandle, keys: Vec<String>, lock: Option<HeldLock>) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            for key in &keys {
                match cluster.remove(key).await {
                    Ok(()) => debug!(key = %key, "detached removal done"),
                    Err(e) => warn!(key = %key, error = %e, "detached removal failed"),
                }
            }
            if let Some(lock) = lock {
                lock.release().await;
            }
            if inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Wait until no removal is in flight.
    pub(crate) async fn settle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}
