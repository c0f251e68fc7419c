//! Cache orchestrator.
//!
//! [`ClusterCache`] owns the cluster connection and the storage strategy
//! chosen at construction. Lookups and inserts go through per-request
//! contexts that borrow the connection.
//!
//! # Storage modes
//!
//! | Mode | Entries per response | Range reads | Recovery |
//! |------|----------------------|-------------|----------|
//! | `DIVIDED` | header + `ceil(size / partition)` bodies | overlapping partitions | yes |
//! | `UNIFIED` | one response record | from the fetched record | no |

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, ClusterConnector, ConnectionSettings};
use crate::config::{CacheConfig, CacheMode, StorageParams};
use crate::error::{CacheError, CacheResult};
use crate::key::VariantKey;
use crate::types::{ByteRange, CacheInfo, LookupRequest, LookupResult, ResponseHeaders};

#[path = "cache_next/mod.rs"]
mod cache_next;

use cache_next::divided::DividedStrategy;
use cache_next::handle::ClusterHandle;
use cache_next::removal::DetachedRemovals;
use cache_next::unified::UnifiedStrategy;

pub use cache_next::divided::{DividedInsert, DividedLookup};
pub use cache_next::unified::{UnifiedInsert, UnifiedLookup};

/// Name reported in [`CacheInfo`].
pub const CACHE_NAME: &str = "cluster-http-cache";

/// What a recovery run did. Recovery never fails its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Another context holds the key's lock and owns the cleanup.
    LockHeld,
    /// The header was replaced by a newer insert; nothing was removed.
    Superseded,
    /// Removal of `partitions` partitions and then the header was issued.
    /// The key's lock is released once the header is gone.
    Cleaned { partitions: u64 },
    /// Cleanup failed and was left to TTL eviction.
    Abandoned,
    /// Unified mode has nothing to recover.
    NotApplicable,
}

/// Lifecycle of an insert context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertState {
    /// Accepting headers and body chunks.
    Open,
    /// The header is stored; the entry is visible to lookups.
    Committed,
    /// Nothing more is written. Partial writes are being removed.
    Aborted,
}

#[derive(Debug, Clone)]
enum Strategy {
    Unified(Arc<UnifiedStrategy>),
    Divided(Arc<DividedStrategy>),
}

/// Lookup of one cached response.
///
/// Call [`Self::get_headers`] first; body reads only succeed after a hit.
/// Cluster errors never surface here, they read as a miss.
#[derive(Debug)]
pub enum LookupContext {
    Unified(UnifiedLookup),
    Divided(DividedLookup),
}

impl LookupContext {
    /// The key this lookup was made for.
    pub fn key(&self) -> &VariantKey {
        match self {
            Self::Unified(l) => l.key(),
            Self::Divided(l) => l.key(),
        }
    }

    /// Fetch the stored headers. A hit for a different variant key is a miss.
    pub async fn get_headers(&mut self) -> LookupResult {
        match self {
            Self::Unified(l) => l.get_headers().await,
            Self::Divided(l) => l.get_headers().await,
        }
    }

    /// Body bytes of `range` after a hit, clamped to the body size.
    ///
    /// `None` means the lookup is a miss. In divided mode that also happens
    /// when a partition is missing or from another version, which runs
    /// recovery before returning.
    pub async fn get_body(&mut self, range: ByteRange) -> Option<Bytes> {
        match self {
            Self::Unified(l) => l.get_body(range).await,
            Self::Divided(l) => l.get_body(range).await,
        }
    }

    /// Trailers are not cached.
    pub async fn get_trailers(&mut self) -> CacheResult<ResponseHeaders> {
        Err(CacheError::NotImplemented {
            operation: "get_trailers".to_string(),
        })
    }
}

/// Insert of one response, created from the lookup that missed.
#[derive(Debug)]
pub enum InsertContext {
    Unified(UnifiedInsert),
    Divided(DividedInsert),
}

impl InsertContext {
    /// Version stamped on every record this insert writes.
    pub fn version(&self) -> i32 {
        match self {
            Self::Unified(i) => i.version(),
            Self::Divided(i) => i.version(),
        }
    }

    pub fn state(&self) -> InsertState {
        match self {
            Self::Unified(i) => i.state(),
            Self::Divided(i) => i.state(),
        }
    }

    /// Start the insert. In divided mode this takes the key's lock and
    /// fails if another insert or a cleanup holds it.
    ///
    /// Returns `false` once the insert has been abandoned. With
    /// `end_stream` the response has no body and is committed at once.
    pub async fn insert_headers(&mut self, headers: ResponseHeaders, end_stream: bool) -> bool {
        match self {
            Self::Unified(i) => i.insert_headers(headers, end_stream).await,
            Self::Divided(i) => i.insert_headers(headers, end_stream).await,
        }
    }

    /// Append a body chunk; `end_stream` marks the last one and commits.
    ///
    /// Returns `false` if the caller should stop sending body chunks, e.g.
    /// after the body outgrew the max body size.
    pub async fn insert_body(&mut self, chunk: Bytes, end_stream: bool) -> bool {
        match self {
            Self::Unified(i) => i.insert_body(chunk, end_stream).await,
            Self::Divided(i) => i.insert_body(chunk, end_stream).await,
        }
    }

    /// Trailers are not cached.
    pub async fn insert_trailers(&mut self, _trailers: ResponseHeaders) -> CacheResult<()> {
        Err(CacheError::NotImplemented {
            operation: "insert_trailers".to_string(),
        })
    }
}

/// HTTP response cache stored in a key/value cluster.
#[derive(Debug)]
pub struct ClusterCache {
    config: CacheConfig,
    params: StorageParams,
    strategy: Strategy,
    connector: Arc<dyn ClusterConnector>,
    client: RwLock<Option<Arc<dyn ClusterClient>>>,
    removals: DetachedRemovals,
}

impl ClusterCache {
    /// Create an offline cache. Storage parameters are clamped here.
    pub fn new(config: CacheConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        let params = config.storage_params();
        let removals = DetachedRemovals::default();
        let strategy = match params.mode {
            CacheMode::Unified => Strategy::Unified(Arc::new(UnifiedStrategy::new(
                config.app_prefix.clone(),
                params.max_body_size,
            ))),
            CacheMode::Divided => Strategy::Divided(Arc::new(DividedStrategy::new(
                config.app_prefix.clone(),
                params.partition_size,
                params.max_body_size,
                removals.clone(),
            ))),
        };
        Self {
            config,
            params,
            strategy,
            connector,
            client: RwLock::new(None),
            removals,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Effective storage parameters.
    pub fn params(&self) -> StorageParams {
        self.params
    }

    pub fn mode(&self) -> CacheMode {
        self.params.mode
    }

    fn current_client(&self) -> Option<Arc<dyn ClusterClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_client(&self, client: Option<Arc<dyn ClusterClient>>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    fn handle(&self) -> Option<ClusterHandle> {
        self.current_client()
            .map(|client| ClusterHandle::new(client, self.config.operation_timeout()))
    }

    pub fn is_connected(&self) -> bool {
        self.current_client().is_some_and(|c| c.is_running())
    }

    /// Connect to the cluster. A no-op (with a warning) when already
    /// connected.
    ///
    /// On failure the client is discarded so the next call builds a new one.
    pub async fn start(&self) -> CacheResult<()> {
        if let Some(client) = self.current_client() {
            if client.is_running() {
                warn!(
                    cluster = client.cluster_name(),
                    "client is already connected"
                );
                return Ok(());
            }
        }

        let client = match self.current_client() {
            Some(client) => client,
            None => {
                let settings = ConnectionSettings::from_config(&self.config);
                let client = self.connector.create(settings).map_err(|e| {
                    CacheError::Startup {
                        message: format!("could not create cluster client: {e}"),
                    }
                })?;
                self.set_client(Some(client.clone()));
                debug!(cluster = client.cluster_name(), "new cluster client created");
                client
            }
        };

        let connected =
            match tokio::time::timeout(self.config.connection_timeout(), client.connect()).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout {
                    operation: "connect".to_string(),
                }),
            };
        if let Err(e) = connected {
            self.set_client(None);
            return Err(CacheError::Startup {
                message: format!("could not connect to any cluster member: {e}"),
            });
        }

        info!(
            mode = %self.params.mode,
            partition_size = self.params.partition_size,
            max_body_size = self.params.max_body_size,
            cluster = client.cluster_name(),
            app_prefix = %self.config.app_prefix,
            "cache started"
        );
        Ok(())
    }

    /// Disconnect from the cluster after outstanding removals settle.
    ///
    /// With `destroy`, the client is also dropped so the next
    /// [`Self::start`] builds a fresh one.
    pub async fn shutdown(&self, destroy: bool) {
        let Some(client) = self.current_client() else {
            warn!("cache is already offline");
            return;
        };

        if client.is_running() {
            info!(cluster = client.cluster_name(), "shutting down cluster connection");
            self.removals.settle().await;
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "disconnect failed");
            }
            info!("cache is offline");
        } else {
            warn!("client is already disconnected");
        }

        if destroy {
            self.set_client(None);
        }
    }

    /// A lookup for `request` in the configured mode. Works while offline,
    /// every read is then a miss.
    pub fn make_lookup_context(&self, request: LookupRequest) -> LookupContext {
        let cluster = self.handle();
        match &self.strategy {
            Strategy::Unified(s) => {
                LookupContext::Unified(UnifiedLookup::new(s.clone(), cluster, request))
            }
            Strategy::Divided(s) => {
                LookupContext::Divided(DividedLookup::new(s.clone(), cluster, request))
            }
        }
    }

    /// An insert always follows the lookup that missed.
    pub fn make_insert_context(&self, lookup: LookupContext) -> InsertContext {
        match lookup {
            LookupContext::Unified(l) => InsertContext::Unified(UnifiedInsert::from_lookup(&l)),
            LookupContext::Divided(l) => InsertContext::Divided(DividedInsert::from_lookup(&l)),
        }
    }

    /// Header-only updates are not supported: a changed variant key would
    /// move the entry to another key. Invalidate and re-insert instead.
    pub fn update_headers(
        &self,
        _lookup: LookupContext,
        _headers: ResponseHeaders,
    ) -> CacheResult<()> {
        Err(CacheError::NotImplemented {
            operation: "update_headers".to_string(),
        })
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            name: CACHE_NAME.to_string(),
            supports_range_requests: true,
        }
    }

    /// Clean up the divided entry of `hash` whose body is missing.
    pub async fn on_missing_body(&self, hash: u64, version: i32, body_size: u64) -> RecoveryOutcome {
        let Strategy::Divided(strategy) = &self.strategy else {
            return RecoveryOutcome::NotApplicable;
        };
        let Some(cluster) = self.handle() else {
            warn!("cluster connection is offline, cleanup left to TTL");
            return RecoveryOutcome::Abandoned;
        };
        strategy
            .on_missing_body(&cluster, hash, version, body_size)
            .await
    }

    /// Same cleanup as [`Self::on_missing_body`].
    pub async fn on_version_mismatch(
        &self,
        hash: u64,
        version: i32,
        body_size: u64,
    ) -> RecoveryOutcome {
        let Strategy::Divided(strategy) = &self.strategy else {
            return RecoveryOutcome::NotApplicable;
        };
        let Some(cluster) = self.handle() else {
            warn!("cluster connection is offline, cleanup left to TTL");
            return RecoveryOutcome::Abandoned;
        };
        strategy
            .on_version_mismatch(&cluster, hash, version, body_size)
            .await
    }

    /// Wait for outstanding detached removals.
    pub async fn settle(&self) {
        self.removals.settle().await;
    }
}

/// Process-wide holder of one [`ClusterCache`].
#[derive(Debug)]
pub struct ClusterCacheFactory {
    connector: Arc<dyn ClusterConnector>,
    cache: Mutex<Option<Arc<ClusterCache>>>,
}

impl ClusterCacheFactory {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            cache: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        CACHE_NAME
    }

    /// The shared cache, built and started on first use.
    pub async fn get_cache(&self, config: CacheConfig) -> CacheResult<Arc<ClusterCache>> {
        let mut slot = self.cache.lock().await;
        if let Some(cache) = slot.as_ref() {
            return Ok(cache.clone());
        }
        let cache = Arc::new(ClusterCache::new(config, self.connector.clone()));
        cache.start().await?;
        *slot = Some(cache.clone());
        Ok(cache)
    }

    /// The shared cache, built without connecting on first use.
    pub async fn get_offline_cache(&self, config: CacheConfig) -> Arc<ClusterCache> {
        let mut slot = self.cache.lock().await;
        slot.get_or_insert_with(|| Arc::new(ClusterCache::new(config, self.connector.clone())))
            .clone()
    }
}
