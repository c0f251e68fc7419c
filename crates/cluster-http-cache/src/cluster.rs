//! Contact surface with the remote key/value cluster.
//!
//! The cache never reasons about cluster topology. It talks to one
//! [`ClusterClient`] built by a [`ClusterConnector`] from
//! [`ConnectionSettings`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::CacheConfig;
use crate::entry::EntryFactory;
use crate::error::CacheResult;

/// Client of the key/value cluster.
///
/// Every data operation returns [`crate::CacheError::Offline`] while the client
/// is not connected.
#[async_trait]
pub trait ClusterClient: Send + Sync + Debug {
    /// Name of the cluster this client joins.
    fn cluster_name(&self) -> &str;

    async fn connect(&self) -> CacheResult<()>;

    async fn disconnect(&self) -> CacheResult<()>;

    fn is_running(&self) -> bool;

    /// Get a value. Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> CacheResult<()>;

    /// Remove a key. Returns `Ok(())` even if the key does not exist.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Acquire the exclusive lock of `key` without waiting.
    async fn try_lock(&self, key: &str) -> CacheResult<bool>;

    async fn unlock(&self, key: &str) -> CacheResult<()>;
}

/// Builds cluster clients.
pub trait ClusterConnector: Send + Sync + Debug {
    fn create(&self, settings: ConnectionSettings) -> CacheResult<Arc<dyn ClusterClient>>;
}

/// Record kinds a client must be able to round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRegistry {
    pub factory_id: i32,
    pub type_ids: Vec<i32>,
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self {
            factory_id: EntryFactory::FACTORY_ID,
            type_ids: EntryFactory::type_ids().to_vec(),
        }
    }
}

impl EntryRegistry {
    pub fn is_registered(&self, type_id: i32) -> bool {
        self.type_ids.contains(&type_id)
    }
}

/// Everything a connector needs to build a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub cluster_name: String,
    pub members: Vec<String>,
    pub connection_timeout: Duration,
    /// Time-to-live applied to written entries (`None` = no expiry).
    pub entry_ttl: Option<Duration>,
    pub registry: EntryRegistry,
}

impl ConnectionSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            members: config.members.clone(),
            connection_timeout: config.connection_timeout(),
            entry_ttl: config.entry_ttl(),
            registry: EntryRegistry::default(),
        }
    }
}
