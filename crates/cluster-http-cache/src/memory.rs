//! In-process cluster for tests and local development.
//!
//! A [`MemoryGrid`] plays the role of the remote cluster: any number of
//! [`MemoryCluster`] clients share it, the same way several cache instances
//! share one real cluster. The grid also exposes fault injection (lost
//! writes, unreachable members, externally held locks, stalled operations)
//! so partial-write and timing scenarios can be reproduced deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cluster::{ClusterClient, ClusterConnector, ConnectionSettings, EntryRegistry};
use crate::error::{CacheError, CacheResult};

#[derive(Debug)]
struct StoredValue {
    value: Bytes,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A client operation that [`MemoryGrid::stall`] can hold back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridOp {
    Get,
    Put,
    Remove,
    TryLock,
    Unlock,
}

#[derive(Debug, Default)]
struct GridState {
    entries: HashMap<String, StoredValue>,
    locks: HashSet<String>,
    dropped_writes: HashSet<String>,
    unreachable: bool,
    gates: HashMap<GridOp, Arc<Semaphore>>,
    puts: usize,
    removes: usize,
}

impl GridState {
    fn live(&mut self, key: &str) -> Option<&StoredValue> {
        let now = Utc::now();
        if self.entries.get(key).is_some_and(|v| !v.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

/// Shared state of an in-memory cluster.
#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    state: Arc<Mutex<GridState>>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GridState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a live value directly.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.state().live(key).map(|v| v.value.clone())
    }

    /// Write a value directly, bypassing lost-write rules and TTL.
    pub fn insert(&self, key: impl Into<String>, value: Bytes) {
        self.state().entries.insert(
            key.into(),
            StoredValue {
                value,
                expires_at: None,
            },
        );
    }

    /// Remove a value directly (simulates eviction).
    pub fn remove(&self, key: &str) -> bool {
        self.state().entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().live(key).is_some()
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        let state = self.state();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && v.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.state()
            .entries
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.state().locks.contains(key)
    }

    /// Take a key lock on behalf of some other party.
    pub fn acquire_lock(&self, key: impl Into<String>) -> bool {
        self.state().locks.insert(key.into())
    }

    pub fn release_lock(&self, key: &str) {
        self.state().locks.remove(key);
    }

    /// Accept future writes to `key` but never store them (simulates a
    /// client that timed out after the put left).
    pub fn drop_writes_to(&self, key: impl Into<String>) {
        self.state().dropped_writes.insert(key.into());
    }

    /// Make `connect` fail for every client.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Hold every client call of `op` until [`Self::resume`].
    pub fn stall(&self, op: GridOp) {
        self.state()
            .gates
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Let all stalled calls proceed.
    pub fn resume(&self) {
        let gates: Vec<_> = self.state().gates.drain().map(|(_, gate)| gate).collect();
        for gate in gates {
            gate.close();
        }
    }

    /// Number of accepted puts.
    pub fn put_count(&self) -> usize {
        self.state().puts
    }

    /// Number of remove calls.
    pub fn remove_count(&self) -> usize {
        self.state().removes
    }
}

/// Client of a [`MemoryGrid`].
#[derive(Debug)]
pub struct MemoryCluster {
    name: String,
    grid: MemoryGrid,
    ttl: Option<chrono::Duration>,
    registry: EntryRegistry,
    running: AtomicBool,
}

impl MemoryCluster {
    pub fn new(settings: &ConnectionSettings, grid: MemoryGrid) -> Self {
        Self {
            name: settings.cluster_name.clone(),
            grid,
            ttl: settings
                .entry_ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok()),
            registry: settings.registry.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Drop the connection without a disconnect call.
    pub fn force_offline(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn pass_gate(&self, op: GridOp) {
        let gate = self.grid.state().gates.get(&op).cloned();
        if let Some(gate) = gate {
            debug!(cluster = %self.name, op = ?op, "operation stalled");
            // Fails once the gate is closed, which is the release signal.
            let _ = gate.acquire().await;
        }
    }

    fn ensure_running(&self) -> CacheResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CacheError::Offline)
        }
    }

    fn check_registered(&self, value: &Bytes) -> CacheResult<()> {
        if value.len() < 4 {
            return Err(CacheError::Cluster {
                message: "value too short to carry a type id".to_string(),
            });
        }
        let type_id = i32::from_be_bytes([value[0], value[1], value[2], value[3]]);
        if !self.registry.is_registered(type_id) {
            return Err(CacheError::Cluster {
                message: format!("no serializer registered for type id {}", type_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    fn cluster_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> CacheResult<()> {
        if self.grid.state().unreachable {
            return Err(CacheError::Cluster {
                message: format!("no reachable member in cluster {}", self.name),
            });
        }
        self.running.store(true, Ordering::SeqCst);
        debug!(cluster = %self.name, "memory cluster connected");
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.running.store(false, Ordering::SeqCst);
        debug!(cluster = %self.name, "memory cluster disconnected");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.pass_gate(GridOp::Get).await;
        self.ensure_running()?;
        Ok(self.grid.get(key))
    }

    async fn put(&self, key: &str, value: Bytes) -> CacheResult<()> {
        self.pass_gate(GridOp::Put).await;
        self.ensure_running()?;
        self.check_registered(&value)?;
        let mut state = self.grid.state();
        state.puts += 1;
        if state.dropped_writes.contains(key) {
            debug!(key, "write dropped");
            return Ok(());
        }
        let expires_at = self.ttl.map(|ttl| Utc::now() + ttl);
        state
            .entries
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.pass_gate(GridOp::Remove).await;
        self.ensure_running()?;
        let mut state = self.grid.state();
        state.removes += 1;
        state.entries.remove(key);
        Ok(())
    }

    async fn try_lock(&self, key: &str) -> CacheResult<bool> {
        self.pass_gate(GridOp::TryLock).await;
        self.ensure_running()?;
        Ok(self.grid.state().locks.insert(key.to_string()))
    }

    async fn unlock(&self, key: &str) -> CacheResult<()> {
        self.pass_gate(GridOp::Unlock).await;
        self.ensure_running()?;
        self.grid.state().locks.remove(key);
        Ok(())
    }
}

/// Builds [`MemoryCluster`] clients over one grid.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    grid: MemoryGrid,
    created: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Arc<MemoryCluster>>>>,
}

impl MemoryConnector {
    pub fn new(grid: MemoryGrid) -> Self {
        Self {
            grid,
            ..Default::default()
        }
    }

    pub fn grid(&self) -> &MemoryGrid {
        &self.grid
    }

    /// Number of clients built so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The most recently built client.
    pub fn last_client(&self) -> Option<Arc<MemoryCluster>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ClusterConnector for MemoryConnector {
    fn create(&self, settings: ConnectionSettings) -> CacheResult<Arc<dyn ClusterClient>> {
        if settings.members.is_empty() {
            return Err(CacheError::Config {
                message: "no cluster members configured".to_string(),
            });
        }
        let client = Arc::new(MemoryCluster::new(&settings, self.grid.clone()));
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());
        debug!(cluster = %settings.cluster_name, "memory cluster client created");
        Ok(client)
    }
}
