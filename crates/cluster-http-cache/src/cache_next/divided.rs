//! Divided storage: one header entry plus fixed-size body partitions.
//!
//! ```text
//! {prefix}:div:{hash}        header   (written last, under lock)
//! {prefix}:div:{hash}#0      body partition 0
//! {prefix}:div:{hash}#1      body partition 1
//! ...
//! ```
//!
//! Partitions are separate writes, so a lookup can observe a header whose
//! body is missing or tagged with another version. Either anomaly turns the
//! lookup into a miss and hands the key to recovery.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::cache::{InsertState, RecoveryOutcome};
use crate::entry::{decode, encode, BodyRecord, HeaderRecord};
use crate::error::{CacheError, CacheResult};
use crate::key::{divided_header_key, partition_key, VariantKey};
use crate::types::{ByteRange, LookupRequest, LookupResult, ResponseHeaders};

use super::handle::{ClusterHandle, HeldLock};
use super::recovery::{recover_impl, Anomaly};
use super::removal::DetachedRemovals;
use super::version::next_version;

#[derive(Debug)]
pub(crate) struct DividedStrategy {
    app_prefix: String,
    pub(crate) partition_size: u64,
    max_body_size: u64,
    pub(crate) removals: DetachedRemovals,
}

impl DividedStrategy {
    pub(crate) fn new(
        app_prefix: impl Into<String>,
        partition_size: u64,
        max_body_size: u64,
        removals: DetachedRemovals,
    ) -> Self {
        Self {
            app_prefix: app_prefix.into(),
            partition_size,
            max_body_size,
            removals,
        }
    }

    pub(crate) fn header_key(&self, hash: u64) -> String {
        divided_header_key(&self.app_prefix, hash)
    }

    /// Undecodable headers read as absent.
    pub(crate) async fn read_header(
        &self,
        cluster: &ClusterHandle,
        header_key: &str,
    ) -> CacheResult<Option<HeaderRecord>> {
        let Some(raw) = cluster.get(header_key).await? else {
            return Ok(None);
        };
        match decode::<HeaderRecord>(raw) {
            Ok(header) => Ok(Some(header)),
            Err(e) if e.is_miss_equivalent() => {
                warn!(key = header_key, error = %e, "undecodable header, treated as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Undecodable partitions read as absent.
    pub(crate) async fn read_partition(
        &self,
        cluster: &ClusterHandle,
        header_key: &str,
        ordinal: u64,
    ) -> CacheResult<Option<BodyRecord>> {
        let key = partition_key(header_key, ordinal);
        let Some(raw) = cluster.get(&key).await? else {
            return Ok(None);
        };
        match decode::<BodyRecord>(raw) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.is_miss_equivalent() => {
                warn!(key = %key, error = %e, "undecodable body partition, treated as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Length partition `ordinal` must have in a body of `body_size` bytes.
    fn expected_len(&self, ordinal: u64, body_size: u64) -> u64 {
        body_size
            .saturating_sub(ordinal * self.partition_size)
            .min(self.partition_size)
    }

    pub(crate) async fn on_missing_body(
        &self,
        cluster: &ClusterHandle,
        hash: u64,
        version: i32,
        body_size: u64,
    ) -> RecoveryOutcome {
        recover_impl(self, cluster, hash, version, body_size, Anomaly::MissingBody).await
    }

    /// Same cleanup as [`Self::on_missing_body`].
    pub(crate) async fn on_version_mismatch(
        &self,
        cluster: &ClusterHandle,
        hash: u64,
        version: i32,
        body_size: u64,
    ) -> RecoveryOutcome {
        recover_impl(
            self,
            cluster,
            hash,
            version,
            body_size,
            Anomaly::VersionMismatch,
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FoundHeader {
    version: i32,
    body_size: u64,
}

/// Lookup of one response in divided mode.
#[derive(Debug)]
pub struct DividedLookup {
    strategy: Arc<DividedStrategy>,
    cluster: Option<ClusterHandle>,
    key: VariantKey,
    hash: u64,
    header_key: String,
    found: Option<FoundHeader>,
}

impl DividedLookup {
    pub(crate) fn new(
        strategy: Arc<DividedStrategy>,
        cluster: Option<ClusterHandle>,
        request: LookupRequest,
    ) -> Self {
        let hash = request.key.stable_hash();
        let header_key = strategy.header_key(hash);
        Self {
            strategy,
            cluster,
            key: request.key,
            hash,
            header_key,
            found: None,
        }
    }

    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    /// Key of the header entry in the cluster.
    pub fn header_key(&self) -> &str {
        &self.header_key
    }

    /// Version of the header returned by the last hit.
    pub fn version(&self) -> Option<i32> {
        self.found.map(|f| f.version)
    }

    pub async fn get_headers(&mut self) -> LookupResult {
        self.found = None;
        let Some(cluster) = &self.cluster else {
            warn!(key = %self.header_key, "cluster connection is offline, lookup is a miss");
            return LookupResult::miss();
        };

        match self.strategy.read_header(cluster, &self.header_key).await {
            Ok(Some(header)) if header.variant_key == self.key => {
                debug!(
                    key = %self.header_key,
                    version = header.version,
                    body_size = header.body_size,
                    "header hit"
                );
                self.found = Some(FoundHeader {
                    version: header.version,
                    body_size: header.body_size,
                });
                LookupResult::hit(header.headers, header.body_size)
            }
            Ok(Some(_)) => {
                debug!(key = %self.header_key, "variant key differs, lookup is a miss");
                LookupResult::miss()
            }
            Ok(None) => LookupResult::miss(),
            Err(e) if e.is_connectivity() => {
                warn!(key = %self.header_key, error = %e, "cluster is unreachable, lookup is a miss");
                LookupResult::miss()
            }
            Err(e) => {
                warn!(key = %self.header_key, error = %e, "header lookup failed");
                LookupResult::miss()
            }
        }
    }

    /// Bytes of `range`, fetching only the partitions it overlaps.
    ///
    /// Returns `None` if there was no header hit, or if a partition is
    /// missing or belongs to another version. In the latter case recovery
    /// runs before returning and the lookup forgets its header.
    pub async fn get_body(&mut self, range: ByteRange) -> Option<Bytes> {
        let found = self.found?;
        let cluster = self.cluster.clone()?;
        let range = range.clamp_to(found.body_size);
        if range.is_empty() {
            return Some(Bytes::new());
        }

        let size = self.strategy.partition_size;
        let first = range.begin / size;
        let last = (range.end - 1) / size;
        let mut out = BytesMut::with_capacity(range.len() as usize);

        for ordinal in first..=last {
            let partition = match self
                .strategy
                .read_partition(&cluster, &self.header_key, ordinal)
                .await
            {
                Ok(partition) => partition,
                Err(e) => {
                    warn!(key = %self.header_key, ordinal, error = %e, "body lookup failed");
                    return None;
                }
            };

            let expected = self.strategy.expected_len(ordinal, found.body_size);
            let body = match partition {
                Some(body) if body.version != found.version => {
                    debug!(
                        key = %self.header_key,
                        ordinal,
                        header_version = found.version,
                        body_version = body.version,
                        "body version mismatch"
                    );
                    self.found = None;
                    self.strategy
                        .on_version_mismatch(&cluster, self.hash, found.version, found.body_size)
                        .await;
                    return None;
                }
                Some(body) if body.len() as u64 == expected => body,
                _ => {
                    debug!(key = %self.header_key, ordinal, "body partition missing");
                    self.found = None;
                    self.strategy
                        .on_missing_body(&cluster, self.hash, found.version, found.body_size)
                        .await;
                    return None;
                }
            };

            let start = ordinal * size;
            let lo = (range.begin.max(start) - start) as usize;
            let hi = (range.end.min(start + expected) - start) as usize;
            out.extend_from_slice(&body.buffer[lo..hi]);
        }

        Some(out.freeze())
    }
}

/// Insert of one response in divided mode.
///
/// The header key's lock is taken at [`Self::insert_headers`] and held until
/// the insert commits or aborts. Partitions are written as they fill; the
/// header is written last, so a reader never sees a header before its body.
#[derive(Debug)]
pub struct DividedInsert {
    strategy: Arc<DividedStrategy>,
    cluster: Option<ClusterHandle>,
    key: VariantKey,
    header_key: String,
    version: i32,
    headers: Option<ResponseHeaders>,
    buffer: BytesMut,
    next_ordinal: u64,
    total: u64,
    lock: Option<HeldLock>,
    state: InsertState,
}

impl DividedInsert {
    pub(crate) fn from_lookup(lookup: &DividedLookup) -> Self {
        Self {
            strategy: lookup.strategy.clone(),
            cluster: lookup.cluster.clone(),
            key: lookup.key.clone(),
            header_key: lookup.header_key.clone(),
            version: next_version(lookup.version()),
            headers: None,
            buffer: BytesMut::new(),
            next_ordinal: 0,
            total: 0,
            lock: None,
            state: InsertState::Open,
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn state(&self) -> InsertState {
        self.state
    }

    /// Returns whether the insert is still alive (open or committed).
    pub async fn insert_headers(&mut self, headers: ResponseHeaders, end_stream: bool) -> bool {
        if self.state != InsertState::Open || self.headers.is_some() {
            return false;
        }
        let Some(cluster) = self.cluster.clone() else {
            warn!(key = %self.header_key, "cluster connection is offline, insert dropped");
            self.state = InsertState::Aborted;
            return false;
        };

        match cluster.try_acquire(&self.header_key).await {
            Ok(Some(lock)) => self.lock = Some(lock),
            Ok(None) => {
                debug!(key = %self.header_key, "entry is locked by another context, insert dropped");
                self.state = InsertState::Aborted;
                return false;
            }
            Err(e) => {
                warn!(key = %self.header_key, error = %e, "failed to lock entry, insert dropped");
                self.state = InsertState::Aborted;
                return false;
            }
        }

        self.headers = Some(headers);
        if end_stream {
            self.commit(&cluster).await;
        }
        self.state != InsertState::Aborted
    }

    /// Returns whether the chunk was accepted.
    pub async fn insert_body(&mut self, chunk: Bytes, end_stream: bool) -> bool {
        if self.state != InsertState::Open || self.headers.is_none() {
            return false;
        }
        let Some(cluster) = self.cluster.clone() else {
            return false;
        };

        let total = self.total + chunk.len() as u64;
        if total > self.strategy.max_body_size {
            warn!(
                key = %self.header_key,
                max_body_size = self.strategy.max_body_size,
                "response body exceeds max body size, insert aborted"
            );
            self.abort(&cluster).await;
            return false;
        }
        self.total = total;
        self.buffer.extend_from_slice(&chunk);

        let size = self.strategy.partition_size as usize;
        while self.buffer.len() >= size {
            let data = self.buffer.split_to(size).freeze();
            if let Err(e) = self.flush(&cluster, data).await {
                warn!(key = %self.header_key, error = %e, "failed to store body partition");
                self.abort(&cluster).await;
                return false;
            }
        }

        if end_stream {
            self.commit(&cluster).await;
        }
        self.state != InsertState::Aborted
    }

    async fn flush(&mut self, cluster: &ClusterHandle, data: Bytes) -> CacheResult<()> {
        let key = partition_key(&self.header_key, self.next_ordinal);
        cluster
            .put(&key, encode(&BodyRecord::new(data, self.version)))
            .await?;
        self.next_ordinal += 1;
        Ok(())
    }

    async fn commit(&mut self, cluster: &ClusterHandle) {
        let result = self.write_rest(cluster).await;
        match result {
            Ok(()) => {
                debug!(
                    key = %self.header_key,
                    version = self.version,
                    body_size = self.total,
                    partitions = self.next_ordinal,
                    "response inserted"
                );
                self.state = InsertState::Committed;
                self.release().await;
            }
            Err(e) => {
                warn!(key = %self.header_key, error = %e, "failed to complete insert");
                self.abort(cluster).await;
            }
        }
    }

    async fn write_rest(&mut self, cluster: &ClusterHandle) -> CacheResult<()> {
        if !self.buffer.is_empty() {
            let data = self.buffer.split().freeze();
            self.flush(cluster, data).await?;
        }
        let headers = self
            .headers
            .take()
            .ok_or_else(|| CacheError::codec("insert committed without headers"))?;
        let header = HeaderRecord::new(headers, self.key.clone(), self.total, self.version);
        cluster.put(&self.header_key, encode(&header)).await
    }

    /// Drop whatever was written. The lock goes with the removals and is
    /// released once the last partition is gone.
    async fn abort(&mut self, cluster: &ClusterHandle) {
        self.buffer.clear();
        self.state = InsertState::Aborted;
        let keys: Vec<String> = (0..self.next_ordinal)
            .rev()
            .map(|ordinal| partition_key(&self.header_key, ordinal))
            .collect();
        if keys.is_empty() {
            self.release().await;
        } else {
            self.strategy
                .removals
                .spawn(cluster.clone(), keys, self.lock.take());
        }
    }

    async fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release().await;
        }
    }
}
