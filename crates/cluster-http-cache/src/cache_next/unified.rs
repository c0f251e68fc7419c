//! Unified storage: the whole response as one entry under
//! `{prefix}:uni:{hash}`.
//!
//! A single put or remove replaces the entry atomically, so there is no
//! partial state to recover from. The version is still written to keep the
//! record layout uniform with divided mode.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::cache::InsertState;
use crate::entry::{decode, encode, BodyRecord, HeaderRecord, ResponseRecord};
use crate::error::CacheResult;
use crate::key::{unified_response_key, VariantKey};
use crate::types::{ByteRange, LookupRequest, LookupResult, ResponseHeaders};

use super::handle::ClusterHandle;
use super::version::next_version;

#[derive(Debug)]
pub(crate) struct UnifiedStrategy {
    app_prefix: String,
    max_body_size: u64,
}

impl UnifiedStrategy {
    pub(crate) fn new(app_prefix: impl Into<String>, max_body_size: u64) -> Self {
        Self {
            app_prefix: app_prefix.into(),
            max_body_size,
        }
    }

    pub(crate) fn response_key(&self, hash: u64) -> String {
        unified_response_key(&self.app_prefix, hash)
    }

    /// Undecodable responses read as absent.
    async fn read_response(
        &self,
        cluster: &ClusterHandle,
        key: &str,
    ) -> CacheResult<Option<ResponseRecord>> {
        let Some(raw) = cluster.get(key).await? else {
            return Ok(None);
        };
        match decode::<ResponseRecord>(raw) {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.is_miss_equivalent() => {
                warn!(key, error = %e, "undecodable response, treated as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Lookup of one response in unified mode.
#[derive(Debug)]
pub struct UnifiedLookup {
    strategy: Arc<UnifiedStrategy>,
    cluster: Option<ClusterHandle>,
    key: VariantKey,
    response_key: String,
    version: Option<i32>,
    body: Option<Bytes>,
}

impl UnifiedLookup {
    pub(crate) fn new(
        strategy: Arc<UnifiedStrategy>,
        cluster: Option<ClusterHandle>,
        request: LookupRequest,
    ) -> Self {
        let response_key = strategy.response_key(request.key.stable_hash());
        Self {
            strategy,
            cluster,
            key: request.key,
            response_key,
            version: None,
            body: None,
        }
    }

    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    pub fn response_key(&self) -> &str {
        &self.response_key
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Fetches the whole response; the body is kept for [`Self::get_body`].
    pub async fn get_headers(&mut self) -> LookupResult {
        self.version = None;
        self.body = None;
        let Some(cluster) = &self.cluster else {
            warn!(key = %self.response_key, "cluster connection is offline, lookup is a miss");
            return LookupResult::miss();
        };

        match self.strategy.read_response(cluster, &self.response_key).await {
            Ok(Some(response)) if response.header().variant_key == self.key => {
                let (header, body) = response.into_parts();
                debug!(key = %self.response_key, version = header.version, "response hit");
                self.version = Some(header.version);
                self.body = Some(body.buffer);
                LookupResult::hit(header.headers, header.body_size)
            }
            Ok(Some(_)) => {
                debug!(key = %self.response_key, "variant key differs, lookup is a miss");
                LookupResult::miss()
            }
            Ok(None) => LookupResult::miss(),
            Err(e) if e.is_connectivity() => {
                warn!(key = %self.response_key, error = %e, "cluster is unreachable, lookup is a miss");
                LookupResult::miss()
            }
            Err(e) => {
                warn!(key = %self.response_key, error = %e, "response lookup failed");
                LookupResult::miss()
            }
        }
    }

    pub async fn get_body(&mut self, range: ByteRange) -> Option<Bytes> {
        let body = self.body.as_ref()?;
        let range = range.clamp_to(body.len() as u64);
        Some(body.slice(range.begin as usize..range.end as usize))
    }
}

/// Insert of one response in unified mode. Nothing reaches the cluster until
/// the stream ends.
#[derive(Debug)]
pub struct UnifiedInsert {
    strategy: Arc<UnifiedStrategy>,
    cluster: Option<ClusterHandle>,
    key: VariantKey,
    response_key: String,
    version: i32,
    headers: Option<ResponseHeaders>,
    buffer: BytesMut,
    state: InsertState,
}

impl UnifiedInsert {
    pub(crate) fn from_lookup(lookup: &UnifiedLookup) -> Self {
        Self {
            strategy: lookup.strategy.clone(),
            cluster: lookup.cluster.clone(),
            key: lookup.key.clone(),
            response_key: lookup.response_key.clone(),
            version: next_version(lookup.version),
            headers: None,
            buffer: BytesMut::new(),
            state: InsertState::Open,
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn state(&self) -> InsertState {
        self.state
    }

    pub async fn insert_headers(&mut self, headers: ResponseHeaders, end_stream: bool) -> bool {
        if self.state != InsertState::Open || self.headers.is_some() {
            return false;
        }
        self.headers = Some(headers);
        if end_stream {
            self.commit().await;
        }
        self.state != InsertState::Aborted
    }

    pub async fn insert_body(&mut self, chunk: Bytes, end_stream: bool) -> bool {
        if self.state != InsertState::Open || self.headers.is_none() {
            return false;
        }
        if (self.buffer.len() + chunk.len()) as u64 > self.strategy.max_body_size {
            warn!(
                key = %self.response_key,
                max_body_size = self.strategy.max_body_size,
                "response body exceeds max body size, insert aborted"
            );
            self.abort();
            return false;
        }
        self.buffer.extend_from_slice(&chunk);
        if end_stream {
            self.commit().await;
        }
        self.state != InsertState::Aborted
    }

    fn abort(&mut self) {
        self.buffer.clear();
        self.headers = None;
        self.state = InsertState::Aborted;
    }

    async fn commit(&mut self) {
        let Some(cluster) = self.cluster.clone() else {
            warn!(key = %self.response_key, "cluster connection is offline, insert dropped");
            self.abort();
            return;
        };
        let Some(headers) = self.headers.take() else {
            self.abort();
            return;
        };

        let body = BodyRecord::new(self.buffer.split().freeze(), self.version);
        let header = HeaderRecord::new(headers, self.key.clone(), 0, self.version);
        let response = ResponseRecord::new(header, body);

        match cluster.put(&self.response_key, encode(&response)).await {
            Ok(()) => {
                debug!(
                    key = %self.response_key,
                    version = self.version,
                    body_size = response.header().body_size,
                    "response inserted"
                );
                self.state = InsertState::Committed;
            }
            Err(e) => {
                warn!(key = %self.response_key, error = %e, "failed to store response");
                self.abort();
            }
        }
    }
}
