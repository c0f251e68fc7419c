//! HTTP response cache stored in a remote key/value cluster.
//!
//! Responses are kept in the cluster instead of process memory, so every
//! proxy instance attached to the cluster shares one cache. Two storage
//! modes are available:
//!
//! - **Divided**: the header and fixed-size body partitions are separate
//!   entries. Range requests fetch only the overlapping partitions. Every
//!   insert carries a fresh version; a lookup that meets a missing or
//!   foreign-version partition returns a miss and cleans the entry up under
//!   the key's lock.
//! - **Unified**: the whole response is one entry, written and removed
//!   atomically.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use cluster_http_cache::{
//!     ByteRange, CacheConfig, ClusterCache, LookupRequest, MemoryConnector, MemoryGrid,
//!     ResponseHeaders, VariantKey,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let connector = Arc::new(MemoryConnector::new(MemoryGrid::new()));
//! let cache = ClusterCache::new(CacheConfig::from_env(), connector);
//! cache.start().await?;
//!
//! let key = VariantKey::new("example.com", "/index.html");
//! let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
//! if lookup.get_headers().await.is_hit() {
//!     let _body = lookup.get_body(ByteRange::new(0, 1024)).await;
//! } else {
//!     let mut insert = cache.make_insert_context(lookup);
//!     insert
//!         .insert_headers(ResponseHeaders::new().with("content-type", "text/html"), false)
//!         .await;
//!     insert.insert_body(Bytes::from_static(b"<html></html>"), true).await;
//! }
//!
//! cache.shutdown(true).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `CLUSTER_CACHE_MODE` | `unified` or `divided` (default: `divided`) |
//! | `CLUSTER_CACHE_PARTITION_SIZE` | Body partition size in bytes (default: 2048) |
//! | `CLUSTER_CACHE_MAX_BODY_SIZE` | Largest cacheable body in bytes (default: 4 MiB) |
//! | `CLUSTER_CACHE_APP_PREFIX` | Key namespace (default: `http-cache`) |
//! | `CLUSTER_CACHE_CLUSTER_NAME` | Cluster to join (default: `dev`) |
//! | `CLUSTER_CACHE_MEMBERS` | Comma separated member addresses |
//! | `CLUSTER_CACHE_CONNECTION_TIMEOUT_MS` | Connect timeout (default: 5000) |
//! | `CLUSTER_CACHE_OPERATION_TIMEOUT_MS` | Per-operation timeout (default: 1000) |
//! | `CLUSTER_CACHE_ENTRY_TTL` | Entry time-to-live in seconds, 0 = none (default: 300) |

pub mod cache;
pub mod cluster;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod memory;
pub mod types;
mod wire;

// Re-export main types
pub use cache::{
    ClusterCache, ClusterCacheFactory, DividedInsert, DividedLookup, InsertContext, InsertState,
    LookupContext, RecoveryOutcome, UnifiedInsert, UnifiedLookup, CACHE_NAME,
};
pub use cluster::{ClusterClient, ClusterConnector, ConnectionSettings, EntryRegistry};
pub use config::{CacheConfig, CacheMode, StorageParams};
pub use entry::{
    decode, decode_entry, encode, encode_entry, BodyRecord, Entry, EntryFactory, HeaderRecord,
    ResponseRecord, WireRecord, BODY_TYPE_ID, HEADER_TYPE_ID, RESPONSE_TYPE_ID,
};
pub use error::{CacheError, CacheResult};
pub use key::{divided_header_key, partition_key, unified_response_key, VariantKey};
pub use memory::{GridOp, MemoryCluster, MemoryConnector, MemoryGrid};
pub use types::{
    ByteRange, CacheEntryStatus, CacheInfo, LookupRequest, LookupResult, ResponseHeaders,
};
