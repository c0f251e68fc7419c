//! Consistency contract tests: partitioning, versioned recovery, and the
//! orchestrator lifecycle against an in-memory cluster.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use cluster_http_cache::{
    decode, divided_header_key, encode, partition_key, unified_response_key, BodyRecord,
    ByteRange, CacheConfig, CacheError, CacheMode, ClusterCache, GridOp, HeaderRecord,
    InsertState, LookupRequest, MemoryConnector, MemoryGrid, RecoveryOutcome, ResponseHeaders,
    VariantKey,
};
use tracing_subscriber::fmt::MakeWriter;

const PREFIX: &str = "http-cache";

#[derive(Clone)]
struct MockWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MockWriter {
    type Writer = MockWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl MockWriter {
    fn output(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
    }
}

fn setup_capture() -> (MockWriter, tracing::subscriber::DefaultGuard) {
    let writer = MockWriter {
        buf: Arc::new(Mutex::new(Vec::new())),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (writer, tracing::subscriber::set_default(subscriber))
}

fn divided_config(partition_size: u64) -> CacheConfig {
    CacheConfig::default()
        .with_mode(CacheMode::Divided)
        .with_partition_size(partition_size)
}

async fn started(config: CacheConfig) -> (MemoryGrid, Arc<MemoryConnector>, ClusterCache) {
    let grid = MemoryGrid::new();
    let connector = Arc::new(MemoryConnector::new(grid.clone()));
    let cache = ClusterCache::new(config, connector.clone());
    cache.start().await.unwrap();
    (grid, connector, cache)
}

fn page() -> VariantKey {
    VariantKey::new("example.com", "/page").with_vary("Accept-Encoding", "gzip")
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Insert `data` for `key` in chunks of `chunk` bytes. Returns the version.
async fn insert(cache: &ClusterCache, key: &VariantKey, data: &[u8], chunk: usize) -> i32 {
    let lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    let mut insert = cache.make_insert_context(lookup);
    assert!(
        insert
            .insert_headers(ResponseHeaders::new().with("content-type", "text/plain"), false)
            .await
    );
    let mut chunks = data.chunks(chunk).peekable();
    while let Some(part) = chunks.next() {
        let last = chunks.peek().is_none();
        assert!(insert.insert_body(Bytes::copy_from_slice(part), last).await);
    }
    assert_eq!(insert.state(), InsertState::Committed);
    insert.version()
}

fn header_key(key: &VariantKey) -> String {
    divided_header_key(PREFIX, key.stable_hash())
}

#[tokio::test]
async fn test_divided_insert_splits_body_into_partitions() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 70).await;

    let header_key = header_key(&key);
    let header: HeaderRecord = decode(grid.get(&header_key).unwrap()).unwrap();
    assert_eq!(header.body_size, 250);
    assert_eq!(header.version, version);
    assert_eq!(header.variant_key, key);

    let sizes: Vec<usize> = (0..3)
        .map(|ordinal| {
            let raw = grid.get(&partition_key(&header_key, ordinal)).unwrap();
            let partition: BodyRecord = decode(raw).unwrap();
            assert_eq!(partition.version, version);
            partition.len()
        })
        .collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert!(!grid.contains(&partition_key(&header_key, 3)));
    assert_eq!(grid.keys_with_prefix(&header_key).len(), 4);
}

#[tokio::test]
async fn test_divided_lookup_returns_inserted_body() {
    let (_, _, cache) = started(divided_config(100)).await;
    let key = page();
    let data = body(250);
    insert(&cache, &key, &data, 33).await;

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    let result = lookup.get_headers().await;
    assert!(result.is_hit());
    assert_eq!(result.body_size, 250);
    assert_eq!(
        result.headers.unwrap().get("Content-Type"),
        Some("text/plain")
    );
    assert_eq!(
        lookup.get_body(ByteRange::full(250)).await.unwrap(),
        Bytes::from(data.clone())
    );
    assert_eq!(
        lookup.get_body(ByteRange::new(95, 205)).await.unwrap(),
        Bytes::copy_from_slice(&data[95..205])
    );
}

#[tokio::test]
async fn test_range_read_fetches_only_overlapping_partitions() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let data = body(250);
    insert(&cache, &key, &data, 100).await;

    // The last partition is gone, but a range that ends before it never
    // notices.
    let header_key = header_key(&key);
    grid.remove(&partition_key(&header_key, 2));

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    assert!(lookup.get_headers().await.is_hit());
    assert_eq!(
        lookup.get_body(ByteRange::new(10, 150)).await.unwrap(),
        Bytes::copy_from_slice(&data[10..150])
    );
    cache.settle().await;
    assert!(grid.contains(&header_key));
}

#[tokio::test]
async fn test_missing_partition_cleans_up_entry() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    insert(&cache, &key, &body(250), 100).await;

    let header_key = header_key(&key);
    grid.remove(&partition_key(&header_key, 1));

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    assert!(lookup.get_headers().await.is_hit());
    assert!(lookup.get_body(ByteRange::full(250)).await.is_none());
    // The failed lookup forgets its header.
    assert!(lookup.get_body(ByteRange::full(250)).await.is_none());

    cache.settle().await;
    assert!(grid.keys_with_prefix(&header_key).is_empty());
    assert!(!grid.is_locked(&header_key));

    let mut again = cache.make_lookup_context(LookupRequest::new(key));
    assert!(!again.get_headers().await.is_hit());
}

#[tokio::test]
async fn test_lost_partition_write_is_detected_on_lookup() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let header_key = header_key(&key);
    grid.drop_writes_to(partition_key(&header_key, 0));

    insert(&cache, &key, &body(150), 150).await;
    assert!(grid.contains(&header_key));

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    assert!(lookup.get_headers().await.is_hit());
    assert!(lookup.get_body(ByteRange::new(0, 10)).await.is_none());
    cache.settle().await;
    assert!(grid.keys_with_prefix(&header_key).is_empty());
}

#[tokio::test]
async fn test_version_mismatch_cleans_up_entry() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;

    let header_key = header_key(&key);
    let stale = BodyRecord::new(Bytes::from(body(50)), version.wrapping_add(1));
    grid.insert(partition_key(&header_key, 2), encode(&stale));

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    assert!(lookup.get_headers().await.is_hit());
    assert!(lookup.get_body(ByteRange::new(200, 250)).await.is_none());

    cache.settle().await;
    assert!(grid.keys_with_prefix(&header_key).is_empty());
}

#[tokio::test]
async fn test_recovery_cleans_matching_version() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;

    let outcome = cache
        .on_missing_body(key.stable_hash(), version, 250)
        .await;
    assert_eq!(outcome, RecoveryOutcome::Cleaned { partitions: 3 });

    cache.settle().await;
    assert!(grid.keys_with_prefix(&header_key(&key)).is_empty());
}

#[tokio::test]
async fn test_recovery_leaves_superseded_entry_alone() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let v1 = insert(&cache, &key, &body(250), 100).await;
    let v2 = insert(&cache, &key, &body(250), 100).await;
    assert_ne!(v1, v2);

    let removes = grid.remove_count();
    let outcome = cache.on_missing_body(key.stable_hash(), v1, 250).await;
    assert_eq!(outcome, RecoveryOutcome::Superseded);

    cache.settle().await;
    assert_eq!(grid.remove_count(), removes);
    let header_key = header_key(&key);
    let header: HeaderRecord = decode(grid.get(&header_key).unwrap()).unwrap();
    assert_eq!(header.version, v2);
    assert_eq!(grid.keys_with_prefix(&header_key).len(), 4);
    assert!(!grid.is_locked(&header_key));
}

#[tokio::test]
async fn test_recovery_skips_when_lock_is_held() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;

    let header_key = header_key(&key);
    assert!(grid.acquire_lock(header_key.clone()));
    let removes = grid.remove_count();

    let outcome = cache
        .on_version_mismatch(key.stable_hash(), version, 250)
        .await;
    assert_eq!(outcome, RecoveryOutcome::LockHeld);

    cache.settle().await;
    assert_eq!(grid.remove_count(), removes);
    assert_eq!(grid.keys_with_prefix(&header_key).len(), 4);
    assert!(grid.is_locked(&header_key));
}

#[tokio::test]
async fn test_concurrent_recovery_cleans_once() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;
    let hash = key.stable_hash();
    let removes = grid.remove_count();

    // The first recovery takes the lock and stalls on its header re-read;
    // the second one runs while the first is still inside the lock.
    grid.stall(GridOp::Get);
    let (a, b, _) = tokio::join!(
        cache.on_missing_body(hash, version, 250),
        cache.on_missing_body(hash, version, 250),
        async {
            tokio::task::yield_now().await;
            grid.resume();
        }
    );
    assert_eq!(a, RecoveryOutcome::Cleaned { partitions: 3 });
    assert_eq!(b, RecoveryOutcome::LockHeld);

    cache.settle().await;
    assert_eq!(grid.remove_count() - removes, 4);
    assert!(grid.keys_with_prefix(&header_key(&key)).is_empty());
    assert!(!grid.is_locked(&header_key(&key)));
}

#[tokio::test]
async fn test_insert_after_recovery_survives_the_cleanup() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();
    let v1 = insert(&cache, &key, &body(250), 100).await;
    let header_key = header_key(&key);

    grid.stall(GridOp::Remove);
    let outcome = cache.on_missing_body(key.stable_hash(), v1, 250).await;
    assert_eq!(outcome, RecoveryOutcome::Cleaned { partitions: 3 });

    // The cleanup still owns the lock, so a new insert cannot interleave
    // with its removals.
    assert!(grid.is_locked(&header_key));
    let lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    let mut early = cache.make_insert_context(lookup);
    assert!(!early.insert_headers(ResponseHeaders::new(), false).await);
    assert_eq!(early.state(), InsertState::Aborted);

    grid.resume();
    cache.settle().await;
    assert!(!grid.is_locked(&header_key));

    let data: Vec<u8> = body(180).into_iter().rev().collect();
    let v2 = insert(&cache, &key, &data, 64).await;
    cache.settle().await;

    let header: HeaderRecord = decode(grid.get(&header_key).unwrap()).unwrap();
    assert_eq!(header.version, v2);
    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    assert!(lookup.get_headers().await.is_hit());
    assert_eq!(
        lookup.get_body(ByteRange::full(180)).await.unwrap(),
        Bytes::from(data)
    );
}

#[tokio::test]
async fn test_recovery_offline_is_abandoned() {
    let (grid, connector, cache) = started(divided_config(100)).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;

    connector.last_client().unwrap().force_offline();
    let outcome = cache.on_missing_body(key.stable_hash(), version, 250).await;
    assert_eq!(outcome, RecoveryOutcome::Abandoned);
    assert_eq!(grid.keys_with_prefix(&header_key(&key)).len(), 4);
}

#[tokio::test]
async fn test_lookup_while_offline_is_a_miss() {
    let (_, connector, cache) = started(divided_config(100)).await;
    let key = page();
    insert(&cache, &key, &body(10), 10).await;

    connector.last_client().unwrap().force_offline();
    let mut lookup = cache.make_lookup_context(LookupRequest::new(key));
    assert!(!lookup.get_headers().await.is_hit());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_lookup_times_out_as_a_miss() {
    let (writer, _guard) = setup_capture();
    let config = divided_config(100).with_operation_timeout_ms(50);
    let (grid, _, cache) = started(config).await;
    let key = page();
    insert(&cache, &key, &body(10), 10).await;

    grid.stall(GridOp::Get);
    let mut lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    assert!(!lookup.get_headers().await.is_hit());
    assert!(writer.output().contains("cluster is unreachable, lookup is a miss"));

    grid.resume();
    let mut again = cache.make_lookup_context(LookupRequest::new(key));
    assert!(again.get_headers().await.is_hit());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_recovery_lock_is_abandoned() {
    let config = divided_config(100).with_operation_timeout_ms(50);
    let (grid, _, cache) = started(config).await;
    let key = page();
    let version = insert(&cache, &key, &body(250), 100).await;

    grid.stall(GridOp::TryLock);
    let outcome = cache.on_missing_body(key.stable_hash(), version, 250).await;
    assert_eq!(outcome, RecoveryOutcome::Abandoned);

    grid.resume();
    cache.settle().await;
    assert_eq!(grid.keys_with_prefix(&header_key(&key)).len(), 4);
    assert!(!grid.is_locked(&header_key(&key)));
}

#[tokio::test]
async fn test_second_insert_is_refused_while_first_is_open() {
    let (grid, _, cache) = started(divided_config(100)).await;
    let key = page();

    let first_lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    let mut first = cache.make_insert_context(first_lookup);
    assert!(first.insert_headers(ResponseHeaders::new(), false).await);

    let second_lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    let mut second = cache.make_insert_context(second_lookup);
    assert!(!second.insert_headers(ResponseHeaders::new(), true).await);
    assert_eq!(second.state(), InsertState::Aborted);

    assert!(first.insert_body(Bytes::from_static(b"done"), true).await);
    assert_eq!(first.state(), InsertState::Committed);
    assert!(!grid.is_locked(&header_key(&key)));
}

#[tokio::test]
async fn test_oversized_divided_insert_leaves_nothing() {
    let config = divided_config(100).with_max_body_size(300);
    let (grid, _, cache) = started(config).await;
    let key = page();

    let lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    let mut insert = cache.make_insert_context(lookup);
    assert!(insert.insert_headers(ResponseHeaders::new(), false).await);
    assert!(insert.insert_body(Bytes::from(body(250)), false).await);
    assert!(!insert.insert_body(Bytes::from(body(100)), true).await);
    assert_eq!(insert.state(), InsertState::Aborted);

    cache.settle().await;
    assert!(grid.keys_with_prefix(&header_key(&key)).is_empty());
    assert!(!grid.is_locked(&header_key(&key)));
}

#[tokio::test]
async fn test_unified_mode_stores_one_entry_and_never_recovers() {
    let config = CacheConfig::default().with_mode(CacheMode::Unified);
    let (grid, _, cache) = started(config).await;
    let key = page();
    let data = body(5000);
    insert(&cache, &key, &data, 1024).await;

    assert_eq!(grid.len(), 1);
    assert!(grid.contains(&unified_response_key(PREFIX, key.stable_hash())));

    let mut lookup = cache.make_lookup_context(LookupRequest::new(key.clone()));
    assert!(lookup.get_headers().await.is_hit());
    assert_eq!(
        lookup.get_body(ByteRange::new(4000, 6000)).await.unwrap(),
        Bytes::copy_from_slice(&data[4000..])
    );

    let outcome = cache.on_missing_body(key.stable_hash(), 1, 5000).await;
    assert_eq!(outcome, RecoveryOutcome::NotApplicable);
    cache.settle().await;
    assert_eq!(grid.remove_count(), 0);
}

#[tokio::test]
async fn test_start_twice_warns_and_keeps_connection() {
    let (writer, _guard) = setup_capture();
    let grid = MemoryGrid::new();
    let connector = Arc::new(MemoryConnector::new(grid));
    let cache = ClusterCache::new(divided_config(100), connector.clone());

    cache.start().await.unwrap();
    cache.start().await.unwrap();

    assert!(cache.is_connected());
    assert_eq!(connector.created(), 1);
    let output = writer.output();
    assert!(output.contains("cache started"));
    assert!(output.contains("client is already connected"));
}

#[tokio::test]
async fn test_unreachable_cluster_fails_startup() {
    let grid = MemoryGrid::new();
    grid.set_unreachable(true);
    let connector = Arc::new(MemoryConnector::new(grid.clone()));
    let cache = ClusterCache::new(CacheConfig::default(), connector.clone());

    let err = cache.start().await.unwrap_err();
    assert!(matches!(err, CacheError::Startup { .. }));
    assert!(!cache.is_connected());

    grid.set_unreachable(false);
    cache.start().await.unwrap();
    assert!(cache.is_connected());
    assert_eq!(connector.created(), 2);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (writer, _guard) = setup_capture();
    let grid = MemoryGrid::new();
    let cache = ClusterCache::new(
        CacheConfig::default(),
        Arc::new(MemoryConnector::new(grid)),
    );

    cache.shutdown(true).await;
    cache.start().await.unwrap();
    cache.shutdown(false).await;
    cache.shutdown(true).await;
    cache.shutdown(true).await;
    assert!(!cache.is_connected());

    let output = writer.output();
    assert!(output.contains("cache is already offline"));
    assert!(output.contains("client is already disconnected"));
}

#[tokio::test]
async fn test_update_headers_is_not_implemented() {
    let (_, _, cache) = started(divided_config(100)).await;
    let lookup = cache.make_lookup_context(LookupRequest::new(page()));
    let err = cache
        .update_headers(lookup, ResponseHeaders::new())
        .unwrap_err();
    assert!(matches!(err, CacheError::NotImplemented { .. }));
    assert!(!err.is_retryable());
}
