//! Cleanup of divided entries whose body is missing or belongs to another
//! write generation.
//!
//! Runs under the header key's lock so parallel lookups of the same broken
//! entry clean it up once. The header is re-read under the lock: if its
//! version moved on, a newer insert owns the key and nothing is removed.
//! Otherwise the removals run on a detached task that also owns the lock and
//! releases it after the header is gone. Failures are logged and swallowed;
//! the entry is then left to TTL eviction.

use tracing::{debug, warn};

use crate::cache::RecoveryOutcome;
use crate::error::CacheResult;
use crate::key::partition_key;

use super::divided::DividedStrategy;
use super::handle::ClusterHandle;

/// What triggered a recovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Anomaly {
    MissingBody,
    VersionMismatch,
}

impl Anomaly {
    fn as_str(&self) -> &'static str {
        match self {
            Self::MissingBody => "missing body",
            Self::VersionMismatch => "version mismatch",
        }
    }
}

pub(crate) async fn recover_impl(
    strategy: &DividedStrategy,
    cluster: &ClusterHandle,
    hash: u64,
    version: i32,
    body_size: u64,
    anomaly: Anomaly,
) -> RecoveryOutcome {
    let header_key = strategy.header_key(hash);

    match cleanup(strategy, cluster, &header_key, version, body_size).await {
        Ok(outcome) => {
            debug!(
                key = %header_key,
                version,
                anomaly = anomaly.as_str(),
                outcome = ?outcome,
                "recovery finished"
            );
            outcome
        }
        Err(e) if e.is_connectivity() => {
            warn!(key = %header_key, error = %e, "cluster is unreachable, cleanup left to TTL");
            RecoveryOutcome::Abandoned
        }
        Err(e) => {
            warn!(
                key = %header_key,
                anomaly = anomaly.as_str(),
                error = %e,
                "cleanup has failed"
            );
            RecoveryOutcome::Abandoned
        }
    }
}

async fn cleanup(
    strategy: &DividedStrategy,
    cluster: &ClusterHandle,
    header_key: &str,
    version: i32,
    body_size: u64,
) -> CacheResult<RecoveryOutcome> {
    let Some(lock) = cluster.try_acquire(header_key).await? else {
        return Ok(RecoveryOutcome::LockHeld);
    };

    let current = match strategy.read_header(cluster, header_key).await {
        Ok(current) => current,
        Err(e) => {
            lock.release().await;
            return Err(e);
        }
    };
    if current.is_some_and(|header| header.version != version) {
        // A newer insert replaced the header since the anomaly was observed.
        // Its partitions overwrite ours; leftovers of the old generation
        // expire by TTL.
        lock.release().await;
        return Ok(RecoveryOutcome::Superseded);
    }

    let last = body_size / strategy.partition_size;
    let mut keys: Vec<String> = (0..=last)
        .rev()
        .map(|ordinal| partition_key(header_key, ordinal))
        .collect();
    keys.push(header_key.to_string());
    strategy.removals.spawn(cluster.clone(), keys, Some(lock));

    Ok(RecoveryOutcome::Cleaned {
        partitions: last + 1,
    })
}
