//! Cache keys.
//!
//! A [`VariantKey`] identifies one cacheable representation. It hashes to a
//! stable 64-bit value that names the cluster entries:
//!
//! ```text
//! {prefix}:div:{hash}       header record (divided)
//! {prefix}:div:{hash}#{n}   body partition n (divided)
//! {prefix}:uni:{hash}       response record (unified)
//! ```

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::CacheResult;
use crate::wire;

/// Lookup key of a cached response, refined by the request headers the
/// response varies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Cluster the response was cached for. Empty unless set.
    pub cluster_name: String,
    /// Request authority, as received.
    pub host: String,
    pub path: String,
    /// Raw query string, as received.
    pub query: String,
    /// Request arrived over plain http rather than https.
    pub clear_http: bool,
    /// Request header values the response varies on, in vary order.
    pub vary: Vec<(String, String)>,
}

impl VariantKey {
    /// Key for `host` and `path` with no query and no vary dimensions.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set the cluster name the key belongs to.
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Mark the request as plain http. Http and https keys never collide.
    pub fn with_clear_http(mut self, clear_http: bool) -> Self {
        self.clear_http = clear_http;
        self
    }

    /// Add a vary dimension (header name is lowercased).
    pub fn with_vary(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.vary
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// Stable 64-bit hash: the first 8 bytes of SHA-256 over the wire form.
    pub fn stable_hash(&self) -> u64 {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        let digest = Sha256::digest(&out[..]);
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    pub(crate) fn write_to(&self, out: &mut BytesMut) {
        wire::put_str(out, &self.cluster_name);
        wire::put_str(out, &self.host);
        wire::put_str(out, &self.path);
        wire::put_str(out, &self.query);
        wire::put_bool(out, self.clear_http);
        wire::put_pairs(out, &self.vary);
    }

    pub(crate) fn read_from(input: &mut Bytes) -> CacheResult<Self> {
        Ok(Self {
            cluster_name: wire::get_str(input)?,
            host: wire::get_str(input)?,
            path: wire::get_str(input)?,
            query: wire::get_str(input)?,
            clear_http: wire::get_bool(input)?,
            vary: wire::get_pairs(input)?,
        })
    }
}

fn hash_hex(hash: u64) -> String {
    hex::encode(hash.to_be_bytes())
}

pub fn divided_header_key(prefix: &str, hash: u64) -> String {
    format!("{}:div:{}", prefix, hash_hex(hash))
}

/// Partition keys are the header key followed by `#` and the decimal ordinal.
pub fn partition_key(header_key: &str, ordinal: u64) -> String {
    format!("{}#{}", header_key, ordinal)
}

pub fn unified_response_key(prefix: &str, hash: u64) -> String {
    format!("{}:uni:{}", prefix, hash_hex(hash))
}
