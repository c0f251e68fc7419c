//! Request/response types exchanged with the HTTP filter.

use serde::{Deserialize, Serialize};

use crate::key::VariantKey;

/// Response header fields in received order. Duplicate names are kept.
///
/// ```
/// use cluster_http_cache::ResponseHeaders;
///
/// let headers = ResponseHeaders::new()
///     .with("Set-Cookie", "a=1")
///     .with("set-cookie", "b=2");
/// assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    fields: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field after the existing ones. Names keep their case.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Builder form of [`Self::append`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` (case-insensitive), in received order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `(name, value)` pairs in received order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields, duplicates included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub(crate) fn from_fields(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Half-open byte range `[begin, end)` of a response body.
///
/// ```
/// use cluster_http_cache::ByteRange;
///
/// let range = ByteRange::new(100, 300).clamp_to(250);
/// assert_eq!(range, ByteRange::new(100, 250));
/// assert_eq!(range.len(), 150);
/// assert!(ByteRange::new(300, 400).clamp_to(250).is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte, inclusive.
    pub begin: u64,
    /// End of the range, exclusive. Never below `begin`.
    pub end: u64,
}

impl ByteRange {
    /// An `end` below `begin` yields an empty range at `begin`.
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end: end.max(begin),
        }
    }

    /// The whole body of `body_size` bytes.
    pub fn full(body_size: u64) -> Self {
        Self::new(0, body_size)
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Intersect with a body of `body_size` bytes.
    pub fn clamp_to(&self, body_size: u64) -> Self {
        Self::new(self.begin.min(body_size), self.end.min(body_size))
    }
}

/// A cache lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// Key of the representation being looked up.
    pub key: VariantKey,
}

impl LookupRequest {
    pub fn new(key: VariantKey) -> Self {
        Self { key }
    }
}

/// Whether a looked up entry can be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntryStatus {
    /// Headers were found and the body can be requested.
    Ok,
    /// Miss, or an entry that must not be served.
    Unusable,
}

/// Result of fetching the headers of a cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub status: CacheEntryStatus,
    /// Stored response headers, present on a hit only.
    pub headers: Option<ResponseHeaders>,
    /// Total body size in bytes; 0 on a miss.
    pub body_size: u64,
}

impl LookupResult {
    /// Nothing usable was found.
    pub fn miss() -> Self {
        Self {
            status: CacheEntryStatus::Unusable,
            headers: None,
            body_size: 0,
        }
    }

    pub fn hit(headers: ResponseHeaders, body_size: u64) -> Self {
        Self {
            status: CacheEntryStatus::Ok,
            headers: Some(headers),
            body_size,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.status == CacheEntryStatus::Ok
    }
}

/// Capability report of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub name: String,
    /// Whether [`crate::ByteRange`] reads fetch only the bytes they cover.
    pub supports_range_requests: bool,
}
